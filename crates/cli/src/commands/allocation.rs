//! Allocation report.
//!
//! Prints whether the admin slot is taken and which shops have a vendor,
//! as JSON on stdout.

use canteen_registration::store::{ProfileFilter, count_by_role};
use canteen_registration::{PgProfileStore, ProfileStore, RegistrationConfig};

/// Print the current allocation snapshot.
pub async fn run(config: &RegistrationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let database_url = config.require_database_url()?;

    tracing::info!("Connecting to registration database...");
    let store = PgProfileStore::connect(database_url).await?;

    let profiles = store.query(ProfileFilter::All).await?;
    let snapshot = store.allocation_snapshot().await?;

    let report = serde_json::json!({
        "allocation": snapshot,
        "profiles": count_by_role(&profiles),
    });

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
