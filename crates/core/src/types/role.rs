//! Marketplace roles.

use serde::{Deserialize, Serialize};

use crate::eligibility::AllocationSnapshot;

/// Role a user registers for.
///
/// `Admin` is a singleton across the marketplace and every `Vendor` runs
/// exactly one shop; see [`crate::eligibility`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "registration.user_role", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Browses shops and places orders.
    #[default]
    Customer,
    /// Manages the items of a single shop.
    Vendor,
    /// Manages the shop catalogue.
    Admin,
}

impl Role {
    /// All roles, in the order the registration form lists them.
    pub const ALL: [Self; 3] = [Self::Customer, Self::Admin, Self::Vendor];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Vendor => "vendor",
            Self::Admin => "admin",
        }
    }

    /// Route the user lands on after a completed registration or sign-in.
    #[must_use]
    pub const fn landing_path(self) -> &'static str {
        match self {
            Self::Admin => "/admin/shops",
            Self::Vendor => "/vendor/items",
            Self::Customer => "/",
        }
    }

    /// Roles the registration form should offer for the given snapshot.
    ///
    /// `admin` disappears once an admin exists and `vendor` disappears once
    /// every shop has a vendor.
    #[must_use]
    pub fn selectable(snapshot: &AllocationSnapshot, has_free_shop: bool) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|role| match role {
                Self::Customer => true,
                Self::Admin => !snapshot.admin_exists,
                Self::Vendor => has_free_shop,
            })
            .collect()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "customer" => Ok(Self::Customer),
            "vendor" => Ok(Self::Vendor),
            "admin" => Ok(Self::Admin),
            other => Err(format!("invalid role: {other}")),
        }
    }
}
