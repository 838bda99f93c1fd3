//! Registration eligibility rules.
//!
//! Two global allocation rules apply to every new registration:
//!
//! - at most one account holds the `admin` role
//! - each shop has at most one vendor
//!
//! [`check`] evaluates a request against an [`AllocationSnapshot`] taken from
//! the current profiles. It is a pure function; callers must take a fresh
//! snapshot for every attempt because a stale one can admit a second admin
//! or vendor.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Profile, ProfileClaim, Role, Shop, ShopId};

/// Why a registration was refused by the allocation rules.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rejection {
    /// An admin account already exists.
    #[error("admin-exists")]
    AdminExists,
    /// A vendor registration did not name a shop.
    #[error("shop-required")]
    ShopRequired,
    /// The shop already has a vendor.
    #[error("shop-taken")]
    ShopTaken,
}

impl Rejection {
    /// Stable reason code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::AdminExists => "admin-exists",
            Self::ShopRequired => "shop-required",
            Self::ShopTaken => "shop-taken",
        }
    }

    /// Message shown next to the form.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::AdminExists => "Admin already exists",
            Self::ShopRequired => "Shop selection required",
            Self::ShopTaken => "Shop already has a vendor",
        }
    }
}

/// Read-only view of the allocated admin and vendor slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSnapshot {
    /// Whether any profile holds the admin role.
    pub admin_exists: bool,
    /// Shops that already have a vendor.
    pub shops_taken_by_vendor: BTreeSet<ShopId>,
}

impl AllocationSnapshot {
    /// Derive the snapshot from a set of profiles.
    ///
    /// Customer profiles are ignored, so passing every profile or only the
    /// admin and vendor ones gives the same result.
    pub fn from_profiles<'a>(profiles: impl IntoIterator<Item = &'a Profile>) -> Self {
        let mut snapshot = Self::default();
        for profile in profiles {
            if profile.is_admin() {
                snapshot.admin_exists = true;
            }
            if let Some(shop) = profile.vendor_shop() {
                snapshot.shops_taken_by_vendor.insert(shop.clone());
            }
        }
        snapshot
    }

    /// Returns `true` if the shop already has a vendor.
    #[must_use]
    pub fn is_shop_taken(&self, shop: &ShopId) -> bool {
        self.shops_taken_by_vendor.contains(shop)
    }
}

/// Decide whether a claim may be registered against the snapshot.
///
/// # Errors
///
/// - `Rejection::AdminExists` for an admin claim while an admin exists
/// - `Rejection::ShopRequired` for a vendor claim without a shop
/// - `Rejection::ShopTaken` for a vendor claim on a shop that has a vendor
pub fn check(claim: &ProfileClaim, snapshot: &AllocationSnapshot) -> Result<(), Rejection> {
    match claim.role {
        Role::Customer => Ok(()),
        Role::Admin if snapshot.admin_exists => Err(Rejection::AdminExists),
        Role::Admin => Ok(()),
        Role::Vendor => {
            let shop = claim
                .shop_id
                .as_ref()
                .filter(|shop| !shop.is_blank())
                .ok_or(Rejection::ShopRequired)?;
            if snapshot.is_shop_taken(shop) {
                return Err(Rejection::ShopTaken);
            }
            Ok(())
        }
    }
}

/// Shops from the catalogue that do not have a vendor yet.
#[must_use]
pub fn available_shops<'a>(shops: &'a [Shop], snapshot: &AllocationSnapshot) -> Vec<&'a Shop> {
    shops
        .iter()
        .filter(|shop| !snapshot.is_shop_taken(&shop.id))
        .collect()
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn shop_id() -> impl Strategy<Value = ShopId> {
        "shop-[0-9]{1,2}".prop_map(ShopId::new)
    }

    fn snapshot() -> impl Strategy<Value = AllocationSnapshot> {
        (any::<bool>(), prop::collection::btree_set(shop_id(), 0..8)).prop_map(
            |(admin_exists, shops_taken_by_vendor)| AllocationSnapshot {
                admin_exists,
                shops_taken_by_vendor,
            },
        )
    }

    proptest! {
        /// An admin claim passes exactly when no admin exists.
        #[test]
        fn admin_claim_follows_admin_slot(snapshot in snapshot()) {
            let result = check(&ProfileClaim::new(Role::Admin, None), &snapshot);
            prop_assert_eq!(result.is_err(), snapshot.admin_exists);
        }

        /// A vendor claim passes exactly when its shop is free.
        #[test]
        fn vendor_claim_follows_shop_slot(snapshot in snapshot(), shop in shop_id()) {
            let taken = snapshot.is_shop_taken(&shop);
            let result = check(&ProfileClaim::new(Role::Vendor, Some(shop)), &snapshot);
            if taken {
                prop_assert_eq!(result, Err(Rejection::ShopTaken));
            } else {
                prop_assert_eq!(result, Ok(()));
            }
        }

        /// Customers are never rejected.
        #[test]
        fn customer_claim_always_passes(snapshot in snapshot()) {
            prop_assert_eq!(check(&ProfileClaim::customer(), &snapshot), Ok(()));
        }
    }
}
