//! Profile records and shop catalogue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Email, Role, ShopId};

/// The durable application record of a completed registration.
///
/// A profile only ever exists for a verified identity; its presence is the
/// signal that registration finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Identity-provider account this profile belongs to.
    pub account_id: AccountId,
    /// Verified email address of the account.
    pub email: Email,
    /// Role granted at registration.
    pub role: Role,
    /// Shop run by the account; `Some` only for vendors.
    pub shop_id: Option<ShopId>,
    /// When the profile was committed.
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Build a profile from a claim, dropping any shop for non-vendor roles.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        email: Email,
        claim: ProfileClaim,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            email,
            role: claim.role,
            shop_id: claim.shop_id,
            created_at,
        }
    }

    /// Returns `true` if this profile holds the admin slot.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The shop this profile holds as a vendor, if any.
    #[must_use]
    pub fn vendor_shop(&self) -> Option<&ShopId> {
        match self.role {
            Role::Vendor => self.shop_id.as_ref(),
            Role::Customer | Role::Admin => None,
        }
    }
}

/// The role and shop a user asks for, without any credentials.
///
/// This is what gets committed once the identity is verified, and what a
/// federated sign-in submits directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileClaim {
    /// Requested role.
    pub role: Role,
    /// Requested shop (vendors only).
    pub shop_id: Option<ShopId>,
}

impl ProfileClaim {
    /// Create a claim. A shop is only kept for vendors, and blank shop ids
    /// are treated as missing.
    #[must_use]
    pub fn new(role: Role, shop_id: Option<ShopId>) -> Self {
        let shop_id = match role {
            Role::Vendor => shop_id.filter(|shop| !shop.is_blank()),
            Role::Customer | Role::Admin => None,
        };
        Self { role, shop_id }
    }

    /// A plain customer claim.
    #[must_use]
    pub const fn customer() -> Self {
        Self {
            role: Role::Customer,
            shop_id: None,
        }
    }
}

/// A shop from the catalogue, as offered to prospective vendors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shop {
    /// Catalogue id.
    pub id: ShopId,
    /// Display name.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_drops_shop_for_non_vendors() {
        let claim = ProfileClaim::new(Role::Admin, Some(ShopId::new("shop-1")));
        assert_eq!(claim.shop_id, None);

        let claim = ProfileClaim::new(Role::Vendor, Some(ShopId::new("shop-1")));
        assert_eq!(claim.shop_id, Some(ShopId::new("shop-1")));
    }

    #[test]
    fn test_claim_treats_blank_shop_as_missing() {
        let claim = ProfileClaim::new(Role::Vendor, Some(ShopId::new(" ")));
        assert_eq!(claim.shop_id, None);
    }

    #[test]
    fn test_vendor_shop_only_for_vendors() {
        let email = Email::parse("a@x.com").unwrap_or_else(|e| panic!("{e}"));
        let vendor = Profile::new(
            AccountId::new("uid-1"),
            email.clone(),
            ProfileClaim::new(Role::Vendor, Some(ShopId::new("shop-1"))),
            Utc::now(),
        );
        assert_eq!(vendor.vendor_shop(), Some(&ShopId::new("shop-1")));

        let admin = Profile::new(
            AccountId::new("uid-2"),
            email,
            ProfileClaim::new(Role::Admin, None),
            Utc::now(),
        );
        assert!(admin.is_admin());
        assert_eq!(admin.vendor_shop(), None);
    }
}
