//! Core types for Canteen.
//!
//! This module provides type-safe wrappers for the registration domain.

pub mod email;
pub mod id;
pub mod profile;
pub mod request;
pub mod role;

pub use email::{Email, EmailError};
pub use id::{AccountId, ShopId};
pub use profile::{Profile, ProfileClaim, Shop};
pub use request::{FormError, RegistrationForm, RegistrationRequest};
pub use role::Role;
