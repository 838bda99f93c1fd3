//! Canteen Core - Shared types library.
//!
//! This crate provides the types used by every Canteen component:
//! - `registration` - Account registration and email-verification lifecycle
//! - `cli` - Command-line tools for migrations and operator checks
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database
//! access, no identity-provider clients. This keeps it lightweight and allows
//! it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for emails, account and shop keys, roles, and profiles
//! - [`eligibility`] - Admin-singleton and vendor/shop exclusivity rules

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod eligibility;
pub mod types;

pub use eligibility::{AllocationSnapshot, Rejection, available_shops, check};
pub use types::*;
