//! `pantry-core`: shared identifiers and the domain error model.
//!
//! This crate has no infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{ClientId, UserId, CLIENT_ID_MAX_LEN};
