//! `pantry-auth`: bearer token verification for the API.
//!
//! Tokens are issued by the external authentication provider; this crate only
//! verifies them and exposes the claims. It is decoupled from HTTP.

pub mod claims;
pub mod jwt;

pub use claims::{AccessClaims, Role, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
