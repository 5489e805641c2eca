//! Types shared by the VocalWise store and client crates: identifiers, domain
//! models, protocol constants and input validation.

pub mod clock;
pub mod constants;
pub mod error;
pub mod models;
pub mod types;
pub mod validation;

pub use error::ValidationError;
