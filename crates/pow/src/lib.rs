//! Compact targets and header proof-of-work checks.

pub mod difficulty;
pub mod validation;

pub use validation::{validate_pow_header, PowError};
