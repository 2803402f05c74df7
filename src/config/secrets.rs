//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for configuration values that must not
//! be logged.

pub use secrecy::{ExposeSecret, SecretString};
