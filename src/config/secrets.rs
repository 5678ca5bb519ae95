//! Secret handling utilities.
//!
//! Re-exports secrecy types so callers can expose the database URL only at
//! the point of connecting.

pub use secrecy::{ExposeSecret, SecretString};
