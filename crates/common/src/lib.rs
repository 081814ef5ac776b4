//! Common types shared by the studio gateway crates
//!
//! `Secret` carries credential material (API keys) through the pool without
//! ever exposing it in logs. `Error` is the configuration error type used by
//! the service when loading its TOML config and credential sources.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
