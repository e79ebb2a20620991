//! Shared types for the Oh Sheets workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
