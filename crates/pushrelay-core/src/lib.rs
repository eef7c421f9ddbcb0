//! Shared building blocks for the push relay: configuration, the common error
//! type, and the JSON envelope delivered to session callback URLs.

pub mod config;
pub mod error;
pub mod push;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
