//! # sndsink-core
//!
//! Core types, configuration, and error handling shared by the sndsink
//! output adapter and its hosts.

pub mod config;
pub mod error;
pub mod types;

pub use config::SinkConfig;
pub use error::{Error, Result};
pub use types::*;
