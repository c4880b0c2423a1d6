//! ObjectIO Common - Shared types and utilities
//!
//! This crate provides the bucket and layout types, error definitions, and
//! configuration used across the bucket index components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigHandle, ConfigSnapshot, IndexConfig};
pub use error::{Error, Result};
pub use types::*;
