//! HiveStore Common - Shared types and utilities
//!
//! This crate provides the identifiers, error taxonomy and configuration
//! types shared by the layout engine and the fragment store.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
