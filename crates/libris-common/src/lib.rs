//! Libris Common - Shared Types and Utilities
//!
//! Foundational types, error handling, and configuration used by the Libris
//! document store, the catalog runner, and the command line tool.
//!
//! Key Features:
//! - Unified error type with user vs system classification
//! - Shared enums (sort direction, explain verbosity)
//! - Configuration structures loadable from TOML
//!
//! @version 0.1.0
//! @author Libris Development Team

pub mod config;
pub mod error;
pub mod types;

pub use error::{LibrisError, Result};
pub use types::*;
