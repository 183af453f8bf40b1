//! Libris Config - Configuration Structures
//!
//! Configuration types for the document engine, the catalog runner, and
//! logging. Every section has defaults matching the stock catalog script, so
//! an empty or partial TOML file is valid.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::types::ExplainVerbosity;
use crate::{LibrisError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Engine Configuration
// =============================================================================

/// Configuration for the document engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the serialized size of one document, in bytes.
    pub max_document_size: usize,
    pub max_collections: usize,
    /// Create a collection on first write instead of failing.
    pub auto_create_collections: bool,
    pub validate_on_insert: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_document_size: 16 * 1024 * 1024, // 16 MB
            max_collections: 1000,
            auto_create_collections: true,
            validate_on_insert: true,
        }
    }
}

// =============================================================================
// Catalog Configuration
// =============================================================================

/// Configuration for the catalog runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub collection: String,
    pub page_size: usize,
    pub explain_verbosity: ExplainVerbosity,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            collection: "books".to_string(),
            page_size: 5,
            explain_verbosity: ExplainVerbosity::ExecutionStats,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Configuration for log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Top-level Libris configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LibrisConfig {
    pub engine: EngineConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

impl LibrisConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| LibrisError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.catalog.collection.is_empty() {
            return Err(LibrisError::Configuration(
                "catalog.collection must not be empty".to_string(),
            ));
        }
        if self.catalog.page_size == 0 {
            return Err(LibrisError::Configuration(
                "catalog.page_size must be at least 1".to_string(),
            ));
        }
        if self.engine.max_collections == 0 {
            return Err(LibrisError::Configuration(
                "engine.max_collections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LibrisConfig::default();
        assert_eq!(config.catalog.collection, "books");
        assert_eq!(config.catalog.page_size, 5);
        assert_eq!(config.logging.level, "info");
        assert!(config.engine.auto_create_collections);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = LibrisConfig::from_toml_str(
            r#"
            [catalog]
            page_size = 3
            explain_verbosity = "queryPlanner"
            "#,
        )
        .unwrap();

        assert_eq!(config.catalog.page_size, 3);
        assert_eq!(config.catalog.collection, "books");
        assert_eq!(config.catalog.explain_verbosity, ExplainVerbosity::QueryPlanner);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_invalid_page_size() {
        let result = LibrisConfig::from_toml_str("[catalog]\npage_size = 0\n");
        assert!(matches!(result, Err(LibrisError::Configuration(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = LibrisConfig::from_toml_str("[catalog\n");
        assert!(matches!(result, Err(LibrisError::Configuration(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let config = LibrisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = LibrisConfig::from_file(file.path().with_extension("absent"));
        assert!(matches!(missing, Err(LibrisError::Io(_))));
    }
}
