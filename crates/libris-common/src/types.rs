//! Libris Types - Shared Enumerations
//!
//! Small enums shared between the document store and its callers.
//!
//! @version 0.1.0
//! @author Libris Development Team

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Sort Direction
// =============================================================================

/// Direction of a sort key or index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Parse the shell convention: `1` ascending, `-1` descending.
    pub fn from_i64(n: i64) -> Option<Self> {
        match n {
            1 => Some(Self::Ascending),
            -1 => Some(Self::Descending),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }

    pub fn is_ascending(self) -> bool {
        self == Self::Ascending
    }

    pub fn reverse(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

// =============================================================================
// Explain Verbosity
// =============================================================================

/// How much detail an explain call reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExplainVerbosity {
    /// Report the chosen plan without running it.
    QueryPlanner,
    /// Run the winning plan and report counters.
    #[default]
    ExecutionStats,
}

impl ExplainVerbosity {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "queryPlanner" => Some(Self::QueryPlanner),
            "executionStats" => Some(Self::ExecutionStats),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_direction() {
        assert_eq!(SortDirection::from_i64(1), Some(SortDirection::Ascending));
        assert_eq!(SortDirection::from_i64(-1), Some(SortDirection::Descending));
        assert_eq!(SortDirection::from_i64(0), None);
        assert_eq!(SortDirection::Descending.to_string(), "-1");
        assert_eq!(SortDirection::Ascending.reverse(), SortDirection::Descending);
        assert!(SortDirection::Ascending.is_ascending());
        assert!(!SortDirection::Ascending.reverse().is_ascending());
    }

    #[test]
    fn test_explain_verbosity() {
        assert_eq!(
            ExplainVerbosity::from_name("executionStats"),
            Some(ExplainVerbosity::ExecutionStats)
        );
        assert_eq!(ExplainVerbosity::from_name("allPlans"), None);
    }
}
