//! # Delete propagation
//!
//! When a key disappears from the materialized table the output stream can
//! either stay silent or carry a tombstone (same key, null value) so that a
//! compacted output topic forgets the key too.
//!
//! ```rust
//! use streamagg_cdc::DeletePolicy;
//!
//! assert!(!DeletePolicy::default().emits_tombstone());
//! assert!(DeletePolicy::Tombstone.emits_tombstone());
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CdcError;

/// What to publish when a key is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Publish nothing
    #[default]
    Drop,
    /// Publish a record with the same key and a null value
    Tombstone,
}

impl DeletePolicy {
    /// Whether deletes produce an output record
    pub const fn emits_tombstone(self) -> bool {
        matches!(self, Self::Tombstone)
    }
}

impl FromStr for DeletePolicy {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "tombstone" => Ok(Self::Tombstone),
            other => Err(CdcError::config(format!("unknown delete policy: {other}"))),
        }
    }
}

impl std::fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Tombstone => write!(f, "tombstone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("drop".parse::<DeletePolicy>().unwrap(), DeletePolicy::Drop);
        assert_eq!(
            "Tombstone".parse::<DeletePolicy>().unwrap(),
            DeletePolicy::Tombstone
        );
        assert!("forget".parse::<DeletePolicy>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let policy: DeletePolicy = serde_json::from_str("\"tombstone\"").unwrap();
        assert_eq!(policy, DeletePolicy::Tombstone);
        assert_eq!(DeletePolicy::Drop.to_string(), "drop");
    }
}
