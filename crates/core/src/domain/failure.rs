use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    Application,
    Connectivity,
    Authentication,
    Authorization,
    Timeout,
    Verification,
    Unknown,
}

/// Why a node failed, in a form that survives serialization across processes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FailureInfo {
    pub error_message: String,
    #[serde(default)]
    pub failure_types: BTreeSet<FailureType>,
}

impl FailureInfo {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            failure_types: BTreeSet::new(),
        }
    }

    pub fn with_type(mut self, failure_type: FailureType) -> Self {
        self.failure_types.insert(failure_type);
        self
    }

    /// Failure raised by the engine itself while running a node.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self::new(error.to_string()).with_type(FailureType::Application)
    }

    pub fn has_any_type(&self, types: &BTreeSet<FailureType>) -> bool {
        types.is_empty() || !self.failure_types.is_disjoint(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_info_types() {
        let info = FailureInfo::new("boom").with_type(FailureType::Timeout);
        assert_eq!(info.error_message, "boom");
        assert!(info.failure_types.contains(&FailureType::Timeout));
    }

    #[test]
    fn test_has_any_type() {
        let info = FailureInfo::new("boom").with_type(FailureType::Connectivity);
        let empty = BTreeSet::new();
        assert!(info.has_any_type(&empty));

        let wanted: BTreeSet<_> = [FailureType::Connectivity, FailureType::Timeout].into();
        assert!(info.has_any_type(&wanted));

        let other: BTreeSet<_> = [FailureType::Verification].into();
        assert!(!info.has_any_type(&other));
    }

    #[test]
    fn test_from_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let info = FailureInfo::from_error(&err);
        assert_eq!(info.error_message, "disk gone");
        assert!(info.failure_types.contains(&FailureType::Application));
    }
}
