use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefType {
    SweepingOutput,
    Outcome,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SweepingOutput => "SWEEPING_OUTPUT",
            Self::Outcome => "OUTCOME",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SWEEPING_OUTPUT" => Some(Self::SweepingOutput),
            "OUTCOME" => Some(Self::Outcome),
            _ => None,
        }
    }
}

/// Reference to a named value published by some node of the same plan execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RefObject {
    pub name: String,
    /// Key the resolved value is exposed under in an input package.
    pub key: String,
    pub ref_type: RefType,
}

impl RefObject {
    pub fn sweeping_output(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: name.clone(),
            name,
            ref_type: RefType::SweepingOutput,
        }
    }

    pub fn outcome(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: name.clone(),
            name,
            ref_type: RefType::Outcome,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}
