use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub const ACCOUNT_ID: &str = "accountId";
pub const ORG_IDENTIFIER: &str = "orgIdentifier";
pub const PROJECT_IDENTIFIER: &str = "projectIdentifier";

/// One frame of the ambiance stack, tied to a single node execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Level {
    /// Unique per execution instance (the node execution id).
    pub runtime_id: String,
    /// Stable plan node identity.
    pub setup_id: String,
    pub step_type: String,
    pub identifier: String,
    /// Scope label such as `STAGE` or `STEP_GROUP`, used when publishing outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Level {
    pub fn new(
        runtime_id: impl Into<String>,
        setup_id: impl Into<String>,
        step_type: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            setup_id: setup_id.into(),
            step_type: step_type.into(),
            identifier: identifier.into(),
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Execution context snapshot: where in the plan tree an event applies.
///
/// An ambiance is never mutated once handed to another component; descending
/// into a child or returning to a parent derives a new value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Ambiance {
    pub plan_execution_id: String,
    #[serde(default)]
    pub setup_abstractions: HashMap<String, String>,
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl Ambiance {
    pub fn new(plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            setup_abstractions: HashMap::new(),
            levels: Vec::new(),
        }
    }

    /// Ambiance for a brand new plan execution.
    pub fn for_new_plan(setup_abstractions: HashMap<String, String>) -> Self {
        Self {
            plan_execution_id: Uuid::new_v4().to_string(),
            setup_abstractions,
            levels: Vec::new(),
        }
    }

    pub fn with_abstraction(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.setup_abstractions.insert(key.into(), value.into());
        self
    }

    pub fn add_level(&mut self, level: Level) {
        self.levels.push(level);
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.add_level(level);
        self
    }

    pub fn obtain_current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn obtain_current_runtime_id(&self) -> Option<&str> {
        self.levels.last().map(|l| l.runtime_id.as_str())
    }

    pub fn obtain_current_setup_id(&self) -> Option<&str> {
        self.levels.last().map(|l| l.setup_id.as_str())
    }

    pub fn obtain_parent_runtime_id(&self) -> Option<&str> {
        let len = self.levels.len();
        if len < 2 {
            return None;
        }
        Some(self.levels[len - 2].runtime_id.as_str())
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Full copy handed to a child executable; the caller appends the child level.
    pub fn clone_for_child(&self) -> Ambiance {
        self.clone()
    }

    /// Copy without the current level, used to address the parent on completion.
    pub fn clone_for_finish(&self) -> Ambiance {
        self.clone_to(self.levels.len().saturating_sub(1))
    }

    /// Copy truncated to `levels_to_keep` levels, saturating at the available depth.
    pub fn clone_to(&self, levels_to_keep: usize) -> Ambiance {
        let keep = levels_to_keep.min(self.levels.len());
        Ambiance {
            plan_execution_id: self.plan_execution_id.clone(),
            setup_abstractions: self.setup_abstractions.clone(),
            levels: self.levels[..keep].to_vec(),
        }
    }

    /// True when any level carries the given identifier (case-insensitive).
    pub fn has_level_identifier(&self, identifier: &str) -> bool {
        levels_contain_identifier(&self.levels, identifier)
    }

    pub fn account_id(&self) -> &str {
        self.abstraction(ACCOUNT_ID)
    }

    pub fn org_identifier(&self) -> &str {
        self.abstraction(ORG_IDENTIFIER)
    }

    pub fn project_identifier(&self) -> &str {
        self.abstraction(PROJECT_IDENTIFIER)
    }

    fn abstraction(&self, key: &str) -> &str {
        self.setup_abstractions
            .get(key)
            .map(String::as_str)
            .unwrap_or("")
    }
}

pub fn levels_contain_identifier(levels: &[Level], identifier: &str) -> bool {
    levels
        .iter()
        .any(|level| level.identifier.eq_ignore_ascii_case(identifier))
}
