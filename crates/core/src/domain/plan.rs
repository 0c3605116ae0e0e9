use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::{RefObject, Status};
use crate::error::CoreError;

/// A facilitator to consult for a node, with its serialized parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacilitatorObtainment {
    #[serde(rename = "type")]
    pub facilitator_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl FacilitatorObtainment {
    pub fn new(facilitator_type: impl Into<String>) -> Self {
        Self {
            facilitator_type: facilitator_type.into(),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// An adviser to consult once a node reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdviserObtainment {
    #[serde(rename = "type")]
    pub adviser_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl AdviserObtainment {
    pub fn new(adviser_type: impl Into<String>) -> Self {
        Self {
            adviser_type: adviser_type.into(),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanNode {
    pub uuid: String,
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub step_parameters: serde_json::Value,
    #[serde(default)]
    pub facilitator_obtainments: Vec<FacilitatorObtainment>,
    #[serde(default)]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    /// Values this node needs resolved before it starts.
    #[serde(default)]
    pub refs_to_resolve: Vec<RefObject>,
}

impl PlanNode {
    pub fn new(
        uuid: impl Into<String>,
        identifier: impl Into<String>,
        step_type: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            uuid: uuid.into(),
            name: identifier.clone(),
            identifier,
            step_type: step_type.into(),
            group: None,
            step_parameters: serde_json::Value::Null,
            facilitator_obtainments: Vec::new(),
            adviser_obtainments: Vec::new(),
            refs_to_resolve: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn with_facilitator(mut self, obtainment: FacilitatorObtainment) -> Self {
        self.facilitator_obtainments.push(obtainment);
        self
    }

    pub fn with_adviser(mut self, obtainment: AdviserObtainment) -> Self {
        self.adviser_obtainments.push(obtainment);
        self
    }

    pub fn with_ref(mut self, ref_object: RefObject) -> Self {
        self.refs_to_resolve.push(ref_object);
        self
    }
}

/// The workflow graph a plan execution walks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub start_node_id: String,
    pub nodes: HashMap<String, PlanNode>,
}

impl Plan {
    pub fn new(start_node_id: impl Into<String>) -> Self {
        Self {
            start_node_id: start_node_id.into(),
            nodes: HashMap::new(),
        }
    }

    pub fn with_node(mut self, node: PlanNode) -> Self {
        self.nodes.insert(node.uuid.clone(), node);
        self
    }

    pub fn node(&self, uuid: &str) -> Result<&PlanNode, CoreError> {
        self.nodes
            .get(uuid)
            .ok_or_else(|| CoreError::PlanNodeNotFound(uuid.to_string()))
    }

    pub fn start_node(&self) -> Result<&PlanNode, CoreError> {
        self.nodes
            .get(&self.start_node_id)
            .ok_or_else(|| CoreError::MissingStartNode(self.start_node_id.clone()))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.start_node()?;

        let mut identifiers = HashSet::new();
        for (key, node) in &self.nodes {
            if key != &node.uuid {
                return Err(CoreError::NodeKeyMismatch {
                    key: key.clone(),
                    uuid: node.uuid.clone(),
                });
            }
            if node.identifier.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "node {} has an empty identifier",
                    node.uuid
                )));
            }
            if node.step_type.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "node {} has an empty step type",
                    node.uuid
                )));
            }
            if !identifiers.insert((node.group.clone(), node.identifier.clone())) {
                return Err(CoreError::Validation(format!(
                    "duplicate identifier {} in group {:?}",
                    node.identifier, node.group
                )));
            }
        }
        Ok(())
    }
}

/// One run of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanExecution {
    pub id: String,
    pub plan: Plan,
    #[serde(default)]
    pub setup_abstractions: HashMap<String, String>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
}

impl PlanExecution {
    pub fn new(
        id: impl Into<String>,
        plan: Plan,
        setup_abstractions: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            plan,
            setup_abstractions,
            status: Status::Running,
            created_at: now,
            updated_at: now,
            end_ts: None,
        }
    }

    pub fn finish(&mut self, status: Status) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.end_ts = Some(now);
    }
}
