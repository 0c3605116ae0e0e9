//! Event types for the execution engine

use chrono::{DateTime, Utc};
use pipeline_core::{Ambiance, ExecutionMode, FacilitatorResponse, ResponseMap, Status};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all lifecycle events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Monotonic position assigned by the bus that published it
    pub sequence: u64,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Lifecycle events observers can subscribe to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "plan_execution.started")]
    PlanExecutionStarted { plan_execution_id: String },

    #[serde(rename = "node_execution.status_changed")]
    NodeExecutionStatusChanged {
        plan_execution_id: String,
        node_execution_id: String,
        identifier: String,
        from_status: Status,
        to_status: Status,
    },

    #[serde(rename = "plan_execution.finished")]
    PlanExecutionFinished {
        plan_execution_id: String,
        status: Status,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    pub fn plan_execution_id(&self) -> Option<&str> {
        match self {
            Event::PlanExecutionStarted { plan_execution_id }
            | Event::NodeExecutionStatusChanged {
                plan_execution_id, ..
            }
            | Event::PlanExecutionFinished {
                plan_execution_id, ..
            } => Some(plan_execution_id),
            Event::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeExecutionEventType {
    Start,
    Facilitate,
    Resume,
}

impl NodeExecutionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Facilitate => "FACILITATE",
            Self::Resume => "RESUME",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "START" => Some(Self::Start),
            "FACILITATE" => Some(Self::Facilitate),
            "RESUME" => Some(Self::Resume),
            _ => None,
        }
    }
}

/// Ask the listener to decide how a queued node executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacilitateEvent {
    pub node_execution_id: String,
    pub ambiance: Ambiance,
    /// Correlation id the orchestration side waits on for the decision.
    pub notify_id: String,
}

/// Start a facilitated node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartEvent {
    pub node_execution_id: String,
    pub ambiance: Ambiance,
    pub mode: ExecutionMode,
    pub facilitator_response: FacilitatorResponse,
}

/// Raw chain state as stored with the node; decoded per mode by the listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChainPassThrough {
    #[serde(default)]
    pub pass_through: Vec<u8>,
    pub chain_end: bool,
}

/// Resume a suspended node with everything it was waiting for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeEvent {
    pub node_execution_id: String,
    pub ambiance: Ambiance,
    pub mode: ExecutionMode,
    #[serde(default)]
    pub response_data: ResponseMap,
    #[serde(default)]
    pub async_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainPassThrough>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeExecutionEvent {
    Start(StartEvent),
    Facilitate(FacilitateEvent),
    Resume(ResumeEvent),
}

impl NodeExecutionEvent {
    pub fn event_type(&self) -> NodeExecutionEventType {
        match self {
            Self::Start(_) => NodeExecutionEventType::Start,
            Self::Facilitate(_) => NodeExecutionEventType::Facilitate,
            Self::Resume(_) => NodeExecutionEventType::Resume,
        }
    }

    pub fn node_execution_id(&self) -> &str {
        match self {
            Self::Start(e) => &e.node_execution_id,
            Self::Facilitate(e) => &e.node_execution_id,
            Self::Resume(e) => &e.node_execution_id,
        }
    }

    pub fn ambiance(&self) -> &Ambiance {
        match self {
            Self::Start(e) => &e.ambiance,
            Self::Facilitate(e) => &e.ambiance,
            Self::Resume(e) => &e.ambiance,
        }
    }
}
