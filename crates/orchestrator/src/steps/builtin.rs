//! Steps available to every engine: a configurable no-op leaf and the
//! structural section, fork and section-chain steps.

use async_trait::async_trait;
use pipeline_core::{FailureInfo, ResponseData, ResponseMap, Status, StepResponse};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    ChildChainExecutable, ChildChainResponse, ChildExecutable, ChildrenExecutable, Executable,
    StepContext, SyncExecutable,
};
use crate::error::{parse_parameters, OrchestratorError, RegistryError, Result};
use crate::registry::{StepRegistrar, StepRegistry};

pub const NOOP: &str = "NOOP";
pub const SECTION: &str = "SECTION";
pub const FORK: &str = "FORK";
pub const SECTION_CHAIN: &str = "SECTION_CHAIN";

/// Registers [`NOOP`], [`SECTION`], [`FORK`] and [`SECTION_CHAIN`].
pub struct BuiltinStepRegistrar;

impl StepRegistrar for BuiltinStepRegistrar {
    fn register_steps(&self, registry: &mut StepRegistry) -> std::result::Result<(), RegistryError> {
        registry.register(NOOP, Executable::Sync(Arc::new(NoopStep)))?;
        registry.register(SECTION, Executable::Child(Arc::new(SectionStep)))?;
        registry.register(FORK, Executable::Children(Arc::new(ForkStep)))?;
        registry.register(SECTION_CHAIN, Executable::ChildChain(Arc::new(SectionChainStep)))?;
        Ok(())
    }
}

/// Combine the notifications of finished children into one response.
pub fn aggregate_child_responses(responses: &ResponseMap) -> StepResponse {
    let mut statuses = Vec::with_capacity(responses.len());
    let mut failure_info: Option<FailureInfo> = None;

    for data in responses.values() {
        match data {
            ResponseData::StepNotify(notify) => {
                statuses.push(notify.status);
                if failure_info.is_none() && notify.status.is_broke() {
                    failure_info = notify.failure_info.clone();
                }
            }
            ResponseData::Failure(failure) => {
                statuses.push(Status::Errored);
                if failure_info.is_none() {
                    failure_info = Some(failure.clone().into_failure_info());
                }
            }
            ResponseData::Task(_) | ResponseData::Facilitation(_) => {}
        }
    }

    let status = Status::aggregate(&statuses);
    let mut response = StepResponse::with_status(status);
    if status.is_broke() {
        response.failure_info =
            Some(failure_info.unwrap_or_else(|| FailureInfo::new("A child execution failed")));
    }
    response
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NoopParameters {
    status: Option<Status>,
    failure_message: Option<String>,
    /// Sweeping outputs published before the step finishes.
    outputs: BTreeMap<String, serde_json::Value>,
    output_group: Option<String>,
    outcome: Option<serde_json::Value>,
}

/// Finishes immediately, optionally publishing outputs and a chosen status.
pub struct NoopStep;

#[async_trait]
impl SyncExecutable for NoopStep {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse> {
        let params: NoopParameters = parse_parameters(NOOP, &ctx.parameters)?;

        for (name, value) in params.outputs {
            ctx.sweeping_outputs
                .consume(&ctx.ambiance, &name, value, params.output_group.as_deref())
                .await?;
        }

        let status = params.status.unwrap_or(Status::Succeeded);
        if !status.is_final() {
            return Err(OrchestratorError::invalid_parameters(
                NOOP,
                format!("{status} is not a terminal status"),
            ));
        }

        let mut response = StepResponse::with_status(status);
        if status.is_broke() {
            response.failure_info = Some(FailureInfo::new(
                params
                    .failure_message
                    .unwrap_or_else(|| format!("Step finished with status {status}")),
            ));
        }
        if let Some(outcome) = params.outcome {
            response = response.with_outcome("output", outcome);
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct SectionParameters {
    child_node_id: String,
}

/// Runs a single child node and finishes with its status.
pub struct SectionStep;

#[async_trait]
impl ChildExecutable for SectionStep {
    async fn obtain_child(&self, ctx: &StepContext) -> Result<String> {
        let params: SectionParameters = parse_parameters(SECTION, &ctx.parameters)?;
        Ok(params.child_node_id)
    }

    async fn handle_child_response(
        &self,
        _ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse> {
        Ok(aggregate_child_responses(responses))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForkParameters {
    parallel_node_ids: Vec<String>,
}

/// Runs every listed child concurrently and joins on all of them.
pub struct ForkStep;

#[async_trait]
impl ChildrenExecutable for ForkStep {
    async fn obtain_children(&self, ctx: &StepContext) -> Result<Vec<String>> {
        let params: ForkParameters = parse_parameters(FORK, &ctx.parameters)?;
        Ok(params.parallel_node_ids)
    }

    async fn handle_children_response(
        &self,
        _ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse> {
        Ok(aggregate_child_responses(responses))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SectionChainParameters {
    child_node_ids: Vec<String>,
}

/// Runs the listed children one after another. The pass-through carries the
/// index of the link that just ran.
pub struct SectionChainStep;

impl SectionChainStep {
    fn link(child_node_ids: &[String], index: usize) -> Result<ChildChainResponse> {
        let pass_through = serde_json::to_vec(&index)?;
        match child_node_ids.get(index) {
            None => Ok(ChildChainResponse::finished(pass_through)),
            Some(id) if index + 1 == child_node_ids.len() => {
                Ok(ChildChainResponse::last(id.clone(), pass_through))
            }
            Some(id) => Ok(ChildChainResponse::next(id.clone(), pass_through)),
        }
    }
}

#[async_trait]
impl ChildChainExecutable for SectionChainStep {
    async fn obtain_first_child(&self, ctx: &StepContext) -> Result<ChildChainResponse> {
        let params: SectionChainParameters = parse_parameters(SECTION_CHAIN, &ctx.parameters)?;
        Self::link(&params.child_node_ids, 0)
    }

    async fn execute_next_child(
        &self,
        ctx: &StepContext,
        pass_through: &[u8],
        _responses: &ResponseMap,
    ) -> Result<ChildChainResponse> {
        let params: SectionChainParameters = parse_parameters(SECTION_CHAIN, &ctx.parameters)?;
        let index: usize = serde_json::from_slice(pass_through)?;
        Self::link(&params.child_node_ids, index + 1)
    }

    async fn finalize_execution(
        &self,
        _ctx: &StepContext,
        _pass_through: &[u8],
        responses: &ResponseMap,
    ) -> Result<StepResponse> {
        Ok(aggregate_child_responses(responses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::{FailureResponseData, StepResponseNotifyData};

    fn notify(status: Status, message: Option<&str>) -> ResponseData {
        ResponseData::StepNotify(StepResponseNotifyData {
            node_uuid: "n".to_string(),
            identifier: "n".to_string(),
            group: None,
            status,
            failure_info: message.map(FailureInfo::new),
            step_outcome_refs: Vec::new(),
            adviser_response: None,
        })
    }

    #[test]
    fn test_aggregate_all_succeeded() {
        let responses = ResponseMap::from([
            ("a".to_string(), notify(Status::Succeeded, None)),
            ("b".to_string(), notify(Status::IgnoreFailed, None)),
        ]);
        let response = aggregate_child_responses(&responses);
        assert_eq!(response.status, Status::Succeeded);
        assert!(response.failure_info.is_none());
    }

    #[test]
    fn test_aggregate_carries_child_failure() {
        let responses = ResponseMap::from([
            ("a".to_string(), notify(Status::Succeeded, None)),
            ("b".to_string(), notify(Status::Failed, Some("tests failed"))),
        ]);
        let response = aggregate_child_responses(&responses);
        assert_eq!(response.status, Status::Failed);
        assert_eq!(response.failure_info.unwrap().error_message, "tests failed");
    }

    #[test]
    fn test_aggregate_failure_data_is_errored() {
        let responses = ResponseMap::from([(
            "a".to_string(),
            ResponseData::Failure(FailureResponseData::new("FacilitatorResponse is null")),
        )]);
        let response = aggregate_child_responses(&responses);
        assert_eq!(response.status, Status::Errored);
        assert_eq!(
            response.failure_info.unwrap().error_message,
            "FacilitatorResponse is null"
        );
    }

    #[test]
    fn test_aggregate_empty_is_success() {
        let response = aggregate_child_responses(&ResponseMap::new());
        assert_eq!(response.status, Status::Succeeded);
    }

    #[test]
    fn test_section_chain_links() {
        let ids = vec!["a".to_string(), "b".to_string()];

        let first = SectionChainStep::link(&ids, 0).unwrap();
        assert_eq!(first.next_child_id.as_deref(), Some("a"));
        assert!(!first.last_link);

        let second = SectionChainStep::link(&ids, 1).unwrap();
        assert_eq!(second.next_child_id.as_deref(), Some("b"));
        assert!(second.last_link);

        let done = SectionChainStep::link(&ids, 2).unwrap();
        assert!(done.next_child_id.is_none());

        let empty = SectionChainStep::link(&[], 0).unwrap();
        assert!(empty.next_child_id.is_none());
        assert!(empty.last_link);
    }
}
