//! Facilitators decide how a node executes before it starts.

use async_trait::async_trait;
use pipeline_core::{Ambiance, ExecutionMode, FacilitatorObtainment, FacilitatorResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::{parse_parameters, RegistryError, Result};
use crate::registry::{FacilitatorRegistrar, FacilitatorRegistry, Registries};
use crate::steps::StepInputPackage;

#[async_trait]
pub trait Facilitator: Send + Sync {
    /// `None` means "no opinion": the next obtainment is consulted.
    async fn facilitate(
        &self,
        ambiance: &Ambiance,
        step_parameters: &serde_json::Value,
        parameters: &serde_json::Value,
        inputs: &StepInputPackage,
    ) -> Result<Option<FacilitatorResponse>>;
}

/// Consult the node's facilitators in declared order. The first answer wins and
/// later facilitators are never invoked.
pub async fn facilitate_in_order(
    registries: &Registries,
    obtainments: &[FacilitatorObtainment],
    ambiance: &Ambiance,
    step_parameters: &serde_json::Value,
    inputs: &StepInputPackage,
) -> Result<Option<FacilitatorResponse>> {
    for obtainment in obtainments {
        let facilitator = registries
            .facilitators
            .obtain(&obtainment.facilitator_type)?;
        let response = facilitator
            .facilitate(ambiance, step_parameters, &obtainment.parameters, inputs)
            .await?;
        if let Some(response) = response {
            debug!(
                facilitator = %obtainment.facilitator_type,
                mode = %response.execution_mode,
                "Facilitation decided"
            );
            return Ok(Some(response));
        }
    }
    Ok(None)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModeFacilitatorParameters {
    pass_through_data: Option<String>,
}

/// Always answers with a fixed mode, copying `pass_through_data` from its parameters.
pub struct ModeFacilitator {
    mode: ExecutionMode,
}

impl ModeFacilitator {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl Facilitator for ModeFacilitator {
    async fn facilitate(
        &self,
        _ambiance: &Ambiance,
        _step_parameters: &serde_json::Value,
        parameters: &serde_json::Value,
        _inputs: &StepInputPackage,
    ) -> Result<Option<FacilitatorResponse>> {
        let params: ModeFacilitatorParameters = parse_parameters(self.mode.as_str(), parameters)?;
        let mut response = FacilitatorResponse::new(self.mode);
        response.pass_through_data = params.pass_through_data;
        Ok(Some(response))
    }
}

/// One facilitator per execution mode, registered under the mode's name.
pub struct BuiltinFacilitatorRegistrar;

impl FacilitatorRegistrar for BuiltinFacilitatorRegistrar {
    fn register_facilitators(
        &self,
        registry: &mut FacilitatorRegistry,
    ) -> std::result::Result<(), RegistryError> {
        for mode in ExecutionMode::ALL {
            registry.register(mode.as_str(), Arc::new(ModeFacilitator::new(mode)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFacilitator {
        answer: Option<ExecutionMode>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Facilitator for CountingFacilitator {
        async fn facilitate(
            &self,
            _ambiance: &Ambiance,
            _step_parameters: &serde_json::Value,
            _parameters: &serde_json::Value,
            _inputs: &StepInputPackage,
        ) -> Result<Option<FacilitatorResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.map(FacilitatorResponse::new))
        }
    }

    fn counting(answer: Option<ExecutionMode>) -> (Arc<CountingFacilitator>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let facilitator = Arc::new(CountingFacilitator {
            answer,
            calls: Arc::clone(&calls),
        });
        (facilitator, calls)
    }

    async fn run(registries: &Registries, types: &[&str]) -> Result<Option<FacilitatorResponse>> {
        let obtainments: Vec<_> = types.iter().map(|t| FacilitatorObtainment::new(*t)).collect();
        facilitate_in_order(
            registries,
            &obtainments,
            &Ambiance::new("plan"),
            &serde_json::Value::Null,
            &StepInputPackage::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_first_answer_short_circuits() {
        let (first, first_calls) = counting(None);
        let (second, second_calls) = counting(Some(ExecutionMode::Child));
        let (third, third_calls) = counting(Some(ExecutionMode::Sync));
        let registries = Registries::builder()
            .facilitator("FIRST", first)
            .unwrap()
            .facilitator("SECOND", second)
            .unwrap()
            .facilitator("THIRD", third)
            .unwrap()
            .build();

        let response = run(&registries, &["FIRST", "SECOND", "THIRD"]).await.unwrap();

        assert_eq!(response.unwrap().execution_mode, ExecutionMode::Child);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_null_is_none() {
        let (first, _) = counting(None);
        let registries = Registries::builder()
            .facilitator("FIRST", first)
            .unwrap()
            .build();

        assert!(run(&registries, &["FIRST"]).await.unwrap().is_none());
        assert!(run(&registries, &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_facilitator_type() {
        let registries = Registries::builder().build();
        assert!(matches!(
            run(&registries, &["MISSING"]).await,
            Err(OrchestratorError::NotRegistered { kind: "facilitator", .. })
        ));
    }

    #[tokio::test]
    async fn test_mode_facilitator_copies_pass_through() {
        let facilitator = ModeFacilitator::new(ExecutionMode::TaskChain);
        let response = facilitator
            .facilitate(
                &Ambiance::new("plan"),
                &serde_json::Value::Null,
                &serde_json::json!({ "pass_through_data": "ctx" }),
                &StepInputPackage::default(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.execution_mode, ExecutionMode::TaskChain);
        assert_eq!(response.pass_through_data.as_deref(), Some("ctx"));
    }

    #[test]
    fn test_builtin_facilitators_cover_every_mode() {
        let mut registry = FacilitatorRegistry::new("facilitator");
        BuiltinFacilitatorRegistrar
            .register_facilitators(&mut registry)
            .unwrap();
        for mode in ExecutionMode::ALL {
            assert!(registry.contains(mode.as_str()));
        }
    }
}
