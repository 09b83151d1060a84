//! Middleware agent tasks.
//!
//! Agents only accept commands once their instance has reached a given
//! lifecycle phase, so every operation first waits for that phase.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::phase::PhaseWaiter;
use super::retry::RetryPolicy;
use super::{resolve_address, unexpected, TaskHandler, TaskOutputs};
use crate::clients::{InstanceConfig, MiddlewareAgentClient};
use crate::context::ContextView;
use crate::core::config::PhaseWait;
use crate::core::errors::HandlerError;
use crate::plan::{InstancePhase, InstanceRef, TaskPayload};

pub struct MiddlewareHandler {
    client: Arc<dyn MiddlewareAgentClient>,
    retry: RetryPolicy,
    phases: PhaseWaiter,
}

impl MiddlewareHandler {
    pub fn new(client: Arc<dyn MiddlewareAgentClient>, retry: RetryPolicy, phase_wait: PhaseWait) -> Self {
        Self {
            phases: PhaseWaiter::new(client.clone(), phase_wait),
            client,
            retry,
        }
    }

    /// Poll the instance's agent until it reports at least `required`
    pub async fn wait_for_phase(
        &self,
        instance: &InstanceRef,
        required: InstancePhase,
    ) -> Result<InstancePhase, HandlerError> {
        self.phases.wait_for(instance, required).await
    }
}

#[async_trait]
impl TaskHandler for MiddlewareHandler {
    async fn execute(&self, payload: &TaskPayload, ctx: &ContextView) -> Result<TaskOutputs, HandlerError> {
        match payload {
            TaskPayload::SetDependencyAddress {
                instance,
                dependency,
                provider,
                address,
            } => {
                let address = resolve_address(address, ctx)?;
                if let Some(provider) = provider {
                    self.wait_for_phase(provider, InstancePhase::Ready).await?;
                }
                self.wait_for_phase(instance, InstancePhase::Init).await?;
                self.retry
                    .run("set_dependency_address", || {
                        self.client.set_dependency_address(instance, dependency, &address)
                    })
                    .await?;
                info!(instance = %instance, dependency, address = %address, "Dependency address set");
            }
            TaskPayload::InitializeInstance {
                instance,
                run_count,
                access_token,
                production,
            } => {
                self.wait_for_phase(instance, InstancePhase::Init).await?;
                let config = InstanceConfig {
                    instance_id: instance.instance_id.clone(),
                    run_count: *run_count,
                    access_token: access_token.clone(),
                    production: *production,
                };
                self.retry
                    .run("initialize_instance", || {
                        self.client.initialize_instance(instance, &config)
                    })
                    .await?;
                info!(instance = %instance, "Instance initialized");
            }
            TaskPayload::FinalizeInstance { instance } => {
                self.wait_for_phase(instance, InstancePhase::Init).await?;
                self.retry
                    .run("finalize_execution", || self.client.finalize_execution(instance))
                    .await?;
                info!(instance = %instance, "Finalize command sent");
            }
            TaskPayload::SetStatefulnessParameters {
                instance,
                shard_key,
                router_address,
            } => {
                self.wait_for_phase(instance, InstancePhase::Init).await?;
                self.retry
                    .run("set_statefulness_parameters", || {
                        self.client
                            .set_statefulness_parameters(instance, *shard_key, router_address)
                    })
                    .await?;
                info!(instance = %instance, shard_key, "Statefulness parameters set");
            }
            other => return Err(unexpected("middleware agent", other)),
        }
        Ok(TaskOutputs::empty())
    }
}
