//! Client controller tasks: pointing connected clients at their dependencies
//! and disconnecting every client of an application.
//!
//! Clients are only repointed once the providing instance is READY.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::phase::PhaseWaiter;
use super::retry::RetryPolicy;
use super::{resolve_address, unexpected, TaskHandler, TaskOutputs};
use crate::clients::{ClientControllerClient, ClientDependency};
use crate::context::ContextView;
use crate::core::errors::HandlerError;
use crate::plan::{InstancePhase, TaskPayload};

pub struct ClientControllerHandler {
    client: Arc<dyn ClientControllerClient>,
    phases: PhaseWaiter,
    retry: RetryPolicy,
}

impl ClientControllerHandler {
    pub fn new(client: Arc<dyn ClientControllerClient>, phases: PhaseWaiter, retry: RetryPolicy) -> Self {
        Self {
            client,
            phases,
            retry,
        }
    }
}

#[async_trait]
impl TaskHandler for ClientControllerHandler {
    async fn execute(&self, payload: &TaskPayload, ctx: &ContextView) -> Result<TaskOutputs, HandlerError> {
        match payload {
            TaskPayload::SetClientDependency {
                application,
                client_type,
                client_id,
                dependency,
                provider,
                address,
            } => {
                let dependency = ClientDependency {
                    application: application.clone(),
                    client_type: client_type.clone(),
                    client_id: client_id.clone(),
                    dependency: dependency.clone(),
                    address: resolve_address(address, ctx)?,
                };
                if let Some(provider) = provider {
                    self.phases.wait_for(provider, InstancePhase::Ready).await?;
                }
                self.retry
                    .run("set_client_dependency", || {
                        self.client.set_client_dependency(&dependency)
                    })
                    .await?;
                info!(
                    application,
                    client_id,
                    dependency = %dependency.dependency,
                    address = %dependency.address,
                    provider = ?provider.as_ref().map(|p| p.to_string()),
                    "Client dependency set"
                );
            }
            TaskPayload::DisconnectApplicationClients { application } => {
                self.retry
                    .run("disconnect_application", || {
                        self.client.disconnect_application(application)
                    })
                    .await?;
                info!(application, "Disconnected all clients of application");
            }
            other => return Err(unexpected("client controller", other)),
        }
        Ok(TaskOutputs::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::DryRunCollaborators;
    use crate::context::ExecutionContext;
    use crate::core::config::PhaseWait;
    use crate::graph::TaskGraph;
    use crate::plan::{AddressSource, InstanceRef, PlanBuilder};

    fn handler(dry: &Arc<DryRunCollaborators>, max_polls: u32) -> ClientControllerHandler {
        let phases = PhaseWaiter::new(
            dry.clone(),
            PhaseWait {
                poll_interval_ms: 1,
                max_polls,
            },
        );
        ClientControllerHandler::new(dry.clone(), phases, RetryPolicy::none())
    }

    fn view_for(payload: &TaskPayload) -> ContextView {
        let plan = PlanBuilder::new("shop").task(1, payload.clone(), &[]).build();
        ContextView::new(
            Arc::new(ExecutionContext::new()),
            Arc::new(TaskGraph::build(&plan).unwrap()),
            1,
        )
    }

    fn frontend_dependency(provider: Option<InstanceRef>) -> TaskPayload {
        TaskPayload::SetClientDependency {
            application: "shop".to_string(),
            client_type: "mobile".to_string(),
            client_id: "c-17".to_string(),
            dependency: "frontend".to_string(),
            provider,
            address: AddressSource::Literal("10.0.0.9".to_string()),
        }
    }

    #[tokio::test]
    async fn test_waits_for_ready_provider() {
        let dry = Arc::new(DryRunCollaborators::new());
        let frontend = InstanceRef::new("shop", "frontend", "2");
        let payload = frontend_dependency(Some(frontend.clone()));

        handler(&dry, 3)
            .execute(&payload, &view_for(&payload))
            .await
            .unwrap();
        let ops: Vec<&str> = dry.calls().iter().map(|call| call.operation).collect();
        assert_eq!(ops, vec!["ping", "set_client_dependency"]);
        assert_eq!(dry.calls_to("ping"), vec![frontend.to_string()]);
    }

    #[tokio::test]
    async fn test_provider_not_ready_leaves_clients_alone() {
        let dry = Arc::new(DryRunCollaborators::new());
        let frontend = InstanceRef::new("shop", "frontend", "2");
        dry.set_phase(frontend.clone(), InstancePhase::Init);
        let payload = frontend_dependency(Some(frontend));

        let err = handler(&dry, 3)
            .execute(&payload, &view_for(&payload))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not reach phase Ready after 3 polls"));
        assert_eq!(dry.calls_to("ping").len(), 3);
        assert!(dry.calls_to("set_client_dependency").is_empty());
    }

    #[tokio::test]
    async fn test_set_client_dependency_with_literal_address() {
        let dry = Arc::new(DryRunCollaborators::new());
        let handler = handler(&dry, 3);
        let payload = frontend_dependency(None);

        handler.execute(&payload, &view_for(&payload)).await.unwrap();
        assert!(dry.calls_to("ping").is_empty());
        assert_eq!(
            dry.calls_to("set_client_dependency"),
            vec!["shop/c-17:frontend=10.0.0.9".to_string()]
        );
    }
}
