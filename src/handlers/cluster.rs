//! Cluster orchestrator tasks: namespaces, deployments, services, secrets and
//! compin (deployment + service) lifecycle.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::retry::RetryPolicy;
use super::{unexpected, TaskHandler, TaskOutputs};
use crate::clients::ClusterClient;
use crate::context::ContextView;
use crate::core::errors::HandlerError;
use crate::plan::{InstanceRef, TaskPayload};

pub struct ClusterHandler {
    client: Arc<dyn ClusterClient>,
    retry: RetryPolicy,
}

/// Object name declared in a manifest's `metadata.name`, if any
fn manifest_name(manifest: &Value) -> Option<&str> {
    manifest
        .get("metadata")
        .and_then(|meta| meta.get("name"))
        .and_then(Value::as_str)
}

/// Default object name for a compin's deployment and service
fn instance_object_name(instance: &InstanceRef) -> String {
    format!("{}-{}", instance.component, instance.instance_id)
}

impl ClusterHandler {
    pub fn new(client: Arc<dyn ClusterClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn create_service(
        &self,
        namespace: &str,
        name: &str,
        manifest: &Value,
        output_key: Option<&String>,
    ) -> Result<TaskOutputs, HandlerError> {
        let address = self
            .retry
            .run("create_service", || {
                self.client.create_service(namespace, name, manifest)
            })
            .await?;
        info!(namespace, name, address = %address, "Service created");

        Ok(match output_key {
            Some(key) => TaskOutputs::single(key.clone(), Value::String(address)),
            None => TaskOutputs::empty(),
        })
    }
}

#[async_trait]
impl TaskHandler for ClusterHandler {
    async fn execute(&self, payload: &TaskPayload, _ctx: &ContextView) -> Result<TaskOutputs, HandlerError> {
        match payload {
            TaskPayload::CreateNamespace { namespace } => {
                self.retry
                    .run("create_namespace", || self.client.create_namespace(namespace))
                    .await?;
                info!(namespace, "Namespace created");
            }
            TaskPayload::DeleteNamespace { namespace } => {
                self.retry
                    .run("delete_namespace", || self.client.delete_namespace(namespace))
                    .await?;
                info!(namespace, "Namespace deleted");
            }
            TaskPayload::CreateDeployment {
                namespace,
                name,
                manifest,
            } => {
                self.retry
                    .run("create_deployment", || {
                        self.client.create_deployment(namespace, name, manifest)
                    })
                    .await?;
                info!(namespace, name, "Deployment created");
            }
            TaskPayload::UpdateDeployment {
                namespace,
                name,
                manifest,
            } => {
                self.retry
                    .run("update_deployment", || {
                        self.client.update_deployment(namespace, name, manifest)
                    })
                    .await?;
                info!(namespace, name, "Deployment updated");
            }
            TaskPayload::DeleteDeployment { namespace, name } => {
                self.retry
                    .run("delete_deployment", || self.client.delete_deployment(namespace, name))
                    .await?;
                info!(namespace, name, "Deployment deleted");
            }
            TaskPayload::CreateService {
                namespace,
                name,
                manifest,
                output_key,
            } => {
                return self
                    .create_service(namespace, name, manifest, output_key.as_ref())
                    .await;
            }
            TaskPayload::DeleteService { namespace, name } => {
                self.retry
                    .run("delete_service", || self.client.delete_service(namespace, name))
                    .await?;
                info!(namespace, name, "Service deleted");
            }
            TaskPayload::CreateSecret {
                namespace,
                name,
                data,
            } => {
                self.retry
                    .run("create_secret", || self.client.create_secret(namespace, name, data))
                    .await?;
                info!(namespace, name, "Secret created");
            }
            TaskPayload::DeleteSecret { namespace, name } => {
                self.retry
                    .run("delete_secret", || self.client.delete_secret(namespace, name))
                    .await?;
                info!(namespace, name, "Secret deleted");
            }
            TaskPayload::CreateInstance {
                namespace,
                instance,
                deployment,
                service,
                output_key,
            } => {
                let fallback = instance_object_name(instance);
                let deployment_name = manifest_name(deployment).unwrap_or(fallback.as_str());
                let service_name = manifest_name(service).unwrap_or(fallback.as_str());

                self.retry
                    .run("create_deployment", || {
                        self.client
                            .create_deployment(namespace, deployment_name, deployment)
                    })
                    .await?;
                info!(instance = %instance, deployment = deployment_name, "Instance deployment created");

                return self
                    .create_service(namespace, service_name, service, output_key.as_ref())
                    .await;
            }
            TaskPayload::DeleteInstance {
                namespace,
                instance,
                deployment,
                service,
            } => {
                self.retry
                    .run("delete_deployment", || {
                        self.client.delete_deployment(namespace, deployment)
                    })
                    .await?;
                self.retry
                    .run("delete_service", || self.client.delete_service(namespace, service))
                    .await?;
                info!(instance = %instance, "Instance deleted");
            }
            other => return Err(unexpected("cluster", other)),
        }
        Ok(TaskOutputs::empty())
    }
}
