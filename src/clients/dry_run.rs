//! Dry-run collaborators
//!
//! Implements every collaborator trait without touching a real system: each
//! call is logged and recorded, services get deterministic cluster-local
//! addresses. Failures can be injected per operation, which makes this the
//! default fake for exercising whole plans.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

use super::{
    ClientControllerClient, ClientDependency, ClientError, ClientErrorKind, ClientResult,
    ClusterClient, DatabaseAdminClient, InstanceConfig, KnowledgeStoreClient,
    MiddlewareAgentClient,
};
use crate::plan::{InstancePhase, InstanceRef};

/// One recorded collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: &'static str,
    pub target: String,
}

#[derive(Default)]
pub struct DryRunCollaborators {
    calls: Mutex<Vec<RecordedCall>>,
    failures: DashMap<String, ClientError>,
    /// operation -> remaining number of calls that fail as unavailable
    flaky: DashMap<String, u32>,
    phases: DashMap<InstanceRef, InstancePhase>,
}

impl DryRunCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` against `target` fail with `error`.
    /// Use `"*"` as target to fail the operation for any target.
    pub fn fail(&self, operation: &str, target: &str, error: ClientError) {
        self.failures
            .insert(format!("{}:{}", operation, target), error);
    }

    /// Make the next `times` calls of `operation` fail as unavailable
    pub fn flaky(&self, operation: &str, times: u32) {
        self.flaky.insert(operation.to_string(), times);
    }

    /// Phase reported by `ping` for one instance (default `Ready`)
    pub fn set_phase(&self, instance: InstanceRef, phase: InstancePhase) {
        self.phases.insert(instance, phase);
    }

    /// Calls made so far, in the order they arrived
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.target)
            .collect()
    }

    /// Address a service gets in the dry-run cluster
    pub fn service_address(namespace: &str, name: &str) -> String {
        format!("{}.{}.svc.cluster.local", name, namespace)
    }

    fn call(&self, operation: &'static str, target: String) -> ClientResult<()> {
        info!(operation, target = %target, "dry-run call");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                operation,
                target: target.clone(),
            });
        }

        if let Some(mut remaining) = self.flaky.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::new(
                    ClientErrorKind::Unavailable,
                    operation,
                    "injected transient failure",
                ));
            }
        }

        for key in [
            format!("{}:{}", operation, target),
            format!("{}:*", operation),
        ] {
            if let Some(err) = self.failures.get(&key) {
                return Err(err.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for DryRunCollaborators {
    async fn create_deployment(&self, namespace: &str, name: &str, _manifest: &Value) -> ClientResult<()> {
        self.call("create_deployment", format!("{}/{}", namespace, name))
    }

    async fn update_deployment(&self, namespace: &str, name: &str, _manifest: &Value) -> ClientResult<()> {
        self.call("update_deployment", format!("{}/{}", namespace, name))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClientResult<()> {
        self.call("delete_deployment", format!("{}/{}", namespace, name))
    }

    async fn create_service(&self, namespace: &str, name: &str, _manifest: &Value) -> ClientResult<String> {
        self.call("create_service", format!("{}/{}", namespace, name))?;
        Ok(Self::service_address(namespace, name))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClientResult<()> {
        self.call("delete_service", format!("{}/{}", namespace, name))
    }

    async fn create_namespace(&self, namespace: &str) -> ClientResult<()> {
        self.call("create_namespace", namespace.to_string())
    }

    async fn delete_namespace(&self, namespace: &str) -> ClientResult<()> {
        self.call("delete_namespace", namespace.to_string())
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        _data: &BTreeMap<String, String>,
    ) -> ClientResult<()> {
        self.call("create_secret", format!("{}/{}", namespace, name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> ClientResult<()> {
        self.call("delete_secret", format!("{}/{}", namespace, name))
    }
}

#[async_trait]
impl MiddlewareAgentClient for DryRunCollaborators {
    async fn ping(&self, instance: &InstanceRef) -> ClientResult<InstancePhase> {
        self.call("ping", instance.to_string())?;
        Ok(self
            .phases
            .get(instance)
            .map(|phase| *phase)
            .unwrap_or(InstancePhase::Ready))
    }

    async fn set_dependency_address(
        &self,
        instance: &InstanceRef,
        dependency: &str,
        address: &str,
    ) -> ClientResult<()> {
        self.call(
            "set_dependency_address",
            format!("{}:{}={}", instance, dependency, address),
        )
    }

    async fn initialize_instance(&self, instance: &InstanceRef, _config: &InstanceConfig) -> ClientResult<()> {
        self.call("initialize_instance", instance.to_string())
    }

    async fn finalize_execution(&self, instance: &InstanceRef) -> ClientResult<()> {
        self.call("finalize_execution", instance.to_string())
    }

    async fn set_statefulness_parameters(
        &self,
        instance: &InstanceRef,
        shard_key: i64,
        router_address: &str,
    ) -> ClientResult<()> {
        self.call(
            "set_statefulness_parameters",
            format!("{}:{}@{}", instance, shard_key, router_address),
        )
    }
}

#[async_trait]
impl ClientControllerClient for DryRunCollaborators {
    async fn set_client_dependency(&self, dependency: &ClientDependency) -> ClientResult<()> {
        self.call(
            "set_client_dependency",
            format!(
                "{}/{}:{}={}",
                dependency.application, dependency.client_id, dependency.dependency, dependency.address
            ),
        )
    }

    async fn disconnect_application(&self, application: &str) -> ClientResult<()> {
        self.call("disconnect_application", application.to_string())
    }
}

#[async_trait]
impl DatabaseAdminClient for DryRunCollaborators {
    async fn shard_collection(&self, database: &str, collection: &str) -> ClientResult<()> {
        self.call("shard_collection", format!("{}.{}", database, collection))
    }

    async fn move_chunk(&self, database: &str, collection: &str, key: i64, shard: &str) -> ClientResult<()> {
        self.call(
            "move_chunk",
            format!("{}.{}[{}]->{}", database, collection, key, shard),
        )
    }

    async fn drop_database(&self, database: &str, _collections: &[String]) -> ClientResult<()> {
        self.call("drop_database", database.to_string())
    }
}

#[async_trait]
impl KnowledgeStoreClient for DryRunCollaborators {
    async fn add_app_record(&self, application: &str) -> ClientResult<()> {
        self.call("add_app_record", application.to_string())
    }

    async fn delete_app_record(&self, application: &str) -> ClientResult<()> {
        self.call("delete_app_record", application.to_string())
    }

    async fn register_application(&self, application: &str, _descriptor: &Value) -> ClientResult<()> {
        self.call("register_application", application.to_string())
    }

    async fn create_instance_record(&self, instance: &InstanceRef, _node: Option<&str>) -> ClientResult<()> {
        self.call("create_instance_record", instance.to_string())
    }

    async fn delete_instance_record(&self, instance: &InstanceRef) -> ClientResult<()> {
        self.call("delete_instance_record", instance.to_string())
    }

    async fn initialize_scheduled_job(
        &self,
        application: &str,
        component: &str,
        _schedule: &str,
    ) -> ClientResult<()> {
        self.call(
            "initialize_scheduled_job",
            format!("{}/{}", application, component),
        )
    }
}
