//! Narrow interfaces to the external systems a plan mutates
//!
//! Each collaborator group gets one trait. Handlers hold them as trait
//! objects, so the scheduler never sees a concrete client and tests can plug
//! in fakes.

pub mod dry_run;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::plan::{InstancePhase, InstanceRef};

pub use dry_run::DryRunCollaborators;

/// Broad classification of a collaborator failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorKind {
    /// The remote system refused the request (validation, quota, permissions)
    Rejected,
    NotFound,
    AlreadyExists,
    /// The remote system could not be reached
    Unavailable,
    Timeout,
    Internal,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientErrorKind::Rejected => "rejected",
            ClientErrorKind::NotFound => "not found",
            ClientErrorKind::AlreadyExists => "already exists",
            ClientErrorKind::Unavailable => "unavailable",
            ClientErrorKind::Timeout => "timeout",
            ClientErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Structured failure returned by every collaborator call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub operation: String,
    pub message: String,
}

impl ClientError {
    pub fn new(
        kind: ClientErrorKind,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Rejected, operation, message)
    }

    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Unavailable, operation, message)
    }

    /// Check if the same call may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ClientErrorKind::Unavailable | ClientErrorKind::Timeout
        )
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Cluster orchestrator (deployments, services, namespaces, secrets)
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_deployment(&self, namespace: &str, name: &str, manifest: &Value) -> ClientResult<()>;
    async fn update_deployment(&self, namespace: &str, name: &str, manifest: &Value) -> ClientResult<()>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClientResult<()>;
    /// Returns the address the cluster assigned to the service
    async fn create_service(&self, namespace: &str, name: &str, manifest: &Value) -> ClientResult<String>;
    async fn delete_service(&self, namespace: &str, name: &str) -> ClientResult<()>;
    async fn create_namespace(&self, namespace: &str) -> ClientResult<()>;
    async fn delete_namespace(&self, namespace: &str) -> ClientResult<()>;
    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> ClientResult<()>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> ClientResult<()>;
}

/// Instance configuration pushed to a freshly started middleware agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub run_count: u32,
    pub access_token: String,
    pub production: bool,
}

/// Middleware agents colocated with managed instances
#[async_trait]
pub trait MiddlewareAgentClient: Send + Sync {
    /// Current lifecycle phase of the instance
    async fn ping(&self, instance: &InstanceRef) -> ClientResult<InstancePhase>;
    async fn set_dependency_address(
        &self,
        instance: &InstanceRef,
        dependency: &str,
        address: &str,
    ) -> ClientResult<()>;
    async fn initialize_instance(&self, instance: &InstanceRef, config: &InstanceConfig) -> ClientResult<()>;
    async fn finalize_execution(&self, instance: &InstanceRef) -> ClientResult<()>;
    async fn set_statefulness_parameters(
        &self,
        instance: &InstanceRef,
        shard_key: i64,
        router_address: &str,
    ) -> ClientResult<()>;
}

/// Dependency handed to one client through the client controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDependency {
    pub application: String,
    pub client_type: String,
    pub client_id: String,
    pub dependency: String,
    pub address: String,
}

/// Controller that tells connected clients where their dependencies live
#[async_trait]
pub trait ClientControllerClient: Send + Sync {
    async fn set_client_dependency(&self, dependency: &ClientDependency) -> ClientResult<()>;
    async fn disconnect_application(&self, application: &str) -> ClientResult<()>;
}

/// Sharded database control plane
#[async_trait]
pub trait DatabaseAdminClient: Send + Sync {
    async fn shard_collection(&self, database: &str, collection: &str) -> ClientResult<()>;
    async fn move_chunk(&self, database: &str, collection: &str, key: i64, shard: &str) -> ClientResult<()>;
    async fn drop_database(&self, database: &str, collections: &[String]) -> ClientResult<()>;
}

/// Bookkeeping records about applications and instances
#[async_trait]
pub trait KnowledgeStoreClient: Send + Sync {
    async fn add_app_record(&self, application: &str) -> ClientResult<()>;
    async fn delete_app_record(&self, application: &str) -> ClientResult<()>;
    async fn register_application(&self, application: &str, descriptor: &Value) -> ClientResult<()>;
    async fn create_instance_record(&self, instance: &InstanceRef, node: Option<&str>) -> ClientResult<()>;
    async fn delete_instance_record(&self, instance: &InstanceRef) -> ClientResult<()>;
    async fn initialize_scheduled_job(
        &self,
        application: &str,
        component: &str,
        schedule: &str,
    ) -> ClientResult<()>;
}

/// One client per collaborator group, as handed to the handler registry
#[derive(Clone)]
pub struct Collaborators {
    pub cluster: Arc<dyn ClusterClient>,
    pub middleware: Arc<dyn MiddlewareAgentClient>,
    pub client_controller: Arc<dyn ClientControllerClient>,
    pub database: Arc<dyn DatabaseAdminClient>,
    pub knowledge: Arc<dyn KnowledgeStoreClient>,
}

impl Collaborators {
    /// Use one object that implements every collaborator trait
    pub fn from_shared<C>(shared: Arc<C>) -> Self
    where
        C: ClusterClient
            + MiddlewareAgentClient
            + ClientControllerClient
            + DatabaseAdminClient
            + KnowledgeStoreClient
            + 'static,
    {
        Self {
            cluster: shared.clone(),
            middleware: shared.clone(),
            client_controller: shared.clone(),
            database: shared.clone(),
            knowledge: shared,
        }
    }
}
