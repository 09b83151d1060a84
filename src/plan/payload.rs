//! Task payloads - the closed set of infrastructure mutations a plan can contain
//!
//! Every variant maps to exactly one [`TaskKind`] tag; the handler registry is
//! keyed by that tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Name of the image-pull secret created in every application namespace
pub const DEFAULT_SECRET_NAME: &str = "dockerhubsecret";

fn default_secret_name() -> String {
    DEFAULT_SECRET_NAME.to_string()
}

/// Identity of one component instance (compin)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceRef {
    pub application: String,
    pub component: String,
    pub instance_id: String,
}

impl InstanceRef {
    pub fn new(
        application: impl Into<String>,
        component: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            component: component.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.application, self.component, self.instance_id)
    }
}

/// Lifecycle phase reported by a managed instance's middleware agent.
///
/// Phases are ordered: an instance in `Ready` has also passed `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancePhase {
    /// Container is still being created
    Creating,
    /// Container runs but cannot accept client connections yet
    Init,
    /// Accepting connections and/or serving clients
    Ready,
    /// Clients were moved away and the instance got its finalize command
    Finalizing,
    /// Ready to be removed
    Finished,
}

/// Where an address handed to an agent or the client controller comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    /// Address known when the plan was compiled
    Literal(String),
    /// Address produced at run time by an upstream task under this key
    Context(String),
}

/// Task-type tag. One handler is registered per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CreateNamespace,
    DeleteNamespace,
    CreateDeployment,
    UpdateDeployment,
    DeleteDeployment,
    CreateService,
    DeleteService,
    CreateSecret,
    DeleteSecret,
    CreateInstance,
    DeleteInstance,
    SetDependencyAddress,
    InitializeInstance,
    FinalizeInstance,
    SetStatefulnessParameters,
    SetClientDependency,
    DisconnectApplicationClients,
    ShardCollection,
    MoveChunk,
    DropDatabase,
    AddAppRecord,
    DeleteAppRecord,
    RegisterApplication,
    CreateInstanceRecord,
    DeleteInstanceRecord,
    InitializeScheduledJob,
}

/// External system a task kind talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    Cluster,
    MiddlewareAgent,
    ClientController,
    DatabaseAdmin,
    KnowledgeStore,
}

impl TaskKind {
    pub const ALL: [TaskKind; 26] = [
        TaskKind::CreateNamespace,
        TaskKind::DeleteNamespace,
        TaskKind::CreateDeployment,
        TaskKind::UpdateDeployment,
        TaskKind::DeleteDeployment,
        TaskKind::CreateService,
        TaskKind::DeleteService,
        TaskKind::CreateSecret,
        TaskKind::DeleteSecret,
        TaskKind::CreateInstance,
        TaskKind::DeleteInstance,
        TaskKind::SetDependencyAddress,
        TaskKind::InitializeInstance,
        TaskKind::FinalizeInstance,
        TaskKind::SetStatefulnessParameters,
        TaskKind::SetClientDependency,
        TaskKind::DisconnectApplicationClients,
        TaskKind::ShardCollection,
        TaskKind::MoveChunk,
        TaskKind::DropDatabase,
        TaskKind::AddAppRecord,
        TaskKind::DeleteAppRecord,
        TaskKind::RegisterApplication,
        TaskKind::CreateInstanceRecord,
        TaskKind::DeleteInstanceRecord,
        TaskKind::InitializeScheduledJob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CreateNamespace => "create_namespace",
            TaskKind::DeleteNamespace => "delete_namespace",
            TaskKind::CreateDeployment => "create_deployment",
            TaskKind::UpdateDeployment => "update_deployment",
            TaskKind::DeleteDeployment => "delete_deployment",
            TaskKind::CreateService => "create_service",
            TaskKind::DeleteService => "delete_service",
            TaskKind::CreateSecret => "create_secret",
            TaskKind::DeleteSecret => "delete_secret",
            TaskKind::CreateInstance => "create_instance",
            TaskKind::DeleteInstance => "delete_instance",
            TaskKind::SetDependencyAddress => "set_dependency_address",
            TaskKind::InitializeInstance => "initialize_instance",
            TaskKind::FinalizeInstance => "finalize_instance",
            TaskKind::SetStatefulnessParameters => "set_statefulness_parameters",
            TaskKind::SetClientDependency => "set_client_dependency",
            TaskKind::DisconnectApplicationClients => "disconnect_application_clients",
            TaskKind::ShardCollection => "shard_collection",
            TaskKind::MoveChunk => "move_chunk",
            TaskKind::DropDatabase => "drop_database",
            TaskKind::AddAppRecord => "add_app_record",
            TaskKind::DeleteAppRecord => "delete_app_record",
            TaskKind::RegisterApplication => "register_application",
            TaskKind::CreateInstanceRecord => "create_instance_record",
            TaskKind::DeleteInstanceRecord => "delete_instance_record",
            TaskKind::InitializeScheduledJob => "initialize_scheduled_job",
        }
    }

    /// The collaborator whose client the handler for this kind needs
    pub fn collaborator(&self) -> Collaborator {
        use TaskKind::*;
        match self {
            CreateNamespace | DeleteNamespace | CreateDeployment | UpdateDeployment
            | DeleteDeployment | CreateService | DeleteService | CreateSecret | DeleteSecret
            | CreateInstance | DeleteInstance => Collaborator::Cluster,
            SetDependencyAddress | InitializeInstance | FinalizeInstance
            | SetStatefulnessParameters => Collaborator::MiddlewareAgent,
            SetClientDependency | DisconnectApplicationClients => Collaborator::ClientController,
            ShardCollection | MoveChunk | DropDatabase => Collaborator::DatabaseAdmin,
            AddAppRecord | DeleteAppRecord | RegisterApplication | CreateInstanceRecord
            | DeleteInstanceRecord | InitializeScheduledJob => Collaborator::KnowledgeStore,
        }
    }

    /// All kinds served by one collaborator
    pub fn served_by(collaborator: Collaborator) -> impl Iterator<Item = TaskKind> {
        TaskKind::ALL
            .into_iter()
            .filter(move |kind| kind.collaborator() == collaborator)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged payload of a plan task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    CreateNamespace {
        namespace: String,
    },
    DeleteNamespace {
        namespace: String,
    },
    CreateDeployment {
        namespace: String,
        name: String,
        manifest: Value,
    },
    UpdateDeployment {
        namespace: String,
        name: String,
        manifest: Value,
    },
    DeleteDeployment {
        namespace: String,
        name: String,
    },
    /// Creates a service; the address the cluster assigns is stored under
    /// `output_key` when one is given.
    CreateService {
        namespace: String,
        name: String,
        manifest: Value,
        #[serde(default)]
        output_key: Option<String>,
    },
    DeleteService {
        namespace: String,
        name: String,
    },
    CreateSecret {
        namespace: String,
        #[serde(default = "default_secret_name")]
        name: String,
        #[serde(default)]
        data: BTreeMap<String, String>,
    },
    DeleteSecret {
        namespace: String,
        #[serde(default = "default_secret_name")]
        name: String,
    },
    /// Deployment plus service for one managed instance
    CreateInstance {
        namespace: String,
        instance: InstanceRef,
        deployment: Value,
        service: Value,
        #[serde(default)]
        output_key: Option<String>,
    },
    DeleteInstance {
        namespace: String,
        instance: InstanceRef,
        deployment: String,
        service: String,
    },
    /// Points `instance` at the provider of `dependency`
    SetDependencyAddress {
        instance: InstanceRef,
        dependency: String,
        #[serde(default)]
        provider: Option<InstanceRef>,
        address: AddressSource,
    },
    InitializeInstance {
        instance: InstanceRef,
        #[serde(default)]
        run_count: u32,
        access_token: String,
        #[serde(default)]
        production: bool,
    },
    FinalizeInstance {
        instance: InstanceRef,
    },
    /// Hands the statefulness (shard) key and database router address to the
    /// instance's agent
    SetStatefulnessParameters {
        instance: InstanceRef,
        shard_key: i64,
        router_address: String,
    },
    SetClientDependency {
        application: String,
        client_type: String,
        client_id: String,
        dependency: String,
        #[serde(default)]
        provider: Option<InstanceRef>,
        address: AddressSource,
    },
    DisconnectApplicationClients {
        application: String,
    },
    ShardCollection {
        database: String,
        collection: String,
    },
    MoveChunk {
        database: String,
        collection: String,
        key: i64,
        shard: String,
    },
    DropDatabase {
        database: String,
        #[serde(default)]
        collections: Vec<String>,
    },
    AddAppRecord {
        application: String,
    },
    DeleteAppRecord {
        application: String,
    },
    RegisterApplication {
        application: String,
        #[serde(default)]
        descriptor: Value,
    },
    CreateInstanceRecord {
        instance: InstanceRef,
        #[serde(default)]
        node: Option<String>,
    },
    DeleteInstanceRecord {
        instance: InstanceRef,
    },
    InitializeScheduledJob {
        application: String,
        component: String,
        schedule: String,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::CreateNamespace { .. } => TaskKind::CreateNamespace,
            TaskPayload::DeleteNamespace { .. } => TaskKind::DeleteNamespace,
            TaskPayload::CreateDeployment { .. } => TaskKind::CreateDeployment,
            TaskPayload::UpdateDeployment { .. } => TaskKind::UpdateDeployment,
            TaskPayload::DeleteDeployment { .. } => TaskKind::DeleteDeployment,
            TaskPayload::CreateService { .. } => TaskKind::CreateService,
            TaskPayload::DeleteService { .. } => TaskKind::DeleteService,
            TaskPayload::CreateSecret { .. } => TaskKind::CreateSecret,
            TaskPayload::DeleteSecret { .. } => TaskKind::DeleteSecret,
            TaskPayload::CreateInstance { .. } => TaskKind::CreateInstance,
            TaskPayload::DeleteInstance { .. } => TaskKind::DeleteInstance,
            TaskPayload::SetDependencyAddress { .. } => TaskKind::SetDependencyAddress,
            TaskPayload::InitializeInstance { .. } => TaskKind::InitializeInstance,
            TaskPayload::FinalizeInstance { .. } => TaskKind::FinalizeInstance,
            TaskPayload::SetStatefulnessParameters { .. } => TaskKind::SetStatefulnessParameters,
            TaskPayload::SetClientDependency { .. } => TaskKind::SetClientDependency,
            TaskPayload::DisconnectApplicationClients { .. } => {
                TaskKind::DisconnectApplicationClients
            }
            TaskPayload::ShardCollection { .. } => TaskKind::ShardCollection,
            TaskPayload::MoveChunk { .. } => TaskKind::MoveChunk,
            TaskPayload::DropDatabase { .. } => TaskKind::DropDatabase,
            TaskPayload::AddAppRecord { .. } => TaskKind::AddAppRecord,
            TaskPayload::DeleteAppRecord { .. } => TaskKind::DeleteAppRecord,
            TaskPayload::RegisterApplication { .. } => TaskKind::RegisterApplication,
            TaskPayload::CreateInstanceRecord { .. } => TaskKind::CreateInstanceRecord,
            TaskPayload::DeleteInstanceRecord { .. } => TaskKind::DeleteInstanceRecord,
            TaskPayload::InitializeScheduledJob { .. } => TaskKind::InitializeScheduledJob,
        }
    }

    /// Short human-readable target of the mutation, used in log lines
    pub fn target(&self) -> String {
        match self {
            TaskPayload::CreateNamespace { namespace }
            | TaskPayload::DeleteNamespace { namespace } => namespace.clone(),
            TaskPayload::CreateDeployment { namespace, name, .. }
            | TaskPayload::UpdateDeployment { namespace, name, .. }
            | TaskPayload::DeleteDeployment { namespace, name }
            | TaskPayload::CreateService { namespace, name, .. }
            | TaskPayload::DeleteService { namespace, name }
            | TaskPayload::CreateSecret { namespace, name, .. }
            | TaskPayload::DeleteSecret { namespace, name } => format!("{}/{}", namespace, name),
            TaskPayload::CreateInstance { instance, .. }
            | TaskPayload::DeleteInstance { instance, .. }
            | TaskPayload::SetDependencyAddress { instance, .. }
            | TaskPayload::InitializeInstance { instance, .. }
            | TaskPayload::FinalizeInstance { instance }
            | TaskPayload::SetStatefulnessParameters { instance, .. }
            | TaskPayload::CreateInstanceRecord { instance, .. }
            | TaskPayload::DeleteInstanceRecord { instance } => instance.to_string(),
            TaskPayload::SetClientDependency {
                application,
                client_id,
                ..
            } => format!("{}/{}", application, client_id),
            TaskPayload::DisconnectApplicationClients { application }
            | TaskPayload::AddAppRecord { application }
            | TaskPayload::DeleteAppRecord { application }
            | TaskPayload::RegisterApplication { application, .. } => application.clone(),
            TaskPayload::InitializeScheduledJob {
                application,
                component,
                ..
            } => format!("{}/{}", application, component),
            TaskPayload::ShardCollection {
                database,
                collection,
            }
            | TaskPayload::MoveChunk {
                database,
                collection,
                ..
            } => format!("{}.{}", database, collection),
            TaskPayload::DropDatabase { database, .. } => database.clone(),
        }
    }
}
