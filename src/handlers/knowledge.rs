//! Knowledge store bookkeeping: application and instance records, application
//! registration, scheduled jobs.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::retry::RetryPolicy;
use super::{unexpected, TaskHandler, TaskOutputs};
use crate::clients::KnowledgeStoreClient;
use crate::context::ContextView;
use crate::core::errors::HandlerError;
use crate::plan::TaskPayload;

pub struct KnowledgeHandler {
    client: Arc<dyn KnowledgeStoreClient>,
    retry: RetryPolicy,
}

impl KnowledgeHandler {
    pub fn new(client: Arc<dyn KnowledgeStoreClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl TaskHandler for KnowledgeHandler {
    async fn execute(&self, payload: &TaskPayload, _ctx: &ContextView) -> Result<TaskOutputs, HandlerError> {
        match payload {
            TaskPayload::AddAppRecord { application } => {
                self.retry
                    .run("add_app_record", || self.client.add_app_record(application))
                    .await?;
                info!(application, "Application record added");
            }
            TaskPayload::DeleteAppRecord { application } => {
                self.retry
                    .run("delete_app_record", || self.client.delete_app_record(application))
                    .await?;
                info!(application, "Application record deleted");
            }
            TaskPayload::RegisterApplication {
                application,
                descriptor,
            } => {
                self.retry
                    .run("register_application", || {
                        self.client.register_application(application, descriptor)
                    })
                    .await?;
                info!(application, "Application registered");
            }
            TaskPayload::CreateInstanceRecord { instance, node } => {
                self.retry
                    .run("create_instance_record", || {
                        self.client.create_instance_record(instance, node.as_deref())
                    })
                    .await?;
                info!(instance = %instance, node = ?node, "Instance record created");
            }
            TaskPayload::DeleteInstanceRecord { instance } => {
                self.retry
                    .run("delete_instance_record", || {
                        self.client.delete_instance_record(instance)
                    })
                    .await?;
                info!(instance = %instance, "Instance record deleted");
            }
            TaskPayload::InitializeScheduledJob {
                application,
                component,
                schedule,
            } => {
                self.retry
                    .run("initialize_scheduled_job", || {
                        self.client
                            .initialize_scheduled_job(application, component, schedule)
                    })
                    .await?;
                info!(application, component, schedule, "Scheduled job initialized");
            }
            other => return Err(unexpected("knowledge store", other)),
        }
        Ok(TaskOutputs::empty())
    }
}
