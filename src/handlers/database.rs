//! Sharded database control plane tasks

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::retry::RetryPolicy;
use super::{unexpected, TaskHandler, TaskOutputs};
use crate::clients::DatabaseAdminClient;
use crate::context::ContextView;
use crate::core::errors::HandlerError;
use crate::plan::TaskPayload;

pub struct DatabaseHandler {
    client: Arc<dyn DatabaseAdminClient>,
    retry: RetryPolicy,
}

impl DatabaseHandler {
    pub fn new(client: Arc<dyn DatabaseAdminClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl TaskHandler for DatabaseHandler {
    async fn execute(&self, payload: &TaskPayload, _ctx: &ContextView) -> Result<TaskOutputs, HandlerError> {
        match payload {
            TaskPayload::ShardCollection {
                database,
                collection,
            } => {
                self.retry
                    .run("shard_collection", || {
                        self.client.shard_collection(database, collection)
                    })
                    .await?;
                info!(database, collection, "Collection sharded");
            }
            TaskPayload::MoveChunk {
                database,
                collection,
                key,
                shard,
            } => {
                self.retry
                    .run("move_chunk", || {
                        self.client.move_chunk(database, collection, *key, shard)
                    })
                    .await?;
                info!(database, collection, key, shard, "Chunk moved");
            }
            TaskPayload::DropDatabase {
                database,
                collections,
            } => {
                self.retry
                    .run("drop_database", || {
                        self.client.drop_database(database, collections)
                    })
                    .await?;
                info!(database, collections = collections.len(), "Database dropped");
            }
            other => return Err(unexpected("database admin", other)),
        }
        Ok(TaskOutputs::empty())
    }
}
