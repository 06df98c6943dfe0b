//! Queue dispatch: hand a persisted task to the external work queue.
//!
//! The core only publishes. Workers consume out of process and look the task
//! up again with [`Task::from_correlation_id`].

pub mod amqp;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{QueueError, TaskError};
use crate::store::Datastore;
use crate::tasks::model::now;
use crate::tasks::{Task, TaskRegistry};

pub use amqp::AmqpQueue;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header carrying the submitting user.
pub const USER_ID_HEADER: &str = "user_id";

/// One publish to the work queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub content_type: String,
    /// The task id. Workers use it to load the task.
    pub correlation_id: String,
    /// The task type tag.
    pub kind: String,
    pub user_id: String,
    /// JSON encoding of the task params.
    pub body: Vec<u8>,
}

/// A broker the service can publish tasks to.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError>;
}

impl Task {
    /// Build the publish payload for this task.
    pub fn queue_message(&self) -> Result<QueueMessage, QueueError> {
        Ok(QueueMessage {
            content_type: JSON_CONTENT_TYPE.to_string(),
            correlation_id: self.id.clone(),
            kind: self.task_type.clone(),
            user_id: self.user_id.clone(),
            body: serde_json::to_vec(&self.params)?,
        })
    }

    /// Persist, publish, then record `enqueued` and persist again.
    ///
    /// Nothing is retried. If the publish fails the stored task stays in its
    /// pre-enqueue state and `enqueued` stays unset. A task that is already
    /// enqueued is left alone and not published again.
    pub async fn enqueue(
        &mut self,
        store: &dyn Datastore,
        registry: &TaskRegistry,
        queue: &dyn TaskQueue,
    ) -> Result<(), TaskError> {
        if let Some(at) = self.enqueued {
            debug!(task_id = %self.id, enqueued = %at, "Task already enqueued, not publishing again");
            return Ok(());
        }

        self.save(store, registry).await?;

        let message = self.queue_message()?;
        if let Err(e) = queue.publish(&message).await {
            warn!(task_id = %self.id, error = %e, "Enqueue failed, task left unqueued");
            return Err(e.into());
        }

        self.enqueued = Some(now());
        self.save(store, registry).await?;

        info!(task_id = %self.id, task_type = %self.task_type, "Task enqueued");
        Ok(())
    }
}
