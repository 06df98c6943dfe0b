//! `TaskRequests`: the enqueue/get/list facade.

use std::sync::Arc;

use tracing::debug;

use crate::error::TaskError;
use crate::queue::TaskQueue;
use crate::rpc::{TasksEnqueueParams, TasksGetParams, TasksListParams};
use crate::store::Datastore;
use crate::tasks::{Task, TaskRegistry, read_tasks};

/// Stateless apart from the shared store, registry and queue.
#[derive(Clone)]
pub struct TaskRequests {
    store: Arc<dyn Datastore>,
    registry: Arc<TaskRegistry>,
    queue: Arc<dyn TaskQueue>,
}

impl TaskRequests {
    pub fn new(
        store: Arc<dyn Datastore>,
        registry: Arc<TaskRegistry>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
        }
    }

    /// Build a task from the inputs and enqueue it.
    pub async fn enqueue(&self, params: TasksEnqueueParams) -> Result<Task, TaskError> {
        let mut task = Task::new(params.task_type, params.title, params.user_id, params.params);
        task.enqueue(self.store.as_ref(), &self.registry, self.queue.as_ref())
            .await?;
        Ok(task)
    }

    pub async fn get(&self, params: TasksGetParams) -> Result<Task, TaskError> {
        debug!(task_id = %params.id, "Get task");
        Task::from_correlation_id(self.store.as_ref(), &params.id).await
    }

    pub async fn list(&self, params: TasksListParams) -> Result<Vec<Task>, TaskError> {
        read_tasks(
            self.store.as_ref(),
            &params.order_by,
            params.limit,
            params.offset,
        )
        .await
    }
}
