//! Task entity: identity, lifecycle timestamps, and persistence.
//!
//! A `Task` is the storable state around a unit of work, not the work
//! itself. The work is done by the `Executable` registered for `task_type`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DatabaseError, TaskError};
use crate::store::{Datastore, Query};
use crate::tasks::progress::Progress;
use crate::tasks::registry::{Params, TaskRegistry};

/// Datastore namespace for tasks.
pub const TASK_KIND: &str = "Task";

/// Prefix for per-task pub/sub progress channels.
pub const PROGRESS_CHANNEL_PREFIX: &str = "tasks";

/// Lifecycle status derived from a task's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Never saved.
    New,
    /// Saved but not yet on the queue.
    Enqueuing,
    Queued,
    Running,
    Finished,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Enqueuing => "enqueuing",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A persisted unit of schedulable work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Empty until the first successful save.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default)]
    pub params: Params,
    /// Free-form status text. Lifecycle state comes from [`Task::status`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// When the task was handed to the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<DateTime<Utc>>,
    /// Latest progress. Only persisted opportunistically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

/// Current time at second resolution.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().round_subsecs(0)
}

impl Task {
    /// Create a new, unsaved task.
    pub fn new(
        task_type: impl Into<String>,
        title: impl Into<String>,
        user_id: impl Into<String>,
        params: Params,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            title: title.into(),
            user_id: user_id.into(),
            params,
            ..Default::default()
        }
    }

    /// Datastore key: `Task:<id>`.
    pub fn key(&self) -> String {
        key_for(&self.id)
    }

    /// Pub/sub channel carrying this task's progress: `tasks.<id>`.
    pub fn pubsub_channel(&self) -> String {
        format!("{PROGRESS_CHANNEL_PREFIX}.{}", self.id)
    }

    /// Derive a status from the lifecycle timestamps.
    ///
    /// Priority: failed > succeeded > started > enqueued > saved > new.
    pub fn status(&self) -> TaskStatus {
        if self.failed.is_some() {
            TaskStatus::Failed
        } else if self.succeeded.is_some() {
            TaskStatus::Finished
        } else if self.started.is_some() {
            TaskStatus::Running
        } else if self.enqueued.is_some() {
            TaskStatus::Queued
        } else if !self.id.is_empty() {
            TaskStatus::Enqueuing
        } else {
            TaskStatus::New
        }
    }

    /// Whether a terminal timestamp is already set.
    pub fn is_finished(&self) -> bool {
        self.succeeded.is_some() || self.failed.is_some()
    }

    /// Set `started` if it was never set.
    pub fn mark_started(&mut self) {
        self.started.get_or_insert_with(now);
    }

    /// Record success. No-op if the task already finished either way.
    pub fn mark_succeeded(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.succeeded = Some(now());
        true
    }

    /// Record failure. No-op if the task already finished either way.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if self.is_finished() {
            return false;
        }
        self.error = error.into();
        self.failed = Some(now());
        true
    }

    /// Validate against the registry, assign an id on first save, and write
    /// the full record.
    pub async fn save(
        &mut self,
        store: &dyn Datastore,
        registry: &TaskRegistry,
    ) -> Result<(), TaskError> {
        registry.validate(&self.task_type, &self.params)?;

        let exists = if self.id.is_empty() {
            false
        } else {
            store.has(&self.key()).await?
        };

        if exists {
            self.updated = now();
        } else {
            self.id = Uuid::new_v4().to_string();
            self.created = now();
            self.updated = self.created;
        }

        let record = serde_json::to_value(&*self)
            .map_err(|e| DatabaseError::Serialization(format!("task {}: {e}", self.id)))?;
        store.put(&self.key(), &record).await?;

        debug!(task_id = %self.id, task_type = %self.task_type, created = !exists, "Task saved");
        Ok(())
    }

    /// Replace this task's state with the stored record for `self.id`.
    pub async fn read(&mut self, store: &dyn Datastore) -> Result<(), TaskError> {
        if self.id.is_empty() {
            return Err(TaskError::NotFound { id: String::new() });
        }

        let record = store
            .get(&self.key())
            .await?
            .ok_or_else(|| TaskError::NotFound {
                id: self.id.clone(),
            })?;

        *self = decode(record)?;
        Ok(())
    }

    /// Remove the stored record.
    pub async fn delete(&self, store: &dyn Datastore) -> Result<(), TaskError> {
        store.delete(&self.key()).await?;
        debug!(task_id = %self.id, "Task deleted");
        Ok(())
    }

    /// Load the task a queue delivery refers to by its correlation id.
    pub async fn from_correlation_id(
        store: &dyn Datastore,
        correlation_id: &str,
    ) -> Result<Task, TaskError> {
        let mut task = Task {
            id: correlation_id.to_string(),
            ..Default::default()
        };
        task.read(store).await?;
        Ok(task)
    }
}

fn key_for(id: &str) -> String {
    format!("{TASK_KIND}:{id}")
}

fn decode(record: serde_json::Value) -> Result<Task, TaskError> {
    serde_json::from_value(record)
        .map_err(|e| TaskError::Store(DatabaseError::Serialization(format!("task record: {e}"))))
}

/// Read a page of tasks. `order_by` is advisory and may be ignored by the store.
pub async fn read_tasks(
    store: &dyn Datastore,
    order_by: &str,
    limit: usize,
    offset: usize,
) -> Result<Vec<Task>, TaskError> {
    let records = store
        .query(&Query {
            prefix: format!("{TASK_KIND}:"),
            order_by: order_by.to_string(),
            limit,
            offset,
        })
        .await?;

    records.into_iter().map(decode).collect()
}
