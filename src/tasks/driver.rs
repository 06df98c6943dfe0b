//! Execution driver: runs one task and relays its progress.
//!
//! The handler runs on its own tokio task; the driver consumes its progress
//! channel in the caller's context, forwards every update to the caller, and
//! records the terminal state. There is no timeout: a handler that never
//! sends a terminal update keeps the driver waiting.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::PersistPolicy;
use crate::error::TaskError;
use crate::store::Datastore;
use crate::tasks::model::Task;
use crate::tasks::progress::Progress;
use crate::tasks::registry::TaskRegistry;

/// Buffer between a running handler and the driver loop.
const PROGRESS_BUFFER: usize = 10;

/// Drives task execution against a store and registry.
#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<dyn Datastore>,
    registry: Arc<TaskRegistry>,
    policy: PersistPolicy,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn Datastore>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            store,
            registry,
            policy: PersistPolicy::default(),
        }
    }

    /// Choose how terminal state is persisted.
    pub fn with_policy(mut self, policy: PersistPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> PersistPolicy {
        self.policy
    }

    /// Execute `task`, forwarding each progress update to `results`.
    ///
    /// Returns `Ok(())` on a `done` update and `TaskError::Execution` on an
    /// error update. A failed pre-execution save aborts before the handler starts.
    /// A terminal update for a task that already finished leaves its recorded
    /// outcome in place and returns that outcome.
    pub async fn run(
        &self,
        task: &mut Task,
        results: &mpsc::Sender<Progress>,
    ) -> Result<(), TaskError> {
        let mut handler = self.registry.instantiate(&task.task_type, &task.params)?;

        if let Some(aware) = handler.datastore_aware() {
            aware.set_datastore(Arc::clone(&self.store));
        }

        task.mark_started();
        task.save(self.store.as_ref(), &self.registry).await?;

        info!(task_id = %task.id, task_type = %task.task_type, "Task started");

        let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
        tokio::spawn(handler.run(tx));

        while let Some(progress) = rx.recv().await {
            debug!(task_id = %task.id, progress = %progress, "Task progress");
            task.progress = Some(progress.clone());

            if results.send(progress.clone()).await.is_err() {
                debug!(task_id = %task.id, "Progress receiver dropped, continuing");
            }

            if let Some(message) = progress.failure() {
                if !task.mark_failed(message) {
                    warn!(task_id = %task.id, error = %message, "Failure reported for a finished task, keeping recorded outcome");
                    return recorded_outcome(task);
                }
                warn!(task_id = %task.id, error = %message, "Task failed");
                self.persist_terminal(task).await;
                return recorded_outcome(task);
            }

            if progress.done {
                if !task.mark_succeeded() {
                    warn!(task_id = %task.id, "Completion reported for a finished task, keeping recorded outcome");
                    return recorded_outcome(task);
                }
                info!(task_id = %task.id, "Task succeeded");
                self.persist_terminal(task).await;
                return recorded_outcome(task);
            }
        }

        warn!(task_id = %task.id, "Progress channel closed before a terminal update");
        Err(TaskError::ProgressClosed {
            id: task.id.clone(),
        })
    }

    /// Persist terminal state per policy. Failures are logged, never returned.
    async fn persist_terminal(&self, task: &Task) {
        let mut snapshot = task.clone();
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);

        let save = async move {
            if let Err(e) = snapshot.save(store.as_ref(), &registry).await {
                error!(task_id = %snapshot.id, error = %e, "Failed to persist terminal task state");
            }
        };

        match self.policy {
            PersistPolicy::BestEffort => {
                tokio::spawn(save);
            }
            PersistPolicy::Synchronous => save.await,
        }
    }
}

/// Result matching the task's terminal timestamps.
fn recorded_outcome(task: &Task) -> Result<(), TaskError> {
    if task.failed.is_some() {
        Err(TaskError::Execution {
            id: task.id.clone(),
            message: task.error.clone(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::store::{MemoryDatastore, Query};
    use crate::tasks::registry::{DatastoreAware, Executable, Params};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Deserialize)]
    struct Steps {
        steps: u32,
        #[serde(default)]
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Executable for Steps {
        fn valid(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn run(self: Box<Self>, progress: mpsc::Sender<Progress>) {
            for i in 1..=self.steps {
                let _ = progress.send(Progress::step(i, self.steps, "working")).await;
            }
            let last = match self.fail_with {
                Some(e) => Progress::failed(e),
                None => Progress::done().with_dest("/results"),
            };
            let _ = progress.send(last).await;
        }
    }

    #[derive(Deserialize)]
    struct Silent {}

    #[async_trait]
    impl Executable for Silent {
        fn valid(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn run(self: Box<Self>, progress: mpsc::Sender<Progress>) {
            let _ = progress.send(Progress::step(1, 2, "stuck")).await;
            std::future::pending::<()>().await;
        }
    }

    #[derive(Deserialize)]
    struct Quitter {}

    #[async_trait]
    impl Executable for Quitter {
        fn valid(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn run(self: Box<Self>, _progress: mpsc::Sender<Progress>) {}
    }

    static STORE_INJECTED: AtomicBool = AtomicBool::new(false);

    #[derive(Deserialize)]
    struct NeedsStore {
        #[serde(skip)]
        store: Option<Arc<dyn Datastore>>,
    }

    impl DatastoreAware for NeedsStore {
        fn set_datastore(&mut self, store: Arc<dyn Datastore>) {
            self.store = Some(store);
        }
    }

    #[async_trait]
    impl Executable for NeedsStore {
        fn valid(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn run(self: Box<Self>, progress: mpsc::Sender<Progress>) {
            let update = match &self.store {
                Some(store) => match store.query(&Query::prefix("Task:")).await {
                    Ok(records) if !records.is_empty() => {
                        STORE_INJECTED.store(true, Ordering::SeqCst);
                        Progress::done()
                    }
                    Ok(_) => Progress::failed("store is empty"),
                    Err(e) => Progress::failed(e.to_string()),
                },
                None => Progress::failed("no store injected"),
            };
            let _ = progress.send(update).await;
        }

        fn datastore_aware(&mut self) -> Option<&mut dyn DatastoreAware> {
            Some(self)
        }
    }

    /// Store whose writes can be switched off.
    struct FlakyStore {
        inner: MemoryDatastore,
        fail_puts: AtomicBool,
    }

    #[async_trait]
    impl Datastore for FlakyStore {
        async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), DatabaseError> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(DatabaseError::Query("disk full".into()));
            }
            self.inner.put(key, value).await
        }
        async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
            self.inner.get(key).await
        }
        async fn has(&self, key: &str) -> Result<bool, DatabaseError> {
            self.inner.has(key).await
        }
        async fn delete(&self, key: &str) -> Result<(), DatabaseError> {
            self.inner.delete(key).await
        }
        async fn query(&self, query: &Query) -> Result<Vec<serde_json::Value>, DatabaseError> {
            self.inner.query(query).await
        }
    }

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry.register::<Steps>("steps");
        registry.register::<Silent>("silent");
        registry.register::<Quitter>("quitter");
        registry.register::<NeedsStore>("needs_store");
        Arc::new(registry)
    }

    fn task(task_type: &str, params: serde_json::Value) -> Task {
        Task::new(task_type, "t", "u", params.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn success_forwards_progress_and_persists() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(Arc::clone(&store), registry())
            .with_policy(PersistPolicy::Synchronous);
        let (tx, mut rx) = mpsc::channel(16);

        let mut t = task("steps", json!({"steps": 2}));
        runner.run(&mut t, &tx).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p);
        }
        assert_eq!(seen.len(), 3);
        assert!(seen[2].done);

        assert!(t.started.is_some());
        assert!(t.succeeded.is_some());
        assert!(t.failed.is_none());
        assert_eq!(t.progress.as_ref().unwrap().dest, "/results");

        let stored = Task::from_correlation_id(store.as_ref(), &t.id).await.unwrap();
        assert!(stored.succeeded.is_some());
        assert!(stored.failed.is_none());
    }

    #[tokio::test]
    async fn failure_sets_error_and_failed() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(Arc::clone(&store), registry())
            .with_policy(PersistPolicy::Synchronous);
        let (tx, _rx) = mpsc::channel(16);

        let mut t = task("steps", json!({"steps": 1, "fail_with": "bad input"}));
        let err = runner.run(&mut t, &tx).await.unwrap_err();

        assert!(matches!(err, TaskError::Execution { ref message, .. } if message == "bad input"));
        assert_eq!(t.error, "bad input");
        assert!(t.failed.is_some());
        assert!(t.succeeded.is_none());

        let stored = Task::from_correlation_id(store.as_ref(), &t.id).await.unwrap();
        assert!(stored.failed.is_some());
        assert!(stored.succeeded.is_none());
    }

    #[tokio::test]
    async fn best_effort_persists_eventually() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(Arc::clone(&store), registry());
        assert_eq!(runner.policy(), PersistPolicy::BestEffort);
        let (tx, _rx) = mpsc::channel(16);

        let mut t = task("steps", json!({"steps": 0}));
        runner.run(&mut t, &tx).await.unwrap();

        let id = t.id.clone();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let stored = Task::from_correlation_id(store.as_ref(), &id).await.unwrap();
                if stored.succeeded.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("terminal state never persisted");
    }

    #[tokio::test]
    async fn unknown_type_fails_before_anything_runs() {
        let store = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(store.clone(), registry());
        let (tx, _rx) = mpsc::channel(1);

        let mut t = task("ghost", json!({}));
        let err = runner.run(&mut t, &tx).await.unwrap_err();
        assert!(matches!(err, TaskError::UnknownType(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn pre_execution_save_failure_aborts() {
        let store = Arc::new(FlakyStore {
            inner: MemoryDatastore::new(),
            fail_puts: AtomicBool::new(true),
        });
        let runner = TaskRunner::new(store.clone(), registry());
        let (tx, mut rx) = mpsc::channel(16);

        let mut t = task("steps", json!({"steps": 3}));
        let err = runner.run(&mut t, &tx).await.unwrap_err();
        assert!(matches!(err, TaskError::Store(_)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "handler must not have run");
    }

    #[tokio::test]
    async fn terminal_save_failure_is_swallowed() {
        let store = Arc::new(FlakyStore {
            inner: MemoryDatastore::new(),
            fail_puts: AtomicBool::new(false),
        });
        let runner = TaskRunner::new(store.clone(), registry())
            .with_policy(PersistPolicy::Synchronous);

        let mut t = task("steps", json!({"steps": 1}));
        t.save(store.as_ref(), &registry()).await.unwrap();

        // Break writes once the handler reports, so only the terminal save fails.
        let (tx, mut rx) = mpsc::channel(16);
        let flaky = Arc::clone(&store);
        let watcher = tokio::spawn(async move {
            if rx.recv().await.is_some() {
                flaky.fail_puts.store(true, Ordering::SeqCst);
            }
            while rx.recv().await.is_some() {}
        });

        let result = runner.run(&mut t, &tx).await;
        drop(tx);
        watcher.await.unwrap();

        assert!(result.is_ok());
        assert!(t.succeeded.is_some());
    }

    #[tokio::test]
    async fn handler_without_terminal_update_blocks_driver() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(store, registry());
        let (tx, mut rx) = mpsc::channel(16);

        let mut t = task("silent", json!({}));
        let outcome = tokio::time::timeout(Duration::from_millis(200), runner.run(&mut t, &tx)).await;

        assert!(outcome.is_err(), "driver should still be waiting");
        assert_eq!(rx.recv().await.unwrap().status, "stuck");
    }

    #[tokio::test]
    async fn late_failure_keeps_recorded_success() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(Arc::clone(&store), registry())
            .with_policy(PersistPolicy::Synchronous);
        let (tx, _rx) = mpsc::channel(16);

        let mut t = task("steps", json!({"steps": 0, "fail_with": "too late"}));
        t.succeeded = Some(crate::tasks::model::now());

        runner.run(&mut t, &tx).await.unwrap();
        assert!(t.succeeded.is_some());
        assert!(t.failed.is_none());
        assert!(t.error.is_empty());
    }

    #[tokio::test]
    async fn late_success_keeps_recorded_failure() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(Arc::clone(&store), registry())
            .with_policy(PersistPolicy::Synchronous);
        let (tx, _rx) = mpsc::channel(16);

        let mut t = task("steps", json!({"steps": 0}));
        t.mark_failed("first run broke");

        let err = runner.run(&mut t, &tx).await.unwrap_err();
        assert!(matches!(err, TaskError::Execution { ref message, .. } if message == "first run broke"));
        assert!(t.succeeded.is_none());
        assert!(t.failed.is_some());
    }

    #[tokio::test]
    async fn handler_dropping_channel_is_reported() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(store, registry());
        let (tx, _rx) = mpsc::channel(16);

        let mut t = task("quitter", json!({}));
        let err = runner.run(&mut t, &tx).await.unwrap_err();
        assert!(matches!(err, TaskError::ProgressClosed { .. }));
        assert!(!t.is_finished());
    }

    #[tokio::test]
    async fn datastore_capability_is_injected() {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let runner = TaskRunner::new(store, registry()).with_policy(PersistPolicy::Synchronous);
        let (tx, _rx) = mpsc::channel(16);

        let mut t = Task::new("needs_store", "t", "u", Params::new());
        runner.run(&mut t, &tx).await.unwrap();
        assert!(STORE_INJECTED.load(Ordering::SeqCst));
    }
}
