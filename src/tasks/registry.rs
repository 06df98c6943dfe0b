//! Task type registry: maps a type name to a constructor for its handler.
//!
//! The registry is an ordinary value: build it at startup, register every
//! handler, then share it behind an `Arc`. Nothing registers after that.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::{TaskError, ValidationStep};
use crate::store::Datastore;
use crate::tasks::progress::Progress;

/// Open-ended task parameters, decoded by the handler for the task's type.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A unit of work a task can perform.
#[async_trait]
pub trait Executable: Send + Sync {
    /// Self-check, called before the task is persisted and before it runs.
    fn valid(&self) -> anyhow::Result<()>;

    /// Do the work, sending progress updates on `progress`.
    ///
    /// Must send exactly one terminal update (`done` or a non-empty `error`).
    /// The driver waits for it without a timeout.
    async fn run(self: Box<Self>, progress: mpsc::Sender<Progress>);

    /// Datastore capability check. Handlers that need the driver's store
    /// return `Some(self)`; everything else keeps the default.
    fn datastore_aware(&mut self) -> Option<&mut dyn DatastoreAware> {
        None
    }
}

/// Optional capability: receive the driver's datastore before `run`.
pub trait DatastoreAware {
    fn set_datastore(&mut self, store: Arc<dyn Datastore>);
}

/// Builds a fresh handler from task params.
pub type Constructor =
    Arc<dyn Fn(serde_json::Value) -> Result<Box<dyn Executable>, serde_json::Error> + Send + Sync>;

/// Registry of task types.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    constructors: HashMap<String, Constructor>,
}

impl TaskRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler type decoded straight from task params.
    ///
    /// Registering a name twice replaces the earlier entry.
    pub fn register<T>(&mut self, name: impl Into<String>)
    where
        T: Executable + DeserializeOwned + 'static,
    {
        self.register_with(name, |params| {
            serde_json::from_value::<T>(params).map(|t| Box::new(t) as Box<dyn Executable>)
        });
    }

    /// Register a handler with a custom constructor.
    pub fn register_with<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(serde_json::Value) -> Result<Box<dyn Executable>, serde_json::Error>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self
            .constructors
            .insert(name.clone(), Arc::new(constructor))
            .is_some()
        {
            tracing::warn!(task_type = %name, "Task type re-registered, replacing previous handler");
        } else {
            tracing::debug!("Registered task type: {}", name);
        }
    }

    /// Check if a task type exists.
    pub fn has(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// List all registered type names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered task types.
    pub fn count(&self) -> usize {
        self.constructors.len()
    }

    /// Build a fresh handler for `task_type` from `params`.
    pub fn instantiate(
        &self,
        task_type: &str,
        params: &Params,
    ) -> Result<Box<dyn Executable>, TaskError> {
        let constructor = self
            .constructors
            .get(task_type)
            .ok_or_else(|| TaskError::UnknownType(task_type.to_string()))?;

        constructor(serde_json::Value::Object(params.clone())).map_err(|e| TaskError::Validation {
            step: ValidationStep::Params,
            reason: format!("error creating task from JSON: {e}"),
        })
    }

    /// Full validation: known type, decodable params, and the handler's own check.
    pub fn validate(&self, task_type: &str, params: &Params) -> Result<(), TaskError> {
        let handler = self.instantiate(task_type, params).map_err(|e| match e {
            TaskError::UnknownType(t) => TaskError::Validation {
                step: ValidationStep::Type,
                reason: format!("unrecognized task type: '{t}'"),
            },
            other => other,
        })?;

        handler.valid().map_err(|e| TaskError::Validation {
            step: ValidationStep::Valid,
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("types", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Greet {
        name: String,
    }

    #[async_trait]
    impl Executable for Greet {
        fn valid(&self) -> anyhow::Result<()> {
            anyhow::ensure!(!self.name.is_empty(), "name is required");
            Ok(())
        }

        async fn run(self: Box<Self>, progress: mpsc::Sender<Progress>) {
            let _ = progress.send(Progress::done()).await;
        }
    }

    #[derive(Debug, Deserialize)]
    struct Other {}

    #[async_trait]
    impl Executable for Other {
        fn valid(&self) -> anyhow::Result<()> {
            anyhow::bail!("always invalid")
        }

        async fn run(self: Box<Self>, _progress: mpsc::Sender<Progress>) {}
    }

    fn params(v: serde_json::Value) -> Params {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = TaskRegistry::new();
        registry.register::<Greet>("greet");

        assert!(registry.has("greet"));
        assert!(!registry.has("nonexistent"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.list(), vec!["greet".to_string()]);
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = TaskRegistry::new();
        registry.register::<Greet>("greet");
        registry.register::<Other>("greet");

        assert_eq!(registry.count(), 1);
        let err = registry
            .validate("greet", &params(json!({"name": "x"})))
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation { step: ValidationStep::Valid, .. }));
    }

    #[test]
    fn validate_reports_each_step() {
        let mut registry = TaskRegistry::new();
        registry.register::<Greet>("greet");

        assert!(registry.validate("greet", &params(json!({"name": "ada"}))).is_ok());

        let err = registry.validate("nope", &Params::new()).unwrap_err();
        assert!(matches!(err, TaskError::Validation { step: ValidationStep::Type, .. }));

        let err = registry
            .validate("greet", &params(json!({"name": 42})))
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation { step: ValidationStep::Params, .. }));

        let err = registry
            .validate("greet", &params(json!({"name": ""})))
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation { step: ValidationStep::Valid, .. }));
    }

    #[test]
    fn instantiate_unknown_type() {
        let registry = TaskRegistry::new();
        let err = registry.instantiate("ghost", &Params::new()).err().unwrap();
        assert!(matches!(err, TaskError::UnknownType(ref t) if t == "ghost"));
    }
}
