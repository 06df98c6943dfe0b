//! Built-in task handlers.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::tasks::progress::Progress;
use crate::tasks::registry::{Executable, TaskRegistry};

/// Register every built-in handler.
pub fn register_builtin(registry: &mut TaskRegistry) {
    registry.register::<Echo>("echo");
}

/// Reports its message as a single step, then finishes.
#[derive(Debug, Deserialize)]
pub struct Echo {
    #[serde(default)]
    pub msg: String,
}

#[async_trait]
impl Executable for Echo {
    fn valid(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(self: Box<Self>, progress: mpsc::Sender<Progress>) {
        if !self.msg.is_empty() {
            let _ = progress.send(Progress::step(1, 1, self.msg)).await;
        }
        let _ = progress.send(Progress::done()).await;
    }
}
