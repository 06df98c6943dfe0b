//! Progress updates emitted by an executing task.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One execution update.
///
/// A handler must eventually send exactly one update that is either
/// `done` or carries a non-empty `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Fraction complete, between 0.0 and 1.0.
    #[serde(default)]
    pub percent: f32,
    #[serde(default)]
    pub step: u32,
    #[serde(default)]
    pub steps: u32,
    /// What is currently happening.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Where to send the user afterwards (url or relative path).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dest: String,
}

impl Progress {
    /// A step update.
    pub fn step(step: u32, steps: u32, status: impl Into<String>) -> Self {
        let percent = if steps == 0 {
            0.0
        } else {
            (step as f32 / steps as f32).clamp(0.0, 1.0)
        };
        Self {
            percent,
            step,
            steps,
            status: status.into(),
            ..Default::default()
        }
    }

    /// Terminal success.
    pub fn done() -> Self {
        Self {
            percent: 1.0,
            done: true,
            ..Default::default()
        }
    }

    /// Terminal failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = dest.into();
        self
    }

    /// The failure message, if this update reports one. Empty strings don't count.
    pub fn failure(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Whether this update ends the task.
    pub fn is_terminal(&self) -> bool {
        self.done || self.failure().is_some()
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.done {
            return write!(f, "task done");
        }
        write!(
            f,
            "{}/{}: {:.6} - {}",
            self.step, self.steps, self.percent, self.status
        )
    }
}
