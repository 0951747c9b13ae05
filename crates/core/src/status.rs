//! Status vocabulary shared by tasks and their executions
//!
//! A task's status mirrors its latest execution. An execution moves from
//! `Running` to exactly one terminal state and never leaves it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Ready,
    Running,
    Success,
    Failed,
    Timeout,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Ready
    }
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Transitions allowed for a task record.
    ///
    /// Anything idle may be admitted to `Running`; a running task only
    /// resolves to a terminal state; a finished task may be reset to `Ready`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Running, next) => next.is_terminal(),
            (_, Self::Running) => true,
            (from, Self::Ready) => from.is_terminal(),
            _ => false,
        }
    }

    /// Transitions allowed for an execution record: only `Running` to terminal.
    pub fn can_finish_as(&self, next: TaskStatus) -> bool {
        *self == Self::Running && next.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "READY" => Ok(Self::Ready),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "TIMEOUT" => Ok(Self::Timeout),
            _ => Err(Error::InvalidInput(format!("Unknown task status: {}", s))),
        }
    }
}
