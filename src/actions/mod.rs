// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Stage actions
//!
//! An action is the opaque unit of work behind a stage: it receives the
//! resolved inputs, outputs and extra parameters of one task instance and
//! must create every output on success. The engine never looks inside.

mod shell;

pub use shell::ShellAction;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{SeqflowError, SeqflowResult};

/// Arguments handed to an action for one task instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// Task label, for diagnostics
    pub task: String,
    /// Ordered input paths
    pub inputs: Vec<String>,
    /// Ordered output paths
    pub outputs: Vec<String>,
    /// Positional extra parameters
    pub extras: Vec<String>,
}

/// Result of running an action
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Whether the action succeeded
    pub success: bool,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Exit code
    pub exit_code: i32,

    /// Wall-clock duration
    pub duration: Duration,
}

impl ActionResult {
    /// Create a successful result
    pub fn success(stdout: String, duration: Duration) -> Self {
        Self {
            success: true,
            stdout,
            stderr: String::new(),
            exit_code: 0,
            duration,
        }
    }

    /// Create a failed result
    pub fn failure(stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr,
            exit_code,
            duration,
        }
    }

    /// One-line failure summary (last non-empty stderr line)
    pub fn failure_summary(&self) -> String {
        let line = self
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(str::trim);
        match line {
            Some(l) => format!("exit code {}: {}", self.exit_code, l),
            None => format!("exit code {}", self.exit_code),
        }
    }
}

/// Trait for stage actions
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action for one task instance
    async fn run(&self, invocation: &Invocation) -> SeqflowResult<ActionResult>;

    /// Short human-readable description (command line, function name)
    fn describe(&self) -> String;

    /// Check whether the action can run on this machine
    async fn check_available(&self) -> SeqflowResult<bool> {
        Ok(true)
    }
}

type ActionFn = dyn Fn(&Invocation) -> Result<(), String> + Send + Sync;

/// Action backed by a synchronous closure.
///
/// The closure runs on tokio's blocking pool, so it may do ordinary
/// blocking filesystem or process work.
#[derive(Clone)]
pub struct FnAction {
    name: String,
    func: Arc<ActionFn>,
}

impl FnAction {
    /// Wrap a closure
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Invocation) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Action that does nothing and always succeeds.
    ///
    /// Handy for marker stages whose outputs are produced elsewhere.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, |_| Ok(()))
    }
}

impl std::fmt::Debug for FnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Action for FnAction {
    async fn run(&self, invocation: &Invocation) -> SeqflowResult<ActionResult> {
        let func = Arc::clone(&self.func);
        let invocation = invocation.clone();
        let start = Instant::now();

        let outcome = tokio::task::spawn_blocking(move || func(&invocation))
            .await
            .map_err(|e| SeqflowError::ActionFailed {
                task: self.name.clone(),
                message: format!("action panicked: {e}"),
            })?;

        Ok(match outcome {
            Ok(()) => ActionResult::success(String::new(), start.elapsed()),
            Err(message) => ActionResult::failure(message, 1, start.elapsed()),
        })
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_action_success() {
        let action = FnAction::new("touch", |inv| {
            assert_eq!(inv.extras, vec!["S1".to_string()]);
            Ok(())
        });
        let inv = Invocation {
            task: "t".into(),
            extras: vec!["S1".into()],
            ..Default::default()
        };

        let result = action.run(&inv).await.unwrap();
        assert!(result.success);
        assert_eq!(action.describe(), "touch");
    }

    #[tokio::test]
    async fn test_fn_action_failure() {
        let action = FnAction::new("boom", |_| Err("reference genome missing".into()));
        let result = action.run(&Invocation::default()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.failure_summary(), "exit code 1: reference genome missing");
    }

    #[test]
    fn test_failure_summary_without_stderr() {
        let result = ActionResult::failure(String::new(), 3, Duration::ZERO);
        assert_eq!(result.failure_summary(), "exit code 3");
    }
}
