// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Shell action
//!
//! Renders a command template against a task's inputs, outputs and extras
//! and runs it through a shell.

use async_trait::async_trait;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;

use super::{Action, ActionResult, Invocation};
use crate::errors::{SeqflowError, SeqflowResult};
use crate::pipeline::{Fields, Template};

/// Shell action
#[derive(Debug, Clone)]
pub struct ShellAction {
    /// Command template
    command: Template,
    /// Shell to use (bash, sh, etc.)
    shell: String,
    /// Working directory for the command
    working_dir: PathBuf,
    /// Extra environment variables
    env: HashMap<String, String>,
}

impl ShellAction {
    /// Create a new shell action from a command template
    pub fn new(command: &str) -> SeqflowResult<Self> {
        Ok(Self {
            command: Template::parse(command)?,
            shell: "bash".to_string(),
            working_dir: PathBuf::from("."),
            env: HashMap::new(),
        })
    }

    /// Use a different shell
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run in `dir` (relative paths resolve against it)
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Export environment variables to the command
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Render the command line for an invocation
    pub fn render(&self, invocation: &Invocation) -> SeqflowResult<String> {
        self.command.render(&CommandFields(invocation))
    }

    fn output_dirs(&self, invocation: &Invocation) -> Vec<PathBuf> {
        invocation
            .outputs
            .iter()
            .filter_map(|o| Path::new(o).parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| self.working_dir.join(p))
            .collect()
    }
}

/// Placeholder values visible to a command template
struct CommandFields<'a>(&'a Invocation);

impl Fields for CommandFields<'_> {
    fn lookup(&self, name: &str, index: Option<usize>) -> Option<Cow<'_, str>> {
        let list = match name {
            "inputs" | "input" => &self.0.inputs,
            "outputs" | "output" => &self.0.outputs,
            "extras" | "extra" => &self.0.extras,
            _ => return None,
        };

        match (name.ends_with('s'), index) {
            (_, Some(i)) => list.get(i).map(|s| Cow::Borrowed(s.as_str())),
            (true, None) => Some(Cow::Owned(list.join(" "))),
            (false, None) => list.first().map(|s| Cow::Borrowed(s.as_str())),
        }
    }
}

#[async_trait]
impl Action for ShellAction {
    async fn run(&self, invocation: &Invocation) -> SeqflowResult<ActionResult> {
        let command = self.render(invocation)?;

        for dir in self.output_dirs(invocation) {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&command);
        cmd.current_dir(&self.working_dir);
        cmd.envs(&self.env);

        let output = cmd.output().await.map_err(|e| SeqflowError::ActionFailed {
            task: invocation.task.clone(),
            message: format!("could not start '{}': {}", self.shell, e),
        })?;

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(ActionResult {
                success: true,
                stdout,
                stderr,
                exit_code: 0,
                duration,
            })
        } else {
            Ok(ActionResult {
                success: false,
                stdout,
                stderr,
                exit_code: output.status.code().unwrap_or(-1),
                duration,
            })
        }
    }

    fn describe(&self) -> String {
        self.command.as_str().to_string()
    }

    async fn check_available(&self) -> SeqflowResult<bool> {
        Ok(which::which(&self.shell).is_ok())
    }
}
