// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Pipeline file
//!
//! Defines the schema for seqflow.yaml files and turns a parsed file into a
//! [`Pipeline`] with one shell action per stage.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::actions::ShellAction;
use crate::errors::{SeqflowError, SeqflowResult};
use crate::pipeline::definition::{InputSource, StageKind};
use crate::pipeline::executor::FailureMode;
use crate::pipeline::pattern::MatchRule;
use crate::pipeline::registry::{Pipeline, StageOptions};

/// Pipeline definition from seqflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    /// File format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Seed paths or glob patterns; the default inputs of origin stages
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Default worker count
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Escalate instantiation warnings to errors
    #[serde(default)]
    pub strict: bool,

    /// Failure handling
    #[serde(default)]
    pub mode: FailureMode,

    /// Environment variables exported to every command
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Stages, in any order
    pub stages: Vec<StageConfig>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_shell() -> String {
    "bash".to_string()
}

/// A single stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name (must be unique within the pipeline)
    pub name: String,

    /// Stage kind
    pub kind: StageKind,

    /// Stage description
    #[serde(default)]
    pub description: Option<String>,

    /// Input specification
    #[serde(default)]
    pub input: Option<InputConfig>,

    /// Match rule for transforms, written as `{ formatter: .. }` or `{ suffix: .. }`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub filter: Option<FilterConfig>,

    /// Companion input templates
    #[serde(default)]
    pub add_inputs: Vec<String>,

    /// Extra parameter templates
    #[serde(default)]
    pub extras: Vec<String>,

    /// Output template(s)
    #[serde(default)]
    pub output: Option<OneOrMany>,

    /// Shell command template
    #[serde(default)]
    pub command: Option<String>,

    /// Shell to use (bash, sh, etc.)
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Stages that must finish first
    #[serde(default)]
    pub run_after: Vec<String>,

    /// Environment variables for this stage
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Input specification for a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputConfig {
    /// Outputs of one or more upstream stages
    FromStage {
        /// Upstream stage name(s)
        from_stage: OneOrMany,
    },

    /// Literal files or glob patterns
    Files(Vec<String>),
}

/// A single value or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// Match rule specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterConfig {
    /// Regular expression with named groups
    Formatter(String),
    /// Literal suffix
    Suffix(String),
}

impl PipelineFile {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> SeqflowResult<Self> {
        if !path.exists() {
            return Err(SeqflowError::PipelineNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SeqflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from a YAML string
    pub fn from_yaml(yaml: &str) -> SeqflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Declare every stage on a new [`Pipeline`].
    ///
    /// Relative seed patterns resolve against `base_dir`.
    pub fn into_pipeline(&self, base_dir: &Path) -> SeqflowResult<Pipeline> {
        let mut pipeline = Pipeline::new(&self.name);

        for stage in &self.stages {
            self.declare(&mut pipeline, stage, base_dir)?;
        }

        Ok(pipeline)
    }

    fn declare(
        &self,
        pipeline: &mut Pipeline,
        stage: &StageConfig,
        base_dir: &Path,
    ) -> SeqflowResult<()> {
        let invalid = |reason: &str| SeqflowError::InvalidStage {
            stage: stage.name.clone(),
            reason: reason.to_string(),
        };

        if stage.kind == StageKind::Origin {
            let patterns = match &stage.input {
                None => self.seeds.clone(),
                Some(InputConfig::Files(files)) => files.clone(),
                Some(InputConfig::FromStage { .. }) => {
                    return Err(invalid("an origin cannot read from another stage"))
                }
            };
            return pipeline.declare_origin(&stage.name, expand_seeds(&patterns, base_dir)?);
        }

        let upstream = match stage.input.clone() {
            Some(InputConfig::FromStage { from_stage }) => InputSource::Stages(from_stage.into_vec()),
            Some(InputConfig::Files(files)) => InputSource::Files(expand_seeds(&files, base_dir)?),
            None => return Err(invalid("missing 'input'")),
        };
        let command = stage
            .command
            .as_deref()
            .ok_or_else(|| invalid("missing 'command'"))?;
        let outputs = stage
            .output
            .clone()
            .map(OneOrMany::into_vec)
            .ok_or_else(|| invalid("missing 'output'"))?;

        let mut env = self.env.clone();
        env.extend(stage.env.clone());
        let action = Arc::new(
            ShellAction::new(command)?
                .with_shell(&stage.shell)
                .with_env(env),
        );

        let mut options = StageOptions::new();
        for template in &stage.add_inputs {
            options = options.add_input(template);
        }
        for template in &stage.extras {
            options = options.extra(template);
        }
        for name in &stage.run_after {
            options = options.run_after(name);
        }
        if let Some(text) = &stage.description {
            options = options.description(text);
        }

        match stage.kind {
            StageKind::Transform => {
                let rule = match &stage.filter {
                    Some(FilterConfig::Formatter(regex)) => MatchRule::formatter(&stage.name, regex)?,
                    Some(FilterConfig::Suffix(suffix)) => MatchRule::suffix(suffix),
                    None => return Err(invalid("a transform needs a 'filter'")),
                };
                pipeline.declare_transform(&stage.name, upstream, rule, outputs, action, options)
            }
            StageKind::Merge => {
                if stage.filter.is_some() {
                    return Err(invalid("merge stages take no 'filter'"));
                }
                let [output] = outputs.as_slice() else {
                    return Err(invalid("a merge has exactly one output"));
                };
                pipeline.declare_merge(&stage.name, upstream, output, action, options)
            }
            StageKind::Origin => Err(invalid("origin stages take no command")),
        }
    }
}

/// Expand glob patterns into a sorted, de-duplicated path list.
///
/// Patterns without glob characters are kept as literal paths even when the
/// file does not exist yet.
fn expand_seeds(patterns: &[String], base_dir: &Path) -> SeqflowResult<Vec<String>> {
    let mut seeds = Vec::new();

    for pattern in patterns {
        let full = resolve(base_dir, pattern);

        if !is_glob(pattern) {
            push_unique(&mut seeds, full.to_string_lossy().into_owned());
            continue;
        }

        let mut matched: Vec<String> = glob::glob(&full.to_string_lossy())?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        if matched.is_empty() {
            return Err(SeqflowError::NoInputFiles {
                pattern: pattern.clone(),
            });
        }
        matched.sort();
        for path in matched {
            push_unique(&mut seeds, path);
        }
    }

    Ok(seeds)
}

fn resolve(base_dir: &Path, pattern: &str) -> PathBuf {
    if base_dir.as_os_str().is_empty() || base_dir == Path::new(".") || Path::new(pattern).is_absolute() {
        PathBuf::from(pattern)
    } else {
        base_dir.join(pattern)
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn push_unique(list: &mut Vec<String>, path: String) {
    if !list.contains(&path) {
        list.push(path);
    }
}
