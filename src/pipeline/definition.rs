// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Stage definitions
//!
//! A [`StageDef`] is the declared, immutable description of one pipeline
//! step. Stages name each other as strings; references are only checked
//! when the graph is built, so declaration order does not matter.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::actions::Action;
use crate::pipeline::pattern::MatchRule;
use crate::pipeline::template::Template;

/// Kind of stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Anchors the graph at a literal file set
    Origin,
    /// One task per matched input
    Transform,
    /// One task over every upstream output
    Merge,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origin => write!(f, "origin"),
            Self::Transform => write!(f, "transform"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Where a stage's inputs come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Literal paths (seeds for an origin, raw files for a transform)
    Files(Vec<String>),
    /// Outputs of the named upstream stages, in the listed order
    Stages(Vec<String>),
}

impl InputSource {
    /// Reference a single upstream stage
    pub fn stage(name: impl Into<String>) -> Self {
        Self::Stages(vec![name.into()])
    }

    /// Upstream stage names, if any
    pub fn referenced_stages(&self) -> &[String] {
        match self {
            Self::Stages(names) => names,
            Self::Files(_) => &[],
        }
    }
}

/// A declared stage
#[derive(Clone)]
pub struct StageDef {
    /// Unique stage name
    pub name: String,

    /// Stage kind
    pub kind: StageKind,

    /// Input source
    pub input: InputSource,

    /// Match rule (absent for origins and merges)
    pub match_rule: Option<MatchRule>,

    /// Output templates; a literal path for merges, empty for origins (seeds live in `input`)
    pub outputs: Vec<Template>,

    /// Companion input templates, resolved from the driving input's fields
    pub companions: Vec<Template>,

    /// Extra positional parameters for the action
    pub extras: Vec<Template>,

    /// Action run per task instance (origins have none)
    pub action: Option<Arc<dyn Action>>,

    /// Stages that must finish first, with no data dependency
    pub run_after: Vec<String>,

    /// Free-form description
    pub description: Option<String>,
}

impl StageDef {
    /// Every stage name this stage refers to (inputs then run-after)
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.input
            .referenced_stages()
            .iter()
            .chain(self.run_after.iter())
            .map(String::as_str)
    }

    /// Description of the action, if any
    pub fn action_name(&self) -> String {
        self.action
            .as_ref()
            .map(|a| a.describe())
            .unwrap_or_else(|| "-".to_string())
    }
}

impl fmt::Debug for StageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("input", &self.input)
            .field("match_rule", &self.match_rule)
            .field("outputs", &self.outputs)
            .field("companions", &self.companions)
            .field("extras", &self.extras)
            .field("action", &self.action_name())
            .field("run_after", &self.run_after)
            .finish()
    }
}
