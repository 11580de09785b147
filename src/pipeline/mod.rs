// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Pipeline declaration, instantiation and execution
//!
//! Stages are declared on a [`Pipeline`], resolved into a stage DAG,
//! expanded into concrete task instances by matching file names, and run
//! by the [`Engine`].

mod config;
mod dag;
mod definition;
mod executor;
mod graph;
mod instantiate;
mod pattern;
mod registry;
pub mod template;
mod validation;

pub use config::{FilterConfig, InputConfig, PipelineFile, StageConfig};
pub use dag::{EdgeKind, StageDag};
pub use definition::{InputSource, StageDef, StageKind};
pub use executor::{
    run, Engine, EngineOptions, FailureCause, FailureMode, RunReport, TaskOutcome, TaskState,
};
pub use graph::{BuildOptions, TaskGraph};
pub use instantiate::{InstantiationWarning, Instantiator, TaskId, TaskInstance};
pub use pattern::{MatchRule, PathMatch};
pub use registry::{Pipeline, StageOptions, StageRegistry};
pub use template::{FieldMap, Fields, Template};
pub use validation::{PipelineValidator, ValidationResult};
