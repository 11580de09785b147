// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Error types
//!
//! Structural errors (duplicate stages, unknown references, cycles,
//! ambiguous outputs) abort a build before anything runs. Instantiation
//! errors are downgraded to warnings unless the build is strict. Runtime
//! failures are recorded per task instance in the run report.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for seqflow operations
pub type SeqflowResult<T> = Result<T, SeqflowError>;

/// Main error type for seqflow
#[derive(Error, Debug, Diagnostic)]
pub enum SeqflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Structural Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' is declared more than once")]
    #[diagnostic(
        code(seqflow::duplicate_stage),
        help("Stage names must be unique within a pipeline")
    )]
    DuplicateStage { stage: String },

    #[error("Stage '{stage}' references unknown stage '{reference}'")]
    #[diagnostic(
        code(seqflow::unknown_stage_reference),
        help("Check that '{reference}' is declared in your pipeline")
    )]
    UnknownStageReference { stage: String, reference: String },

    #[error("Circular dependency detected between stages: {}", .stages.join(" → "))]
    #[diagnostic(
        code(seqflow::circular_dependency),
        help("Review `input` and `run_after` references to remove the cycle")
    )]
    CircularDependency { stages: Vec<String> },

    #[error("Output '{path}' is produced by both '{first}' and '{second}'")]
    #[diagnostic(
        code(seqflow::ambiguous_output),
        help("Every output path must be written by exactly one task")
    )]
    AmbiguousOutput {
        path: String,
        first: String,
        second: String,
    },

    #[error("Invalid match pattern for stage '{stage}': {message}")]
    #[diagnostic(code(seqflow::invalid_pattern))]
    InvalidPattern { stage: String, message: String },

    #[error("Invalid template '{template}': {message}")]
    #[diagnostic(
        code(seqflow::invalid_template),
        help("Placeholders look like {{name}} or {{name[0]}}; use {{{{ and }}}} for literal braces")
    )]
    InvalidTemplate { template: String, message: String },

    #[error("Stage '{stage}' is invalid: {reason}")]
    #[diagnostic(code(seqflow::invalid_stage))]
    InvalidStage { stage: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Instantiation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' matched no input files")]
    #[diagnostic(
        code(seqflow::no_matching_inputs),
        help("Check the stage filter against the upstream outputs")
    )]
    NoMatchingInputs { stage: String },

    #[error("Stage '{stage}': companion file '{path}' for input '{input}' does not exist")]
    #[diagnostic(code(seqflow::missing_companion_file))]
    MissingCompanionFile {
        stage: String,
        input: String,
        path: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Action for '{task}' failed: {message}")]
    #[diagnostic(code(seqflow::action_failed))]
    ActionFailed { task: String, message: String },

    #[error("Task '{task}' completed but did not create: {}", .missing.join(", "))]
    #[diagnostic(
        code(seqflow::missing_outputs),
        help("An action must create every declared output on success")
    )]
    MissingOutputs { task: String, missing: Vec<String> },

    #[error("Seed files for '{stage}' do not exist: {}", .missing.join(", "))]
    #[diagnostic(code(seqflow::missing_seed))]
    MissingSeed { stage: String, missing: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration & IO Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(seqflow::pipeline_not_found),
        help("Pass a pipeline with --pipeline or create seqflow.yaml")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(seqflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("No seed files matched pattern: {pattern}")]
    #[diagnostic(
        code(seqflow::no_input_files),
        help("Check that files matching '{pattern}' exist in your project")
    )]
    NoInputFiles { pattern: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(seqflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(seqflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(seqflow::json_error))]
    Json { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(seqflow::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for SeqflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for SeqflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for SeqflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<glob::PatternError> for SeqflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl SeqflowError {
    /// Whether this error is an instantiation-time condition that a
    /// non-strict build reports as a warning instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoMatchingInputs { .. } | Self::MissingCompanionFile { .. }
        )
    }

    /// Create an invalid pattern error from a regex compile failure
    pub fn invalid_pattern(stage: &str, error: &regex::Error) -> Self {
        Self::InvalidPattern {
            stage: stage.to_string(),
            message: error.to_string(),
        }
    }

    /// Create an invalid template error
    pub fn invalid_template(template: &str, message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template: template.to_string(),
            message: message.into(),
        }
    }
}
