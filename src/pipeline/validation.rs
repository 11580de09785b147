// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Pipeline validation
//!
//! Validates a pipeline file before execution: structure first, then a
//! full build so that pattern, template and instantiation problems surface
//! without running anything.

use std::collections::HashSet;
use std::path::Path;

use crate::errors::{SeqflowError, SeqflowResult};
use crate::pipeline::config::{InputConfig, PipelineFile, StageConfig};
use crate::pipeline::definition::StageKind;
use crate::pipeline::graph::{BuildOptions, TaskGraph};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline file; relative seeds resolve against `base_dir`
    pub fn validate(file: &PipelineFile, base_dir: &Path) -> SeqflowResult<ValidationResult> {
        let mut result = ValidationResult::new();

        if file.stages.is_empty() {
            result.add_error("Pipeline has no stages defined");
            return Ok(result);
        }

        let mut seen_names = HashSet::new();
        for stage in &file.stages {
            if !seen_names.insert(stage.name.as_str()) {
                result.add_error(&format!("Duplicate stage name: '{}'", stage.name));
            }
        }

        if !file.stages.iter().any(|s| s.kind == StageKind::Origin) {
            result.add_warning("Pipeline has no origin stage");
        }

        for stage in &file.stages {
            Self::validate_stage(stage, &seen_names, &mut result);
        }

        if !result.is_valid() {
            return Ok(result);
        }

        let options = BuildOptions { strict: file.strict };
        let graph = file
            .into_pipeline(base_dir)
            .and_then(|pipeline| pipeline.build(&options));

        match graph {
            Ok(graph) => {
                for warning in graph.warnings() {
                    result.add_warning(&format!("Stage '{}': {}", warning.stage, warning.message));
                }
                for missing in Self::validate_files(&graph) {
                    result.add_error(&missing);
                }
                result.tasks = graph.len();
            }
            Err(SeqflowError::CircularDependency { stages }) => {
                result.add_error(&format!("Circular dependency: {}", stages.join(" → ")));
            }
            Err(e) => result.add_error(&e.to_string()),
        }

        Ok(result)
    }

    /// Validate a single stage
    fn validate_stage(stage: &StageConfig, names: &HashSet<&str>, result: &mut ValidationResult) {
        if let Some(InputConfig::FromStage { from_stage }) = &stage.input {
            for upstream in from_stage.clone().into_vec() {
                if !names.contains(upstream.as_str()) {
                    result.add_error(&format!(
                        "Stage '{}': Input references unknown stage '{}'",
                        stage.name, upstream
                    ));
                }
            }
        }

        for after in &stage.run_after {
            if !names.contains(after.as_str()) {
                result.add_error(&format!(
                    "Stage '{}': run_after references unknown stage '{}'",
                    stage.name, after
                ));
            }
        }

        if stage.kind == StageKind::Origin {
            if stage.command.is_some() {
                result.add_warning(&format!(
                    "Stage '{}': Origin stages run no command; 'command' is ignored",
                    stage.name
                ));
            }
            return;
        }

        match &stage.command {
            Some(command) if command.trim().is_empty() => {
                result.add_error(&format!("Stage '{}': Shell command is empty", stage.name));
            }
            Some(_) => {
                if which::which(&stage.shell).is_err() {
                    result.add_warning(&format!(
                        "Stage '{}': Shell '{}' not found on PATH",
                        stage.name, stage.shell
                    ));
                }
            }
            None => {
                result.add_error(&format!("Stage '{}': Missing 'command'", stage.name));
            }
        }

        if stage.kind == StageKind::Merge && !stage.add_inputs.is_empty() {
            result.add_error(&format!(
                "Stage '{}': Merge stages take no companion inputs",
                stage.name
            ));
        }
    }

    /// Seeds and raw input files that do not exist (runtime validation)
    pub fn validate_files(graph: &TaskGraph) -> Vec<String> {
        let mut missing = Vec::new();

        for task in graph.instances() {
            if task.kind == StageKind::Origin {
                for seed in &task.outputs {
                    if !Path::new(seed).exists() {
                        missing.push(format!("Stage '{}': Seed file not found: {}", task.stage, seed));
                    }
                }
            }
        }

        missing
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Number of task instances the pipeline expands to
    pub tasks: usize,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(yaml: &str, dir: &Path) -> ValidationResult {
        let file = PipelineFile::from_yaml(yaml).unwrap();
        PipelineValidator::validate(&file, dir).unwrap()
    }

    #[test]
    fn test_validate_empty_pipeline() {
        let result = validate("name: empty\nstages: []\n", Path::new("."));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no stages"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let yaml = r#"
name: test
seeds: [a.txt]
stages:
  - name: dup
    kind: origin
  - name: dup
    kind: origin
"#;
        let result = validate(yaml, Path::new("."));
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("Duplicate")));
    }

    #[test]
    fn test_validate_unknown_reference() {
        let yaml = r#"
name: test
seeds: [a.txt]
stages:
  - name: seeds
    kind: origin
  - name: copy
    kind: transform
    input: { from_stage: sedes }
    filter: { suffix: .txt }
    output: .copy
    command: 'cp {input} {output}'
"#;
        let result = validate(yaml, Path::new("."));
        assert!(result.errors.iter().any(|e| e.contains("unknown stage 'sedes'")));
    }

    #[test]
    fn test_validate_cycle() {
        let yaml = r#"
name: test
seeds: [a.txt]
stages:
  - name: seeds
    kind: origin
  - name: a
    kind: transform
    input: { from_stage: [seeds, b] }
    filter: { suffix: .txt }
    output: .a
    command: 'true'
  - name: b
    kind: transform
    input: { from_stage: a }
    filter: { suffix: .a }
    output: .b
    command: 'true'
"#;
        let result = validate(yaml, Path::new("."));
        assert!(result.errors.iter().any(|e| e.contains("Circular dependency")));
    }

    #[test]
    fn test_validate_reports_missing_seed_and_unmatched_stage() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
name: test
seeds: [a.txt]
stages:
  - name: seeds
    kind: origin
  - name: gz
    kind: transform
    input: { from_stage: seeds }
    filter: { suffix: .bam }
    output: .bam.bai
    command: 'true'
"#;
        let result = validate(yaml, dir.path());
        assert!(result.errors.iter().any(|e| e.contains("Seed file not found")));
        assert!(result.warnings.iter().any(|w| w.contains("gz")));
    }

    #[test]
    fn test_validate_good_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let yaml = r#"
name: test
seeds: [a.txt]
stages:
  - name: seeds
    kind: origin
  - name: upper
    kind: transform
    input: { from_stage: seeds }
    filter: { suffix: .txt }
    output: .upper
    command: "tr a-z A-Z < {input} > {output}"
"#;
        let result = validate(yaml, dir.path());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.tasks, 2);
    }
}
