// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Validate command - check pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::base_dir;
use crate::pipeline::{PipelineFile, PipelineValidator, StageKind};
use crate::utils::{print_error, print_header, print_section, print_success, print_warning};

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> Result<()> {
    print_header("Validating pipeline...");

    if !pipeline_path.exists() {
        return Err(miette::miette!(
            "Pipeline file not found: {}",
            pipeline_path.display()
        ));
    }

    let file = match PipelineFile::from_file(&pipeline_path) {
        Ok(f) => f,
        Err(e) => {
            print_error("Failed to parse pipeline");
            println!();
            return Err(miette::miette!("Parse error: {}", e));
        }
    };

    print_success("Pipeline file is valid YAML");

    let validation = PipelineValidator::validate(&file, base_dir())?;

    if !validation.errors.is_empty() {
        print_section(&"Errors".red().bold().to_string());
        for error in &validation.errors {
            print_error(error);
        }
    }

    if validation.has_warnings() {
        print_section(&"Warnings".yellow().bold().to_string());
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose {
        print_section("Pipeline summary");
        println!("  Name: {}", file.name);
        println!("  Stages: {}", file.stages.len());
        for stage in &file.stages {
            let after = if stage.run_after.is_empty() {
                String::new()
            } else {
                format!(" [after: {}]", stage.run_after.join(", "))
            };
            println!("    - {} ({}){}", stage.name, stage.kind, after.dimmed());
        }
        let origins = file
            .stages
            .iter()
            .filter(|s| s.kind == StageKind::Origin)
            .count();
        println!("  Origins: {}", origins);
        println!("  Tasks: {}", validation.tasks);
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Pipeline validation failed"));
    }

    if validation.has_warnings() {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    } else {
        println!(
            "{} ({} tasks)",
            "Pipeline is valid!".green().bold(),
            validation.tasks
        );
    }

    Ok(())
}
