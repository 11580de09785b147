// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Run command - build and execute the pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{base_dir, load_pipeline};
use crate::actions::Action;
use crate::pipeline::{
    BuildOptions, Engine, EngineOptions, FailureMode, PipelineValidator, RunReport, TaskGraph,
    TaskState,
};
use crate::utils::{create_spinner, print_error, print_section, print_warning, state_glyph, task_progress};

/// Options for the run command
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub pipeline: PathBuf,
    pub jobs: Option<usize>,
    pub strict: bool,
    pub best_effort: bool,
    pub dry_run: bool,
    pub report: Option<PathBuf>,
}

/// Run the pipeline
pub async fn run(args: RunArgs, verbose: bool) -> Result<()> {
    let file = load_pipeline(&args.pipeline)?;

    let validation = PipelineValidator::validate(&file, base_dir())?;
    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    let options = BuildOptions {
        strict: args.strict || file.strict,
    };
    let spinner = create_spinner("Instantiating tasks...");
    let graph = file
        .into_pipeline(base_dir())
        .and_then(|pipeline| pipeline.build(&options));
    spinner.finish_and_clear();
    let graph = graph?;

    if !graph.warnings().is_empty() {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in graph.warnings() {
            eprintln!("  {} {}: {}", "⚠".yellow(), warning.stage, warning.message);
        }
        eprintln!();
    }

    if !args.dry_run {
        let mut missing = Vec::new();
        for (stage, action) in graph.stage_actions() {
            if !action.check_available().await? {
                missing.push(format!("{}: {}", stage, action.describe()));
            }
        }
        if !missing.is_empty() {
            eprintln!("{}", "Missing required tools:".red().bold());
            for tool in &missing {
                eprintln!("  {} {}", "✗".red(), tool);
            }
            return Err(miette::miette!("Required tools are not installed"));
        }
    }

    let concurrency = args.jobs.unwrap_or(file.concurrency).max(1);
    let mode = if args.best_effort {
        FailureMode::BestEffort
    } else {
        file.mode
    };

    println!(
        "{} {} ({} tasks, {} workers{})",
        if args.dry_run { "Planning" } else { "Running" }.bold(),
        file.name.cyan(),
        graph.len(),
        concurrency,
        if mode == FailureMode::BestEffort {
            ", best effort"
        } else {
            ""
        }
    );

    let progress = task_progress(graph.len(), !verbose && !args.dry_run);
    let engine = Engine::new(EngineOptions {
        concurrency,
        mode,
        dry_run: args.dry_run,
        progress: Some(progress.clone()),
    });
    let report = engine.run(&graph).await;
    progress.finish_and_clear();

    print_outcomes(&graph, &report, verbose);
    print_summary(&report);

    if let Some(path) = &args.report {
        std::fs::write(path, report.to_json()?)
            .map_err(|e| miette::miette!("Failed to write report '{}': {}", path.display(), e))?;
        println!("Report written to {}", path.display());
    }

    if !report.success() {
        return Err(miette::miette!("Pipeline execution failed"));
    }

    Ok(())
}

fn print_outcomes(graph: &TaskGraph, report: &RunReport, verbose: bool) {
    println!();
    for &id in graph.order() {
        let outcome = &report.outcomes[id];
        let interesting = !matches!(outcome.state, TaskState::Skipped | TaskState::Pending);
        if !verbose && !interesting {
            continue;
        }

        let timing = if outcome.state == TaskState::Succeeded {
            format!(" ({}ms)", outcome.duration_ms).dimmed().to_string()
        } else {
            String::new()
        };
        println!("  {} {}{}", state_glyph(outcome.state), outcome.label, timing);

        if let Some(cause) = &outcome.cause {
            println!("      {}", cause.to_string().dimmed());
        }
    }
}

fn print_summary(report: &RunReport) {
    print_section("Summary");

    if report.dry_run {
        println!("  {} would run", report.would_run().len());
        println!("  {} up to date", report.skipped().len());
        return;
    }

    println!("  {} succeeded", report.succeeded().len());
    println!("  {} up to date", report.skipped().len());

    let failed = report.failed();
    if !failed.is_empty() {
        print_error(&format!("{} failed", failed.len()));
    }
    let not_run = report.not_run();
    if !not_run.is_empty() {
        print_warning(&format!("{} not run", not_run.len()));
    }
    println!("  finished in {}ms", report.duration_ms);
}
