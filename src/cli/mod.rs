// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for seqflow.

pub mod graph;
pub mod run;
pub mod validate;

use clap::Parser;
use clap::Subcommand;
use std::path::{Path, PathBuf};

use crate::pipeline::PipelineFile;

/// File-driven sequencing pipeline runner
#[derive(Parser, Debug)]
#[clap(
    name = "seqflow",
    version,
    about = "Incremental, pattern-driven pipeline runner for per-sample file workflows",
    long_about = None,
    after_help = "Examples:\n\
        seqflow validate                Check seqflow.yaml\n\
        seqflow graph --instances       List every task instance in run order\n\
        seqflow run -j 8                Run with eight workers\n\
        seqflow run --dry-run           Show what is out of date\n\n\
        See 'seqflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run {
        /// Pipeline file
        #[clap(short, long, default_value = "seqflow.yaml")]
        pipeline: PathBuf,

        /// Number of actions to run at once (defaults to the pipeline's setting)
        #[clap(short = 'j', long)]
        jobs: Option<usize>,

        /// Treat unmatched stages and missing companion files as errors
        #[clap(long)]
        strict: bool,

        /// Keep running independent branches after a failure
        #[clap(long)]
        best_effort: bool,

        /// Dry run (show what would be done)
        #[clap(long)]
        dry_run: bool,

        /// Write the run report as JSON
        #[clap(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Validate pipeline configuration
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = "seqflow.yaml")]
        pipeline: PathBuf,
    },

    /// Show pipeline as a graph
    Graph {
        /// Pipeline file
        #[clap(default_value = "seqflow.yaml")]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,

        /// List task instances instead of stages
        #[clap(long)]
        instances: bool,
    },
}

/// Graph output format
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Load a pipeline file, with a hint when it is missing
pub(crate) fn load_pipeline(path: &Path) -> miette::Result<PipelineFile> {
    if !path.exists() {
        return Err(miette::miette!(
            "Pipeline file not found: {}\n\n\
             Pass --pipeline or run from the directory holding seqflow.yaml.",
            path.display()
        ));
    }

    PipelineFile::from_file(path).map_err(|e| miette::miette!("Failed to load pipeline: {}", e))
}

/// Paths in a pipeline file are relative to the working directory
pub(crate) fn base_dir() -> &'static Path {
    Path::new(".")
}
