// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! seqflow - File-driven sequencing pipeline runner
//!
//! Instantiates per-sample tasks from file name patterns and runs the stale ones.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqflow::cli::{run::RunArgs, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seqflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if !seqflow::utils::should_use_colors() {
        colored::control::set_override(false);
    }

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            pipeline,
            jobs,
            strict,
            best_effort,
            dry_run,
            report,
        } => {
            let args = RunArgs {
                pipeline,
                jobs,
                strict,
                best_effort,
                dry_run,
                report,
            };
            seqflow::cli::run::run(args, cli.verbose).await
        }
        Commands::Validate { pipeline } => {
            seqflow::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Graph {
            pipeline,
            format,
            instances,
        } => seqflow::cli::graph::run(pipeline, format, instances, cli.verbose).await,
    }
}
