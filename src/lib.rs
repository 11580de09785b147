// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! # seqflow - File-driven sequencing pipeline runner
//!
//! `seqflow` turns a small set of declared stages into one task per matching
//! file and runs them incrementally, in parallel, in dependency order.
//!
//! ## Features
//!
//! - **Pattern-driven instantiation** - Regex or suffix rules pick inputs and name outputs
//! - **Incremental** - Tasks whose outputs are newer than their inputs are skipped
//! - **Bounded parallelism** - Independent tasks run concurrently
//! - **Failure isolation** - Fail fast, or keep running unaffected branches
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the pipeline and count its tasks
//! seqflow validate
//!
//! # See the task instances
//! seqflow graph --instances
//!
//! # Run with four workers
//! seqflow run -j 4
//! ```
//!
//! Pipelines can also be declared in code:
//!
//! ```no_run
//! use std::sync::Arc;
//! use seqflow::actions::ShellAction;
//! use seqflow::pipeline::{InputSource, MatchRule, Pipeline, StageOptions};
//!
//! # async fn demo() -> seqflow::SeqflowResult<()> {
//! let mut pipeline = Pipeline::new("demo");
//! pipeline.declare_origin("reads", ["reads/A.fastq", "reads/B.fastq"])?;
//! pipeline.declare_transform(
//!     "gzip",
//!     InputSource::stage("reads"),
//!     MatchRule::suffix(".fastq"),
//!     [".fastq.gz"],
//!     Arc::new(ShellAction::new("gzip -c {input} > {output}")?),
//!     StageOptions::new(),
//! )?;
//! let report = pipeline.run(4).await?;
//! assert!(report.success());
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod cli;
pub mod errors;
pub mod pipeline;
pub mod utils;

// Re-export commonly used types
pub use errors::{SeqflowError, SeqflowResult};
pub use pipeline::{Pipeline, RunReport, TaskGraph};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
