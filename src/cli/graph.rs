// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Graph command - visualize pipeline as a graph

use miette::Result;
use std::path::PathBuf;

use super::{base_dir, load_pipeline, GraphFormat};
use crate::pipeline::{BuildOptions, StageDag};

/// Run the graph command
pub async fn run(
    pipeline_path: PathBuf,
    format: GraphFormat,
    instances: bool,
    _verbose: bool,
) -> Result<()> {
    let file = load_pipeline(&pipeline_path)?;
    let pipeline = file.into_pipeline(base_dir())?;

    // Instances are always listed as text
    if instances {
        let graph = pipeline.build(&BuildOptions {
            strict: file.strict,
        })?;
        print!("{}", graph.to_text());
        return Ok(());
    }

    let dag = StageDag::build(pipeline.registry())?;

    let output = match format {
        GraphFormat::Text => dag.to_text(pipeline.registry())?,
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
