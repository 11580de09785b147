// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Stage registry and pipeline declaration surface
//!
//! Pipelines are assembled in two phases. Stages are first declared in any
//! order through [`Pipeline`]; nothing is resolved at that point. Building
//! then validates references, instantiates tasks and yields a
//! [`TaskGraph`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::actions::Action;
use crate::errors::{SeqflowError, SeqflowResult};
use crate::pipeline::definition::{InputSource, StageDef, StageKind};
use crate::pipeline::executor::{Engine, EngineOptions, RunReport};
use crate::pipeline::graph::{BuildOptions, TaskGraph};
use crate::pipeline::pattern::{MatchRule, FIELD_STEM};
use crate::pipeline::template::Template;

/// Declared stages, keyed by name, in declaration order
#[derive(Debug, Default, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDef>,
    index: HashMap<String, usize>,
}

impl StageRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage; names must be unique
    pub fn add_stage(&mut self, def: StageDef) -> SeqflowResult<()> {
        if self.index.contains_key(&def.name) {
            return Err(SeqflowError::DuplicateStage { stage: def.name });
        }
        self.index.insert(def.name.clone(), self.stages.len());
        self.stages.push(def);
        Ok(())
    }

    /// Get a stage by name
    pub fn get(&self, name: &str) -> Option<&StageDef> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Declaration position of a stage
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// All stages in declaration order
    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }

    /// All stage names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Optional parts of a transform or merge declaration
#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    /// Companion input templates (`add_inputs`)
    pub add_inputs: Vec<String>,
    /// Extra parameter templates
    pub extras: Vec<String>,
    /// Ordering-only predecessors
    pub run_after: Vec<String>,
    /// Description
    pub description: Option<String>,
}

impl StageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a companion input template
    pub fn add_input(mut self, template: impl Into<String>) -> Self {
        self.add_inputs.push(template.into());
        self
    }

    /// Add an extra parameter template
    pub fn extra(mut self, template: impl Into<String>) -> Self {
        self.extras.push(template.into());
        self
    }

    /// Run only after `stage` has finished
    pub fn run_after(mut self, stage: impl Into<String>) -> Self {
        self.run_after.push(stage.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// A pipeline under construction
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,
    registry: StageRegistry,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: StageRegistry::new(),
        }
    }

    /// The declared stages
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Declare an origin stage over literal seed paths
    pub fn declare_origin<I, S>(&mut self, name: &str, seeds: I) -> SeqflowResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        check_name(name)?;
        self.registry.add_stage(StageDef {
            name: name.to_string(),
            kind: StageKind::Origin,
            input: InputSource::Files(seeds.into_iter().map(Into::into).collect()),
            match_rule: None,
            outputs: Vec::new(),
            companions: Vec::new(),
            extras: Vec::new(),
            action: None,
            run_after: Vec::new(),
            description: None,
        })
    }

    /// Declare a one-task-per-input transform.
    ///
    /// With a suffix rule, an output written without placeholders is a
    /// replacement suffix: `.sort.bam` means `{stem}.sort.bam`.
    pub fn declare_transform<I, S>(
        &mut self,
        name: &str,
        upstream: InputSource,
        rule: MatchRule,
        outputs: I,
        action: Arc<dyn Action>,
        options: StageOptions,
    ) -> SeqflowResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        check_name(name)?;

        let mut templates = Vec::new();
        for output in outputs {
            let mut template = Template::parse(output.as_ref())?;
            if rule.is_suffix() && !template.has_placeholders() {
                template = Template::parse(&format!("{{{FIELD_STEM}}}{}", output.as_ref()))?;
            }
            templates.push(template);
        }
        if templates.is_empty() {
            return Err(SeqflowError::InvalidStage {
                stage: name.to_string(),
                reason: "a transform needs at least one output".to_string(),
            });
        }

        self.registry.add_stage(StageDef {
            name: name.to_string(),
            kind: StageKind::Transform,
            input: upstream,
            match_rule: Some(rule),
            outputs: templates,
            companions: parse_all(&options.add_inputs)?,
            extras: parse_all(&options.extras)?,
            action: Some(action),
            run_after: options.run_after,
            description: options.description,
        })
    }

    /// Declare a many-to-one merge writing a single literal output
    pub fn declare_merge(
        &mut self,
        name: &str,
        upstream: InputSource,
        output: &str,
        action: Arc<dyn Action>,
        options: StageOptions,
    ) -> SeqflowResult<()> {
        check_name(name)?;

        let template = Template::parse(output)?;
        if template.has_placeholders() {
            return Err(SeqflowError::InvalidStage {
                stage: name.to_string(),
                reason: format!("merge output '{output}' must be a literal path"),
            });
        }
        if !options.add_inputs.is_empty() {
            return Err(SeqflowError::InvalidStage {
                stage: name.to_string(),
                reason: "merge stages take no companion inputs".to_string(),
            });
        }

        self.registry.add_stage(StageDef {
            name: name.to_string(),
            kind: StageKind::Merge,
            input: upstream,
            match_rule: None,
            outputs: vec![template],
            companions: Vec::new(),
            extras: parse_all(&options.extras)?,
            action: Some(action),
            run_after: options.run_after,
            description: options.description,
        })
    }

    /// Resolve, validate and instantiate the pipeline
    pub fn build(&self, options: &BuildOptions) -> SeqflowResult<TaskGraph> {
        TaskGraph::build(&self.registry, options)
    }

    /// Build with default options and run with `concurrency` workers
    pub async fn run(&self, concurrency: usize) -> SeqflowResult<RunReport> {
        let graph = self.build(&BuildOptions::default())?;
        Ok(crate::pipeline::run(&graph, concurrency).await)
    }

    /// Build and run with explicit options
    pub async fn run_with(
        &self,
        build: &BuildOptions,
        engine: EngineOptions,
    ) -> SeqflowResult<RunReport> {
        let graph = self.build(build)?;
        Ok(Engine::new(engine).run(&graph).await)
    }
}

fn check_name(name: &str) -> SeqflowResult<()> {
    if name.trim().is_empty() {
        return Err(SeqflowError::InvalidStage {
            stage: name.to_string(),
            reason: "stage name is empty".to_string(),
        });
    }
    Ok(())
}

fn parse_all(templates: &[String]) -> SeqflowResult<Vec<Template>> {
    templates.iter().map(|t| Template::parse(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::FnAction;

    fn noop() -> Arc<dyn Action> {
        Arc::new(FnAction::noop("noop"))
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut pipeline = Pipeline::new("p");
        pipeline.declare_origin("seeds", ["a.fastq"]).unwrap();

        let err = pipeline.declare_origin("seeds", ["b.fastq"]).unwrap_err();
        assert!(matches!(err, SeqflowError::DuplicateStage { stage } if stage == "seeds"));
    }

    #[test]
    fn test_origin_seeds_live_in_input() {
        let mut pipeline = Pipeline::new("p");
        pipeline.declare_origin("seeds", ["a.fastq", "b.fastq"]).unwrap();

        let stage = pipeline.registry().get("seeds").unwrap();
        assert!(stage.outputs.is_empty());
        assert!(matches!(&stage.input, InputSource::Files(f) if f == &["a.fastq", "b.fastq"]));
    }

    #[test]
    fn test_forward_references_allowed_at_declaration() {
        let mut pipeline = Pipeline::new("p");
        pipeline
            .declare_transform(
                "sort",
                InputSource::stage("align"),
                MatchRule::suffix(".bam"),
                [".sort.bam"],
                noop(),
                StageOptions::new(),
            )
            .unwrap();

        assert_eq!(pipeline.registry().names(), vec!["sort"]);
    }

    #[test]
    fn test_suffix_output_becomes_stem_template() {
        let mut pipeline = Pipeline::new("p");
        pipeline
            .declare_transform(
                "sort",
                InputSource::stage("align"),
                MatchRule::suffix(".bam"),
                [".sort.bam"],
                noop(),
                StageOptions::new(),
            )
            .unwrap();

        let stage = pipeline.registry().get("sort").unwrap();
        assert_eq!(stage.outputs[0].as_str(), "{stem}.sort.bam");
    }

    #[test]
    fn test_merge_output_must_be_literal() {
        let mut pipeline = Pipeline::new("p");
        let err = pipeline
            .declare_merge(
                "combine",
                InputSource::stage("call"),
                "variants/{sample}.vcf",
                noop(),
                StageOptions::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SeqflowError::InvalidStage { .. }));
    }

    #[test]
    fn test_transform_requires_output() {
        let mut pipeline = Pipeline::new("p");
        let err = pipeline
            .declare_transform(
                "t",
                InputSource::stage("a"),
                MatchRule::suffix(".x"),
                Vec::<String>::new(),
                noop(),
                StageOptions::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SeqflowError::InvalidStage { .. }));
    }

    #[test]
    fn test_registry_positions_follow_declaration_order() {
        let mut pipeline = Pipeline::new("p");
        pipeline.declare_origin("b", ["b.txt"]).unwrap();
        pipeline.declare_origin("a", ["a.txt"]).unwrap();

        let registry = pipeline.registry();
        assert_eq!(registry.position("b"), Some(0));
        assert_eq!(registry.position("a"), Some(1));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("missing").is_none());
    }
}
