// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Task instantiation
//!
//! Expands stage definitions into concrete task instances, stage by stage
//! in dependency order. Each stage sees the concrete outputs of the
//! instances already created for its upstream stages.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{SeqflowError, SeqflowResult};
use crate::pipeline::definition::{InputSource, StageDef, StageKind};
use crate::pipeline::pattern::MatchRule;
use crate::pipeline::template::{FieldMap, Template};
use crate::pipeline::StageRegistry;

/// Identity of a task instance (dense index into the graph)
pub type TaskId = usize;

/// One concrete unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInstance {
    /// Identity
    pub id: TaskId,
    /// Stage this instance belongs to
    pub stage: String,
    /// Stage kind
    pub kind: StageKind,
    /// Ordered input paths (the seed itself for origins)
    pub inputs: Vec<String>,
    /// Ordered output paths
    pub outputs: Vec<String>,
    /// Fields captured from the driving input
    pub params: FieldMap,
    /// Rendered extra parameters
    pub extras: Vec<String>,
    /// Instances whose outputs feed this one
    pub predecessors: BTreeSet<TaskId>,
    /// Instances that must finish first, ordering only
    pub run_after: BTreeSet<TaskId>,
    /// Input that produced this instance (transforms only)
    pub driving_input: Option<String>,
}

impl TaskInstance {
    /// Human-readable label, e.g. `align_bwa[A_R1.fastq]`
    pub fn label(&self) -> String {
        let key = self
            .driving_input
            .as_deref()
            .or_else(|| self.outputs.first().map(String::as_str))
            .unwrap_or("-");
        let key = key.rsplit('/').next().unwrap_or(key);
        format!("{}[{}]", self.stage, key)
    }

    /// Every instance that must finish before this one starts
    pub fn all_predecessors(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.predecessors.union(&self.run_after).copied()
    }
}

/// A non-fatal condition met while instantiating
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstantiationWarning {
    /// Stage concerned
    pub stage: String,
    /// Description
    pub message: String,
}

/// Everything instantiation produced
#[derive(Debug, Default)]
pub struct Instantiation {
    /// Instances, indexed by id
    pub instances: Vec<TaskInstance>,
    /// Instance ids per stage, in creation order
    pub by_stage: HashMap<String, Vec<TaskId>>,
    /// Reported conditions
    pub warnings: Vec<InstantiationWarning>,
}

/// A candidate input and the instance that produces it, if tracked
struct Candidate {
    path: String,
    producer: Option<TaskId>,
}

/// A companion path with no producer yet when its consumer was created
struct DeferredCompanion {
    task: TaskId,
    stage: String,
    input: String,
    path: String,
}

/// Expands stages into task instances
pub struct Instantiator<'a> {
    registry: &'a StageRegistry,
    strict: bool,
    out: Instantiation,
    /// Output path to producing instance (first claim wins)
    producers: HashMap<String, TaskId>,
    deferred: Vec<DeferredCompanion>,
    /// (stage, driving input) pairs dropped for a missing companion
    excluded: HashSet<(String, String)>,
    /// Missing-companion warnings, kept across passes
    carried: Vec<InstantiationWarning>,
}

impl<'a> Instantiator<'a> {
    /// Create an instantiator; `strict` turns recoverable conditions into errors
    pub fn new(registry: &'a StageRegistry, strict: bool) -> Self {
        Self {
            registry,
            strict,
            out: Instantiation::default(),
            producers: HashMap::new(),
            deferred: Vec::new(),
            excluded: HashSet::new(),
            carried: Vec::new(),
        }
    }

    /// Instantiate every stage, visiting stage positions in `order`.
    ///
    /// Companions are linked once every stage has been instantiated, so a
    /// companion written by a later stage still becomes a predecessor. A
    /// candidate whose companion is neither tracked nor on disk is dropped
    /// and the stages are instantiated again without it.
    pub fn run(mut self, order: &[usize]) -> SeqflowResult<Instantiation> {
        loop {
            self.instantiate_all(order)?;

            let missing = self.link_companions();
            if missing.is_empty() {
                return Ok(self.out);
            }

            for companion in missing {
                let error = SeqflowError::MissingCompanionFile {
                    stage: companion.stage.clone(),
                    input: companion.input.clone(),
                    path: companion.path,
                };
                if self.strict {
                    return Err(error);
                }
                warn!(stage = %companion.stage, "{}", error);
                self.carried.push(InstantiationWarning {
                    stage: companion.stage.clone(),
                    message: error.to_string(),
                });
                self.excluded.insert((companion.stage, companion.input));
            }
        }
    }

    fn instantiate_all(&mut self, order: &[usize]) -> SeqflowResult<()> {
        self.out = Instantiation {
            warnings: self.carried.clone(),
            ..Instantiation::default()
        };
        self.producers.clear();
        self.deferred.clear();

        let registry = self.registry;
        for &position in order {
            let stage = &registry.stages()[position];
            let before = self.out.instances.len();

            match stage.kind {
                StageKind::Origin => self.instantiate_origin(stage)?,
                StageKind::Transform => self.instantiate_transform(stage)?,
                StageKind::Merge => self.instantiate_merge(stage)?,
            }

            let created: Vec<TaskId> = (before..self.out.instances.len()).collect();
            debug!(stage = %stage.name, instances = created.len(), "Instantiated stage");
            self.out.by_stage.insert(stage.name.clone(), created);
        }

        Ok(())
    }

    /// Add predecessor edges for deferred companions; returns the missing ones
    fn link_companions(&mut self) -> Vec<DeferredCompanion> {
        let mut missing = Vec::new();

        for companion in std::mem::take(&mut self.deferred) {
            match self.producers.get(&companion.path) {
                Some(&producer) => {
                    self.out.instances[companion.task]
                        .predecessors
                        .insert(producer);
                }
                None if Path::new(&companion.path).exists() => {}
                None => missing.push(companion),
            }
        }

        missing
    }

    /// One instance per seed file
    fn instantiate_origin(&mut self, stage: &StageDef) -> SeqflowResult<()> {
        let InputSource::Files(seeds) = &stage.input else {
            return Err(SeqflowError::InvalidStage {
                stage: stage.name.clone(),
                reason: "an origin must list literal seed files".to_string(),
            });
        };

        if seeds.is_empty() {
            return self.report(
                &stage.name,
                SeqflowError::NoMatchingInputs {
                    stage: stage.name.clone(),
                },
            );
        }

        for seed in seeds {
            self.push(TaskInstance {
                id: 0,
                stage: stage.name.clone(),
                kind: StageKind::Origin,
                inputs: vec![seed.clone()],
                outputs: vec![seed.clone()],
                params: FieldMap::new(),
                extras: Vec::new(),
                predecessors: BTreeSet::new(),
                run_after: BTreeSet::new(),
                driving_input: None,
            });
        }
        Ok(())
    }

    fn instantiate_transform(&mut self, stage: &StageDef) -> SeqflowResult<()> {
        let rule = stage.match_rule.as_ref().ok_or_else(|| SeqflowError::InvalidStage {
            stage: stage.name.clone(),
            reason: "a transform needs a match rule".to_string(),
        })?;

        let mut candidates = self.candidates(&stage.input);
        candidates.sort_by(|a, b| a.path.cmp(&b.path));

        let mut created = 0usize;
        for candidate in candidates {
            if self.instantiate_candidate(stage, rule, &candidate)? {
                created += 1;
            }
        }

        if created == 0 {
            self.report(
                &stage.name,
                SeqflowError::NoMatchingInputs {
                    stage: stage.name.clone(),
                },
            )?;
        }
        Ok(())
    }

    /// Create one instance for `candidate`; false when it was skipped
    fn instantiate_candidate(
        &mut self,
        stage: &StageDef,
        rule: &MatchRule,
        candidate: &Candidate,
    ) -> SeqflowResult<bool> {
        let Some(matched) = rule.matches(&candidate.path) else {
            debug!(stage = %stage.name, input = %candidate.path, "Input does not match filter");
            return Ok(false);
        };
        if self
            .excluded
            .contains(&(stage.name.clone(), candidate.path.clone()))
        {
            return Ok(false);
        }
        let fields = matched.fields();

        let mut inputs = vec![candidate.path.clone()];
        let mut predecessors: BTreeSet<TaskId> = candidate.producer.into_iter().collect();
        let mut unresolved = Vec::new();

        for template in &stage.companions {
            let path = template.render(&fields)?;
            match self.producers.get(&path) {
                Some(&producer) => {
                    predecessors.insert(producer);
                }
                None => unresolved.push(path.clone()),
            }
            inputs.push(path);
        }

        let outputs = render_all(&stage.outputs, &fields)?;
        let extras = render_all(&stage.extras, &fields)?;

        let id = self.push(TaskInstance {
            id: 0,
            stage: stage.name.clone(),
            kind: StageKind::Transform,
            inputs,
            outputs,
            params: matched.captures,
            extras,
            predecessors,
            run_after: BTreeSet::new(),
            driving_input: Some(candidate.path.clone()),
        });

        for path in unresolved {
            self.deferred.push(DeferredCompanion {
                task: id,
                stage: stage.name.clone(),
                input: candidate.path.clone(),
                path,
            });
        }
        Ok(true)
    }

    fn instantiate_merge(&mut self, stage: &StageDef) -> SeqflowResult<()> {
        // Upstream instantiation order, not filesystem or lexical order
        let candidates = self.candidates(&stage.input);

        if candidates.is_empty() {
            return self.report(
                &stage.name,
                SeqflowError::NoMatchingInputs {
                    stage: stage.name.clone(),
                },
            );
        }

        let empty = FieldMap::new();
        let outputs = render_all(&stage.outputs, &empty)?;
        let extras = render_all(&stage.extras, &empty)?;

        self.push(TaskInstance {
            id: 0,
            stage: stage.name.clone(),
            kind: StageKind::Merge,
            predecessors: candidates.iter().filter_map(|c| c.producer).collect(),
            inputs: candidates.into_iter().map(|c| c.path).collect(),
            outputs,
            params: FieldMap::new(),
            extras,
            run_after: BTreeSet::new(),
            driving_input: None,
        });
        Ok(())
    }

    /// Candidate inputs of a stage, in upstream instantiation order
    fn candidates(&self, input: &InputSource) -> Vec<Candidate> {
        match input {
            InputSource::Files(paths) => paths
                .iter()
                .map(|p| Candidate {
                    path: p.clone(),
                    producer: None,
                })
                .collect(),
            InputSource::Stages(names) => names
                .iter()
                .filter_map(|name| self.out.by_stage.get(name))
                .flatten()
                .flat_map(|&id| {
                    self.out.instances[id].outputs.iter().map(move |o| Candidate {
                        path: o.clone(),
                        producer: Some(id),
                    })
                })
                .collect(),
        }
    }

    fn push(&mut self, mut instance: TaskInstance) -> TaskId {
        let id = self.out.instances.len();
        instance.id = id;
        for output in &instance.outputs {
            self.producers.entry(output.clone()).or_insert(id);
        }
        self.out.instances.push(instance);
        id
    }

    /// Record a recoverable condition, or fail when strict
    fn report(&mut self, stage: &str, error: SeqflowError) -> SeqflowResult<()> {
        if self.strict || !error.is_recoverable() {
            return Err(error);
        }

        warn!(stage = %stage, "{}", error);
        self.out.warnings.push(InstantiationWarning {
            stage: stage.to_string(),
            message: error.to_string(),
        });
        Ok(())
    }
}

fn render_all(templates: &[Template], fields: &FieldMap) -> SeqflowResult<Vec<String>> {
    templates.iter().map(|t| t.render(fields)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::FnAction;
    use crate::pipeline::{Pipeline, StageOptions};
    use std::sync::Arc;

    fn noop() -> Arc<FnAction> {
        Arc::new(FnAction::noop("noop"))
    }

    fn instantiate(pipeline: &Pipeline, strict: bool) -> SeqflowResult<Instantiation> {
        let dag = crate::pipeline::StageDag::build(pipeline.registry())?;
        let order = dag.topological_order()?;
        Instantiator::new(pipeline.registry(), strict).run(&order)
    }

    fn stage_instances<'a>(inst: &'a Instantiation, stage: &str) -> Vec<&'a TaskInstance> {
        inst.by_stage[stage]
            .iter()
            .map(|&id| &inst.instances[id])
            .collect()
    }

    #[test]
    fn test_output_and_params_from_fields() {
        let mut p = Pipeline::new("p");
        p.declare_origin("reads", ["in/S1_L1.fastq"]).unwrap();
        p.declare_transform(
            "align",
            InputSource::stage("reads"),
            MatchRule::formatter("align", r".+/(?P<sample>\w+)_(?P<lane>L\d+)\.fastq").unwrap(),
            ["out/{sample}_{lane}.bam"],
            noop(),
            StageOptions::new().extra("{sample}").extra("{lane[0]}"),
        )
        .unwrap();

        let inst = instantiate(&p, false).unwrap();
        let align = stage_instances(&inst, "align");

        assert_eq!(align.len(), 1);
        assert_eq!(align[0].outputs, vec!["out/S1_L1.bam"]);
        assert_eq!(align[0].params.get("sample").map(String::as_str), Some("S1"));
        assert_eq!(align[0].params.get("lane").map(String::as_str), Some("L1"));
        assert_eq!(align[0].params.len(), 2);
        assert_eq!(align[0].extras, vec!["S1", "L1"]);
        assert_eq!(align[0].predecessors, BTreeSet::from([0]));
    }

    #[test]
    fn test_transform_instances_sorted_by_input() {
        let mut p = Pipeline::new("p");
        p.declare_origin("reads", ["d/C.txt", "d/A.txt", "d/B.txt"]).unwrap();
        p.declare_transform(
            "copy",
            InputSource::stage("reads"),
            MatchRule::suffix(".txt"),
            [".out"],
            noop(),
            StageOptions::new(),
        )
        .unwrap();

        let inst = instantiate(&p, false).unwrap();
        let outputs: Vec<&str> = stage_instances(&inst, "copy")
            .iter()
            .map(|t| t.outputs[0].as_str())
            .collect();
        assert_eq!(outputs, vec!["d/A.out", "d/B.out", "d/C.out"]);
    }

    #[test]
    fn test_unmatched_inputs_are_excluded() {
        let mut p = Pipeline::new("p");
        p.declare_origin("reads", ["d/A_R1.fastq", "d/A_R2.fastq"]).unwrap();
        p.declare_transform(
            "align",
            InputSource::stage("reads"),
            MatchRule::formatter("align", r".+/(?P<sample>[A-Z]+)_R1\.fastq").unwrap(),
            ["aln/{sample}.bam"],
            noop(),
            StageOptions::new(),
        )
        .unwrap();

        let inst = instantiate(&p, false).unwrap();
        assert_eq!(stage_instances(&inst, "align").len(), 1);
        assert!(inst.warnings.is_empty());
    }

    #[test]
    fn test_merge_keeps_upstream_order() {
        let mut p = Pipeline::new("p");
        p.declare_origin("calls", ["v/c.vcf", "v/a.vcf", "v/b.vcf"]).unwrap();
        p.declare_transform(
            "norm",
            InputSource::stage("calls"),
            MatchRule::suffix(".vcf"),
            [".norm.vcf"],
            noop(),
            StageOptions::new(),
        )
        .unwrap();
        p.declare_merge(
            "combine",
            InputSource::stage("norm"),
            "v/ALL.vcf",
            noop(),
            StageOptions::new(),
        )
        .unwrap();

        let inst = instantiate(&p, false).unwrap();
        let merge = stage_instances(&inst, "combine");

        assert_eq!(merge.len(), 1);
        assert_eq!(
            merge[0].inputs,
            vec!["v/a.norm.vcf", "v/b.norm.vcf", "v/c.norm.vcf"]
        );
        assert_eq!(merge[0].outputs, vec!["v/ALL.vcf"]);
        assert_eq!(merge[0].predecessors.len(), 3);
    }

    #[test]
    fn test_zero_matches_is_a_warning() {
        let mut p = Pipeline::new("p");
        p.declare_origin("reads", ["d/a.txt"]).unwrap();
        p.declare_transform(
            "bams",
            InputSource::stage("reads"),
            MatchRule::suffix(".bam"),
            [".sort.bam"],
            noop(),
            StageOptions::new(),
        )
        .unwrap();

        let inst = instantiate(&p, false).unwrap();
        assert!(stage_instances(&inst, "bams").is_empty());
        assert_eq!(inst.warnings.len(), 1);
        assert_eq!(inst.warnings[0].stage, "bams");

        let err = instantiate(&p, true).unwrap_err();
        assert!(matches!(err, SeqflowError::NoMatchingInputs { .. }));
    }

    #[test]
    fn test_tracked_companion_adds_predecessor() {
        let mut p = Pipeline::new("p");
        p.declare_origin("r1", ["d/A_R1.fq"]).unwrap();
        p.declare_origin("r2", ["d/A_R2.fq"]).unwrap();
        p.declare_transform(
            "align",
            InputSource::stage("r1"),
            MatchRule::formatter("align", r"(?P<dir>.+)/(?P<sample>[A-Z]+)_R1\.fq").unwrap(),
            ["aln/{sample}.bam"],
            noop(),
            StageOptions::new().add_input("{dir}/{sample}_R2.fq"),
        )
        .unwrap();

        let inst = instantiate(&p, false).unwrap();
        let align = stage_instances(&inst, "align");

        assert_eq!(align[0].inputs, vec!["d/A_R1.fq", "d/A_R2.fq"]);
        assert_eq!(align[0].predecessors, BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_missing_untracked_companion() {
        let mut p = Pipeline::new("p");
        p.declare_transform(
            "align",
            InputSource::Files(vec!["/nonexistent/A_R1.fq".into()]),
            MatchRule::formatter("align", r".+/(?P<sample>[A-Z]+)_R1\.fq").unwrap(),
            ["aln/{sample}.bam"],
            noop(),
            StageOptions::new().add_input("{path}/{sample}_R2.fq"),
        )
        .unwrap();

        let inst = instantiate(&p, false).unwrap();
        assert!(stage_instances(&inst, "align").is_empty());
        // One for the missing companion, one for the empty stage
        assert_eq!(inst.warnings.len(), 2);

        let err = instantiate(&p, true).unwrap_err();
        assert!(matches!(err, SeqflowError::MissingCompanionFile { path, .. } if path == "/nonexistent/A_R2.fq"));
    }

    #[test]
    fn test_one_origin_instance_per_seed() {
        let mut p = Pipeline::new("p");
        p.declare_origin("reads", ["d/B.fq", "d/A.fq"]).unwrap();

        let inst = instantiate(&p, false).unwrap();
        let reads = stage_instances(&inst, "reads");

        assert_eq!(reads.len(), 2);
        assert_eq!(reads[0].outputs, vec!["d/B.fq"]);
        assert_eq!(reads[1].inputs, vec!["d/A.fq"]);
        assert_eq!(reads[1].label(), "reads[A.fq]");
    }

    #[test]
    fn test_companion_from_later_stage_is_tracked() {
        let mut p = Pipeline::new("p");
        p.declare_origin("bams", ["/nonexistent/A.bam"]).unwrap();
        // `call` reads the index that `index` writes, but is declared first
        p.declare_transform(
            "call",
            InputSource::stage("bams"),
            MatchRule::suffix(".bam"),
            [".vcf"],
            noop(),
            StageOptions::new().add_input("{stem}.bam.bai"),
        )
        .unwrap();
        p.declare_transform(
            "index",
            InputSource::stage("bams"),
            MatchRule::suffix(".bam"),
            [".bam.bai"],
            noop(),
            StageOptions::new(),
        )
        .unwrap();

        let inst = instantiate(&p, true).unwrap();
        let call = stage_instances(&inst, "call");
        let index = inst.by_stage["index"][0];

        assert_eq!(call.len(), 1);
        assert_eq!(
            call[0].inputs,
            vec!["/nonexistent/A.bam", "/nonexistent/A.bam.bai"]
        );
        assert!(call[0].predecessors.contains(&index));
        assert!(inst.warnings.is_empty());
    }

    #[test]
    fn test_dropped_candidate_leaves_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let r1 = |s: &str| dir.path().join(format!("{s}_R1.fq")).to_string_lossy().into_owned();
        std::fs::write(dir.path().join("B_R2.fq"), "").unwrap();

        let mut p = Pipeline::new("p");
        p.declare_transform(
            "align",
            InputSource::Files(vec![r1("A"), r1("B")]),
            MatchRule::formatter("align", r".+/(?P<sample>[A-Z]+)_R1\.fq").unwrap(),
            ["aln/{sample}.bam"],
            noop(),
            StageOptions::new().add_input("{path}/{sample}_R2.fq"),
        )
        .unwrap();
        p.declare_merge(
            "combine",
            InputSource::stage("align"),
            "aln/all.txt",
            noop(),
            StageOptions::new(),
        )
        .unwrap();

        let inst = instantiate(&p, false).unwrap();
        let align = stage_instances(&inst, "align");

        assert_eq!(align.len(), 1);
        assert_eq!(align[0].outputs, vec!["aln/B.bam"]);
        assert_eq!(stage_instances(&inst, "combine")[0].inputs, vec!["aln/B.bam"]);
        assert_eq!(inst.warnings.len(), 1);
        assert!(inst.warnings[0].message.contains("A_R2.fq"));
    }

    #[test]
    fn test_label_uses_driving_input_basename() {
        let instance = TaskInstance {
            id: 3,
            stage: "sort".into(),
            kind: StageKind::Transform,
            inputs: vec!["aln/A/A.bam".into()],
            outputs: vec!["aln/A/A.sort.bam".into()],
            params: FieldMap::new(),
            extras: vec![],
            predecessors: BTreeSet::new(),
            run_after: BTreeSet::new(),
            driving_input: Some("aln/A/A.bam".into()),
        };
        assert_eq!(instance.label(), "sort[A.bam]");
    }
}
