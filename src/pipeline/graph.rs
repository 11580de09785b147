// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Task graph
//!
//! The fully resolved, instantiated pipeline: every task instance with its
//! data and ordering edges, plus a deterministic topological order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::actions::Action;
use crate::errors::{SeqflowError, SeqflowResult};
use crate::pipeline::dag::StageDag;
use crate::pipeline::definition::{StageDef, StageKind};
use crate::pipeline::instantiate::{InstantiationWarning, Instantiator, TaskId, TaskInstance};
use crate::pipeline::template::Template;
use crate::pipeline::StageRegistry;

/// Options controlling graph construction
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Treat unmatched stages and missing companions as errors
    pub strict: bool,
}

/// An instantiated pipeline ready to execute
pub struct TaskGraph {
    instances: Vec<TaskInstance>,
    order: Vec<TaskId>,
    successors: Vec<Vec<TaskId>>,
    by_stage: HashMap<String, Vec<TaskId>>,
    stage_order: Vec<String>,
    actions: HashMap<String, Arc<dyn Action>>,
    warnings: Vec<InstantiationWarning>,
}

impl TaskGraph {
    /// Resolve references, instantiate every stage and validate the result
    pub fn build(registry: &StageRegistry, options: &BuildOptions) -> SeqflowResult<Self> {
        let dag = StageDag::build(registry)?;
        let stage_order = dag.topological_order()?;

        for stage in registry.stages() {
            check_templates(stage)?;
        }

        let instantiation = Instantiator::new(registry, options.strict).run(&stage_order)?;
        let mut instances = instantiation.instances;
        let by_stage = instantiation.by_stage;

        check_outputs(&instances)?;

        // Lift stage-level run_after onto every instance pair
        for stage in registry.stages() {
            let Some(ids) = by_stage.get(&stage.name) else {
                continue;
            };
            let after: BTreeSet<TaskId> = stage
                .run_after
                .iter()
                .filter_map(|name| by_stage.get(name))
                .flatten()
                .copied()
                .collect();
            for &id in ids {
                instances[id].run_after.extend(after.iter().copied());
            }
        }

        let mut successors = vec![Vec::new(); instances.len()];
        for instance in &instances {
            for pred in instance.all_predecessors() {
                successors[pred].push(instance.id);
            }
        }

        let order = task_order(registry, &instances, &successors)?;

        let actions = registry
            .stages()
            .iter()
            .filter_map(|s| s.action.clone().map(|a| (s.name.clone(), a)))
            .collect();

        info!(
            stages = registry.len(),
            tasks = instances.len(),
            warnings = instantiation.warnings.len(),
            "Built task graph"
        );

        Ok(Self {
            instances,
            order,
            successors,
            by_stage,
            stage_order: stage_order
                .into_iter()
                .map(|p| registry.stages()[p].name.clone())
                .collect(),
            actions,
            warnings: instantiation.warnings,
        })
    }

    /// All instances, indexed by id
    pub fn instances(&self) -> &[TaskInstance] {
        &self.instances
    }

    /// Get an instance by id
    pub fn get(&self, id: TaskId) -> Option<&TaskInstance> {
        self.instances.get(id)
    }

    /// Deterministic topological order of instance ids
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    /// Instances that wait on `id` (data or ordering)
    pub fn successors(&self, id: TaskId) -> &[TaskId] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Instance ids of a stage, in creation order
    pub fn instances_of(&self, stage: &str) -> &[TaskId] {
        self.by_stage.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Stage names in instantiation order
    pub fn stage_order(&self) -> &[String] {
        &self.stage_order
    }

    /// Action for an instance (origins have none)
    pub fn action_for(&self, id: TaskId) -> Option<&Arc<dyn Action>> {
        let instance = self.instances.get(id)?;
        self.actions.get(&instance.stage)
    }

    /// Stages with an action and at least one instance, in instantiation order
    pub fn stage_actions(&self) -> Vec<(&str, &Arc<dyn Action>)> {
        self.stage_order
            .iter()
            .filter(|name| !self.instances_of(name).is_empty())
            .filter_map(|name| self.actions.get(name).map(|a| (name.as_str(), a)))
            .collect()
    }

    /// Non-fatal conditions met while instantiating
    pub fn warnings(&self) -> &[InstantiationWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Text listing of instances in execution order
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (i, &id) in self.order.iter().enumerate() {
            let task = &self.instances[id];
            out.push_str(&format!("{}. {}", i + 1, task.label()));

            if task.kind != StageKind::Origin {
                out.push_str(&format!(
                    ": {} -> {}",
                    task.inputs.join(", "),
                    task.outputs.join(", ")
                ));
            }
            if !task.extras.is_empty() {
                out.push_str(&format!(" [extras: {}]", task.extras.join(", ")));
            }
            out.push('\n');
        }

        out
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("instances", &self.instances)
            .field("order", &self.order)
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// Check that every placeholder can be filled by the stage's match rule
fn check_templates(stage: &StageDef) -> SeqflowResult<()> {
    let available = stage
        .match_rule
        .as_ref()
        .map(|r| r.field_names())
        .unwrap_or_default();

    let templates = stage
        .outputs
        .iter()
        .chain(&stage.companions)
        .chain(&stage.extras);

    for template in templates {
        if let Some(missing) = unknown_placeholder(template, &available) {
            return Err(SeqflowError::InvalidTemplate {
                template: template.as_str().to_string(),
                message: format!(
                    "stage '{}' has no field '{}' (available: {})",
                    stage.name,
                    missing,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                ),
            });
        }
    }
    Ok(())
}

fn unknown_placeholder<'t>(template: &'t Template, available: &[String]) -> Option<&'t str> {
    template
        .placeholders()
        .into_iter()
        .find(|name| !available.iter().any(|a| a == name))
}

/// Reject two claims on the same output path
fn check_outputs(instances: &[TaskInstance]) -> SeqflowResult<()> {
    let mut claimed: HashMap<&str, &TaskInstance> = HashMap::new();

    for instance in instances {
        for output in &instance.outputs {
            if let Some(first) = claimed.insert(output.as_str(), instance) {
                return Err(SeqflowError::AmbiguousOutput {
                    path: output.clone(),
                    first: first.label(),
                    second: instance.label(),
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm over instances.
///
/// Ties go to the earlier declared stage, then the lexically smaller
/// driving input (the seed for origins).
fn task_order(
    registry: &StageRegistry,
    instances: &[TaskInstance],
    successors: &[Vec<TaskId>],
) -> SeqflowResult<Vec<TaskId>> {
    let key = |id: TaskId| {
        let task = &instances[id];
        let position = registry.position(&task.stage).unwrap_or(usize::MAX);
        let input = task
            .driving_input
            .as_ref()
            .or_else(|| task.outputs.first())
            .cloned()
            .unwrap_or_default();
        Reverse((position, input, id))
    };

    let mut in_degree: Vec<usize> = instances
        .iter()
        .map(|t| t.all_predecessors().count())
        .collect();

    let mut ready: BinaryHeap<_> = instances
        .iter()
        .filter(|t| in_degree[t.id] == 0)
        .map(|t| key(t.id))
        .collect();

    let mut order = Vec::with_capacity(instances.len());
    while let Some(Reverse((_, _, id))) = ready.pop() {
        order.push(id);
        for &next in &successors[id] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(key(next));
            }
        }
    }

    if order.len() != instances.len() {
        let mut stages: Vec<String> = instances
            .iter()
            .filter(|t| in_degree[t.id] > 0)
            .map(|t| t.stage.clone())
            .collect();
        stages.dedup();
        return Err(SeqflowError::CircularDependency { stages });
    }

    debug!(tasks = order.len(), "Ordered task graph");
    Ok(order)
}
