// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Execution engine
//!
//! Runs a [`TaskGraph`] with bounded parallelism. Instances are dispatched
//! as soon as every predecessor has finished, skipped when their outputs
//! are newer than their inputs, and failures propagate to every transitive
//! dependent. An [`Engine`] owns all run state and is consumed by a run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::actions::{ActionResult, Invocation};
use crate::errors::{SeqflowError, SeqflowResult};
use crate::pipeline::definition::StageKind;
use crate::pipeline::graph::TaskGraph;
use crate::pipeline::instantiate::TaskId;

/// What to do after the first failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Stop dispatching new work; running tasks finish
    #[default]
    FailFast,
    /// Keep running every branch that does not depend on a failure
    BestEffort,
}

/// Engine options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of actions running at once
    pub concurrency: usize,
    /// Failure handling
    pub mode: FailureMode,
    /// Only decide what would run
    pub dry_run: bool,
    /// Progress bar advanced once per finished instance
    pub progress: Option<ProgressBar>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            mode: FailureMode::FailFast,
            dry_run: false,
            progress: None,
        }
    }
}

impl EngineOptions {
    /// Options with the given concurrency and defaults otherwise
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }
}

/// Lifecycle state of a task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting on predecessors (or never dispatched after a fail-fast stop)
    Pending,
    /// All predecessors finished
    Ready,
    /// Action in flight
    Running,
    /// Action ran and produced its outputs
    Succeeded,
    /// Outputs already up to date
    Skipped,
    /// Action failed, or a predecessor did
    Failed,
    /// Dry run: the instance is stale and would run
    WouldRun,
}

impl TaskState {
    /// Whether dependents may proceed past this state
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped | Self::WouldRun)
    }

    /// Whether the instance ran (or would run) in this run
    fn ran(self) -> bool {
        matches!(self, Self::Succeeded | Self::WouldRun)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::WouldRun => "would run",
        };
        write!(f, "{s}")
    }
}

/// Why an instance failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureCause {
    /// The action reported an error
    Action { message: String },
    /// The action succeeded but left declared outputs missing
    MissingOutputs { paths: Vec<String> },
    /// Origin seeds are missing
    MissingSeed { paths: Vec<String> },
    /// A predecessor failed; `task` is the originating failure
    Upstream { task: TaskId, label: String },
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action { message } => write!(f, "{message}"),
            Self::MissingOutputs { paths } => write!(f, "outputs not created: {}", paths.join(", ")),
            Self::MissingSeed { paths } => write!(f, "seed files missing: {}", paths.join(", ")),
            Self::Upstream { label, .. } => write!(f, "upstream task {label} failed"),
        }
    }
}

/// Final state of one instance
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub stage: String,
    pub label: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
    pub duration_ms: u64,
}

/// Result of running a graph
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Outcomes indexed by task id
    pub outcomes: Vec<TaskOutcome>,
    /// Number of actions invoked
    pub invocations: usize,
    /// Total execution time in milliseconds
    pub duration_ms: u64,
    /// Whether this was a dry run
    pub dry_run: bool,
}

impl RunReport {
    fn with_state(&self, state: TaskState) -> Vec<&TaskOutcome> {
        self.outcomes.iter().filter(|o| o.state == state).collect()
    }

    pub fn succeeded(&self) -> Vec<&TaskOutcome> {
        self.with_state(TaskState::Succeeded)
    }

    pub fn skipped(&self) -> Vec<&TaskOutcome> {
        self.with_state(TaskState::Skipped)
    }

    pub fn failed(&self) -> Vec<&TaskOutcome> {
        self.with_state(TaskState::Failed)
    }

    pub fn would_run(&self) -> Vec<&TaskOutcome> {
        self.with_state(TaskState::WouldRun)
    }

    /// Instances never dispatched (fail-fast stop)
    pub fn not_run(&self) -> Vec<&TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, TaskState::Pending | TaskState::Ready))
            .collect()
    }

    /// State of an instance
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.outcomes.get(id).map(|o| o.state)
    }

    /// Whether every instance succeeded or was skipped
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.state.satisfies_dependents())
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> SeqflowResult<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }
}

/// Run a built graph with `concurrency` workers in fail-fast mode
pub async fn run(graph: &TaskGraph, concurrency: usize) -> RunReport {
    Engine::new(EngineOptions::with_concurrency(concurrency))
        .run(graph)
        .await
}

type Finished = (TaskId, SeqflowResult<ActionResult>, Duration);

/// Execution engine; construct one per run
pub struct Engine {
    options: EngineOptions,
    states: Vec<TaskState>,
    causes: Vec<Option<FailureCause>>,
    durations: Vec<Duration>,
    remaining: Vec<usize>,
    position: Vec<usize>,
    ready: BTreeSet<(usize, TaskId)>,
    /// Ready instances already found stale
    checked: Vec<bool>,
    invocations: usize,
    halted: bool,
}

impl Engine {
    /// Create an engine
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            states: Vec::new(),
            causes: Vec::new(),
            durations: Vec::new(),
            remaining: Vec::new(),
            position: Vec::new(),
            ready: BTreeSet::new(),
            checked: Vec::new(),
            invocations: 0,
            halted: false,
        }
    }

    /// Run every instance of `graph`
    pub async fn run(mut self, graph: &TaskGraph) -> RunReport {
        let start = Instant::now();
        let n = graph.len();

        self.states = vec![TaskState::Pending; n];
        self.causes = vec![None; n];
        self.durations = vec![Duration::ZERO; n];
        self.remaining = graph
            .instances()
            .iter()
            .map(|t| t.all_predecessors().count())
            .collect();
        self.position = vec![0; n];
        self.checked = vec![false; n];
        for (pos, &id) in graph.order().iter().enumerate() {
            self.position[id] = pos;
        }
        for id in 0..n {
            if self.remaining[id] == 0 {
                self.mark_ready(id);
            }
        }

        info!(
            tasks = n,
            concurrency = self.options.concurrency,
            dry_run = self.options.dry_run,
            "Starting run"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut running: JoinSet<Finished> = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, TaskId> = HashMap::new();

        loop {
            self.settle(graph).await;

            while !self.halted {
                let Some(&(pos, id)) = self.ready.first() else {
                    break;
                };
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                self.ready.remove(&(pos, id));
                if let Some(handle) = self.dispatch(graph, id, permit, &mut running) {
                    spawned.insert(handle.id(), id);
                }
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((task, (id, result, elapsed))) => {
                    spawned.remove(&task);
                    self.durations[id] = elapsed;
                    let (state, cause) = self.judge(graph, id, result).await;
                    self.finish(graph, id, state, cause);
                }
                Err(e) => {
                    let Some(id) = spawned.remove(&e.id()) else {
                        warn!("Unknown action task aborted: {}", e);
                        continue;
                    };
                    let message = if e.is_panic() {
                        "action panicked".to_string()
                    } else {
                        format!("action aborted: {e}")
                    };
                    warn!(task = %graph.instances()[id].label(), "{}", message);
                    self.finish(graph, id, TaskState::Failed, Some(FailureCause::Action { message }));
                }
            }
        }

        let report = RunReport {
            outcomes: graph
                .instances()
                .iter()
                .map(|t| TaskOutcome {
                    id: t.id,
                    stage: t.stage.clone(),
                    label: t.label(),
                    state: self.states[t.id],
                    cause: self.causes[t.id].clone(),
                    duration_ms: self.durations[t.id].as_millis() as u64,
                })
                .collect(),
            invocations: self.invocations,
            duration_ms: start.elapsed().as_millis() as u64,
            dry_run: self.options.dry_run,
        };

        info!(
            succeeded = report.succeeded().len(),
            skipped = report.skipped().len(),
            failed = report.failed().len(),
            not_run = report.not_run().len(),
            "Run finished"
        );

        report
    }

    fn mark_ready(&mut self, id: TaskId) {
        self.states[id] = TaskState::Ready;
        self.ready.insert((self.position[id], id));
    }

    /// Settle every ready instance that needs no action.
    ///
    /// What remains in the ready queue afterwards is known to be stale.
    async fn settle(&mut self, graph: &TaskGraph) {
        while !self.halted {
            let unchecked: Vec<(usize, TaskId)> = self
                .ready
                .iter()
                .filter(|(_, id)| !self.checked[*id])
                .copied()
                .collect();
            if unchecked.is_empty() {
                return;
            }

            for entry in unchecked {
                // A failure settled in this pass may have removed it
                if self.halted || !self.ready.contains(&entry) {
                    continue;
                }
                let (_, id) = entry;
                self.checked[id] = true;
                if let Some(state) = self.decide(graph, id).await {
                    self.ready.remove(&entry);
                    self.finish(graph, id, state, None);
                }
            }
        }
    }

    /// Settle an instance without dispatching it, when possible
    async fn decide(&mut self, graph: &TaskGraph, id: TaskId) -> Option<TaskState> {
        let task = &graph.instances()[id];

        if task.kind == StageKind::Origin {
            let missing = missing_paths(&task.outputs).await;
            if missing.is_empty() {
                return Some(TaskState::Skipped);
            }
            let err = SeqflowError::MissingSeed {
                stage: task.stage.clone(),
                missing: missing.clone(),
            };
            warn!("{}", err);
            self.causes[id] = Some(FailureCause::MissingSeed { paths: missing });
            return Some(TaskState::Failed);
        }

        let stale = self.is_stale(graph, id).await;
        match (stale, self.options.dry_run) {
            (false, _) => {
                debug!(task = %task.label(), "Up to date");
                Some(TaskState::Skipped)
            }
            (true, true) => Some(TaskState::WouldRun),
            (true, false) => None,
        }
    }

    /// Incremental check: outputs exist and are no older than any input.
    ///
    /// Inputs already hold every consumed predecessor output. Ordering-only
    /// predecessors do not count.
    async fn is_stale(&self, graph: &TaskGraph, id: TaskId) -> bool {
        let task = &graph.instances()[id];

        if task.predecessors.iter().any(|&p| self.states[p].ran()) {
            return true;
        }

        let mut oldest_output: Option<SystemTime> = None;
        for output in &task.outputs {
            match modified(output).await {
                Some(t) => oldest_output = Some(oldest_output.map_or(t, |o| o.min(t))),
                None => return true,
            }
        }
        let Some(oldest_output) = oldest_output else {
            return true;
        };

        for input in &task.inputs {
            match modified(input).await {
                Some(t) if t <= oldest_output => {}
                _ => return true,
            }
        }

        false
    }

    fn dispatch(
        &mut self,
        graph: &TaskGraph,
        id: TaskId,
        permit: tokio::sync::OwnedSemaphorePermit,
        running: &mut JoinSet<Finished>,
    ) -> Option<AbortHandle> {
        let task = &graph.instances()[id];
        let label = task.label();

        let Some(action) = graph.action_for(id).cloned() else {
            self.causes[id] = Some(FailureCause::Action {
                message: format!("stage '{}' has no action", task.stage),
            });
            self.finish(graph, id, TaskState::Failed, None);
            drop(permit);
            return None;
        };

        info!(task = %label, "Running");
        if let Some(pb) = &self.options.progress {
            pb.set_message(label.clone());
        }

        self.states[id] = TaskState::Running;
        self.invocations += 1;

        let invocation = Invocation {
            task: label,
            inputs: task.inputs.clone(),
            outputs: task.outputs.clone(),
            extras: task.extras.clone(),
        };

        Some(running.spawn(async move {
            let _permit = permit;
            let start = Instant::now();
            let result = action.run(&invocation).await;
            (id, result, start.elapsed())
        }))
    }

    /// Decide the terminal state of a finished action
    async fn judge(
        &self,
        graph: &TaskGraph,
        id: TaskId,
        result: SeqflowResult<ActionResult>,
    ) -> (TaskState, Option<FailureCause>) {
        let task = &graph.instances()[id];

        let message = match result {
            Ok(r) if r.success => {
                let missing = missing_paths(&task.outputs).await;
                if missing.is_empty() {
                    return (TaskState::Succeeded, None);
                }
                let err = SeqflowError::MissingOutputs {
                    task: task.label(),
                    missing: missing.clone(),
                };
                warn!("{}", err);
                return (
                    TaskState::Failed,
                    Some(FailureCause::MissingOutputs { paths: missing }),
                );
            }
            Ok(r) => r.failure_summary(),
            Err(e) => e.to_string(),
        };

        warn!(task = %task.label(), "Action failed: {}", message);
        (TaskState::Failed, Some(FailureCause::Action { message }))
    }

    /// Record a terminal state and release or fail dependents
    fn finish(
        &mut self,
        graph: &TaskGraph,
        id: TaskId,
        state: TaskState,
        cause: Option<FailureCause>,
    ) {
        self.states[id] = state;
        if cause.is_some() {
            self.causes[id] = cause;
        }
        if let Some(pb) = &self.options.progress {
            pb.inc(1);
        }

        if state.satisfies_dependents() {
            for &next in graph.successors(id) {
                self.remaining[next] -= 1;
                if self.remaining[next] == 0 && self.states[next] == TaskState::Pending {
                    self.mark_ready(next);
                }
            }
            return;
        }

        if self.options.mode == FailureMode::FailFast {
            self.halted = true;
        }
        self.propagate_failure(graph, id);
    }

    /// Fail every transitive dependent of `origin` that has not started
    fn propagate_failure(&mut self, graph: &TaskGraph, origin: TaskId) {
        let label = graph.instances()[origin].label();
        let mut stack: Vec<TaskId> = graph.successors(origin).to_vec();

        while let Some(id) = stack.pop() {
            if !matches!(self.states[id], TaskState::Pending | TaskState::Ready) {
                continue;
            }
            if self.states[id] == TaskState::Ready {
                self.ready.remove(&(self.position[id], id));
            }

            warn!(task = %graph.instances()[id].label(), upstream = %label, "Not run: upstream failed");
            self.states[id] = TaskState::Failed;
            self.causes[id] = Some(FailureCause::Upstream {
                task: origin,
                label: label.clone(),
            });
            if let Some(pb) = &self.options.progress {
                pb.inc(1);
            }
            stack.extend_from_slice(graph.successors(id));
        }
    }
}

async fn modified(path: &str) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

async fn missing_paths(paths: &[String]) -> Vec<String> {
    let mut missing = Vec::new();
    for path in paths {
        if tokio::fs::metadata(path).await.is_err() {
            missing.push(path.clone());
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::FnAction;
    use crate::pipeline::{BuildOptions, InputSource, MatchRule, Pipeline, StageOptions};
    use std::path::Path;
    use std::sync::Mutex;

    fn touch_outputs(log: Arc<Mutex<Vec<String>>>) -> Arc<FnAction> {
        Arc::new(FnAction::new("touch", move |inv| {
            log.lock().unwrap().push(inv.task.clone());
            for out in &inv.outputs {
                std::fs::write(out, "x").map_err(|e| e.to_string())?;
            }
            Ok(())
        }))
    }

    fn chain(dir: &Path, log: Arc<Mutex<Vec<String>>>) -> Pipeline {
        let seed = dir.join("a.txt");
        std::fs::write(&seed, "seed").unwrap();

        let mut p = Pipeline::new("chain");
        p.declare_origin("seeds", [seed.to_string_lossy().to_string()])
            .unwrap();
        p.declare_transform(
            "upper",
            InputSource::stage("seeds"),
            MatchRule::suffix(".txt"),
            [".upper"],
            touch_outputs(Arc::clone(&log)),
            StageOptions::new(),
        )
        .unwrap();
        p.declare_transform(
            "count",
            InputSource::stage("upper"),
            MatchRule::suffix(".upper"),
            [".count"],
            touch_outputs(log),
            StageOptions::new(),
        )
        .unwrap();
        p
    }

    #[tokio::test]
    async fn test_runs_then_skips() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = chain(dir.path(), Arc::clone(&log))
            .build(&BuildOptions::default())
            .unwrap();

        let first = run(&graph, 2).await;
        assert!(first.success());
        assert_eq!(first.succeeded().len(), 2);
        assert_eq!(first.invocations, 2);

        let second = run(&graph, 2).await;
        assert!(second.success());
        assert_eq!(second.invocations, 0);
        assert_eq!(second.skipped().len(), 3);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_up_to_date_instances_settle_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let seeds: Vec<String> = ["a.txt", "b.txt"]
            .iter()
            .map(|n| {
                let path = dir.path().join(n);
                std::fs::write(&path, "seed").unwrap();
                path.to_string_lossy().to_string()
            })
            .collect();
        std::fs::write(dir.path().join("b.upper"), "done").unwrap();

        let progress = ProgressBar::hidden();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let action = {
            let progress = progress.clone();
            let seen = Arc::clone(&seen);
            FnAction::new("upper", move |inv| {
                seen.lock().unwrap().push((inv.task.clone(), progress.position()));
                for out in &inv.outputs {
                    std::fs::write(out, "x").map_err(|e| e.to_string())?;
                }
                Ok(())
            })
        };

        let mut p = Pipeline::new("p");
        p.declare_origin("seeds", seeds).unwrap();
        p.declare_transform(
            "upper",
            InputSource::stage("seeds"),
            MatchRule::suffix(".txt"),
            [".upper"],
            Arc::new(action),
            StageOptions::new(),
        )
        .unwrap();
        let graph = p.build(&BuildOptions::default()).unwrap();

        let options = EngineOptions {
            progress: Some(progress),
            ..EngineOptions::with_concurrency(1)
        };
        let report = Engine::new(options).run(&graph).await;

        assert!(report.success());
        assert_eq!(report.invocations, 1);
        // Both seeds and upper[b.txt] were settled before upper[a.txt] started
        assert_eq!(*seen.lock().unwrap(), vec![("upper[a.txt]".to_string(), 3)]);
    }

    #[tokio::test]
    async fn test_missing_seed_fails_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = chain(dir.path(), Arc::clone(&log));
        std::fs::remove_file(dir.path().join("a.txt")).unwrap();

        let graph = pipeline.build(&BuildOptions::default()).unwrap();
        let report = run(&graph, 1).await;

        assert!(!report.success());
        assert_eq!(report.failed().len(), 3);
        assert!(matches!(
            report.outcomes[0].cause,
            Some(FailureCause::MissingSeed { .. })
        ));
        assert!(matches!(
            report.outcomes[2].cause,
            Some(FailureCause::Upstream { task: 0, .. })
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_outputs_fail_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("a.txt");
        std::fs::write(&seed, "seed").unwrap();

        let mut p = Pipeline::new("p");
        p.declare_origin("seeds", [seed.to_string_lossy().to_string()])
            .unwrap();
        p.declare_transform(
            "lazy",
            InputSource::stage("seeds"),
            MatchRule::suffix(".txt"),
            [".out"],
            Arc::new(FnAction::noop("lazy")),
            StageOptions::new(),
        )
        .unwrap();

        let graph = p.build(&BuildOptions::default()).unwrap();
        let report = run(&graph, 1).await;

        assert_eq!(report.state(1), Some(TaskState::Failed));
        assert!(matches!(
            report.outcomes[1].cause,
            Some(FailureCause::MissingOutputs { .. })
        ));
    }

    #[tokio::test]
    async fn test_dry_run_invokes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = chain(dir.path(), Arc::clone(&log))
            .build(&BuildOptions::default())
            .unwrap();

        let options = EngineOptions {
            dry_run: true,
            ..EngineOptions::default()
        };
        let report = Engine::new(options).run(&graph).await;

        assert_eq!(report.invocations, 0);
        assert_eq!(report.would_run().len(), 2);
        assert!(report.dry_run);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_report_json_shape() {
        let report = RunReport {
            outcomes: vec![TaskOutcome {
                id: 0,
                stage: "align".into(),
                label: "align[A_R1.fastq]".into(),
                state: TaskState::Failed,
                cause: Some(FailureCause::Action {
                    message: "exit code 1".into(),
                }),
                duration_ms: 5,
            }],
            invocations: 1,
            duration_ms: 5,
            dry_run: false,
        };

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["outcomes"][0]["state"], "failed");
        assert_eq!(json["outcomes"][0]["cause"]["type"], "action");
    }
}
