//! Runs a [`Plan`] over a [`TaskGraph`].
//!
//! Independent tasks run concurrently, bounded by a worker budget. A task is
//! spawned once every scheduled producer it depends on has completed.
//! Temporary artifacts are reference counted by their scheduled consumers and
//! removed after the last one completes, or at the end of the run when a
//! consumer did not complete. Requested targets are never removed. A failing task only takes down its
//! own downstream branch unless the error is fatal, in which case every
//! running task is aborted and the error is returned.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::defs::PipelineError;
use crate::engine::artifact::Lifecycle;
use crate::engine::graph::{Task, TaskGraph};
use crate::engine::plan::Plan;
use crate::utils::file::remove_if_exists;

#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<String>,
    pub failed: Vec<TaskFailure>,
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_tasks(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.task.as_str()).collect()
    }

    pub fn log_summary(&self) {
        info!(
            "{} tasks completed, {} failed, {} skipped",
            self.completed.len(),
            self.failed.len(),
            self.skipped.len()
        );
        for failure in &self.failed {
            error!("{} failed: {}", failure.task, failure.error);
        }
        for task in &self.skipped {
            warn!("{} skipped because an upstream task failed", task);
        }
    }

    /// Turns branch failures into a single error naming the failed tasks.
    pub fn into_result(self) -> Result<RunReport, PipelineError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PipelineError::Other(anyhow!(
                "{} task(s) failed: {}",
                self.failed.len(),
                self.failed_tasks().join(", ")
            )))
        }
    }
}

pub struct Executor {
    jobs: usize,
}

enum Outcome {
    /// Interrupted while waiting for a worker; nothing was touched.
    NotStarted,
    Finished(Result<(), PipelineError>),
}

impl Executor {
    pub fn new(jobs: usize) -> Self {
        Executor { jobs: jobs.max(1) }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub async fn execute(&self, graph: &TaskGraph, plan: &Plan) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();
        if plan.is_empty() {
            return Ok(report);
        }

        let mut waiting: HashMap<usize, usize> = plan
            .scheduled
            .iter()
            .map(|&idx| {
                let n = graph.deps(idx).iter().filter(|d| plan.contains(**d)).count();
                (idx, n)
            })
            .collect();

        let mut temp_consumers: HashMap<PathBuf, usize> = HashMap::new();
        for &idx in &plan.scheduled {
            for input in &graph.spec(idx).inputs {
                if graph.lifecycle(&input.path) == Lifecycle::Temporary
                    && !graph.is_target(&input.path)
                {
                    *temp_consumers.entry(input.path.clone()).or_default() += 1;
                }
            }
        }

        let mut ready: VecDeque<usize> = plan
            .scheduled
            .iter()
            .copied()
            .filter(|idx| waiting.get(idx) == Some(&0))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let started: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut join_set: JoinSet<(usize, Outcome)> = JoinSet::new();
        let mut handles: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut done: HashSet<usize> = HashSet::new();
        let mut fatal: Option<PipelineError> = None;
        let mut interrupted = false;

        loop {
            if fatal.is_none() && !interrupted {
                while let Some(idx) = ready.pop_front() {
                    let task = graph.task(idx).clone();
                    let semaphore = semaphore.clone();
                    let started = started.clone();
                    let handle = join_set.spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return (idx, Outcome::NotStarted);
                        };
                        if let Ok(mut set) = started.lock() {
                            set.insert(idx);
                        }
                        (idx, Outcome::Finished(run_task(&task).await))
                    });
                    handles.insert(handle.id(), idx);
                }
            }

            if join_set.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = join_set.join_next_with_id() => joined,
                Ok(()) = tokio::signal::ctrl_c(), if !interrupted => {
                    warn!("Interrupt received; waiting for running tasks to finish");
                    interrupted = true;
                    semaphore.close();
                    continue;
                }
            };
            let Some(joined) = joined else { break };

            let (idx, outcome) = match joined {
                Ok((_, (idx, outcome))) => (idx, outcome),
                Err(join_error) => {
                    let Some(&idx) = handles.get(&join_error.id()) else {
                        continue;
                    };
                    let was_started = started.lock().map(|s| s.contains(&idx)).unwrap_or(true);
                    if join_error.is_cancelled() {
                        if was_started {
                            discard_outputs(graph.task(idx));
                        }
                        continue;
                    }
                    let err = PipelineError::Other(anyhow!("task panicked: {}", join_error));
                    (idx, Outcome::Finished(Err(err)))
                }
            };
            let spec = graph.spec(idx);

            match outcome {
                Outcome::NotStarted => {}
                Outcome::Finished(Ok(())) => {
                    info!("Finished {}", spec.name);
                    report.completed.push(spec.name.clone());
                    done.insert(idx);

                    for &dependent in graph.dependents(idx) {
                        if let Some(count) = waiting.get_mut(&dependent) {
                            *count -= 1;
                            if *count == 0 {
                                ready.push_back(dependent);
                            }
                        }
                    }

                    for input in &spec.inputs {
                        if let Some(count) = temp_consumers.get_mut(&input.path) {
                            *count -= 1;
                            if *count == 0 {
                                remove_temporary(&input.path);
                            }
                        }
                    }
                    for output in &spec.outputs {
                        if output.lifecycle == Lifecycle::Temporary
                            && !graph.is_target(&output.path)
                            && !temp_consumers.contains_key(&output.path)
                        {
                            remove_temporary(&output.path);
                        }
                    }
                }
                Outcome::Finished(Err(e)) => {
                    if !matches!(e, PipelineError::DependencyMissing { .. }) {
                        discard_outputs(graph.task(idx));
                    }
                    if e.is_fatal() {
                        error!("{} failed; stopping the run: {}", spec.name, e);
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                        semaphore.close();
                        join_set.abort_all();
                    } else {
                        error!("{} failed: {}", spec.name, e);
                        done.insert(idx);
                        report.failed.push(TaskFailure {
                            task: spec.name.clone(),
                            error: e,
                        });
                    }
                }
            }
        }

        // temporaries some consumer never finished with
        for (path, count) in &temp_consumers {
            if *count > 0 {
                remove_temporary(path);
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        report.skipped = plan
            .scheduled
            .iter()
            .filter(|idx| !done.contains(idx))
            .map(|idx| graph.spec(*idx).name.clone())
            .collect();

        if interrupted {
            report.log_summary();
            return Err(PipelineError::Interrupted);
        }
        Ok(report)
    }
}

async fn run_task(task: &Task) -> Result<(), PipelineError> {
    let spec = &task.spec;

    for input in &spec.inputs {
        if !input.path.exists() {
            return Err(PipelineError::DependencyMissing {
                task: spec.name.clone(),
                path: input.path.clone(),
            });
        }
    }

    let dirs = spec
        .outputs
        .iter()
        .map(|o| o.path.as_path())
        .chain(spec.log.as_deref())
        .filter_map(|p| p.parent())
        .filter(|p| !p.as_os_str().is_empty());
    for dir in dirs {
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    }

    info!("Starting {} (threads: {})", spec.name, spec.threads);
    task.action.run(spec).await?;

    for output in &spec.outputs {
        if !output.path.exists() {
            return Err(PipelineError::Other(anyhow!(
                "{} finished but did not produce {}",
                spec.name,
                output.path.display()
            )));
        }
    }
    Ok(())
}

fn remove_temporary(path: &std::path::Path) {
    match remove_if_exists(path) {
        Ok(true) => debug!("Removed temporary artifact {}", path.display()),
        Ok(false) => {}
        Err(e) => warn!("Could not remove temporary artifact {}: {}", path.display(), e),
    }
}

/// Removes whatever a failed or aborted task left behind so a later run does
/// not mistake it for a finished artifact.
fn discard_outputs(task: &Task) {
    for output in &task.spec.outputs {
        match remove_if_exists(&output.path) {
            Ok(true) => warn!("Removed incomplete output {}", output.path.display()),
            Ok(false) => {}
            Err(e) => warn!("Could not remove {}: {}", output.path.display(), e),
        }
    }
}
