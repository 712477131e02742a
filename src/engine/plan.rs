//! Decides which task instances have to run.
//!
//! A task is scheduled when it is forced, when one of its non-temporary
//! outputs is missing, when a non-ancient input is newer than its oldest
//! output, or when one of its non-ancient inputs is about to be regenerated.
//! A missing temporary output only matters once a scheduled consumer needs
//! it, in which case its producer is scheduled too, or when it was requested
//! as a target. Targets nothing produces must already exist.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use log::{debug, info};

use crate::config::defs::PipelineError;
use crate::engine::artifact::Lifecycle;
use crate::engine::graph::TaskGraph;

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub force_all: bool,
    pub force_rules: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Scheduled task indices, producers before consumers.
    pub scheduled: Vec<usize>,
    pub reasons: HashMap<usize, String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.reasons.contains_key(&idx)
    }

    pub fn log(&self, graph: &TaskGraph) {
        if self.is_empty() {
            info!("Nothing to be done; all targets are up to date.");
            return;
        }
        info!("{} of {} tasks scheduled:", self.scheduled.len(), graph.len());
        for idx in &self.scheduled {
            let spec = graph.spec(*idx);
            info!(
                "  {} (threads: {}) <- {}",
                spec.name,
                spec.threads,
                self.reasons.get(idx).map(String::as_str).unwrap_or("")
            );
        }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Reason the task is stale on its own, ignoring the state of other tasks.
fn own_reason(graph: &TaskGraph, idx: usize, options: &PlanOptions) -> Option<String> {
    let spec = graph.spec(idx);
    if options.force_all || options.force_rules.contains(&spec.rule) {
        return Some("forced".to_string());
    }

    for output in &spec.outputs {
        let kept = output.lifecycle != Lifecycle::Temporary || graph.is_target(&output.path);
        if kept && !output.path.exists() {
            return Some(format!("missing output {}", output.path.display()));
        }
    }

    let oldest_output = spec.outputs.iter().filter_map(|o| mtime(&o.path)).min()?;
    for input in &spec.inputs {
        if input.is_ancient() {
            continue;
        }
        for (path, modified) in effective_mtimes(graph, &input.path) {
            if modified > oldest_output {
                return Some(format!("updated input {}", path.display()));
            }
        }
    }
    None
}

/// Modification times standing in for `path`. A missing temporary artifact
/// is replaced by the non-ancient inputs of its producer, so staleness is
/// still visible through intermediates that were already cleaned up.
fn effective_mtimes<'a>(graph: &'a TaskGraph, path: &'a Path) -> Vec<(&'a Path, SystemTime)> {
    if let Some(modified) = mtime(path) {
        return vec![(path, modified)];
    }
    let Some(producer) = graph.producer(path) else {
        return Vec::new();
    };
    if graph.lifecycle(path) != Lifecycle::Temporary {
        return Vec::new();
    }
    graph
        .spec(producer)
        .inputs
        .iter()
        .filter(|input| !input.is_ancient())
        .flat_map(|input| effective_mtimes(graph, &input.path))
        .collect()
}

pub fn plan(graph: &TaskGraph, options: &PlanOptions) -> Result<Plan, PipelineError> {
    for target in graph.targets() {
        if graph.producer(target).is_none() && !target.exists() {
            return Err(PipelineError::Graph(format!(
                "No rule produces requested target {} and it does not exist",
                target.display()
            )));
        }
    }

    let mut reasons: HashMap<usize, String> = HashMap::new();
    for &idx in graph.order() {
        if let Some(reason) = own_reason(graph, idx, options) {
            reasons.insert(idx, reason);
        }
    }

    loop {
        let mut changed = false;

        // Regenerated inputs make consumers stale.
        for &idx in graph.order() {
            if reasons.contains_key(&idx) {
                continue;
            }
            let spec = graph.spec(idx);
            let regenerated = spec.inputs.iter().find(|input| {
                !input.is_ancient()
                    && graph
                        .producer(&input.path)
                        .is_some_and(|p| reasons.contains_key(&p))
            });
            if let Some(input) = regenerated {
                reasons.insert(idx, format!("input {} will be regenerated", input.path.display()));
                changed = true;
            }
        }

        // Scheduled consumers need their missing inputs rebuilt.
        for &idx in graph.order().iter().rev() {
            if !reasons.contains_key(&idx) {
                continue;
            }
            let spec = graph.spec(idx);
            for input in &spec.inputs {
                if input.path.exists() {
                    continue;
                }
                if let Some(producer) = graph.producer(&input.path) {
                    if !reasons.contains_key(&producer) {
                        reasons.insert(
                            producer,
                            format!("{} needed by {} is missing", input.path.display(), spec.name),
                        );
                        changed = true;
                    }
                }
            }
        }

        if !changed {
            break;
        }
    }

    let scheduled: Vec<usize> = graph
        .order()
        .iter()
        .copied()
        .filter(|idx| reasons.contains_key(idx))
        .collect();

    for &idx in &scheduled {
        let spec = graph.spec(idx);
        for input in &spec.inputs {
            if graph.producer(&input.path).is_none() && !input.path.exists() {
                return Err(PipelineError::DependencyMissing {
                    task: spec.name.clone(),
                    path: input.path.clone(),
                });
            }
        }
        debug!("Scheduling {}: {}", spec.name, reasons[&idx]);
    }

    Ok(Plan { scheduled, reasons })
}
