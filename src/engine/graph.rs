//! Resolution of requested target files into a DAG of task instances.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::config::defs::PipelineError;
use crate::engine::artifact::Lifecycle;
use crate::engine::pattern::Wildcards;
use crate::engine::rule::Rule;
use crate::engine::task::{TaskAction, TaskSpec};

#[derive(Clone)]
pub struct Task {
    pub spec: Arc<TaskSpec>,
    pub action: Arc<dyn TaskAction>,
}

pub struct TaskGraph {
    tasks: Vec<Task>,
    producers: HashMap<PathBuf, usize>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
    targets: Vec<PathBuf>,
}

impl TaskGraph {
    /// Walks back from `targets`: every path is matched against the rules'
    /// output patterns, the single matching rule is instantiated with the
    /// recovered wildcards, and its inputs are resolved the same way. Paths no
    /// rule produces are source files.
    pub fn resolve(rules: &[Rule], targets: &[PathBuf]) -> Result<Self, PipelineError> {
        for rule in rules {
            rule.validate()?;
        }

        let mut tasks: Vec<Task> = Vec::new();
        let mut instances: HashMap<(usize, Wildcards), usize> = HashMap::new();
        let mut producers: HashMap<PathBuf, usize> = HashMap::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = targets.iter().cloned().collect();

        while let Some(path) = queue.pop_front() {
            if !seen.insert(path.clone()) {
                continue;
            }

            let candidates: Vec<(usize, Wildcards)> = rules
                .iter()
                .enumerate()
                .filter_map(|(i, rule)| rule.match_output(&path).map(|w| (i, w)))
                .collect();

            let (rule_idx, wildcards) = match candidates.len() {
                0 => continue,
                1 => candidates.into_iter().next().ok_or_else(|| {
                    PipelineError::Graph(format!("Lost candidate rule for {}", path.display()))
                })?,
                _ => {
                    let names: Vec<&str> = candidates
                        .iter()
                        .map(|(i, _)| rules[*i].name.as_str())
                        .collect();
                    return Err(PipelineError::Graph(format!(
                        "{} can be produced by more than one rule: {}",
                        path.display(),
                        names.join(", ")
                    )));
                }
            };

            let key = (rule_idx, wildcards);
            if instances.contains_key(&key) {
                continue;
            }
            let rule = &rules[rule_idx];
            let spec = rule.instantiate(key.1.clone())?;
            let idx = tasks.len();

            for output in &spec.outputs {
                if let Some(&other) = producers.get(&output.path) {
                    return Err(PipelineError::Graph(format!(
                        "{} is produced by both {} and {}",
                        output.path.display(),
                        tasks[other].spec.name,
                        spec.name
                    )));
                }
                producers.insert(output.path.clone(), idx);
            }
            for input in &spec.inputs {
                queue.push_back(input.path.clone());
            }

            debug!("Resolved task {}", spec.name);
            instances.insert(key, idx);
            tasks.push(Task {
                spec: Arc::new(spec),
                action: rule.action.clone(),
            });
        }

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        for (idx, task) in tasks.iter().enumerate() {
            for input in &task.spec.inputs {
                if let Some(&producer) = producers.get(&input.path) {
                    if producer == idx {
                        return Err(PipelineError::Graph(format!(
                            "Task {} consumes its own output {}",
                            task.spec.name,
                            input.path.display()
                        )));
                    }
                    if !deps[idx].contains(&producer) {
                        deps[idx].push(producer);
                        dependents[producer].push(idx);
                    }
                }
            }
        }

        let order = topological_order(&tasks, &deps, &dependents)?;

        Ok(TaskGraph {
            tasks,
            producers,
            deps,
            dependents,
            order,
            targets: targets.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, idx: usize) -> &Task {
        &self.tasks[idx]
    }

    pub fn spec(&self, idx: usize) -> &TaskSpec {
        &self.tasks[idx].spec
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.iter().map(|t| t.spec.as_ref())
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.spec.name == name)
    }

    pub fn producer(&self, path: &Path) -> Option<usize> {
        self.producers.get(path).copied()
    }

    /// Lifecycle declared by the artifact's producer; source files are
    /// persistent.
    pub fn lifecycle(&self, path: &Path) -> Lifecycle {
        self.producer(path)
            .and_then(|idx| {
                self.tasks[idx]
                    .spec
                    .outputs
                    .iter()
                    .find(|a| a.path == path)
                    .map(|a| a.lifecycle)
            })
            .unwrap_or_default()
    }

    pub fn deps(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Task indices, producers before consumers.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn is_target(&self, path: &Path) -> bool {
        self.targets.iter().any(|t| t == path)
    }

    /// Inputs nothing in the graph produces.
    pub fn sources(&self) -> Vec<&Path> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for idx in &self.order {
            for input in &self.tasks[*idx].spec.inputs {
                if !self.producers.contains_key(&input.path) && seen.insert(&input.path) {
                    sources.push(input.path.as_path());
                }
            }
        }
        sources
    }
}

/// Kahn's algorithm; ties broken by instantiation order so the result is
/// deterministic.
fn topological_order(
    tasks: &[Task],
    deps: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> Result<Vec<usize>, PipelineError> {
    let mut remaining: Vec<usize> = deps.iter().map(|d| d.len()).collect();
    let mut ready: std::collections::BTreeSet<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != tasks.len() {
        let stuck: Vec<&str> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(i, _)| tasks[i].spec.name.as_str())
            .collect();
        return Err(PipelineError::Graph(format!(
            "Dependency cycle among: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
