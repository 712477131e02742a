use std::fmt;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::config::defs::PipelineError;
use crate::engine::artifact::Artifact;
use crate::engine::pattern::{Pattern, Wildcards};

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Bare switch, e.g. `--write-checkpoints`.
    Flag,
    Value(String),
    /// Value containing `{wildcard}` placeholders, resolved per task instance.
    Template(String),
}

/// Ordered flag name -> value mapping. An absent value (`None`) means the flag
/// is omitted from the command line entirely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(IndexMap<String, Option<ParamValue>>);

impl Params {
    pub fn new() -> Self {
        Params(IndexMap::new())
    }

    pub fn flag(mut self, name: &str, enabled: bool) -> Self {
        self.0
            .insert(name.to_string(), enabled.then_some(ParamValue::Flag));
        self
    }

    pub fn value<T: ToString>(mut self, name: &str, value: Option<T>) -> Self {
        self.0.insert(
            name.to_string(),
            value.map(|v| ParamValue::Value(v.to_string())),
        );
        self
    }

    pub fn template(mut self, name: &str, template: &str) -> Self {
        self.0
            .insert(name.to_string(), Some(ParamValue::Template(template.to_string())));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name).and_then(|v| v.as_ref())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolves every template value against `wildcards`.
    pub fn resolve(&self, wildcards: &Wildcards) -> Result<Params, PipelineError> {
        let mut resolved = IndexMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            let value = match value {
                Some(ParamValue::Template(t)) => {
                    let expanded = Pattern::new(t.as_str()).expand(wildcards)?;
                    Some(ParamValue::Value(expanded.to_string_lossy().into_owned()))
                }
                other => other.clone(),
            };
            resolved.insert(name.clone(), value);
        }
        Ok(Params(resolved))
    }

    /// Command-line rendering: flags as-is, valued flags as `name value`,
    /// absent values skipped.
    pub fn to_cli(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (name, value) in &self.0 {
            match value {
                None => {}
                Some(ParamValue::Flag) => args.push(name.clone()),
                Some(ParamValue::Value(v)) | Some(ParamValue::Template(v)) => {
                    args.push(name.clone());
                    args.push(v.clone());
                }
            }
        }
        args
    }
}

/// One instantiated unit of work. Built once while resolving the graph and
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub rule: String,
    pub wildcards: Wildcards,
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    pub params: Params,
    pub threads: usize,
    pub log: Option<PathBuf>,
}

impl TaskSpec {
    pub fn wildcard(&self, name: &str) -> Result<&str, PipelineError> {
        self.wildcards.get(name).map(|s| s.as_str()).ok_or_else(|| {
            PipelineError::Graph(format!("Task {} has no wildcard '{}'", self.name, name))
        })
    }

    pub fn input(&self, key: &str) -> Result<&Path, PipelineError> {
        lookup(&self.inputs, key).ok_or_else(|| {
            PipelineError::Graph(format!("Task {} has no input '{}'", self.name, key))
        })
    }

    pub fn inputs_for(&self, key: &str) -> Vec<&Path> {
        self.inputs
            .iter()
            .filter(|a| a.key == key)
            .map(|a| a.path())
            .collect()
    }

    pub fn output(&self, key: &str) -> Result<&Path, PipelineError> {
        lookup(&self.outputs, key).ok_or_else(|| {
            PipelineError::Graph(format!("Task {} has no output '{}'", self.name, key))
        })
    }

    pub fn has_output(&self, key: &str) -> bool {
        lookup(&self.outputs, key).is_some()
    }

    pub fn log_path(&self) -> Result<&Path, PipelineError> {
        self.log.as_deref().ok_or_else(|| {
            PipelineError::Graph(format!("Task {} declares no log file", self.name))
        })
    }
}

fn lookup<'a>(artifacts: &'a [Artifact], key: &str) -> Option<&'a Path> {
    artifacts.iter().find(|a| a.key == key).map(|a| a.path())
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Work a task performs once its inputs exist. Implementations block their
/// worker until any subprocess they start has exited.
pub trait TaskAction: Send + Sync {
    fn run<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, Result<(), PipelineError>>;
}
