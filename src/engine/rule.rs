use std::fmt;
use std::sync::Arc;

use crate::config::defs::PipelineError;
use crate::engine::artifact::{Artifact, ArtifactPattern};
use crate::engine::pattern::{Pattern, Wildcards};
use crate::engine::task::{Params, TaskAction, TaskSpec};

/// A pattern-parameterized task declaration. Concrete [`TaskSpec`]s are
/// instantiated from it once the graph resolver has bound its wildcards.
#[derive(Clone)]
pub struct Rule {
    pub name: String,
    pub inputs: Vec<ArtifactPattern>,
    pub outputs: Vec<ArtifactPattern>,
    pub params: Params,
    pub threads: usize,
    pub log: Option<Pattern>,
    pub action: Arc<dyn TaskAction>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("params", &self.params)
            .field("threads", &self.threads)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl Rule {
    pub fn new(name: &str, action: Arc<dyn TaskAction>) -> Self {
        Rule {
            name: name.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Params::new(),
            threads: 1,
            log: None,
            action,
        }
    }

    pub fn input(mut self, artifact: ArtifactPattern) -> Self {
        self.inputs.push(artifact);
        self
    }

    pub fn inputs(mut self, artifacts: impl IntoIterator<Item = ArtifactPattern>) -> Self {
        self.inputs.extend(artifacts);
        self
    }

    pub fn output(mut self, artifact: ArtifactPattern) -> Self {
        self.outputs.push(artifact);
        self
    }

    pub fn output_if(self, condition: bool, artifact: ArtifactPattern) -> Self {
        if condition { self.output(artifact) } else { self }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn log(mut self, template: impl Into<String>) -> Self {
        self.log = Some(Pattern::new(template));
        self
    }

    /// Wildcard bindings under which this rule produces `path`.
    pub fn match_output(&self, path: &std::path::Path) -> Option<Wildcards> {
        self.outputs
            .iter()
            .find_map(|artifact| artifact.pattern.matches(path))
    }

    /// Rejects rules whose inputs, log or params use wildcards that no output
    /// can bind; such a rule could never be instantiated.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.outputs.is_empty() {
            return Err(PipelineError::Graph(format!(
                "Rule {} declares no outputs",
                self.name
            )));
        }
        let bound: Vec<&str> = self
            .outputs
            .iter()
            .flat_map(|a| a.pattern.wildcard_names())
            .collect();
        for output in &self.outputs {
            let names = output.pattern.wildcard_names();
            if bound.iter().any(|name| !names.contains(name)) {
                return Err(PipelineError::Graph(format!(
                    "Rule {}: output {} does not use every wildcard of the rule",
                    self.name, output.pattern
                )));
            }
        }
        let used = self
            .inputs
            .iter()
            .map(|a| &a.pattern)
            .chain(self.log.iter())
            .flat_map(|p| p.wildcard_names());
        for name in used {
            if !bound.contains(&name) {
                return Err(PipelineError::Graph(format!(
                    "Rule {}: wildcard '{}' appears in an input or log but in no output",
                    self.name, name
                )));
            }
        }
        Ok(())
    }

    pub fn task_name(&self, wildcards: &Wildcards) -> String {
        if wildcards.is_empty() {
            self.name.clone()
        } else {
            let values: Vec<&str> = wildcards.values().map(|v| v.as_str()).collect();
            format!("{}[{}]", self.name, values.join(","))
        }
    }

    pub fn instantiate(&self, wildcards: Wildcards) -> Result<TaskSpec, PipelineError> {
        let expand = |artifacts: &[ArtifactPattern]| -> Result<Vec<Artifact>, PipelineError> {
            artifacts
                .iter()
                .map(|a| {
                    Ok(Artifact::new(
                        a.key.clone(),
                        a.pattern.expand(&wildcards)?,
                        a.lifecycle,
                    ))
                })
                .collect()
        };

        let inputs = expand(&self.inputs)?;
        let outputs = expand(&self.outputs)?;
        let log = match &self.log {
            Some(pattern) => Some(pattern.expand(&wildcards)?),
            None => None,
        };
        let params = self.params.resolve(&wildcards)?;

        Ok(TaskSpec {
            name: self.task_name(&wildcards),
            rule: self.name.clone(),
            wildcards,
            inputs,
            outputs,
            params,
            threads: self.threads,
            log,
        })
    }
}
