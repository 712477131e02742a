//! A small file-based workflow engine: rules declare pattern-parameterized
//! inputs and outputs, requested targets are resolved into a task graph,
//! stale tasks are planned by modification time, and the plan is executed
//! with bounded parallelism.

pub mod artifact;
pub mod executor;
pub mod graph;
pub mod pattern;
pub mod plan;
pub mod rule;
pub mod task;

pub use artifact::{ancient, persistent, temp, Artifact, ArtifactPattern, Lifecycle};
pub use executor::{Executor, RunReport, TaskFailure};
pub use graph::TaskGraph;
pub use pattern::{Pattern, Wildcards};
pub use plan::{plan, Plan, PlanOptions};
pub use rule::Rule;
pub use task::{ParamValue, Params, TaskAction, TaskSpec};
