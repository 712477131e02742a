use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::pattern::Pattern;

/// How the engine treats an artifact once it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifecycle {
    #[default]
    Persistent,
    /// Removed once every planned consumer has completed.
    Temporary,
    /// Never considered newer than the outputs of the tasks consuming it.
    Ancient,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Lifecycle::Persistent => "persistent",
            Lifecycle::Temporary => "temporary",
            Lifecycle::Ancient => "ancient",
        };
        f.write_str(tag)
    }
}

/// A concrete file a task reads or writes. `key` names the artifact's role
/// within its task (several inputs may share a key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    pub key: String,
    pub path: PathBuf,
    pub lifecycle: Lifecycle,
}

impl Artifact {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>, lifecycle: Lifecycle) -> Self {
        Artifact {
            key: key.into(),
            path: path.into(),
            lifecycle,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.lifecycle == Lifecycle::Temporary
    }

    pub fn is_ancient(&self) -> bool {
        self.lifecycle == Lifecycle::Ancient
    }
}

/// A rule-level artifact declaration: a path pattern plus its lifecycle tag.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    pub key: String,
    pub pattern: Pattern,
    pub lifecycle: Lifecycle,
}

impl ArtifactPattern {
    pub fn new(key: impl Into<String>, template: impl Into<String>, lifecycle: Lifecycle) -> Self {
        ArtifactPattern {
            key: key.into(),
            pattern: Pattern::new(template),
            lifecycle,
        }
    }

    pub fn lifecycle_if(self, condition: bool, lifecycle: Lifecycle) -> Self {
        if condition {
            ArtifactPattern { lifecycle, ..self }
        } else {
            self
        }
    }
}

pub fn persistent(key: &str, template: impl Into<String>) -> ArtifactPattern {
    ArtifactPattern::new(key, template, Lifecycle::Persistent)
}

pub fn temp(key: &str, template: impl Into<String>) -> ArtifactPattern {
    ArtifactPattern::new(key, template, Lifecycle::Temporary)
}

pub fn ancient(key: &str, template: impl Into<String>) -> ArtifactPattern {
    ArtifactPattern::new(key, template, Lifecycle::Ancient)
}
