//! Path templates with named `{wildcard}` placeholders.
//!
//! A pattern such as `out/merge/{sample_split}_STATS` works in both
//! directions: [`Pattern::expand`] fills the placeholders to produce a path,
//! and [`Pattern::matches`] recovers the bindings from a concrete path. The
//! second direction is what lets the graph resolver walk from a requested
//! file back to the task instance that produces it.
//!
//! Each wildcard matches one or more characters other than `/`. A wildcard
//! that appears more than once must bind the same value everywhere. `{{` and
//! `}}` stand for literal braces.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::defs::PipelineError;

pub type Wildcards = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    template: String,
    segments: Vec<Segment>,
}

fn is_wildcard_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Doubles braces so arbitrary text (e.g. an output directory) can be
/// embedded in a template verbatim.
pub fn escape(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

impl Pattern {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template.as_str();

        while let Some(c) = rest.chars().next() {
            if rest.starts_with("{{") {
                literal.push('{');
                rest = &rest[2..];
            } else if rest.starts_with("}}") {
                literal.push('}');
                rest = &rest[2..];
            } else if c == '{' {
                match rest.find('}') {
                    Some(close) if is_wildcard_name(&rest[1..close]) => {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Wildcard(rest[1..close].to_string()));
                        rest = &rest[close + 1..];
                    }
                    _ => {
                        literal.push('{');
                        rest = &rest[1..];
                    }
                }
            } else {
                literal.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Pattern { template, segments }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Distinct wildcard names, in order of first appearance.
    pub fn wildcard_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Wildcard(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Wildcard(_)))
    }

    pub fn expand(&self, wildcards: &Wildcards) -> Result<PathBuf, PipelineError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Wildcard(name) => {
                    let value = wildcards.get(name).ok_or_else(|| {
                        PipelineError::Graph(format!(
                            "Wildcard '{}' unbound while expanding '{}'",
                            name, self.template
                        ))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(PathBuf::from(out))
    }

    /// Recovers the wildcard bindings that expand to `path`, if any.
    pub fn matches(&self, path: &Path) -> Option<Wildcards> {
        let text = path.to_str()?;
        let mut bindings = Wildcards::new();
        if match_segments(&self.segments, text, &mut bindings) {
            Some(bindings)
        } else {
            None
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

fn match_segments(segments: &[Segment], input: &str, bindings: &mut Wildcards) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return input.is_empty();
    };

    match first {
        Segment::Literal(text) => match input.strip_prefix(text.as_str()) {
            Some(remaining) => match_segments(rest, remaining, bindings),
            None => false,
        },
        Segment::Wildcard(name) => {
            if let Some(bound) = bindings.get(name).cloned() {
                return match input.strip_prefix(bound.as_str()) {
                    Some(remaining) => match_segments(rest, remaining, bindings),
                    None => false,
                };
            }

            let limit = input.find('/').unwrap_or(input.len());
            // Longest candidate first, so earlier wildcards are greedy.
            let mut ends: Vec<usize> = input[..limit]
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .collect();
            ends.reverse();
            for end in ends {
                bindings.insert(name.clone(), input[..end].to_string());
                if match_segments(rest, &input[end..], bindings) {
                    return true;
                }
                bindings.remove(name);
            }
            false
        }
    }
}
