//! Materialized path string handling. Everything here is pure; the strategy and repository
//! turn the results into statements.

use sha2::{Digest, Sha256};

use crate::config::TreeConfig;
use crate::error::TreeError;

/// Separator placement rules of one mapping.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathFormat {
    separator: String,
    starts_with_separator: bool,
    ends_with_separator: bool,
}

impl PathFormat {
    pub fn new(separator: impl Into<String>, starts_with: bool, ends_with: bool) -> Self {
        Self {
            separator: separator.into(),
            starts_with_separator: starts_with,
            ends_with_separator: ends_with,
        }
    }

    pub fn from_config(config: &TreeConfig) -> Self {
        Self::new(
            config.path_separator(),
            config.path_starts_with_separator(),
            config.path_ends_with_separator(),
        )
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Path segment of a node: its source value, optionally suffixed with `-<id>`.
    pub fn segment(&self, source: &str, id: Option<&str>) -> Result<String, TreeError> {
        if source.is_empty() {
            return Err(TreeError::invalid("path source can't be empty"));
        }
        if source.contains(self.separator.as_str()) {
            return Err(TreeError::invalid(format!(
                "path source [{source}] can't contain the path separator [{}]",
                self.separator
            )));
        }
        Ok(match id {
            Some(id) => format!("{source}-{id}"),
            None => source.to_string(),
        })
    }

    /// Full path of a node under `parent_path`, or of a root when there is no parent.
    pub fn build(&self, parent_path: Option<&str>, segment: &str) -> String {
        let mut path = String::new();
        match parent_path {
            Some(parent) => {
                path.push_str(parent);
                if !parent.ends_with(self.separator.as_str()) {
                    path.push_str(&self.separator);
                }
            }
            None if self.starts_with_separator => path.push_str(&self.separator),
            None => {}
        }
        path.push_str(segment);
        if self.ends_with_separator {
            path.push_str(&self.separator);
        }
        path
    }

    pub fn segments<'a>(&self, path: &'a str) -> Vec<&'a str> {
        path.split(self.separator.as_str())
            .filter(|segment| !segment.is_empty())
            .collect()
    }

    /// Depth of the node stored at `path`. Roots are at level 0.
    pub fn level(&self, path: &str) -> i64 {
        let count = self.segments(path).len() as i64;
        (count - 1).max(0)
    }

    /// Paths of every ancestor of `path` and of `path` itself, shortest first.
    pub fn ancestor_paths(&self, path: &str) -> Vec<String> {
        let segments = self.segments(path);
        let mut paths = Vec::with_capacity(segments.len());
        let mut current: Option<String> = None;
        for segment in segments {
            let next = self.build(current.as_deref(), segment);
            paths.push(next.clone());
            current = Some(next);
        }
        paths
    }

    /// Prefix shared by every descendant path of the node stored at `path`.
    pub fn descendant_prefix(&self, path: &str) -> String {
        if self.ends_with_separator {
            path.to_string()
        } else {
            format!("{path}{}", self.separator)
        }
    }

    /// Rewrite a descendant path after its ancestor moved from `old_path` to `new_path`.
    pub fn rebase(&self, path: &str, old_path: &str, new_path: &str) -> Option<String> {
        let prefix = self.descendant_prefix(old_path);
        let rest = path.strip_prefix(prefix.as_str())?;
        Some(format!("{}{rest}", self.descendant_prefix(new_path)))
    }

    /// `LIKE` pattern matching paths with more than one segment, i.e. every non-root.
    pub fn nested_pattern(&self) -> String {
        let separator = escape_like(&self.separator);
        let mut pattern = String::new();
        if self.starts_with_separator {
            pattern.push_str(&separator);
        }
        pattern.push('%');
        pattern.push_str(&separator);
        pattern.push('%');
        if self.ends_with_separator {
            pattern.push_str(&separator);
        }
        pattern
    }
}

/// SHA-256 hex digest stored in the path hash column.
pub fn hash(path: &str) -> String {
    hex::encode(Sha256::digest(path.as_bytes()))
}

/// Escape `LIKE` wildcards with `\`, to be paired with `ESCAPE '\'`.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
