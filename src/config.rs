use std::time::Duration;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::TreeError;

/// Structural encoding used by an entity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Nested,
    MaterializedPath,
    Closure,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Nested => "nested",
            StrategyKind::MaterializedPath => "materialized_path",
            StrategyKind::Closure => "closure",
        }
    }
}

/// Static configuration describing which columns of a SeaORM entity carry the tree
/// structure and how the strategy should maintain them.
#[derive(Clone, Debug)]
pub struct TreeConfig {
    entity_name: String,
    strategy: StrategyKind,
    id_column: String,
    parent_column: String,
    left_column: Option<String>,
    right_column: Option<String>,
    level_column: Option<String>,
    root_column: Option<String>,
    path_column: Option<String>,
    path_source_column: Option<String>,
    path_hash_column: Option<String>,
    path_separator: String,
    path_append_id: Option<bool>,
    path_starts_with_separator: bool,
    path_ends_with_separator: bool,
    lock_time_column: Option<String>,
    activate_locking: bool,
    locking_timeout: Duration,
    closure_table: Option<String>,
    advisory_lock_strategy: AdvisoryLockStrategy,
}

impl TreeConfig {
    /// Create a configuration with default column names for the given entity.
    pub fn new(entity_name: impl Into<String>, strategy: StrategyKind) -> Self {
        let entity_name = entity_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            strategy.as_str(),
        ));

        Self {
            entity_name,
            strategy,
            id_column: "id".to_string(),
            parent_column: "parent_id".to_string(),
            left_column: None,
            right_column: None,
            level_column: None,
            root_column: None,
            path_column: None,
            path_source_column: None,
            path_hash_column: None,
            path_separator: ",".to_string(),
            path_append_id: None,
            path_starts_with_separator: false,
            path_ends_with_separator: true,
            lock_time_column: None,
            activate_locking: false,
            locking_timeout: Duration::from_secs(3),
            closure_table: None,
            advisory_lock_strategy: default_lock,
        }
    }

    /// Build a configuration from a JSON mapping document.
    ///
    /// ```json
    /// { "entity": "Category", "strategy": "nested", "left": "lft", "right": "rgt" }
    /// ```
    pub fn from_json(document: &str) -> Result<Self, TreeError> {
        let mapping: TreeMapping = serde_json::from_str(document)?;
        Ok(mapping.into_config())
    }

    /// Merge options produced by [`TreeOptions`].
    pub(crate) fn apply_options(mut self, options: TreeOptions) -> Self {
        if let Some(id) = options.id {
            self.id_column = id;
        }
        if let Some(parent) = options.parent {
            self.parent_column = parent;
        }
        if options.left.is_some() {
            self.left_column = options.left;
        }
        if options.right.is_some() {
            self.right_column = options.right;
        }
        if options.level.is_some() {
            self.level_column = options.level;
        }
        if options.root.is_some() {
            self.root_column = options.root;
        }
        if options.path.is_some() {
            self.path_column = options.path;
        }
        if options.path_source.is_some() {
            self.path_source_column = options.path_source;
        }
        if options.path_hash.is_some() {
            self.path_hash_column = options.path_hash;
        }
        if let Some(separator) = options.path_separator {
            self.path_separator = separator;
        }
        if options.path_append_id.is_some() {
            self.path_append_id = options.path_append_id;
        }
        if let Some(starts) = options.path_starts_with_separator {
            self.path_starts_with_separator = starts;
        }
        if let Some(ends) = options.path_ends_with_separator {
            self.path_ends_with_separator = ends;
        }
        if options.lock_time.is_some() {
            self.lock_time_column = options.lock_time;
        }
        if let Some(activate) = options.activate_locking {
            self.activate_locking = activate;
        }
        if let Some(seconds) = options.locking_timeout {
            self.locking_timeout = Duration::from_secs(seconds);
        }
        if options.closure_table.is_some() {
            self.closure_table = options.closure_table;
        }
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        self
    }

    /// Human-readable Rust struct name for the entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Column name storing the parent foreign key.
    pub fn parent_column(&self) -> &str {
        &self.parent_column
    }

    pub fn left_column(&self) -> Option<&str> {
        self.left_column.as_deref()
    }

    pub fn right_column(&self) -> Option<&str> {
        self.right_column.as_deref()
    }

    pub fn level_column(&self) -> Option<&str> {
        self.level_column.as_deref()
    }

    /// Column scoping nested-set numbering per tree. Present only for forests.
    pub fn root_column(&self) -> Option<&str> {
        self.root_column.as_deref()
    }

    pub fn path_column(&self) -> Option<&str> {
        self.path_column.as_deref()
    }

    pub fn path_source_column(&self) -> Option<&str> {
        self.path_source_column.as_deref()
    }

    pub fn path_hash_column(&self) -> Option<&str> {
        self.path_hash_column.as_deref()
    }

    pub fn path_separator(&self) -> &str {
        &self.path_separator
    }

    /// `None` appends the identifier only when the path source is a string column.
    pub fn path_append_id(&self) -> Option<bool> {
        self.path_append_id
    }

    pub fn path_starts_with_separator(&self) -> bool {
        self.path_starts_with_separator
    }

    pub fn path_ends_with_separator(&self) -> bool {
        self.path_ends_with_separator
    }

    pub fn lock_time_column(&self) -> Option<&str> {
        self.lock_time_column.as_deref()
    }

    pub fn activate_locking(&self) -> bool {
        self.activate_locking
    }

    pub fn locking_timeout(&self) -> Duration {
        self.locking_timeout
    }

    /// Table backing the closure entity.
    pub fn closure_table(&self) -> Option<&str> {
        self.closure_table.as_deref()
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }

    pub fn is_forest(&self) -> bool {
        self.root_column.is_some()
    }
}

/// Builder-style options consumed by the derive macro and by JSON mapping documents.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TreeOptions {
    id: Option<String>,
    parent: Option<String>,
    left: Option<String>,
    right: Option<String>,
    level: Option<String>,
    root: Option<String>,
    path: Option<String>,
    path_source: Option<String>,
    path_hash: Option<String>,
    path_separator: Option<String>,
    path_append_id: Option<bool>,
    path_starts_with_separator: Option<bool>,
    path_ends_with_separator: Option<bool>,
    lock_time: Option<String>,
    activate_locking: Option<bool>,
    /// Seconds.
    locking_timeout: Option<u64>,
    closure_table: Option<String>,
    #[serde(skip)]
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl TreeOptions {
    pub fn id_column(mut self, value: impl Into<String>) -> Self {
        self.id = Some(value.into());
        self
    }

    pub fn parent_column(mut self, value: impl Into<String>) -> Self {
        self.parent = Some(value.into());
        self
    }

    pub fn left_column(mut self, value: impl Into<String>) -> Self {
        self.left = Some(value.into());
        self
    }

    pub fn right_column(mut self, value: impl Into<String>) -> Self {
        self.right = Some(value.into());
        self
    }

    pub fn level_column(mut self, value: impl Into<String>) -> Self {
        self.level = Some(value.into());
        self
    }

    pub fn root_column(mut self, value: impl Into<String>) -> Self {
        self.root = Some(value.into());
        self
    }

    pub fn path_column(mut self, value: impl Into<String>) -> Self {
        self.path = Some(value.into());
        self
    }

    pub fn path_source_column(mut self, value: impl Into<String>) -> Self {
        self.path_source = Some(value.into());
        self
    }

    pub fn path_hash_column(mut self, value: impl Into<String>) -> Self {
        self.path_hash = Some(value.into());
        self
    }

    pub fn path_separator(mut self, value: impl Into<String>) -> Self {
        self.path_separator = Some(value.into());
        self
    }

    pub fn path_append_id(mut self, value: bool) -> Self {
        self.path_append_id = Some(value);
        self
    }

    pub fn path_starts_with_separator(mut self, value: bool) -> Self {
        self.path_starts_with_separator = Some(value);
        self
    }

    pub fn path_ends_with_separator(mut self, value: bool) -> Self {
        self.path_ends_with_separator = Some(value);
        self
    }

    pub fn lock_time_column(mut self, value: impl Into<String>) -> Self {
        self.lock_time = Some(value.into());
        self
    }

    pub fn activate_locking(mut self, value: bool) -> Self {
        self.activate_locking = Some(value);
        self
    }

    pub fn locking_timeout(mut self, value: Duration) -> Self {
        self.locking_timeout = Some(value.as_secs());
        self
    }

    pub fn closure_table(mut self, value: impl Into<String>) -> Self {
        self.closure_table = Some(value.into());
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: TreeConfig) -> TreeConfig {
        base.apply_options(self)
    }
}

/// A complete mapping document: the entity, its strategy and the column options.
#[derive(Clone, Debug, Deserialize)]
pub struct TreeMapping {
    pub entity: String,
    pub strategy: StrategyKind,
    #[serde(flatten)]
    pub options: TreeOptions,
}

impl TreeMapping {
    pub fn into_config(self) -> TreeConfig {
        self.options
            .apply(TreeConfig::new(self.entity, self.strategy))
    }
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(entity: &str, strategy: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(strategy.as_bytes());
        let crc = hasher.finalize();
        Self(format!("tree-behavior::{entity}::{strategy}::{crc:x}"))
    }
}

/// Configuration describing how to acquire advisory locks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_defaults() {
        let config = TreeOptions::default()
            .left_column("lft")
            .right_column("rgt")
            .path_separator("/")
            .locking_timeout(Duration::from_secs(10))
            .apply(TreeConfig::new("Category", StrategyKind::Nested));

        assert_eq!(config.left_column(), Some("lft"));
        assert_eq!(config.right_column(), Some("rgt"));
        assert_eq!(config.parent_column(), "parent_id");
        assert_eq!(config.path_separator(), "/");
        assert_eq!(config.locking_timeout(), Duration::from_secs(10));
        assert!(config.path_ends_with_separator());
        assert!(!config.is_forest());
    }

    #[test]
    fn mapping_document_produces_config() {
        let config = TreeConfig::from_json(
            r#"{
                "entity": "Category",
                "strategy": "materialized_path",
                "path": "path",
                "path_source": "title",
                "lock_time": "locked_at",
                "activate_locking": true,
                "locking_timeout": 5
            }"#,
        )
        .expect("valid mapping");

        assert_eq!(config.strategy(), StrategyKind::MaterializedPath);
        assert_eq!(config.path_source_column(), Some("title"));
        assert_eq!(config.lock_time_column(), Some("locked_at"));
        assert!(config.activate_locking());
        assert_eq!(config.locking_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn malformed_mapping_is_rejected() {
        let err = TreeConfig::from_json(r#"{ "entity": "Category", "strategy": "spiral" }"#)
            .expect_err("unknown strategy");
        assert!(matches!(err, TreeError::Mapping(_)));
    }

    #[test]
    fn advisory_key_is_stable_per_entity() {
        let a = TreeConfig::new("Category", StrategyKind::Nested);
        let b = TreeConfig::new("Category", StrategyKind::Nested);
        let c = TreeConfig::new("Comment", StrategyKind::Nested);

        assert_eq!(a.advisory_lock_strategy(), b.advisory_lock_strategy());
        assert_ne!(a.advisory_lock_strategy(), c.advisory_lock_strategy());
        let key = a.advisory_lock_strategy().key().expect("namespaced by default");
        assert!(key.as_str().starts_with("tree-behavior::Category::nested::"));
    }
}
