//! SeaORM-centric tree maintenance.
//!
//! Three encodings are supported for hierarchical entities stored in a single table:
//! nested sets (left/right/level bookkeeping), materialized paths (prefix-searchable path
//! strings) and closure tables (an ancestor/descendant side table). Each encoding is a
//! [`TreeStrategy`] driven through a [`TreeListener`], and each has a repository exposing the
//! read and maintenance operations that make sense for it.
//!
//! Structural columns are owned by the strategies: application code picks an
//! [`InsertionPosition`] and lets the strategy compute left/right/level/path values and issue
//! the bulk shift statements inside a transaction.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod integrity;
pub mod listener;
pub mod lock;
pub mod metadata;
pub mod path;
pub mod position;
pub mod query;
pub mod registry;
pub mod repository;
pub mod strategy;
pub mod traits;
pub mod validator;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{StrategyKind, TreeConfig, TreeOptions};
    pub use crate::hierarchy::TreeNode;
    pub use crate::integrity::Verification;
    pub use crate::listener::{ChangeSet, TreeListener};
    pub use crate::position::{InsertionPosition, MoveSteps};
    pub use crate::query::{Direction, SortBy};
    pub use crate::registry::TreeConfigRegistry;
    pub use crate::repository::{
        ClosureTreeRepository, MaterializedPathRepository, NestedTreeRepository,
    };
    pub use crate::traits::{ClosureTreeModel, TreeModel};
}

pub use tree_behavior_macros::TreeModel as TreeModelDerive;
#[doc(hidden)]
pub use tree_behavior_macros::TreeModel;
pub use config::{
    AdvisoryLockKey, AdvisoryLockStrategy, StrategyKind, TreeConfig, TreeMapping, TreeOptions,
};
pub use error::TreeError;
pub use hierarchy::{build_tree, TreeNode};
pub use integrity::Verification;
pub use listener::{ChangeSet, TreeListener};
pub use position::{InsertionPosition, MoveSteps};
pub use query::{Direction, SortBy};
pub use registry::TreeConfigRegistry;
pub use repository::{ClosureTreeRepository, MaterializedPathRepository, NestedTreeRepository};
pub use strategy::{ClosureTable, MaterializedPath, NestedSet, TreeStrategy};
pub use traits::{ClosureTreeModel, TreeModel};
