//! Structural strategies. Each one owns the structural columns of its entity and keeps them
//! consistent across inserts, moves and deletes.

mod closure;
mod materialized_path;
mod nested;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};

use crate::config::{StrategyKind, TreeConfig};
use crate::error::TreeError;
use crate::lock::HeldLocks;
use crate::position::InsertionPosition;
use crate::traits::TreeModel;

pub use closure::ClosureTable;
pub use materialized_path::MaterializedPath;
pub use nested::NestedSet;

pub type IdOf<S> = <<S as TreeStrategy>::Model as TreeModel>::Id;
pub type ActiveOf<S> = <<S as TreeStrategy>::Model as TreeModel>::ActiveModel;

/// The structural change about to happen, used to decide which trees to lock.
pub enum StructuralChange<'a, M: TreeModel> {
    Insert(&'a InsertionPosition<M::Id>),
    Move(&'a M, &'a InsertionPosition<M::Id>),
    Delete(&'a M),
}

#[async_trait]
pub trait TreeStrategy: Send + Sync {
    type Model: TreeModel;

    fn kind(&self) -> StrategyKind;

    fn config(&self) -> &TreeConfig;

    /// Whether a change of `column` moves the node in the tree.
    fn tracks(&self, column: &str) -> bool;

    /// Insert a new node at `position`, computing its structural columns.
    async fn process_insert<C>(
        &self,
        conn: &C,
        active: ActiveOf<Self>,
        position: &InsertionPosition<IdOf<Self>>,
    ) -> Result<Self::Model, TreeError>
    where
        C: ConnectionTrait;

    /// Move an existing node, and its subtree, to `position`.
    async fn process_move<C>(
        &self,
        conn: &C,
        node: &Self::Model,
        position: &InsertionPosition<IdOf<Self>>,
    ) -> Result<Self::Model, TreeError>
    where
        C: ConnectionTrait;

    /// Delete a node together with its subtree.
    async fn process_delete<C>(&self, conn: &C, node: &Self::Model) -> Result<(), TreeError>
    where
        C: ConnectionTrait;

    /// Recompute every structural column from the parent pointers.
    async fn recover<C>(&self, conn: &C) -> Result<(), TreeError>
    where
        C: ConnectionTrait;

    /// Take the locks `change` needs before its transaction starts.
    async fn acquire_locks(
        &self,
        _db: &DatabaseConnection,
        _change: StructuralChange<'_, Self::Model>,
    ) -> Result<HeldLocks<IdOf<Self>>, TreeError> {
        Ok(HeldLocks::none())
    }

    async fn release_locks(
        &self,
        _db: &DatabaseConnection,
        _held: HeldLocks<IdOf<Self>>,
    ) -> Result<(), TreeError> {
        Ok(())
    }
}

/// Load a node by identifier, failing when it does not exist.
pub(crate) async fn reload<M, C>(conn: &C, id: &M::Id) -> Result<M, TreeError>
where
    M: TreeModel,
    C: ConnectionTrait,
{
    use sea_orm::{ColumnTrait, QueryFilter};

    M::Entity::find()
        .filter(M::id_column().eq(M::id_to_value(id)))
        .one(conn)
        .await?
        .ok_or_else(|| TreeError::invalid(format!("node [{id}] does not exist")))
}
