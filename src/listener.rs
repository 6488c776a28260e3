//! Lifecycle hooks. Each hook takes the strategy's locks, runs the structural change in a
//! transaction and releases the locks again.

use std::collections::BTreeSet;

use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IdenStatic, Iterable};
use tracing::instrument;

use crate::error::TreeError;
use crate::lock::LockedTransaction;
use crate::position::InsertionPosition;
use crate::strategy::{reload, ActiveOf, IdOf, StructuralChange, TreeStrategy};
use crate::traits::TreeModel;

/// Names of the columns an update touched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChangeSet {
    columns: BTreeSet<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>) -> Self {
        self.columns.insert(column.into());
        self
    }

    /// Every column explicitly set on `active`.
    pub fn from_active<A: ActiveModelTrait>(active: &A) -> Self {
        let columns = <A::Entity as EntityTrait>::Column::iter()
            .filter(|column| active.get(*column).is_set())
            .map(|column| column.as_str().to_string())
            .collect();
        Self { columns }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Hook surface driving a [`TreeStrategy`].
pub struct TreeListener<S> {
    strategy: S,
}

impl<S: TreeStrategy> TreeListener<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Persist a new node at `position`.
    #[instrument(
        skip_all,
        fields(
            entity = self.strategy.config().entity_name(),
            strategy = self.strategy.kind().as_str()
        )
    )]
    pub async fn before_insert(
        &self,
        db: &DatabaseConnection,
        active: ActiveOf<S>,
        position: InsertionPosition<IdOf<S>>,
    ) -> Result<S::Model, TreeError> {
        let held = self
            .strategy
            .acquire_locks(db, StructuralChange::Insert(&position))
            .await?;
        let result = async {
            let guard = self.begin(db).await?;
            let result = self
                .strategy
                .process_insert(guard.connection(), active, &position)
                .await;
            guard.finish(result).await
        }
        .await;
        settle(result, self.strategy.release_locks(db, held).await)
    }

    /// React to an update of `node`. The node moves under its current parent reference when
    /// one of the tracked columns changed; `None` means nothing structural happened.
    #[instrument(skip_all, fields(entity = self.strategy.config().entity_name(), node = %node.id()))]
    pub async fn before_update(
        &self,
        db: &DatabaseConnection,
        node: &S::Model,
        changes: &ChangeSet,
    ) -> Result<Option<S::Model>, TreeError> {
        if !changes.iter().any(|column| self.strategy.tracks(column)) {
            return Ok(None);
        }
        let parent_column = self.strategy.config().parent_column();
        let source_changed = changes
            .iter()
            .any(|column| column != parent_column && self.strategy.tracks(column));
        let position = InsertionPosition::under(node.parent_id());

        let held = self
            .strategy
            .acquire_locks(db, StructuralChange::Move(node, &position))
            .await?;
        let result = async {
            let guard = self.begin(db).await?;
            let result = async {
                let stored = reload::<S::Model, _>(guard.connection(), &node.id()).await?;
                if !source_changed && stored.parent_id() == node.parent_id() {
                    return Ok(stored);
                }
                self.strategy
                    .process_move(guard.connection(), node, &position)
                    .await
            }
            .await;
            guard.finish(result).await
        }
        .await;
        settle(result, self.strategy.release_locks(db, held).await).map(Some)
    }

    /// Delete `node` together with its subtree.
    #[instrument(skip_all, fields(entity = self.strategy.config().entity_name(), node = %node.id()))]
    pub async fn before_delete(
        &self,
        db: &DatabaseConnection,
        node: &S::Model,
    ) -> Result<(), TreeError> {
        let held = self
            .strategy
            .acquire_locks(db, StructuralChange::Delete(node))
            .await?;
        let result = async {
            let guard = self.begin(db).await?;
            let result = self.strategy.process_delete(guard.connection(), node).await;
            guard.finish(result).await
        }
        .await;
        settle(result, self.strategy.release_locks(db, held).await)
    }

    /// Move `node` and its subtree to `position`.
    #[instrument(skip_all, fields(entity = self.strategy.config().entity_name(), node = %node.id()))]
    pub async fn move_to(
        &self,
        db: &DatabaseConnection,
        node: &S::Model,
        position: InsertionPosition<IdOf<S>>,
    ) -> Result<S::Model, TreeError> {
        let held = self
            .strategy
            .acquire_locks(db, StructuralChange::Move(node, &position))
            .await?;
        let result = async {
            let guard = self.begin(db).await?;
            let result = self
                .strategy
                .process_move(guard.connection(), node, &position)
                .await;
            guard.finish(result).await
        }
        .await;
        settle(result, self.strategy.release_locks(db, held).await)
    }

    /// Recompute every structural column in one transaction.
    #[instrument(
        skip_all,
        fields(
            entity = self.strategy.config().entity_name(),
            strategy = self.strategy.kind().as_str()
        )
    )]
    pub async fn recover(&self, db: &DatabaseConnection) -> Result<(), TreeError> {
        let guard = self.begin(db).await?;
        let result = self.strategy.recover(guard.connection()).await;
        guard.finish(result).await
    }

    async fn begin(&self, db: &DatabaseConnection) -> Result<LockedTransaction, TreeError> {
        LockedTransaction::acquire(self.strategy.config().advisory_lock_strategy(), db).await
    }
}

/// The operation's own failure wins over a failure to release its locks.
fn settle<T>(result: Result<T, TreeError>, released: Result<(), TreeError>) -> Result<T, TreeError> {
    let value = result?;
    released?;
    Ok(value)
}
