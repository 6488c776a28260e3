use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::SimpleExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Value,
};
use tracing::debug;

use crate::config::{StrategyKind, TreeConfig};
use crate::error::TreeError;
use crate::integrity::{number_rows, number_subtree, verify_rows, NestedRow, Numbering};
use crate::metadata::{column_integer, scope_key, value_as_i64};
use crate::position::InsertionPosition;
use crate::query::{SortBy, StructuralQuery};
use crate::strategy::{reload, TreeStrategy};
use crate::traits::TreeModel;

type ColumnOf<M> = <<M as TreeModel>::Entity as EntityTrait>::Column;

/// Where a node lands: its left value, level, parent and tree.
struct Placement<Id> {
    start: i64,
    level: i64,
    parent: Option<Id>,
    scope: Option<Value>,
    /// Starts a new tree of a forest; there is nothing to shift.
    new_tree: bool,
}

/// Nested set maintenance: left/right/level columns, optionally scoped per root.
pub struct NestedSet<M: TreeModel> {
    query: StructuralQuery<M>,
}

impl<M: TreeModel> NestedSet<M> {
    pub fn new(config: Arc<TreeConfig>) -> Result<Self, TreeError> {
        if config.strategy() != StrategyKind::Nested {
            return Err(TreeError::configuration(format!(
                "entity {} is not mapped as a nested set",
                config.entity_name()
            )));
        }
        let query = StructuralQuery::new(config)?;
        query.left()?;
        query.right()?;
        Ok(Self { query })
    }

    pub fn query(&self) -> &StructuralQuery<M> {
        &self.query
    }

    pub fn left_of(&self, node: &M) -> Result<i64, TreeError> {
        let column = self.query.left()?;
        value_as_i64(&node.column_value(column))
            .ok_or_else(|| TreeError::invariant(format!("node [{}] has no left value", node.id())))
    }

    pub fn right_of(&self, node: &M) -> Result<i64, TreeError> {
        let column = self.query.right()?;
        value_as_i64(&node.column_value(column))
            .ok_or_else(|| TreeError::invariant(format!("node [{}] has no right value", node.id())))
    }

    /// Stored level, or 0 when no level column is mapped.
    pub fn level_of(&self, node: &M) -> i64 {
        self.query
            .columns()
            .level
            .and_then(|column| value_as_i64(&node.column_value(column)))
            .unwrap_or(0)
    }

    /// Root column value, present only in forest mode.
    pub fn scope_of(&self, node: &M) -> Option<Value> {
        self.query
            .columns()
            .root
            .map(|column| node.column_value(column))
    }

    pub fn row_of(&self, node: &M) -> NestedRow<M::Id> {
        let columns = self.query.columns();
        let read = |column: Option<ColumnOf<M>>| {
            column.and_then(|column| value_as_i64(&node.column_value(column)))
        };
        NestedRow {
            id: node.id(),
            parent: node.parent_id(),
            left: read(columns.left),
            right: read(columns.right),
            level: read(columns.level),
            scope: self.scope_of(node).as_ref().and_then(scope_key),
        }
    }

    /// Rows matching `condition`, ordered by `sort` first and then by left value and id.
    pub async fn load<C: ConnectionTrait>(
        &self,
        conn: &C,
        condition: Condition,
        sort: Option<SortBy<ColumnOf<M>>>,
    ) -> Result<Vec<M>, TreeError> {
        let left = self.query.left()?;
        let mut select = M::Entity::find().filter(condition);
        if let Some(sort) = sort {
            select = select.order_by(sort.column, sort.direction.into());
        }
        let models = select
            .order_by_asc(left)
            .order_by_asc(M::id_column())
            .all(conn)
            .await?;
        Ok(models)
    }

    /// Condition matching `node` and everything below it.
    pub fn subtree_condition(&self, node: &M) -> Result<Condition, TreeError> {
        let left = self.query.left()?;
        let right = self.query.right()?;
        Ok(Condition::all()
            .add(left.gte(self.left_of(node)?))
            .add(right.lte(self.right_of(node)?))
            .add(self.query.scope_condition(self.scope_of(node).as_ref())))
    }

    async fn placement<C: ConnectionTrait>(
        &self,
        conn: &C,
        position: &InsertionPosition<M::Id>,
    ) -> Result<Placement<M::Id>, TreeError> {
        let forest = self.query.config().is_forest();
        let placement = match position {
            InsertionPosition::Root if forest => Placement {
                start: 1,
                level: 0,
                parent: None,
                scope: None,
                new_tree: true,
            },
            InsertionPosition::Root => Placement {
                start: self.query.max_right(conn, None).await? + 1,
                level: 0,
                parent: None,
                scope: None,
                new_tree: false,
            },
            InsertionPosition::FirstChildOf(id) | InsertionPosition::LastChildOf(id) => {
                let parent = reload::<M, C>(conn, id).await?;
                let start = match position {
                    InsertionPosition::FirstChildOf(_) => self.left_of(&parent)? + 1,
                    _ => self.right_of(&parent)?,
                };
                Placement {
                    start,
                    level: self.level_of(&parent) + 1,
                    parent: Some(parent.id()),
                    scope: self.scope_of(&parent),
                    new_tree: false,
                }
            }
            InsertionPosition::PrevSiblingOf(id) | InsertionPosition::NextSiblingOf(id) => {
                let sibling = reload::<M, C>(conn, id).await?;
                if forest && sibling.parent_id().is_none() {
                    return Err(TreeError::invalid(
                        "Cannot persist sibling for a root node, tree operation is not possible",
                    ));
                }
                let start = match position {
                    InsertionPosition::PrevSiblingOf(_) => self.left_of(&sibling)?,
                    _ => self.right_of(&sibling)? + 1,
                };
                Placement {
                    start,
                    level: self.level_of(&sibling),
                    parent: sibling.parent_id(),
                    scope: self.scope_of(&sibling),
                    new_tree: false,
                }
            }
        };
        Ok(placement)
    }

    /// Delete `node` and promote its children to its parent, closing the gap it leaves.
    ///
    /// Children of a removed forest root become the roots of their own trees.
    pub async fn remove_from_tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
    ) -> Result<(), TreeError> {
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let id = stored.id();
        let left = self.left_of(&stored)?;
        let right = self.right_of(&stored)?;
        let scope = self.scope_of(&stored);
        let parent_column = M::parent_column();

        if right == left + 1 {
            self.delete_row(conn, &id).await?;
            self.query.shift_rl(conn, right, -2, scope.as_ref()).await?;
            return Ok(());
        }

        if self.query.config().is_forest() && stored.parent_id().is_none() {
            let children = M::Entity::find()
                .filter(parent_column.eq(M::id_to_value(&id)))
                .order_by_asc(self.query.left()?)
                .all(conn)
                .await?;
            for child in children {
                let child_left = self.left_of(&child)?;
                let child_right = self.right_of(&child)?;
                let new_scope = M::id_to_value(&child.id());
                self.query
                    .shift_range(
                        conn,
                        child_left,
                        child_right,
                        1 - child_left,
                        -1,
                        scope.as_ref(),
                        Some(&new_scope),
                    )
                    .await?;
            }
        } else {
            self.query
                .shift_range(conn, left, right, -1, -1, scope.as_ref(), None)
                .await?;
            self.query.shift_rl(conn, right, -2, scope.as_ref()).await?;
        }

        M::Entity::update_many()
            .col_expr(
                parent_column,
                SimpleExpr::Value(M::optional_id_to_value(stored.parent_id().as_ref())),
            )
            .filter(parent_column.eq(M::id_to_value(&id)))
            .exec(conn)
            .await?;
        self.delete_row(conn, &id).await?;
        debug!(
            entity = self.query.config().entity_name(),
            node = %id,
            "removed node from tree"
        );
        Ok(())
    }

    /// Renumber the subtree of `node`, or every tree, with siblings ordered by `sort`.
    pub async fn reorder<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        sort: SortBy<ColumnOf<M>>,
    ) -> Result<(), TreeError> {
        match node {
            Some(node) => {
                let stored = reload::<M, C>(conn, &node.id()).await?;
                let models = self
                    .load(conn, self.subtree_condition(&stored)?, Some(sort))
                    .await?;
                let rows = models.iter().map(|model| self.row_of(model)).collect::<Vec<_>>();
                let numbering = number_subtree(
                    &rows,
                    &stored.id(),
                    self.left_of(&stored)?,
                    self.level_of(&stored),
                )?;
                self.apply_numbering(conn, &models, numbering, false).await
            }
            None => {
                let models = self.load(conn, Condition::all(), Some(sort)).await?;
                let rows = models.iter().map(|model| self.row_of(model)).collect::<Vec<_>>();
                let forest = self.query.config().is_forest();
                let numbering = number_rows(&rows, forest)?;
                self.apply_numbering(conn, &models, numbering, false).await
            }
        }
    }

    /// Write the numbering back, touching only the rows whose values changed.
    async fn apply_numbering<C: ConnectionTrait>(
        &self,
        conn: &C,
        models: &[M],
        numbering: Vec<Numbering<M::Id>>,
        fix_roots: bool,
    ) -> Result<(), TreeError> {
        let columns = self.query.columns();
        let left = self.query.left()?;
        let right = self.query.right()?;
        let by_id: HashMap<M::Id, &M> = models.iter().map(|model| (model.id(), model)).collect();

        let mut updated = 0usize;
        for entry in numbering {
            let Some(model) = by_id.get(&entry.id) else {
                continue;
            };
            let row = self.row_of(model);
            let root_value = match (fix_roots, columns.root) {
                (true, Some(_)) => Some(M::id_to_value(&entry.root)),
                _ => None,
            };
            let level_changed = columns.level.is_some() && row.level != Some(entry.level);
            let root_changed = root_value.is_some() && self.scope_of(model) != root_value;
            if row.left == Some(entry.left)
                && row.right == Some(entry.right)
                && !level_changed
                && !root_changed
            {
                continue;
            }

            let mut active = (*model).clone().into_active_model();
            active.set(left, column_integer(left, entry.left)?);
            active.set(right, column_integer(right, entry.right)?);
            if let Some(level) = columns.level {
                active.set(level, column_integer(level, entry.level)?);
            }
            if let (Some(root), Some(value)) = (columns.root, root_value) {
                active.set(root, value);
            }
            active.update(conn).await?;
            updated += 1;
        }

        debug!(
            entity = self.query.config().entity_name(),
            updated,
            "renumbered nested set rows"
        );
        Ok(())
    }

    async fn delete_row<C: ConnectionTrait>(&self, conn: &C, id: &M::Id) -> Result<(), TreeError> {
        M::Entity::delete_many()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .exec(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<M: TreeModel> TreeStrategy for NestedSet<M> {
    type Model = M;

    fn kind(&self) -> StrategyKind {
        StrategyKind::Nested
    }

    fn config(&self) -> &TreeConfig {
        self.query.config()
    }

    fn tracks(&self, column: &str) -> bool {
        column == self.query.config().parent_column()
    }

    async fn process_insert<C>(
        &self,
        conn: &C,
        mut active: M::ActiveModel,
        position: &InsertionPosition<M::Id>,
    ) -> Result<M, TreeError>
    where
        C: ConnectionTrait,
    {
        let columns = self.query.columns().clone();
        let left = self.query.left()?;
        let right = self.query.right()?;
        let placement = self.placement(conn, position).await?;

        if !placement.new_tree {
            self.query
                .shift_rl(conn, placement.start, 2, placement.scope.as_ref())
                .await?;
        }

        M::set_parent(&mut active, placement.parent.clone());
        active.set(left, column_integer(left, placement.start)?);
        active.set(right, column_integer(right, placement.start + 1)?);
        if let Some(level) = columns.level {
            active.set(level, column_integer(level, placement.level)?);
        }
        if let (Some(root), Some(scope)) = (columns.root, placement.scope.clone()) {
            active.set(root, scope);
        }
        let model = active.insert(conn).await?;

        match (placement.new_tree, columns.root) {
            (true, Some(root)) => {
                let id = model.id();
                let mut active = model.into_active_model();
                active.set(root, M::id_to_value(&id));
                Ok(active.update(conn).await?)
            }
            _ => Ok(model),
        }
    }

    async fn process_move<C>(
        &self,
        conn: &C,
        node: &M,
        position: &InsertionPosition<M::Id>,
    ) -> Result<M, TreeError>
    where
        C: ConnectionTrait,
    {
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let id = stored.id();
        let mut left = self.left_of(&stored)?;
        let mut right = self.right_of(&stored)?;
        let level = self.level_of(&stored);
        let scope = self.scope_of(&stored);

        if let Some(target) = position.target() {
            if target == &id {
                return Err(TreeError::invalid(format!(
                    "Cannot set node [{id}] as its own parent or sibling"
                )));
            }
            let target = reload::<M, C>(conn, target).await?;
            let inside = self.scope_of(&target) == scope
                && self.left_of(&target)? > left
                && self.right_of(&target)? < right;
            if inside {
                return Err(TreeError::invalid(format!(
                    "Cannot set child as parent to node: {id}"
                )));
            }
        }

        let placement = match position {
            InsertionPosition::Root if self.query.config().is_forest() => {
                if stored.parent_id().is_none() {
                    return Ok(stored);
                }
                Placement {
                    start: 1,
                    level: 0,
                    parent: None,
                    scope: Some(M::id_to_value(&id)),
                    new_tree: true,
                }
            }
            _ => self.placement(conn, position).await?,
        };

        let size = right - left + 1;
        let same_scope = placement.scope == scope;
        if !placement.new_tree {
            self.query
                .shift_rl(conn, placement.start, size, placement.scope.as_ref())
                .await?;
            if same_scope && left >= placement.start {
                left += size;
                right += size;
            }
        }

        let new_scope = if same_scope {
            None
        } else {
            placement.scope.as_ref()
        };
        self.query
            .shift_range(
                conn,
                left,
                right,
                placement.start - left,
                placement.level - level,
                scope.as_ref(),
                new_scope,
            )
            .await?;
        self.query.shift_rl(conn, left, -size, scope.as_ref()).await?;

        let moved = reload::<M, C>(conn, &id).await?;
        if moved.parent_id() == placement.parent {
            return Ok(moved);
        }
        let mut active = moved.into_active_model();
        M::set_parent(&mut active, placement.parent);
        Ok(active.update(conn).await?)
    }

    async fn process_delete<C>(&self, conn: &C, node: &M) -> Result<(), TreeError>
    where
        C: ConnectionTrait,
    {
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let right = self.right_of(&stored)?;
        let width = right - self.left_of(&stored)? + 1;
        let scope = self.scope_of(&stored);

        let removed = M::Entity::delete_many()
            .filter(self.subtree_condition(&stored)?)
            .exec(conn)
            .await?;
        self.query
            .shift_rl(conn, right + 1, -width, scope.as_ref())
            .await?;
        debug!(
            entity = self.query.config().entity_name(),
            node = %stored.id(),
            removed = removed.rows_affected,
            "deleted subtree"
        );
        Ok(())
    }

    async fn recover<C>(&self, conn: &C) -> Result<(), TreeError>
    where
        C: ConnectionTrait,
    {
        let models = self.load(conn, Condition::all(), None).await?;
        let rows = models.iter().map(|model| self.row_of(model)).collect::<Vec<_>>();
        let forest = self.query.config().is_forest();
        if verify_rows(&rows, forest).is_valid() {
            return Ok(());
        }
        let numbering = number_rows(&rows, forest)?;
        self.apply_numbering(conn, &models, numbering, forest).await
    }
}
