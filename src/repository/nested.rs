use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Select,
};
use tracing::instrument;

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::hierarchy::{build_tree, TreeNode};
use crate::integrity::{verify_rows, Verification};
use crate::listener::TreeListener;
use crate::lock::LockedTransaction;
use crate::position::{InsertionPosition, MoveSteps};
use crate::query::{sorted, SortBy};
use crate::registry::TreeConfigRegistry;
use crate::strategy::{reload, NestedSet, TreeStrategy};
use crate::traits::TreeModel;

type ColumnOf<M> = <<M as TreeModel>::Entity as EntityTrait>::Column;

/// Nested set operations for `M`.
pub struct NestedTreeRepository<M: TreeModel> {
    listener: TreeListener<NestedSet<M>>,
}

impl<M: TreeModel> NestedTreeRepository<M> {
    pub fn new(registry: &TreeConfigRegistry) -> Result<Self, TreeError> {
        Self::from_config(registry.load::<M>()?)
    }

    pub fn from_config(config: Arc<TreeConfig>) -> Result<Self, TreeError> {
        Ok(Self {
            listener: TreeListener::new(NestedSet::new(config)?),
        })
    }

    pub fn listener(&self) -> &TreeListener<NestedSet<M>> {
        &self.listener
    }

    fn strategy(&self) -> &NestedSet<M> {
        self.listener.strategy()
    }

    fn is_forest(&self) -> bool {
        self.strategy().config().is_forest()
    }

    pub async fn insert(
        &self,
        db: &DatabaseConnection,
        active: M::ActiveModel,
        position: InsertionPosition<M::Id>,
    ) -> Result<M, TreeError> {
        self.listener.before_insert(db, active, position).await
    }

    pub async fn move_node(
        &self,
        db: &DatabaseConnection,
        node: &M,
        position: InsertionPosition<M::Id>,
    ) -> Result<M, TreeError> {
        self.listener.move_to(db, node, position).await
    }

    /// Delete `node` and its whole subtree.
    pub async fn remove(&self, db: &DatabaseConnection, node: &M) -> Result<(), TreeError> {
        self.listener.before_delete(db, node).await
    }

    fn ordered(
        &self,
        select: Select<M::Entity>,
        sort: Option<SortBy<ColumnOf<M>>>,
    ) -> Result<Select<M::Entity>, TreeError> {
        let left = self.strategy().query().left()?;
        Ok(sorted(select, sort, left).order_by_asc(M::id_column()))
    }

    pub async fn get_root_nodes<C: ConnectionTrait>(
        &self,
        conn: &C,
        sort: Option<SortBy<ColumnOf<M>>>,
    ) -> Result<Vec<M>, TreeError> {
        let select = M::Entity::find().filter(M::parent_column().is_null());
        Ok(self.ordered(select, sort)?.all(conn).await?)
    }

    async fn children_condition<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        include_node: bool,
    ) -> Result<Condition, TreeError> {
        let Some(node) = node else {
            return Ok(if direct {
                Condition::all().add(M::parent_column().is_null())
            } else {
                Condition::all()
            });
        };

        let stored = reload::<M, C>(conn, &node.id()).await?;
        let id = M::id_to_value(&stored.id());
        if direct {
            let children = Condition::all().add(M::parent_column().eq(id.clone()));
            return Ok(if include_node {
                Condition::any().add(children).add(M::id_column().eq(id))
            } else {
                children
            });
        }

        let strategy = self.strategy();
        let left = strategy.query().left()?;
        let right = strategy.query().right()?;
        let (lower, upper) = (strategy.left_of(&stored)?, strategy.right_of(&stored)?);
        let scope = strategy
            .query()
            .scope_condition(strategy.scope_of(&stored).as_ref());
        Ok(if include_node {
            scope.add(left.gte(lower)).add(right.lte(upper))
        } else {
            scope.add(left.gt(lower)).add(right.lt(upper))
        })
    }

    /// Children of `node`, or of the whole table when no node is given.
    ///
    /// `direct` limits the result to one level; `include_node` adds the node itself.
    pub async fn get_children<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        sort: Option<SortBy<ColumnOf<M>>>,
        include_node: bool,
    ) -> Result<Vec<M>, TreeError> {
        let condition = self
            .children_condition(conn, node, direct, include_node)
            .await?;
        let select = M::Entity::find().filter(condition);
        Ok(self.ordered(select, sort)?.all(conn).await?)
    }

    pub async fn child_count<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
    ) -> Result<u64, TreeError> {
        let condition = self.children_condition(conn, node, direct, false).await?;
        Ok(M::Entity::find().filter(condition).count(conn).await?)
    }

    /// Nodes for [`children_hierarchy`](Self::children_hierarchy), ordered by tree and left value.
    pub async fn get_nodes_hierarchy<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        include_node: bool,
    ) -> Result<Vec<M>, TreeError> {
        let condition = self
            .children_condition(conn, node, direct, include_node)
            .await?;
        let mut select = M::Entity::find().filter(condition);
        if let Some(root) = self.strategy().query().columns().root {
            select = select.order_by_asc(root);
        }
        Ok(select
            .order_by_asc(self.strategy().query().left()?)
            .order_by_asc(M::id_column())
            .all(conn)
            .await?)
    }

    /// The same nodes as [`get_children`](Self::get_children), nested under their parents.
    pub async fn children_hierarchy<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        include_node: bool,
    ) -> Result<Vec<TreeNode<M>>, TreeError> {
        let nodes = self
            .get_nodes_hierarchy(conn, node, direct, include_node)
            .await?;
        Ok(build_tree(nodes))
    }

    /// Ancestors of `node` from its root down to the node itself.
    pub async fn get_path<C: ConnectionTrait>(&self, conn: &C, node: &M) -> Result<Vec<M>, TreeError> {
        let strategy = self.strategy();
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let left = strategy.query().left()?;
        let right = strategy.query().right()?;
        let condition = strategy
            .query()
            .scope_condition(strategy.scope_of(&stored).as_ref())
            .add(left.lte(strategy.left_of(&stored)?))
            .add(right.gte(strategy.right_of(&stored)?));
        Ok(M::Entity::find()
            .filter(condition)
            .order_by_asc(left)
            .all(conn)
            .await?)
    }

    /// Leaves below `root`, or in the whole table. A forest needs a root.
    pub async fn get_leafs<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: Option<&M>,
        sort: Option<SortBy<ColumnOf<M>>>,
    ) -> Result<Vec<M>, TreeError> {
        let strategy = self.strategy();
        let left = strategy.query().left()?;
        let right = strategy.query().right()?;
        let mut condition = Condition::all().add(Expr::col(right).eq(Expr::col(left).add(1)));
        match root {
            Some(root) => {
                let stored = reload::<M, C>(conn, &root.id()).await?;
                condition = condition
                    .add(
                        strategy
                            .query()
                            .scope_condition(strategy.scope_of(&stored).as_ref()),
                    )
                    .add(left.gte(strategy.left_of(&stored)?))
                    .add(right.lte(strategy.right_of(&stored)?));
            }
            None if self.is_forest() => {
                return Err(TreeError::invalid(
                    "A root node is required when there are many trees",
                ));
            }
            None => {}
        }
        let select = M::Entity::find().filter(condition);
        Ok(self.ordered(select, sort)?.all(conn).await?)
    }

    async fn siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
        include_self: bool,
        next: bool,
    ) -> Result<Vec<M>, TreeError> {
        let strategy = self.strategy();
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let left = strategy.query().left()?;
        let position = strategy.left_of(&stored)?;

        let mut condition = match stored.parent_id() {
            Some(parent) => Condition::all().add(M::parent_column().eq(M::id_to_value(&parent))),
            None if self.is_forest() => {
                return Err(TreeError::invalid(
                    "Cannot get siblings from tree root node",
                ));
            }
            None => Condition::all().add(M::parent_column().is_null()),
        };
        condition = match (next, include_self) {
            (true, true) => condition.add(left.gte(position)),
            (true, false) => condition.add(left.gt(position)),
            (false, true) => condition.add(left.lte(position)),
            (false, false) => condition.add(left.lt(position)),
        };
        Ok(M::Entity::find()
            .filter(condition)
            .order_by_asc(left)
            .all(conn)
            .await?)
    }

    pub async fn get_next_siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
        include_self: bool,
    ) -> Result<Vec<M>, TreeError> {
        self.siblings(conn, node, include_self, true).await
    }

    pub async fn get_prev_siblings<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
        include_self: bool,
    ) -> Result<Vec<M>, TreeError> {
        self.siblings(conn, node, include_self, false).await
    }

    /// Move `node` towards its first sibling. Returns `false` when it already is the first.
    pub async fn move_up(
        &self,
        db: &DatabaseConnection,
        node: &M,
        steps: MoveSteps,
    ) -> Result<bool, TreeError> {
        let previous = self.get_prev_siblings(db, node, false).await?;
        let count = steps.clamp(previous.len());
        if count == 0 {
            return Ok(false);
        }
        let target = previous[previous.len() - count].id();
        self.move_node(db, node, InsertionPosition::PrevSiblingOf(target))
            .await?;
        Ok(true)
    }

    /// Move `node` towards its last sibling. Returns `false` when it already is the last.
    pub async fn move_down(
        &self,
        db: &DatabaseConnection,
        node: &M,
        steps: MoveSteps,
    ) -> Result<bool, TreeError> {
        let next = self.get_next_siblings(db, node, false).await?;
        let count = steps.clamp(next.len());
        if count == 0 {
            return Ok(false);
        }
        let target = next[count - 1].id();
        self.move_node(db, node, InsertionPosition::NextSiblingOf(target))
            .await?;
        Ok(true)
    }

    /// Delete only `node`; its children take its place under its parent.
    #[instrument(skip_all, fields(entity = self.strategy().config().entity_name(), node = %node.id()))]
    pub async fn remove_from_tree(&self, db: &DatabaseConnection, node: &M) -> Result<(), TreeError> {
        let guard =
            LockedTransaction::acquire(self.strategy().config().advisory_lock_strategy(), db)
                .await?;
        let result = self
            .strategy()
            .remove_from_tree(guard.connection(), node)
            .await;
        guard.finish(result).await
    }

    /// Renumber the subtree of `node` with siblings ordered by `sort`.
    ///
    /// With `verify` set an invalid tree is left alone and `false` is returned.
    #[instrument(skip_all, fields(entity = self.strategy().config().entity_name()))]
    pub async fn reorder(
        &self,
        db: &DatabaseConnection,
        node: Option<&M>,
        sort: SortBy<ColumnOf<M>>,
        verify: bool,
    ) -> Result<bool, TreeError> {
        if verify && !self.verify(db).await?.is_valid() {
            return Ok(false);
        }
        let guard =
            LockedTransaction::acquire(self.strategy().config().advisory_lock_strategy(), db)
                .await?;
        let result = self.strategy().reorder(guard.connection(), node, sort).await;
        guard.finish(result).await?;
        Ok(true)
    }

    pub async fn reorder_all(
        &self,
        db: &DatabaseConnection,
        sort: SortBy<ColumnOf<M>>,
        verify: bool,
    ) -> Result<bool, TreeError> {
        self.reorder(db, None, sort, verify).await
    }

    /// Check every nested set invariant. Problems come back as data.
    pub async fn verify<C: ConnectionTrait>(&self, conn: &C) -> Result<Verification, TreeError> {
        let strategy = self.strategy();
        let models = strategy.load(conn, Condition::all(), None).await?;
        let rows = models
            .iter()
            .map(|model| strategy.row_of(model))
            .collect::<Vec<_>>();
        Ok(verify_rows(&rows, self.is_forest()))
    }

    /// Renumber every tree from the parent pointers.
    pub async fn recover(&self, db: &DatabaseConnection) -> Result<(), TreeError> {
        self.listener.recover(db).await
    }
}
