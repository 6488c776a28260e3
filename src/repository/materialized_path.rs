use std::sync::Arc;

use sea_orm::sea_query::LikeExpr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::hierarchy::{build_tree, TreeNode};
use crate::listener::TreeListener;
use crate::metadata::column_integer;
use crate::position::InsertionPosition;
use crate::query::{sorted, SortBy};
use crate::registry::TreeConfigRegistry;
use crate::strategy::{reload, MaterializedPath};
use crate::traits::TreeModel;

type ColumnOf<M> = <<M as TreeModel>::Entity as EntityTrait>::Column;

/// Materialized path operations for `M`.
pub struct MaterializedPathRepository<M: TreeModel> {
    listener: TreeListener<MaterializedPath<M>>,
}

impl<M: TreeModel> MaterializedPathRepository<M> {
    pub fn new(registry: &TreeConfigRegistry) -> Result<Self, TreeError> {
        Self::from_config(registry.load::<M>()?)
    }

    pub fn from_config(config: Arc<TreeConfig>) -> Result<Self, TreeError> {
        Ok(Self {
            listener: TreeListener::new(MaterializedPath::new(config)?),
        })
    }

    pub fn listener(&self) -> &TreeListener<MaterializedPath<M>> {
        &self.listener
    }

    fn strategy(&self) -> &MaterializedPath<M> {
        self.listener.strategy()
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

    /// Delete `node` and every row under its path.
    pub async fn remove(&self, db: &DatabaseConnection, node: &M) -> Result<(), TreeError> {
        self.listener.before_delete(db, node).await
    }

    /// Rebuild every path from the parent pointers.
    pub async fn recover(&self, db: &DatabaseConnection) -> Result<(), TreeError> {
        self.listener.recover(db).await
    }

    fn roots_condition(&self) -> Result<Condition, TreeError> {
        let path = self.strategy().query().path()?;
        let pattern = self.strategy().format().nested_pattern();
        Ok(Condition::all().add(path.not_like(LikeExpr::new(pattern).escape('\\'))))
    }

    pub async fn get_root_nodes<C: ConnectionTrait>(
        &self,
        conn: &C,
        sort: Option<SortBy<ColumnOf<M>>>,
    ) -> Result<Vec<M>, TreeError> {
        let path = self.strategy().query().path()?;
        let select = M::Entity::find().filter(self.roots_condition()?);
        Ok(sorted(select, sort, path).all(conn).await?)
    }

    async fn children_condition<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        include_node: bool,
    ) -> Result<Condition, TreeError> {
        let Some(node) = node else {
            return if direct {
                self.roots_condition()
            } else {
                Ok(Condition::all())
            };
        };

        let strategy = self.strategy();
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let path = strategy.path_of(&stored)?;
        let mut children = strategy
            .query()
            .descendants_condition(conn.get_database_backend(), &path)?;
        if direct {
            children = match strategy.query().columns().level {
                Some(level) => {
                    let depth = strategy.format().level(&path) + 1;
                    children.add(level.eq(column_integer(level, depth)?))
                }
                None => children.add(M::parent_column().eq(M::id_to_value(&stored.id()))),
            };
        }
        Ok(if include_node {
            Condition::any()
                .add(children)
                .add(M::id_column().eq(M::id_to_value(&stored.id())))
        } else {
            children
        })
    }

    /// Children of `node`, or of the whole table when no node is given, in path order unless
    /// `sort` says otherwise.
    pub async fn get_children<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        sort: Option<SortBy<ColumnOf<M>>>,
        include_node: bool,
    ) -> Result<Vec<M>, TreeError> {
        let path = self.strategy().query().path()?;
        let condition = self
            .children_condition(conn, node, direct, include_node)
            .await?;
        let select = M::Entity::find().filter(condition);
        Ok(sorted(select, sort, path).all(conn).await?)
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

    /// Nodes for [`children_hierarchy`](Self::children_hierarchy), in path order.
    pub async fn get_nodes_hierarchy<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        include_node: bool,
    ) -> Result<Vec<M>, TreeError> {
        self.get_children(conn, node, direct, None, include_node).await
    }

    /// Children of `node` nested under their parents, siblings in path order.
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

    /// Ancestors of `node`, shortest path first, ending with the node itself.
    pub async fn get_path<C: ConnectionTrait>(&self, conn: &C, node: &M) -> Result<Vec<M>, TreeError> {
        let strategy = self.strategy();
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let ancestors = strategy.format().ancestor_paths(&strategy.path_of(&stored)?);
        let column = strategy.query().path()?;

        let mut models = M::Entity::find()
            .filter(column.is_in(ancestors.clone()))
            .all(conn)
            .await?;
        models.sort_by_key(|model| {
            strategy
                .path_of(model)
                .ok()
                .and_then(|path| ancestors.iter().position(|ancestor| *ancestor == path))
        });
        Ok(models)
    }

    /// `root` and everything below it in path order, or every tree when no root is given.
    pub async fn get_tree<C: ConnectionTrait>(
        &self,
        conn: &C,
        root: Option<&M>,
    ) -> Result<Vec<M>, TreeError> {
        let path = self.strategy().query().path()?;
        let condition = self.children_condition(conn, root, false, true).await?;
        Ok(M::Entity::find()
            .filter(condition)
            .order_by_asc(path)
            .all(conn)
            .await?)
    }
}
