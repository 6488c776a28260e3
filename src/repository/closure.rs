use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Select,
};

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::hierarchy::{build_tree, TreeNode};
use crate::listener::TreeListener;
use crate::position::InsertionPosition;
use crate::query::{sorted, SortBy};
use crate::registry::TreeConfigRegistry;
use crate::strategy::{reload, ClosureTable};
use crate::traits::{ClosureTreeModel, TreeModel};

type ColumnOf<M> = <<M as TreeModel>::Entity as EntityTrait>::Column;

/// Closure table operations for `M`.
pub struct ClosureTreeRepository<M: ClosureTreeModel> {
    listener: TreeListener<ClosureTable<M>>,
}

impl<M: ClosureTreeModel> ClosureTreeRepository<M> {
    pub fn new(registry: &TreeConfigRegistry) -> Result<Self, TreeError> {
        Self::from_config(registry.load::<M>()?)
    }

    pub fn from_config(config: Arc<TreeConfig>) -> Result<Self, TreeError> {
        Ok(Self {
            listener: TreeListener::new(ClosureTable::new(config)?),
        })
    }

    pub fn listener(&self) -> &TreeListener<ClosureTable<M>> {
        &self.listener
    }

    fn strategy(&self) -> &ClosureTable<M> {
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

    /// Delete `node`, its subtree and every hierarchy row pointing at them.
    pub async fn remove(&self, db: &DatabaseConnection, node: &M) -> Result<(), TreeError> {
        self.listener.before_delete(db, node).await
    }

    /// Rebuild the hierarchy table from the parent pointers.
    pub async fn recover(&self, db: &DatabaseConnection) -> Result<(), TreeError> {
        self.listener.recover(db).await
    }

    pub async fn parent<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
    ) -> Result<Option<M>, TreeError> {
        let stored = reload::<M, C>(conn, &node.id()).await?;
        match stored.parent_id() {
            Some(parent_id) => Ok(M::Entity::find()
                .filter(M::id_column().eq(M::id_to_value(&parent_id)))
                .one(conn)
                .await?),
            None => Ok(None),
        }
    }

    pub async fn get_root_nodes<C: ConnectionTrait>(
        &self,
        conn: &C,
        sort: Option<SortBy<ColumnOf<M>>>,
    ) -> Result<Vec<M>, TreeError> {
        let select = M::Entity::find().filter(M::parent_column().is_null());
        Ok(sorted(select, sort, M::id_column()).all(conn).await?)
    }

    async fn children_select<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        include_node: bool,
    ) -> Result<Option<Select<M::Entity>>, TreeError> {
        let Some(node) = node else {
            let select = M::Entity::find();
            return Ok(Some(if direct {
                select.filter(M::parent_column().is_null())
            } else {
                select
            }));
        };

        let id = reload::<M, C>(conn, &node.id()).await?.id();
        let ids = if direct {
            let mut ids = M::Entity::find()
                .filter(M::parent_column().eq(M::id_to_value(&id)))
                .all(conn)
                .await?
                .iter()
                .map(|child| child.id())
                .collect::<Vec<_>>();
            if include_node {
                ids.push(id);
            }
            ids
        } else {
            self.strategy()
                .subtree(conn, &id)
                .await?
                .into_iter()
                .filter(|(_, depth)| include_node || *depth > 0)
                .map(|(member, _)| member)
                .collect()
        };

        if ids.is_empty() {
            return Ok(None);
        }
        let values = ids.iter().map(M::id_to_value).collect::<Vec<_>>();
        Ok(Some(M::Entity::find().filter(M::id_column().is_in(values))))
    }

    pub async fn get_children<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        sort: Option<SortBy<ColumnOf<M>>>,
        include_node: bool,
    ) -> Result<Vec<M>, TreeError> {
        match self
            .children_select(conn, node, direct, include_node)
            .await?
        {
            Some(select) => Ok(sorted(select, sort, M::id_column()).all(conn).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Children of `node` nested under their parents, siblings ordered by `sort` or by id.
    pub async fn children_hierarchy<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
        sort: Option<SortBy<ColumnOf<M>>>,
        include_node: bool,
    ) -> Result<Vec<TreeNode<M>>, TreeError> {
        let nodes = self
            .get_children(conn, node, direct, sort, include_node)
            .await?;
        Ok(build_tree(nodes))
    }

    /// Every node below `node`.
    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
    ) -> Result<Vec<M>, TreeError> {
        self.get_children(conn, Some(node), false, None, false).await
    }

    pub async fn child_count<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: Option<&M>,
        direct: bool,
    ) -> Result<u64, TreeError> {
        match self.children_select(conn, node, direct, false).await? {
            Some(select) => Ok(select.count(conn).await?),
            None => Ok(0),
        }
    }

    /// Ancestors of `node` from its root down to the node itself.
    pub async fn get_path<C: ConnectionTrait>(&self, conn: &C, node: &M) -> Result<Vec<M>, TreeError> {
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let ancestry = self.strategy().ancestry(conn, &stored.id()).await?;
        let order: HashMap<M::Id, usize> = ancestry
            .iter()
            .enumerate()
            .map(|(index, (ancestor, _))| (ancestor.clone(), index))
            .collect();
        let values = ancestry
            .iter()
            .map(|(ancestor, _)| M::id_to_value(ancestor))
            .collect::<Vec<_>>();

        let mut models = M::Entity::find()
            .filter(M::id_column().is_in(values))
            .all(conn)
            .await?;
        models.sort_by_key(|model| order.get(&model.id()).copied());
        Ok(models)
    }
}
