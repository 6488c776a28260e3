use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder,
};
use tracing::debug;

use crate::config::{StrategyKind, TreeConfig};
use crate::error::TreeError;
use crate::position::InsertionPosition;
use crate::strategy::{reload, TreeStrategy};
use crate::traits::ClosureTreeModel;

const INSERT_CHUNK: usize = 500;

/// Closure table maintenance: one hierarchy row per (ancestor, descendant) pair, self included.
pub struct ClosureTable<M: ClosureTreeModel> {
    config: Arc<TreeConfig>,
    _marker: std::marker::PhantomData<M>,
}

impl<M: ClosureTreeModel> ClosureTable<M> {
    pub fn new(config: Arc<TreeConfig>) -> Result<Self, TreeError> {
        if config.strategy() != StrategyKind::Closure {
            return Err(TreeError::configuration(format!(
                "entity {} is not mapped as a closure tree",
                config.entity_name()
            )));
        }
        Ok(Self {
            config,
            _marker: std::marker::PhantomData,
        })
    }

    /// Identifiers of `ancestor` and everything below it, with their depth under it.
    pub async fn subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestor: &M::Id,
    ) -> Result<Vec<(M::Id, i32)>, TreeError> {
        let rows = M::HierarchyEntity::find()
            .filter(M::hierarchy_ancestor_column().eq(M::hierarchy_id_to_value(ancestor)))
            .order_by_asc(M::hierarchy_depth_column())
            .all(conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    M::hierarchy_model_descendant(row),
                    M::hierarchy_model_depth(row),
                )
            })
            .collect())
    }

    /// Identifiers of `descendant` and every node above it, with their distance to it.
    pub async fn ancestry<C: ConnectionTrait>(
        &self,
        conn: &C,
        descendant: &M::Id,
    ) -> Result<Vec<(M::Id, i32)>, TreeError> {
        let rows = M::HierarchyEntity::find()
            .filter(M::hierarchy_descendant_column().eq(M::hierarchy_id_to_value(descendant)))
            .order_by_desc(M::hierarchy_depth_column())
            .all(conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (M::hierarchy_model_ancestor(row), M::hierarchy_model_depth(row)))
            .collect())
    }

    async fn parent_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        position: &InsertionPosition<M::Id>,
    ) -> Result<Option<M::Id>, TreeError> {
        match position {
            InsertionPosition::Root => Ok(None),
            InsertionPosition::FirstChildOf(id) | InsertionPosition::LastChildOf(id) => {
                Ok(Some(reload::<M, C>(conn, id).await?.id()))
            }
            InsertionPosition::PrevSiblingOf(id) | InsertionPosition::NextSiblingOf(id) => {
                Ok(reload::<M, C>(conn, id).await?.parent_id())
            }
        }
    }

    async fn insert_hierarchy_rows<C: ConnectionTrait>(
        &self,
        conn: &C,
        rows: Vec<M::HierarchyActiveModel>,
    ) -> Result<(), TreeError> {
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk = rows.by_ref().take(INSERT_CHUNK).collect::<Vec<_>>();
            M::HierarchyEntity::insert_many(chunk)
                .exec_without_returning(conn)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<M: ClosureTreeModel> TreeStrategy for ClosureTable<M> {
    type Model = M;

    fn kind(&self) -> StrategyKind {
        StrategyKind::Closure
    }

    fn config(&self) -> &TreeConfig {
        &self.config
    }

    fn tracks(&self, column: &str) -> bool {
        column == self.config.parent_column()
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
        let parent = self.parent_for(conn, position).await?;
        M::set_parent(&mut active, parent.clone());
        let model = active.insert(conn).await?;
        let id = model.id();

        let mut rows = vec![M::hierarchy_build_row(id.clone(), id.clone(), 0)];
        if let Some(parent) = parent {
            for (ancestor, depth) in self.ancestry(conn, &parent).await? {
                rows.push(M::hierarchy_build_row(ancestor, id.clone(), depth + 1));
            }
        }
        self.insert_hierarchy_rows(conn, rows).await?;
        Ok(model)
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
        if position.target() == Some(&id) {
            return Err(TreeError::invalid(format!(
                "Cannot set node [{id}] as its own parent or sibling"
            )));
        }
        let parent = self.parent_for(conn, position).await?;
        if parent == stored.parent_id() {
            return Ok(stored);
        }

        let subtree = self.subtree(conn, &id).await?;
        let members: HashSet<&M::Id> = subtree.iter().map(|(member, _)| member).collect();
        if let Some(parent) = &parent {
            if members.contains(parent) {
                return Err(TreeError::invalid(format!(
                    "Cannot set child as parent to node: {id}"
                )));
            }
        }

        let member_values = subtree
            .iter()
            .map(|(member, _)| M::hierarchy_id_to_value(member))
            .collect::<Vec<_>>();
        M::HierarchyEntity::delete_many()
            .filter(M::hierarchy_descendant_column().is_in(member_values.clone()))
            .filter(M::hierarchy_ancestor_column().is_not_in(member_values))
            .exec(conn)
            .await?;

        if let Some(parent) = &parent {
            let ancestry = self.ancestry(conn, parent).await?;
            let mut rows = Vec::with_capacity(ancestry.len() * subtree.len());
            for (ancestor, above) in &ancestry {
                for (member, below) in &subtree {
                    rows.push(M::hierarchy_build_row(
                        ancestor.clone(),
                        member.clone(),
                        above + below + 1,
                    ));
                }
            }
            self.insert_hierarchy_rows(conn, rows).await?;
        }
        debug!(
            entity = self.config.entity_name(),
            node = %id,
            subtree = subtree.len(),
            "relinked closure subtree"
        );

        let mut active = stored.into_active_model();
        M::set_parent(&mut active, parent);
        Ok(active.update(conn).await?)
    }

    async fn process_delete<C>(&self, conn: &C, node: &M) -> Result<(), TreeError>
    where
        C: ConnectionTrait,
    {
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let subtree = self.subtree(conn, &stored.id()).await?;
        let mut members = subtree.into_iter().map(|(member, _)| member).collect::<Vec<_>>();
        if members.is_empty() {
            members.push(stored.id());
        }

        M::HierarchyEntity::delete_many()
            .filter(
                M::hierarchy_descendant_column()
                    .is_in(members.iter().map(M::hierarchy_id_to_value)),
            )
            .exec(conn)
            .await?;
        // Deepest rows go first so self-referencing parent keys never dangle.
        for member in members.iter().rev() {
            M::Entity::delete_many()
                .filter(M::id_column().eq(M::id_to_value(member)))
                .exec(conn)
                .await?;
        }
        debug!(
            entity = self.config.entity_name(),
            node = %stored.id(),
            removed = members.len(),
            "deleted closure subtree"
        );
        Ok(())
    }

    async fn recover<C>(&self, conn: &C) -> Result<(), TreeError>
    where
        C: ConnectionTrait,
    {
        let models = M::Entity::find()
            .order_by_asc(M::id_column())
            .all(conn)
            .await?;
        let parents: HashMap<M::Id, Option<M::Id>> = models
            .iter()
            .map(|model| (model.id(), model.parent_id()))
            .collect();

        let mut rows = Vec::new();
        for model in &models {
            let id = model.id();
            rows.push(M::hierarchy_build_row(id.clone(), id.clone(), 0));
            let mut seen = HashSet::from([id.clone()]);
            let mut current = model.parent_id();
            let mut depth = 1;
            while let Some(ancestor) = current {
                let Some(next) = parents.get(&ancestor) else {
                    return Err(TreeError::invariant(format!(
                        "node [{id}] references missing parent [{ancestor}]"
                    )));
                };
                if !seen.insert(ancestor.clone()) {
                    return Err(TreeError::invariant(format!(
                        "node [{id}] is not reachable from any root; parent pointers form a cycle"
                    )));
                }
                rows.push(M::hierarchy_build_row(ancestor, id.clone(), depth));
                current = next.clone();
                depth += 1;
            }
        }

        M::HierarchyEntity::delete_many()
            .filter(Condition::all())
            .exec(conn)
            .await?;
        let count = rows.len();
        self.insert_hierarchy_rows(conn, rows).await?;
        debug!(
            entity = self.config.entity_name(),
            rows = count,
            "rebuilt closure table"
        );
        Ok(())
    }
}
