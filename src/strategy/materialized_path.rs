use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Value,
};
use tracing::debug;

use crate::config::{StrategyKind, TreeConfig};
use crate::error::TreeError;
use crate::lock::{lock_roots, release_roots, HeldLocks};
use crate::metadata::{
    column_integer, display_value, required, value_as_i64, value_as_string, FieldKind,
};
use crate::path::{hash, PathFormat};
use crate::position::InsertionPosition;
use crate::query::StructuralQuery;
use crate::strategy::{reload, StructuralChange, TreeStrategy};
use crate::traits::TreeModel;

type ColumnOf<M> = <<M as TreeModel>::Entity as EntityTrait>::Column;

/// Materialized path maintenance: every node stores the joined segments of its ancestors.
pub struct MaterializedPath<M: TreeModel> {
    query: StructuralQuery<M>,
    format: PathFormat,
    source: ColumnOf<M>,
    append_id: bool,
}

impl<M: TreeModel> MaterializedPath<M> {
    pub fn new(config: Arc<TreeConfig>) -> Result<Self, TreeError> {
        if config.strategy() != StrategyKind::MaterializedPath {
            return Err(TreeError::configuration(format!(
                "entity {} is not mapped as a materialized path",
                config.entity_name()
            )));
        }
        let format = PathFormat::from_config(&config);
        let query = StructuralQuery::<M>::new(config)?;
        query.path()?;
        let source = required(
            query.columns().path_source,
            "path source",
            query.config(),
        )?;
        let append_id = query.config().path_append_id().unwrap_or_else(|| {
            FieldKind::of(source.def().get_column_type()) == FieldKind::String
        });
        Ok(Self {
            query,
            format,
            source,
            append_id,
        })
    }

    pub fn query(&self) -> &StructuralQuery<M> {
        &self.query
    }

    pub fn format(&self) -> &PathFormat {
        &self.format
    }

    /// Stored path of `node`.
    pub fn path_of(&self, node: &M) -> Result<String, TreeError> {
        let column = self.query.path()?;
        value_as_string(&node.column_value(column))
            .ok_or_else(|| TreeError::invariant(format!("node [{}] has no path", node.id())))
    }

    /// Path segment contributed by `node`, read from its source column.
    pub fn segment_of(&self, node: &M) -> Result<String, TreeError> {
        let source = display_value(&node.column_value(self.source)).ok_or_else(|| {
            TreeError::invalid(format!("path source of node [{}] is empty", node.id()))
        })?;
        let id = self.append_id.then(|| node.id().to_string());
        self.format.segment(&source, id.as_deref())
    }

    /// Parent a node placed at `position` ends up under. Sibling positions share the
    /// sibling's parent.
    async fn parent_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        position: &InsertionPosition<M::Id>,
    ) -> Result<Option<M>, TreeError> {
        match position {
            InsertionPosition::Root => Ok(None),
            InsertionPosition::FirstChildOf(id) | InsertionPosition::LastChildOf(id) => {
                Ok(Some(reload::<M, C>(conn, id).await?))
            }
            InsertionPosition::PrevSiblingOf(id) | InsertionPosition::NextSiblingOf(id) => {
                let sibling = reload::<M, C>(conn, id).await?;
                match sibling.parent_id() {
                    Some(parent) => Ok(Some(reload::<M, C>(conn, &parent).await?)),
                    None => Ok(None),
                }
            }
        }
    }

    fn path_under(&self, parent: Option<&M>, node: &M) -> Result<String, TreeError> {
        let parent_path = parent.map(|parent| self.path_of(parent)).transpose()?;
        let segment = self.segment_of(node)?;
        Ok(self.format.build(parent_path.as_deref(), &segment))
    }

    fn set_structure(&self, active: &mut M::ActiveModel, path: &str) -> Result<(), TreeError> {
        let columns = self.query.columns();
        active.set(self.query.path()?, Value::from(path.to_string()));
        if let Some(level) = columns.level {
            active.set(level, column_integer(level, self.format.level(path))?);
        }
        if let Some(path_hash) = columns.path_hash {
            active.set(path_hash, Value::from(hash(path)));
        }
        Ok(())
    }

    /// Whether the stored path, level and hash of `model` agree with `path`.
    fn structure_matches(&self, model: &M, path: &str) -> bool {
        let columns = self.query.columns();
        if self.path_of(model).ok().as_deref() != Some(path) {
            return false;
        }
        if let Some(level) = columns.level {
            if value_as_i64(&model.column_value(level)) != Some(self.format.level(path)) {
                return false;
            }
        }
        if let Some(path_hash) = columns.path_hash {
            if value_as_string(&model.column_value(path_hash)) != Some(hash(path)) {
                return false;
            }
        }
        true
    }

    /// Identifier of the root of the tree `node` belongs to.
    async fn root_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        node: &M,
    ) -> Result<Option<M::Id>, TreeError> {
        let path = self.path_of(node)?;
        let Some(root_path) = self.format.ancestor_paths(&path).into_iter().next() else {
            return Ok(None);
        };
        let root = M::Entity::find()
            .filter(self.query.path()?.eq(root_path))
            .one(conn)
            .await?;
        Ok(root.map(|root| root.id()))
    }

    async fn rewrite_descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        old_path: &str,
        new_path: &str,
    ) -> Result<u64, TreeError> {
        let level_delta = self.format.level(new_path) - self.format.level(old_path);
        if self.query.columns().path_hash.is_none() {
            return self
                .query
                .shift_path_prefix(conn, old_path, new_path, level_delta)
                .await;
        }

        let backend = conn.get_database_backend();
        let descendants = M::Entity::find()
            .filter(self.query.descendants_condition(backend, old_path)?)
            .all(conn)
            .await?;
        let mut rewritten = 0;
        for descendant in descendants {
            let current = self.path_of(&descendant)?;
            let Some(path) = self.format.rebase(&current, old_path, new_path) else {
                continue;
            };
            let mut active = descendant.into_active_model();
            self.set_structure(&mut active, &path)?;
            active.update(conn).await?;
            rewritten += 1;
        }
        Ok(rewritten)
    }
}

#[async_trait]
impl<M: TreeModel> TreeStrategy for MaterializedPath<M> {
    type Model = M;

    fn kind(&self) -> StrategyKind {
        StrategyKind::MaterializedPath
    }

    fn config(&self) -> &TreeConfig {
        self.query.config()
    }

    fn tracks(&self, column: &str) -> bool {
        let config = self.query.config();
        column == config.parent_column() || config.path_source_column() == Some(column)
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
        M::set_parent(&mut active, parent.as_ref().map(|parent| parent.id()));
        // The id may be part of the path, so the row goes in with a placeholder first.
        self.set_structure(&mut active, "")?;
        let model = active.insert(conn).await?;

        let path = self.path_under(parent.as_ref(), &model)?;
        let mut active = model.into_active_model();
        self.set_structure(&mut active, &path)?;
        Ok(active.update(conn).await?)
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
        let old_path = self.path_of(&stored)?;

        if position.target() == Some(&id) {
            return Err(TreeError::invalid(format!(
                "Cannot set node [{id}] as its own parent or sibling"
            )));
        }
        let parent = self.parent_for(conn, position).await?;
        if let Some(parent) = &parent {
            let parent_path = self.path_of(parent)?;
            if parent.id() == id
                || parent_path.starts_with(&self.format.descendant_prefix(&old_path))
            {
                return Err(TreeError::invalid(format!(
                    "Cannot set child as parent to node: {id}"
                )));
            }
        }

        let new_path = self.path_under(parent.as_ref(), node)?;
        if new_path != old_path {
            let rewritten = self.rewrite_descendants(conn, &old_path, &new_path).await?;
            debug!(
                entity = self.query.config().entity_name(),
                node = %id,
                old_path = old_path.as_str(),
                new_path = new_path.as_str(),
                rewritten,
                "moved path subtree"
            );
        }

        let source = node.column_value(self.source);
        let source_changed = source != stored.column_value(self.source);
        let mut active = stored.into_active_model();
        M::set_parent(&mut active, parent.as_ref().map(|parent| parent.id()));
        if source_changed {
            active.set(self.source, source);
        }
        self.set_structure(&mut active, &new_path)?;
        Ok(active.update(conn).await?)
    }

    async fn process_delete<C>(&self, conn: &C, node: &M) -> Result<(), TreeError>
    where
        C: ConnectionTrait,
    {
        let stored = reload::<M, C>(conn, &node.id()).await?;
        let path = self.path_of(&stored)?;
        let backend = conn.get_database_backend();
        let removed = M::Entity::delete_many()
            .filter(
                Condition::any()
                    .add(M::id_column().eq(M::id_to_value(&stored.id())))
                    .add(self.query.descendants_condition(backend, &path)?),
            )
            .exec(conn)
            .await?;
        debug!(
            entity = self.query.config().entity_name(),
            node = %stored.id(),
            removed = removed.rows_affected,
            "deleted path subtree"
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

        let mut children: HashMap<M::Id, Vec<usize>> = HashMap::new();
        let mut queue: VecDeque<(usize, Option<String>)> = VecDeque::new();
        for (index, model) in models.iter().enumerate() {
            match model.parent_id() {
                Some(parent) => children.entry(parent).or_default().push(index),
                None => queue.push_back((index, None)),
            }
        }

        let mut visited = HashSet::new();
        let mut updated = 0usize;
        while let Some((index, parent_path)) = queue.pop_front() {
            if !visited.insert(index) {
                continue;
            }
            let model = &models[index];
            let segment = self.segment_of(model)?;
            let path = self.format.build(parent_path.as_deref(), &segment);
            if let Some(kids) = children.get(&model.id()) {
                queue.extend(kids.iter().map(|&kid| (kid, Some(path.clone()))));
            }
            if self.structure_matches(model, &path) {
                continue;
            }
            let mut active = model.clone().into_active_model();
            self.set_structure(&mut active, &path)?;
            active.update(conn).await?;
            updated += 1;
        }

        if visited.len() != models.len() {
            let unreachable = models
                .iter()
                .enumerate()
                .filter(|(index, _)| !visited.contains(index))
                .map(|(_, model)| model.id().to_string())
                .collect::<Vec<_>>();
            return Err(TreeError::invariant(format!(
                "nodes [{}] are not reachable from any root",
                unreachable.join(", ")
            )));
        }
        debug!(
            entity = self.query.config().entity_name(),
            updated,
            "rebuilt materialized paths"
        );
        Ok(())
    }

    async fn acquire_locks(
        &self,
        db: &DatabaseConnection,
        change: StructuralChange<'_, M>,
    ) -> Result<HeldLocks<M::Id>, TreeError> {
        let config = self.query.config();
        if !config.activate_locking() {
            return Ok(HeldLocks::none());
        }
        let lock_time = required(self.query.columns().lock_time, "lock time", config)?;

        let (node, position) = match change {
            StructuralChange::Insert(position) => (None, Some(position)),
            StructuralChange::Move(node, position) => (Some(node), Some(position)),
            StructuralChange::Delete(node) => (Some(node), None),
        };
        let mut roots = Vec::new();
        if let Some(node) = node {
            let stored = reload::<M, _>(db, &node.id()).await?;
            roots.extend(self.root_of(db, &stored).await?);
        }
        if let Some(target) = position.and_then(InsertionPosition::target) {
            let target = reload::<M, _>(db, target).await?;
            roots.extend(self.root_of(db, &target).await?);
        }
        lock_roots::<M, _>(db, config, lock_time, roots).await
    }

    async fn release_locks(
        &self,
        db: &DatabaseConnection,
        held: HeldLocks<M::Id>,
    ) -> Result<(), TreeError> {
        let Some(lock_time) = self.query.columns().lock_time else {
            return Ok(());
        };
        release_roots::<M, _>(db, lock_time, &held).await
    }
}
