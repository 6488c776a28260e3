//! Structural query engine: bulk range shifts, path prefix rewrites and tree boundary
//! lookups. Every shift is a single `UPDATE` so a half-applied shift is never visible.

use std::marker::PhantomData;
use std::sync::Arc;

use sea_orm::sea_query::{Expr, LikeExpr, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbBackend, EntityTrait, IdenStatic, Order,
    QueryFilter, QueryOrder, Select, Value,
};
use tracing::debug;

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::metadata::{is_null_value, required, value_as_i64, TreeColumns};
use crate::path::{escape_like, PathFormat};
use crate::traits::TreeModel;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl From<Direction> for Order {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Asc => Order::Asc,
            Direction::Desc => Order::Desc,
        }
    }
}

/// Column ordering applied to repository reads.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SortBy<C> {
    pub column: C,
    pub direction: Direction,
}

impl<C> SortBy<C> {
    pub fn asc(column: C) -> Self {
        Self {
            column,
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: C) -> Self {
        Self {
            column,
            direction: Direction::Desc,
        }
    }
}

/// Order `select` by `sort`, or by `fallback` ascending.
pub fn sorted<E: EntityTrait>(
    select: Select<E>,
    sort: Option<SortBy<E::Column>>,
    fallback: E::Column,
) -> Select<E> {
    match sort {
        Some(sort) => select.order_by(sort.column, sort.direction.into()),
        None => select.order_by_asc(fallback),
    }
}

/// Bulk statements over the structural columns of `M`.
#[derive(Debug)]
pub struct StructuralQuery<M: TreeModel> {
    config: Arc<TreeConfig>,
    columns: TreeColumns<<M::Entity as EntityTrait>::Column>,
    _marker: PhantomData<M>,
}

impl<M: TreeModel> Clone for StructuralQuery<M> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            columns: self.columns.clone(),
            _marker: PhantomData,
        }
    }
}

type ColumnOf<M> = <<M as TreeModel>::Entity as EntityTrait>::Column;

impl<M: TreeModel> StructuralQuery<M> {
    pub fn new(config: Arc<TreeConfig>) -> Result<Self, TreeError> {
        let columns = TreeColumns::resolve(&config)?;
        Ok(Self {
            config,
            columns,
            _marker: PhantomData,
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn columns(&self) -> &TreeColumns<ColumnOf<M>> {
        &self.columns
    }

    pub fn left(&self) -> Result<ColumnOf<M>, TreeError> {
        required(self.columns.left, "left", &self.config)
    }

    pub fn right(&self) -> Result<ColumnOf<M>, TreeError> {
        required(self.columns.right, "right", &self.config)
    }

    pub fn path(&self) -> Result<ColumnOf<M>, TreeError> {
        required(self.columns.path, "path", &self.config)
    }

    /// Restrict a statement to one tree of a forest. Without a root column every row is in
    /// the same tree.
    pub fn scope_condition(&self, scope: Option<&Value>) -> Condition {
        match (self.columns.root, scope) {
            (Some(root), Some(value)) if is_null_value(value) => {
                Condition::all().add(root.is_null())
            }
            (Some(root), Some(value)) => Condition::all().add(root.eq(value.clone())),
            _ => Condition::all(),
        }
    }

    /// Add `delta` to every left and right value `>= first` in the scope.
    pub async fn shift_rl<C: ConnectionTrait>(
        &self,
        conn: &C,
        first: i64,
        delta: i64,
        scope: Option<&Value>,
    ) -> Result<(), TreeError> {
        let left = self.left()?;
        let right = self.right()?;
        debug!(
            entity = self.config.entity_name(),
            first,
            delta,
            scope = ?scope,
            "shifting nested set edges"
        );

        M::Entity::update_many()
            .col_expr(left, Expr::col(left).add(delta))
            .filter(left.gte(first))
            .filter(self.scope_condition(scope))
            .exec(conn)
            .await?;
        M::Entity::update_many()
            .col_expr(right, Expr::col(right).add(delta))
            .filter(right.gte(first))
            .filter(self.scope_condition(scope))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Shift the interval `[first, last]` by `delta`, adjusting levels by `level_delta` and
    /// optionally moving the rows to the tree `new_scope`.
    #[allow(clippy::too_many_arguments)]
    pub async fn shift_range<C: ConnectionTrait>(
        &self,
        conn: &C,
        first: i64,
        last: i64,
        delta: i64,
        level_delta: i64,
        scope: Option<&Value>,
        new_scope: Option<&Value>,
    ) -> Result<(), TreeError> {
        let left = self.left()?;
        let right = self.right()?;
        debug!(
            entity = self.config.entity_name(),
            first,
            last,
            delta,
            level_delta,
            scope = ?scope,
            new_scope = ?new_scope,
            "shifting nested set range"
        );

        let mut update = M::Entity::update_many()
            .col_expr(left, Expr::col(left).add(delta))
            .col_expr(right, Expr::col(right).add(delta));
        if let (Some(level), true) = (self.columns.level, level_delta != 0) {
            update = update.col_expr(level, Expr::col(level).add(level_delta));
        }
        if let (Some(root), Some(value)) = (self.columns.root, new_scope) {
            update = update.col_expr(root, SimpleExpr::Value(value.clone()));
        }
        update
            .filter(left.gte(first))
            .filter(right.lte(last))
            .filter(self.scope_condition(scope))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Highest right value in the scope, 0 for an empty tree.
    pub async fn max_right<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: Option<&Value>,
    ) -> Result<i64, TreeError> {
        let right = self.right()?;
        let edge = M::Entity::find()
            .filter(self.scope_condition(scope))
            .filter(right.is_not_null())
            .order_by_desc(right)
            .one(conn)
            .await?;
        Ok(edge
            .and_then(|model| value_as_i64(&model.column_value(right)))
            .unwrap_or(0))
    }

    /// Condition matching every path strictly below the node stored at `path`.
    ///
    /// `LIKE` is case-insensitive on some stores, so the prefix is also compared exactly.
    pub fn descendants_condition(
        &self,
        backend: DbBackend,
        path: &str,
    ) -> Result<Condition, TreeError> {
        let column = self.path()?;
        let format = PathFormat::from_config(&self.config);
        let prefix = format.descendant_prefix(path);
        let pattern = format!("{}%", escape_like(&prefix));
        let guard = Expr::cust_with_values(
            format!(
                "SUBSTR({}, 1, {}) = ?",
                quoted_column(backend, column.as_str()),
                prefix.chars().count()
            ),
            [prefix.clone()],
        );
        Ok(Condition::all()
            .add(column.like(LikeExpr::new(pattern).escape('\\')))
            .add(guard)
            .add(column.ne(path)))
    }

    /// Replace the `old_path` prefix of every descendant with `new_path` in one statement.
    pub async fn shift_path_prefix<C: ConnectionTrait>(
        &self,
        conn: &C,
        old_path: &str,
        new_path: &str,
        level_delta: i64,
    ) -> Result<u64, TreeError> {
        let column = self.path()?;
        let backend = conn.get_database_backend();
        let format = PathFormat::from_config(&self.config);
        let old_prefix = format.descendant_prefix(old_path);
        let new_prefix = format.descendant_prefix(new_path);
        let tail_start = old_prefix.chars().count() + 1;
        let quoted = quoted_column(backend, column.as_str());

        let rewrite = match backend {
            DbBackend::MySql => format!("CONCAT(?, SUBSTRING({quoted}, {tail_start}))"),
            DbBackend::Postgres | DbBackend::Sqlite => format!("? || SUBSTR({quoted}, {tail_start})"),
        };
        debug!(
            entity = self.config.entity_name(),
            old_prefix = old_prefix.as_str(),
            new_prefix = new_prefix.as_str(),
            level_delta,
            "rewriting descendant paths"
        );

        let mut update = M::Entity::update_many()
            .col_expr(column, Expr::cust_with_values(rewrite, [new_prefix]));
        if let (Some(level), true) = (self.columns.level, level_delta != 0) {
            update = update.col_expr(level, Expr::col(level).add(level_delta));
        }
        let result = update
            .filter(self.descendants_condition(backend, old_path)?)
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}

/// Quote a column name the way `backend` expects in raw SQL fragments.
pub fn quoted_column(backend: DbBackend, column: &str) -> String {
    match backend {
        DbBackend::MySql => format!("`{}`", column.replace('`', "``")),
        DbBackend::Postgres | DbBackend::Sqlite => format!("\"{}\"", column.replace('"', "\"\"")),
    }
}
