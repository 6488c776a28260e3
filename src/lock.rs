use chrono::Utc;
use sea_orm::sea_query::SimpleExpr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend,
    DbErr, EntityTrait, QueryFilter, Statement, TransactionTrait, Value,
};
use tracing::{debug, warn};

use crate::config::{AdvisoryLockStrategy, TreeConfig};
use crate::error::TreeError;
use crate::metadata::{null_timestamp, timestamp_value};
use crate::traits::TreeModel;

/// A structural transaction, holding the configured advisory lock on PostgreSQL.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
    key: Option<String>,
}

impl LockedTransaction {
    pub async fn acquire(
        strategy: &AdvisoryLockStrategy,
        db: &DatabaseConnection,
    ) -> Result<Self, TreeError> {
        let key = match (strategy, db.get_database_backend()) {
            (AdvisoryLockStrategy::Namespaced(key), DbBackend::Postgres) => {
                Some(key.as_str().to_owned())
            }
            _ => None,
        };

        let txn = db.begin().await?;

        if let Some(ref key) = key {
            if let Err(err) = acquire_lock(&txn, key).await {
                let _ = txn.rollback().await;
                return Err(err);
            }
        }

        Ok(Self { txn, key })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), TreeError> {
        if let Some(ref key) = self.key {
            release_lock(&self.txn, key).await?;
        }
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), TreeError> {
        if let Some(ref key) = self.key {
            let _ = release_lock(&self.txn, key).await;
        }
        self.txn.rollback().await?;
        Ok(())
    }

    /// Commit when `result` is a success, roll back otherwise.
    ///
    /// Store failures inside the transaction surface as [`TreeError::Transaction`].
    pub async fn finish<T>(self, result: Result<T, TreeError>) -> Result<T, TreeError> {
        match result {
            Ok(value) => {
                self.commit().await.map_err(into_transaction_error)?;
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "rolling back tree transaction");
                if let Err(rollback) = self.rollback().await {
                    warn!(error = %rollback, "tree transaction rollback failed");
                }
                Err(into_transaction_error(err))
            }
        }
    }
}

fn into_transaction_error(err: TreeError) -> TreeError {
    match err {
        TreeError::Database(err) => TreeError::Transaction(err),
        TreeError::Sqlx(err) => TreeError::Transaction(DbErr::Custom(err.to_string())),
        other => other,
    }
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), TreeError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_lock(hashtext($1), 0)",
        vec![Value::from(key)],
    ))
    .await?;
    Ok(())
}

async fn release_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), TreeError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_unlock(hashtext($1), 0)",
        vec![Value::from(key)],
    ))
    .await?;
    Ok(())
}

/// Roots whose lock timestamp this process set and must clear again.
#[derive(Debug, Default)]
pub struct HeldLocks<Id> {
    roots: Vec<Id>,
}

impl<Id> HeldLocks<Id> {
    pub fn none() -> Self {
        Self { roots: Vec::new() }
    }

    pub fn roots(&self) -> &[Id] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Mark the given roots as being restructured.
///
/// A root counts as locked while its lock time is younger than the configured timeout. The
/// check and the write are one conditional `UPDATE`; when it touches no row another writer
/// holds the root and [`TreeError::Locked`] is returned after releasing what was taken.
/// An operation that outlives the timeout can still overlap with the next writer.
pub async fn lock_roots<M, C>(
    conn: &C,
    config: &TreeConfig,
    lock_time: <M::Entity as EntityTrait>::Column,
    roots: Vec<M::Id>,
) -> Result<HeldLocks<M::Id>, TreeError>
where
    M: TreeModel,
    C: ConnectionTrait,
{
    let timeout = chrono::Duration::from_std(config.locking_timeout())
        .map_err(|err| TreeError::configuration(format!("invalid locking timeout: {err}")))?;

    let mut held = HeldLocks::none();
    for root in roots {
        if held.roots.contains(&root) {
            continue;
        }
        let now = Utc::now();
        let stale = now - timeout;
        let result = M::Entity::update_many()
            .col_expr(lock_time, SimpleExpr::Value(timestamp_value(lock_time, now)))
            .filter(M::id_column().eq(M::id_to_value(&root)))
            .filter(
                Condition::any()
                    .add(lock_time.is_null())
                    .add(lock_time.lt(timestamp_value(lock_time, stale))),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(
                entity = config.entity_name(),
                root = %root,
                "tree root is locked by another writer"
            );
            release_roots::<M, C>(conn, lock_time, &held).await?;
            return Err(TreeError::Locked(root.to_string()));
        }
        debug!(entity = config.entity_name(), root = %root, "locked tree root");
        held.roots.push(root);
    }
    Ok(held)
}

/// Clear the lock time of every held root.
pub async fn release_roots<M, C>(
    conn: &C,
    lock_time: <M::Entity as EntityTrait>::Column,
    held: &HeldLocks<M::Id>,
) -> Result<(), TreeError>
where
    M: TreeModel,
    C: ConnectionTrait,
{
    if held.is_empty() {
        return Ok(());
    }
    let ids = held.roots.iter().map(M::id_to_value).collect::<Vec<_>>();
    M::Entity::update_many()
        .col_expr(lock_time, SimpleExpr::Value(null_timestamp(lock_time)))
        .filter(M::id_column().is_in(ids))
        .exec(conn)
        .await?;
    Ok(())
}
