//! PostgreSQL target over sea-orm.
//!
//! Databases of the provisioning model map to schemas, so the whole run goes
//! through one session on one server database. Tables are JSONB document
//! tables and field indexes are expression indexes on `doc ->> field`.

pub mod errors;
mod introspect;
mod schema;
pub mod sql;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, QueryResult,
    Statement, TransactionTrait, Value,
};
use tracing::{info, warn};

use crate::config::ConnectionParams;
use crate::error::{ProvisionError, TargetError};
use crate::target::Connector;

pub use errors::classify;

const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Bounds for polling index readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexWaitPolicy {
    pub timeout: Duration,
    pub max_delay: Duration,
}

impl Default for IndexWaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_delay: Duration::from_millis(80),
        }
    }
}

/// Calls `connect_fn` up to `max_attempts` times, `interval` apart.
async fn retry_connection<T, F, Fut>(
    mut connect_fn: F,
    max_attempts: u32,
    interval: Duration,
) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut attempt = 1;
    loop {
        match connect_fn().await {
            Ok(conn) => {
                if attempt > 1 {
                    info!(attempts = attempt, "connection_retry=success");
                }
                return Ok(conn);
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    attempt,
                    max_attempts,
                    interval_ms = interval.as_millis() as u64,
                    error = %e,
                    "connection_retry=failed"
                );
                tokio::time::sleep(interval).await;
                attempt += 1;
            }
            Err(e) => return Err(format!("{e} (after {attempt} attempts)")),
        }
    }
}

/// Opens a single-session pool to the configured server database.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector {
    pub index_wait: IndexWaitPolicy,
}

#[async_trait]
impl Connector for PgConnector {
    type Params = ConnectionParams;
    type Connection = PgTarget;

    async fn connect(&self, params: &ConnectionParams) -> Result<PgTarget, ProvisionError> {
        let display_url = params.display_url();
        info!(url = %display_url, "Connecting to PostgreSQL");

        let mut opt = ConnectOptions::new(params.url());
        opt.min_connections(1)
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .sqlx_logging(false);

        let conn = retry_connection(
            || {
                let opt = opt.clone();
                async move { Database::connect(opt).await.map_err(|e| e.to_string()) }
            },
            params.connect_attempts,
            RETRY_INTERVAL,
        )
        .await
        .map_err(|message| ProvisionError::Connect {
            target: display_url.clone(),
            message,
        })?;

        info!(url = %display_url, "Connected");
        Ok(PgTarget::from_connection(conn).index_wait(self.index_wait))
    }

    async fn release(&self, conn: &PgTarget) {
        match conn.conn.close_by_ref().await {
            Ok(()) => info!("Connection closed"),
            Err(e) => warn!(error = %e, "Failed to close connection"),
        }
    }
}

/// One PostgreSQL session implementing every target trait.
///
/// Not `Clone`; share it behind an `Arc`.
#[derive(Debug)]
pub struct PgTarget {
    conn: DatabaseConnection,
    index_wait: IndexWaitPolicy,
}

impl PgTarget {
    pub fn from_connection(conn: DatabaseConnection) -> Self {
        Self {
            conn,
            index_wait: IndexWaitPolicy::default(),
        }
    }

    pub fn index_wait(mut self, policy: IndexWaitPolicy) -> Self {
        self.index_wait = policy;
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn into_connection(self) -> DatabaseConnection {
        self.conn
    }

    async fn execute(&self, sql: String) -> Result<(), TargetError> {
        self.conn
            .execute(Statement::from_string(DatabaseBackend::Postgres, sql))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn execute_with(&self, sql: &str, values: Vec<Value>) -> Result<(), TargetError> {
        self.conn
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                sql,
                values,
            ))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    /// Runs `statements` in one transaction; any failure rolls all of them back.
    async fn execute_batch(&self, statements: Vec<String>) -> Result<(), TargetError> {
        let txn = self.conn.begin().await.map_err(classify)?;
        for sql in statements {
            let result = txn
                .execute(Statement::from_string(DatabaseBackend::Postgres, sql))
                .await;
            if let Err(e) = result {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(classify(e));
            }
        }
        txn.commit().await.map_err(classify)
    }

    async fn query_all<I>(&self, sql: &str, values: I) -> Result<Vec<QueryResult>, TargetError>
    where
        I: IntoIterator<Item = Value> + Send,
    {
        self.conn
            .query_all(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                sql,
                values,
            ))
            .await
            .map_err(classify)
    }

    async fn query_one<I>(&self, sql: &str, values: I) -> Result<Option<QueryResult>, TargetError>
    where
        I: IntoIterator<Item = Value> + Send,
    {
        self.conn
            .query_one(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                sql,
                values,
            ))
            .await
            .map_err(classify)
    }

    async fn names(&self, sql: &str, values: Vec<Value>) -> Result<Vec<String>, TargetError> {
        self.query_all(sql, values)
            .await?
            .iter()
            .map(|row| get::<String>(row, "name"))
            .collect()
    }
}

fn get<T: sea_orm::TryGetable>(row: &QueryResult, column: &str) -> Result<T, TargetError> {
    row.try_get::<T>("", column)
        .map_err(|e| TargetError::failed(format!("failed to read column '{column}': {e}")))
}

fn get_u64(row: &QueryResult, column: &str) -> Result<u64, TargetError> {
    get::<i64>(row, column).map(|v| v.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_connection(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("refused #{n}"))
                    } else {
                        Ok(n)
                    }
                }
            },
            5,
            RETRY_INTERVAL,
        )
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_connection(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("connection refused".to_string()) }
            },
            2,
            RETRY_INTERVAL,
        )
        .await;
        assert_eq!(result, Err("connection refused (after 2 attempts)".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
