//! Seams between the provisioning logic and a concrete database system.
//!
//! Every operation receives the connection explicitly; nothing here holds
//! global connection state.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{ProvisionError, TargetError};
use crate::model::{StatSample, TableSpec, UserSpec};

/// Opens and releases the single session a bootstrap run works through.
#[async_trait]
pub trait Connector: Send + Sync {
    type Params: Send + Sync;
    type Connection: Send + Sync;

    async fn connect(&self, params: &Self::Params) -> Result<Self::Connection, ProvisionError>;

    async fn release(&self, conn: &Self::Connection);
}

/// Connects, hands the session to `run` and releases it once `run` finishes,
/// whatever `run` returned. Only a failed connect yields `Err`.
pub async fn with_connection<C, F, Fut, T>(
    connector: &C,
    params: &C::Params,
    run: F,
) -> Result<T, ProvisionError>
where
    C: Connector,
    F: FnOnce(Arc<C::Connection>) -> Fut,
    Fut: Future<Output = T>,
{
    let conn = Arc::new(connector.connect(params).await?);
    let outcome = run(Arc::clone(&conn)).await;
    connector.release(&conn).await;
    Ok(outcome)
}

/// Existence checks and create operations for databases, tables and indexes.
#[async_trait]
pub trait SchemaTarget: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<String>, TargetError>;

    async fn create_database(&self, database: &str) -> Result<(), TargetError>;

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, TargetError>;

    async fn create_table(&self, database: &str, table: &TableSpec) -> Result<(), TargetError>;

    /// Fields that already carry an index on `table`.
    async fn list_indexes(&self, database: &str, table: &str) -> Result<Vec<String>, TargetError>;

    async fn create_index(&self, database: &str, table: &str, field: &str)
        -> Result<(), TargetError>;

    /// Returns once the index on `field` can serve queries.
    async fn wait_for_index(&self, database: &str, table: &str, field: &str)
        -> Result<(), TargetError>;

    /// Starts recording operations slower than `slow_ms` for `database`.
    async fn enable_operation_log(&self, database: &str, slow_ms: u64)
        -> Result<(), TargetError>;
}

#[async_trait]
pub trait UserTarget: Send + Sync {
    async fn create_user(&self, user: &UserSpec) -> Result<(), TargetError>;

    /// Creates the user or replaces the secret and grants of an existing one.
    async fn upsert_user(&self, user: &UserSpec) -> Result<(), TargetError>;
}

/// Live statistics surface and the append-only sink the sampler writes to.
#[async_trait]
pub trait StatsTarget: Send + Sync {
    async fn server_stats(&self) -> Result<serde_json::Value, TargetError>;

    async fn query_stats(&self) -> Result<serde_json::Value, TargetError>;

    /// Problems the server reports right now, such as blocked sessions.
    async fn current_issues(&self) -> Result<Vec<SystemIssue>, TargetError>;

    async fn append_sample(
        &self,
        database: &str,
        table: &str,
        sample: &StatSample,
    ) -> Result<(), TargetError>;
}

/// A session waiting on locks held by other sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemIssue {
    pub session: String,
    pub blocked_by: Vec<String>,
    pub statement: String,
    pub waiting_seconds: f64,
}

/// Per-table size figures, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub name: String,
    pub document_count: u64,
    pub data_bytes: u64,
    pub storage_bytes: u64,
    pub index_count: u64,
    pub index_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub table: String,
    pub name: String,
    pub key_fields: Vec<String>,
    pub size_bytes: u64,
}

/// An operation the target recorded after it finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedOperation {
    pub id: String,
    pub operation: String,
    pub namespace: String,
    pub duration_ms: f64,
    pub statement: String,
}

/// An operation executing (or idling) right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentOperation {
    pub id: String,
    pub operation_type: String,
    pub namespace: String,
    pub description: String,
    pub elapsed_seconds: f64,
    pub plan_summary: Option<String>,
    pub idle: bool,
}

/// Read-only metadata queries backing the diagnostic reports.
#[async_trait]
pub trait Introspect: Send + Sync {
    async fn table_stats(&self, database: &str) -> Result<Vec<TableStats>, TargetError>;

    async fn index_stats(&self, database: &str) -> Result<Vec<IndexStats>, TargetError>;

    async fn operation_log(&self, database: &str) -> Result<Vec<RecordedOperation>, TargetError>;

    async fn current_operations(&self) -> Result<Vec<CurrentOperation>, TargetError>;
}
