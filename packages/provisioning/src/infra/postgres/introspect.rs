use async_trait::async_trait;
use sea_orm::Value;

use super::{get, get_u64, sql, PgTarget};
use crate::error::TargetError;
use crate::model::StatSample;
use crate::target::{
    CurrentOperation, IndexStats, Introspect, RecordedOperation, StatsTarget, SystemIssue,
    TableStats,
};

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl PgTarget {
    async fn payload(&self, query: &str) -> Result<serde_json::Value, TargetError> {
        let row = self
            .query_one(query, Vec::new())
            .await?
            .ok_or_else(|| TargetError::failed("statistics query returned no row"))?;
        get::<serde_json::Value>(&row, "payload")
    }
}

#[async_trait]
impl StatsTarget for PgTarget {
    async fn server_stats(&self) -> Result<serde_json::Value, TargetError> {
        self.payload(sql::SERVER_STATS).await
    }

    async fn query_stats(&self) -> Result<serde_json::Value, TargetError> {
        self.payload(sql::QUERY_STATS).await
    }

    async fn current_issues(&self) -> Result<Vec<SystemIssue>, TargetError> {
        self.query_all(sql::BLOCKED_SESSIONS, Vec::new())
            .await?
            .iter()
            .map(|row| {
                let blockers: String = get(row, "blocked_by")?;
                Ok(SystemIssue {
                    session: get(row, "session")?,
                    blocked_by: split_list(&blockers),
                    statement: get(row, "statement")?,
                    waiting_seconds: get(row, "waiting_seconds")?,
                })
            })
            .collect()
    }

    async fn append_sample(
        &self,
        database: &str,
        table: &str,
        sample: &StatSample,
    ) -> Result<(), TargetError> {
        let doc: Value = sample.to_document().into();
        self.execute_with(&sql::insert_document(database, table), vec![doc])
            .await
    }
}

#[async_trait]
impl Introspect for PgTarget {
    async fn table_stats(&self, database: &str) -> Result<Vec<TableStats>, TargetError> {
        self.query_all(sql::TABLE_STATS, vec![database.into()])
            .await?
            .iter()
            .map(|row| {
                Ok(TableStats {
                    name: get(row, "name")?,
                    document_count: get_u64(row, "document_count")?,
                    data_bytes: get_u64(row, "data_bytes")?,
                    storage_bytes: get_u64(row, "storage_bytes")?,
                    index_count: get_u64(row, "index_count")?,
                    index_bytes: get_u64(row, "index_bytes")?,
                })
            })
            .collect()
    }

    async fn index_stats(&self, database: &str) -> Result<Vec<IndexStats>, TargetError> {
        self.query_all(sql::INDEX_STATS, vec![database.into()])
            .await?
            .iter()
            .map(|row| {
                let keys: String = get(row, "key_fields")?;
                Ok(IndexStats {
                    table: get(row, "table_name")?,
                    name: get(row, "index_name")?,
                    key_fields: split_list(&keys),
                    size_bytes: get_u64(row, "size_bytes")?,
                })
            })
            .collect()
    }

    async fn operation_log(&self, _database: &str) -> Result<Vec<RecordedOperation>, TargetError> {
        self.query_all(sql::OPERATION_LOG, Vec::new())
            .await?
            .iter()
            .map(|row| {
                let statement: String = get(row, "statement")?;
                Ok(RecordedOperation {
                    id: get(row, "id")?,
                    operation: sql::statement_kind(&statement),
                    namespace: get(row, "namespace")?,
                    duration_ms: get(row, "duration_ms")?,
                    statement,
                })
            })
            .collect()
    }

    async fn current_operations(&self) -> Result<Vec<CurrentOperation>, TargetError> {
        self.query_all(sql::CURRENT_OPERATIONS, Vec::new())
            .await?
            .iter()
            .map(|row| {
                let state: String = get(row, "state")?;
                let query: String = get(row, "query")?;
                let idle = state != "active";
                let wait: Option<String> = get(row, "wait_event_type")?;
                Ok(CurrentOperation {
                    id: get(row, "id")?,
                    operation_type: if idle {
                        state.clone()
                    } else {
                        sql::statement_kind(&query)
                    },
                    namespace: get(row, "namespace")?,
                    description: get(row, "description")?,
                    elapsed_seconds: get(row, "elapsed_seconds")?,
                    plan_summary: wait.map(|w| format!("waiting on {w}")),
                    idle,
                })
            })
            .collect()
    }
}
