use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tracing::{trace, warn};

use super::{get, sql, PgTarget};
use crate::error::TargetError;
use crate::model::{TableSpec, UserSpec};
use crate::target::{SchemaTarget, UserTarget};

fn check_identifier(kind: &str, ident: &str) -> Result<(), TargetError> {
    if ident.len() > sql::MAX_IDENTIFIER_LEN {
        return Err(TargetError::failed(format!(
            "{kind} name '{ident}' exceeds {} bytes",
            sql::MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

#[async_trait]
impl SchemaTarget for PgTarget {
    async fn list_databases(&self) -> Result<Vec<String>, TargetError> {
        self.names(sql::LIST_SCHEMAS, Vec::new()).await
    }

    async fn create_database(&self, database: &str) -> Result<(), TargetError> {
        check_identifier("database", database)?;
        self.execute(sql::create_schema(database)).await
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, TargetError> {
        self.names(sql::LIST_TABLES, vec![database.into()]).await
    }

    async fn create_table(&self, database: &str, table: &TableSpec) -> Result<(), TargetError> {
        check_identifier("table", &table.name)?;
        let statements = sql::create_table(database, table);
        if table.options.capped_bytes.is_some() {
            warn!(
                database,
                table = %table.name,
                "capped size is recorded but not enforced by PostgreSQL"
            );
        }
        self.execute_batch(statements).await
    }

    async fn list_indexes(&self, database: &str, table: &str) -> Result<Vec<String>, TargetError> {
        let names = self
            .names(sql::LIST_INDEXES, vec![database.into(), table.into()])
            .await?;
        Ok(names
            .iter()
            .filter_map(|name| sql::field_from_index_name(table, name))
            .map(str::to_string)
            .collect())
    }

    async fn create_index(&self, database: &str, table: &str, field: &str) -> Result<(), TargetError> {
        check_identifier("index", &sql::index_name(table, field))?;
        self.execute(sql::create_index(database, table, field)).await
    }

    async fn wait_for_index(&self, database: &str, table: &str, field: &str) -> Result<(), TargetError> {
        let index = sql::index_name(table, field);
        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let row = self
                .query_one(sql::INDEX_READY, vec![database.into(), index.clone().into()])
                .await?
                .ok_or_else(|| {
                    TargetError::failed(format!("index '{database}.{index}' does not exist"))
                })?;
            if get::<bool>(&row, "ready")? {
                trace!(index = %index, attempts, elapsed_ms = start.elapsed().as_millis() as u64, "index ready");
                return Ok(());
            }

            if start.elapsed() >= self.index_wait.timeout {
                return Err(TargetError::failed(format!(
                    "index '{database}.{index}' not ready after {:?} ({attempts} attempts)",
                    start.elapsed()
                )));
            }

            let max_delay_ms = self.index_wait.max_delay.as_millis() as u64;
            let base_delay_ms = (5u64 << attempts.saturating_sub(1).min(16)).min(max_delay_ms);
            let jitter_ms = rand::rng().random::<u64>() % 4;
            trace!(index = %index, attempts, delay_ms = base_delay_ms + jitter_ms, "index backoff");
            tokio::time::sleep(Duration::from_millis(base_delay_ms + jitter_ms)).await;
        }
    }

    async fn enable_operation_log(&self, _database: &str, slow_ms: u64) -> Result<(), TargetError> {
        // Needs pg_stat_statements in shared_preload_libraries; reports degrade without it.
        if let Err(e) = self.execute(sql::ENABLE_STATEMENT_STATS.to_string()).await {
            warn!(error = %e, "pg_stat_statements unavailable; slow query report will fail");
        }

        let row = self
            .query_one(sql::CURRENT_DATABASE, Vec::new())
            .await?
            .ok_or_else(|| TargetError::failed("current_database() returned no row"))?;
        let server_database = get::<String>(&row, "name")?;
        self.execute(sql::log_slow_statements(&server_database, slow_ms))
            .await
    }
}

#[async_trait]
impl UserTarget for PgTarget {
    async fn create_user(&self, user: &UserSpec) -> Result<(), TargetError> {
        let mut statements = vec![sql::create_role(user)];
        statements.extend(sql::grants(user));
        self.execute_batch(statements).await
    }

    async fn upsert_user(&self, user: &UserSpec) -> Result<(), TargetError> {
        match self.create_user(user).await {
            Err(e) if e.is_already_exists() => {
                let mut statements = vec![sql::alter_role(user)];
                statements.extend(sql::grants(user));
                self.execute_batch(statements).await
            }
            other => other,
        }
    }
}
