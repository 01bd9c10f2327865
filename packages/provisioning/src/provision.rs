//! Idempotent creation of databases, tables and indexes.

use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Step, TargetError};
use crate::model::{DatabaseHandle, ProvisionSpec, TableSpec};
use crate::target::SchemaTarget;

/// What a provisioning run actually created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub databases_created: usize,
    pub tables_created: usize,
    pub indexes_created: usize,
}

impl ProvisionReport {
    pub fn merge(&mut self, other: &ProvisionReport) {
        self.databases_created += other.databases_created;
        self.tables_created += other.tables_created;
        self.indexes_created += other.indexes_created;
    }

    pub fn created_anything(&self) -> bool {
        self.databases_created + self.tables_created + self.indexes_created > 0
    }
}

/// Result of a create that may lose a race with another creator.
fn tolerate_existing(result: Result<(), TargetError>) -> Result<bool, TargetError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_already_exists() => {
            warn!(error = %e, "create reported an existing object; continuing");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn ensure_database_inner<T>(conn: &T, name: &str) -> Result<(DatabaseHandle, bool), ProvisionError>
where
    T: SchemaTarget + ?Sized,
{
    let step = || Step::Database {
        database: name.to_string(),
    };

    let existing = conn
        .list_databases()
        .await
        .map_err(|e| ProvisionError::at(step(), e))?;
    if existing.iter().any(|db| db == name) {
        debug!(provision = "exists", kind = "database", database = name);
        return Ok((DatabaseHandle::new(name), false));
    }

    let created = tolerate_existing(conn.create_database(name).await)
        .map_err(|e| ProvisionError::at(step(), e))?;
    if created {
        info!(provision = "create", kind = "database", database = name);
    }
    Ok((DatabaseHandle::new(name), created))
}

/// Ensures `name` exists on the target and returns a handle to it.
pub async fn ensure_database<T>(conn: &T, name: &str) -> Result<DatabaseHandle, ProvisionError>
where
    T: SchemaTarget + ?Sized,
{
    ensure_database_inner(conn, name).await.map(|(handle, _)| handle)
}

async fn ensure_index_inner<T>(
    conn: &T,
    db: &DatabaseHandle,
    table: &str,
    field: &str,
) -> Result<bool, ProvisionError>
where
    T: SchemaTarget + ?Sized,
{
    let database = db.name();
    let step = || Step::Index {
        database: database.to_string(),
        table: table.to_string(),
        field: field.to_string(),
    };

    let existing = conn
        .list_indexes(database, table)
        .await
        .map_err(|e| ProvisionError::at(step(), e))?;

    let created = if existing.iter().any(|f| f == field) {
        debug!(provision = "exists", kind = "index", database, table, field);
        false
    } else {
        let created = tolerate_existing(conn.create_index(database, table, field).await)
            .map_err(|e| ProvisionError::at(step(), e))?;
        if created {
            info!(provision = "create", kind = "index", database, table, field);
        }
        created
    };

    // An index found on a rerun may still be building from an interrupted run.
    conn.wait_for_index(database, table, field)
        .await
        .map_err(|e| {
            ProvisionError::at(
                Step::IndexWait {
                    database: database.to_string(),
                    table: table.to_string(),
                    field: field.to_string(),
                },
                e,
            )
        })?;
    debug!(provision = "ready", kind = "index", database, table, field);

    Ok(created)
}

/// Ensures an index on `field` exists and is ready to serve queries.
pub async fn ensure_index<T>(
    conn: &T,
    db: &DatabaseHandle,
    table: &str,
    field: &str,
) -> Result<(), ProvisionError>
where
    T: SchemaTarget + ?Sized,
{
    ensure_index_inner(conn, db, table, field).await.map(|_| ())
}

async fn ensure_table_inner<T>(
    conn: &T,
    db: &DatabaseHandle,
    table: &TableSpec,
) -> Result<ProvisionReport, ProvisionError>
where
    T: SchemaTarget + ?Sized,
{
    let database = db.name();
    let step = || Step::Table {
        database: database.to_string(),
        table: table.name.clone(),
    };
    let mut report = ProvisionReport::default();

    let existing = conn
        .list_tables(database)
        .await
        .map_err(|e| ProvisionError::at(step(), e))?;
    if existing.iter().any(|t| *t == table.name) {
        debug!(provision = "exists", kind = "table", database, table = %table.name);
    } else {
        let created = tolerate_existing(conn.create_table(database, table).await)
            .map_err(|e| ProvisionError::at(step(), e))?;
        if created {
            report.tables_created += 1;
            info!(
                provision = "create",
                kind = "table",
                database,
                table = %table.name,
                durability = ?table.options.durability
            );
        }
    }

    for field in table.indexed_fields() {
        if ensure_index_inner(conn, db, &table.name, field).await? {
            report.indexes_created += 1;
        }
    }

    Ok(report)
}

/// Ensures `table` and all of its declared indexes exist. When this returns,
/// every declared index is ready.
pub async fn ensure_table<T>(
    conn: &T,
    db: &DatabaseHandle,
    table: &TableSpec,
) -> Result<(), ProvisionError>
where
    T: SchemaTarget + ?Sized,
{
    ensure_table_inner(conn, db, table).await.map(|_| ())
}

/// Runs the database, then each table in order, then each table's indexes in order.
pub async fn provision<T>(conn: &T, spec: &ProvisionSpec) -> Result<ProvisionReport, ProvisionError>
where
    T: SchemaTarget + ?Sized,
{
    spec.validate()?;

    info!(
        "provision=start database={} tables={}",
        spec.database_name,
        spec.tables.len()
    );

    let mut report = ProvisionReport::default();
    let (handle, created) = ensure_database_inner(conn, &spec.database_name).await?;
    if created {
        report.databases_created += 1;
    }

    for table in &spec.tables {
        let table_report = ensure_table_inner(conn, &handle, table).await?;
        report.merge(&table_report);
    }

    info!(
        "provision=done database={} databases_created={} tables_created={} indexes_created={}",
        spec.database_name,
        report.databases_created,
        report.tables_created,
        report.indexes_created
    );
    Ok(report)
}
