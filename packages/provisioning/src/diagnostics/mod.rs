//! Read-only diagnostic report procedures.
//!
//! Procedures are client-side functions kept in a [`ProcedureCatalog`].
//! Installing one registers it under its id and replaces any earlier
//! procedure with the same id. Invoking one captures the parts of the
//! target's state it declares in `requires` through [`Introspect`], then runs
//! its behavior over that snapshot. Nothing on this path writes to the target.

mod reports;

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use crate::error::{DiagnosticsError, TargetError};
use crate::target::{CurrentOperation, IndexStats, Introspect, RecordedOperation, TableStats};

pub use reports::{
    bytes_to_mb, CollectionSize, InFlightOperation, IndexAnalysis, IndexSummary, Report,
    SlowOperation,
};

pub const SHOW_COLLECTION_SIZES: &str = "showCollectionSizes";
pub const SHOW_SLOW_QUERIES: &str = "showSlowQueries";
pub const ANALYZE_INDEXES: &str = "analyzeIndexes";
pub const SHOW_OPERATIONS: &str = "showOperations";

pub const DEFAULT_SLOW_THRESHOLD_MS: u64 = 100;

/// A slice of target state a procedure reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    TableStats,
    IndexStats,
    OperationLog,
    CurrentOperations,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Requirement::TableStats => "table stats",
            Requirement::IndexStats => "index stats",
            Requirement::OperationLog => "operation log",
            Requirement::CurrentOperations => "current operations",
        };
        f.write_str(name)
    }
}

/// Target state captured for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSnapshot {
    pub tables: Vec<TableStats>,
    pub indexes: Vec<IndexStats>,
    pub operation_log: Vec<RecordedOperation>,
    pub current_operations: Vec<CurrentOperation>,
}

impl SystemSnapshot {
    /// Reads only the parts listed in `requires`.
    pub async fn capture<T>(
        conn: &T,
        database: &str,
        id: &str,
        requires: &[Requirement],
    ) -> Result<Self, DiagnosticsError>
    where
        T: Introspect + ?Sized,
    {
        let mut snapshot = SystemSnapshot::default();
        for requirement in requires {
            let capture_err = |source: TargetError| DiagnosticsError::Capture {
                id: id.to_string(),
                requirement: *requirement,
                source,
            };
            match requirement {
                Requirement::TableStats => {
                    snapshot.tables = conn.table_stats(database).await.map_err(capture_err)?;
                }
                Requirement::IndexStats => {
                    snapshot.indexes = conn.index_stats(database).await.map_err(capture_err)?;
                }
                Requirement::OperationLog => {
                    snapshot.operation_log =
                        conn.operation_log(database).await.map_err(capture_err)?;
                }
                Requirement::CurrentOperations => {
                    snapshot.current_operations =
                        conn.current_operations().await.map_err(capture_err)?;
                }
            }
        }
        Ok(snapshot)
    }
}

/// Invocation arguments shared by all procedures; each reads what it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureArgs {
    pub threshold_ms: u64,
    pub include_idle: bool,
}

impl Default for ProcedureArgs {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_SLOW_THRESHOLD_MS,
            include_idle: false,
        }
    }
}

pub type Behavior = fn(&SystemSnapshot, &ProcedureArgs) -> Report;

#[derive(Clone)]
pub struct DiagnosticProcedure {
    pub id: String,
    pub description: &'static str,
    pub requires: &'static [Requirement],
    pub behavior: Behavior,
}

impl fmt::Debug for DiagnosticProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticProcedure")
            .field("id", &self.id)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

/// The four procedures every bootstrap installs.
pub fn standard_procedures() -> Vec<DiagnosticProcedure> {
    vec![
        DiagnosticProcedure {
            id: SHOW_COLLECTION_SIZES.to_string(),
            description: "data, storage and index size of every table in MB",
            requires: &[Requirement::TableStats],
            behavior: reports::collection_sizes,
        },
        DiagnosticProcedure {
            id: SHOW_SLOW_QUERIES.to_string(),
            description: "recorded operations slower than the threshold, slowest first",
            requires: &[Requirement::OperationLog],
            behavior: reports::slow_operations,
        },
        DiagnosticProcedure {
            id: ANALYZE_INDEXES.to_string(),
            description: "document count and index sizes per table",
            requires: &[Requirement::TableStats, Requirement::IndexStats],
            behavior: reports::index_analysis,
        },
        DiagnosticProcedure {
            id: SHOW_OPERATIONS.to_string(),
            description: "operations currently executing, optionally including idle ones",
            requires: &[Requirement::CurrentOperations],
            behavior: reports::in_flight_operations,
        },
    ]
}

#[derive(Debug, Default, Clone)]
pub struct ProcedureCatalog {
    procedures: BTreeMap<String, DiagnosticProcedure>,
}

impl ProcedureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with [`standard_procedures`] already installed.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for procedure in standard_procedures() {
            install_procedure(&mut catalog, procedure);
        }
        catalog
    }

    pub fn get(&self, id: &str) -> Option<&DiagnosticProcedure> {
        self.procedures.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    pub async fn invoke<T>(
        &self,
        id: &str,
        conn: &T,
        database: &str,
        args: &ProcedureArgs,
    ) -> Result<Report, DiagnosticsError>
    where
        T: Introspect + ?Sized,
    {
        let procedure = self
            .get(id)
            .ok_or_else(|| DiagnosticsError::UnknownProcedure { id: id.to_string() })?;
        let snapshot = SystemSnapshot::capture(conn, database, id, procedure.requires).await?;
        debug!(procedure = id, database, "diagnostics=invoke");
        Ok((procedure.behavior)(&snapshot, args))
    }
}

/// Registers `procedure` unconditionally, returning the one it replaced.
pub fn install_procedure(
    catalog: &mut ProcedureCatalog,
    procedure: DiagnosticProcedure,
) -> Option<DiagnosticProcedure> {
    let id = procedure.id.clone();
    let replaced = catalog.procedures.insert(id.clone(), procedure);
    info!(procedure = %id, replaced = replaced.is_some(), "diagnostics=install");
    replaced
}
