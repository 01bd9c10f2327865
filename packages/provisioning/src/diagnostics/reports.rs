use std::cmp::Ordering;

use serde::Serialize;

use super::{ProcedureArgs, SystemSnapshot};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Bytes to MiB, rounded half-up to two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSize {
    pub name: String,
    pub data_size_mb: f64,
    pub storage_size_mb: f64,
    pub index_count: u64,
    pub index_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowOperation {
    pub id: String,
    pub operation: String,
    pub namespace: String,
    pub duration_ms: f64,
    pub statement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    pub name: String,
    pub key_fields: Vec<String>,
    pub size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexAnalysis {
    pub name: String,
    pub document_count: u64,
    pub indexes: Vec<IndexSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InFlightOperation {
    pub id: String,
    pub operation_type: String,
    pub namespace: String,
    pub description: String,
    pub elapsed_seconds: f64,
    pub plan_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "report", content = "rows", rename_all = "snake_case")]
pub enum Report {
    CollectionSizes(Vec<CollectionSize>),
    SlowOperations(Vec<SlowOperation>),
    IndexAnalysis(Vec<IndexAnalysis>),
    InFlight(Vec<InFlightOperation>),
}

impl Report {
    pub fn len(&self) -> usize {
        match self {
            Report::CollectionSizes(rows) => rows.len(),
            Report::SlowOperations(rows) => rows.len(),
            Report::IndexAnalysis(rows) => rows.len(),
            Report::InFlight(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(super) fn collection_sizes(snapshot: &SystemSnapshot, _args: &ProcedureArgs) -> Report {
    let rows = snapshot
        .tables
        .iter()
        .map(|t| CollectionSize {
            name: t.name.clone(),
            data_size_mb: bytes_to_mb(t.data_bytes),
            storage_size_mb: bytes_to_mb(t.storage_bytes),
            index_count: t.index_count,
            index_size_mb: bytes_to_mb(t.index_bytes),
        })
        .collect();
    Report::CollectionSizes(rows)
}

pub(super) fn slow_operations(snapshot: &SystemSnapshot, args: &ProcedureArgs) -> Report {
    let threshold = args.threshold_ms as f64;
    let mut rows: Vec<SlowOperation> = snapshot
        .operation_log
        .iter()
        .filter(|op| op.duration_ms > threshold)
        .map(|op| SlowOperation {
            id: op.id.clone(),
            operation: op.operation.clone(),
            namespace: op.namespace.clone(),
            duration_ms: op.duration_ms,
            statement: op.statement.clone(),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.duration_ms
            .partial_cmp(&a.duration_ms)
            .unwrap_or(Ordering::Equal)
    });
    Report::SlowOperations(rows)
}

pub(super) fn index_analysis(snapshot: &SystemSnapshot, _args: &ProcedureArgs) -> Report {
    let rows = snapshot
        .tables
        .iter()
        .map(|t| IndexAnalysis {
            name: t.name.clone(),
            document_count: t.document_count,
            indexes: snapshot
                .indexes
                .iter()
                .filter(|idx| idx.table == t.name)
                .map(|idx| IndexSummary {
                    name: idx.name.clone(),
                    key_fields: idx.key_fields.clone(),
                    size_mb: bytes_to_mb(idx.size_bytes),
                })
                .collect(),
        })
        .collect();
    Report::IndexAnalysis(rows)
}

pub(super) fn in_flight_operations(snapshot: &SystemSnapshot, args: &ProcedureArgs) -> Report {
    let rows = snapshot
        .current_operations
        .iter()
        .filter(|op| args.include_idle || !op.idle)
        .map(|op| InFlightOperation {
            id: op.id.clone(),
            operation_type: op.operation_type.clone(),
            namespace: op.namespace.clone(),
            description: op.description.clone(),
            elapsed_seconds: op.elapsed_seconds,
            plan_summary: op.plan_summary.clone(),
        })
        .collect();
    Report::InFlight(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{CurrentOperation, IndexStats, RecordedOperation, TableStats};

    fn recorded(id: &str, duration_ms: f64) -> RecordedOperation {
        RecordedOperation {
            id: id.to_string(),
            operation: "query".to_string(),
            namespace: "development".to_string(),
            duration_ms,
            statement: format!("SELECT {id}"),
        }
    }

    fn current(id: &str, idle: bool) -> CurrentOperation {
        CurrentOperation {
            id: id.to_string(),
            operation_type: if idle { "idle" } else { "active" }.to_string(),
            namespace: "development".to_string(),
            description: "client backend".to_string(),
            elapsed_seconds: 1.5,
            plan_summary: None,
            idle,
        }
    }

    #[test]
    fn one_mebibyte_is_one_mb() {
        assert_eq!(bytes_to_mb(1_048_576), 1.0);
    }

    #[test]
    fn sizes_round_to_two_decimals() {
        assert_eq!(bytes_to_mb(1_234_567), 1.18);
        assert_eq!(bytes_to_mb(0), 0.0);
        // 0.005 MiB rounds up
        assert_eq!(bytes_to_mb(5_243), 0.01);
    }

    #[test]
    fn collection_sizes_convert_every_table() {
        let snapshot = SystemSnapshot {
            tables: vec![TableStats {
                name: "system_logs".into(),
                document_count: 10,
                data_bytes: 1_048_576,
                storage_bytes: 1_234_567,
                index_count: 3,
                index_bytes: 2_097_152,
            }],
            ..Default::default()
        };
        let Report::CollectionSizes(rows) = collection_sizes(&snapshot, &ProcedureArgs::default())
        else {
            panic!("wrong report kind");
        };
        assert_eq!(
            rows,
            vec![CollectionSize {
                name: "system_logs".into(),
                data_size_mb: 1.0,
                storage_size_mb: 1.18,
                index_count: 3,
                index_size_mb: 2.0,
            }]
        );
    }

    #[test]
    fn slow_operations_filter_strictly_and_sort_descending() {
        let snapshot = SystemSnapshot {
            operation_log: vec![
                recorded("a", 150.0),
                recorded("b", 100.0),
                recorded("c", 900.0),
                recorded("d", 20.0),
            ],
            ..Default::default()
        };
        let Report::SlowOperations(rows) = slow_operations(&snapshot, &ProcedureArgs::default())
        else {
            panic!("wrong report kind");
        };
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "a"]);
    }

    #[test]
    fn slow_operations_honor_custom_threshold() {
        let snapshot = SystemSnapshot {
            operation_log: vec![recorded("a", 150.0), recorded("c", 900.0)],
            ..Default::default()
        };
        let args = ProcedureArgs {
            threshold_ms: 500,
            ..Default::default()
        };
        assert_eq!(slow_operations(&snapshot, &args).len(), 1);
    }

    #[test]
    fn index_analysis_groups_indexes_by_table() {
        let snapshot = SystemSnapshot {
            tables: vec![
                TableStats {
                    name: "users".into(),
                    document_count: 42,
                    data_bytes: 0,
                    storage_bytes: 0,
                    index_count: 2,
                    index_bytes: 0,
                },
                TableStats {
                    name: "tags".into(),
                    document_count: 0,
                    data_bytes: 0,
                    storage_bytes: 0,
                    index_count: 0,
                    index_bytes: 0,
                },
            ],
            indexes: vec![
                IndexStats {
                    table: "users".into(),
                    name: "users_email_idx".into(),
                    key_fields: vec!["email".into()],
                    size_bytes: 1_048_576,
                },
                IndexStats {
                    table: "users".into(),
                    name: "users_username_idx".into(),
                    key_fields: vec!["username".into()],
                    size_bytes: 0,
                },
            ],
            ..Default::default()
        };
        let Report::IndexAnalysis(rows) = index_analysis(&snapshot, &ProcedureArgs::default())
        else {
            panic!("wrong report kind");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].document_count, 42);
        assert_eq!(rows[0].indexes.len(), 2);
        assert_eq!(rows[0].indexes[0].size_mb, 1.0);
        assert!(rows[1].indexes.is_empty());
    }

    #[test]
    fn in_flight_hides_idle_unless_requested() {
        let snapshot = SystemSnapshot {
            current_operations: vec![current("1", false), current("2", true)],
            ..Default::default()
        };
        assert_eq!(in_flight_operations(&snapshot, &ProcedureArgs::default()).len(), 1);

        let args = ProcedureArgs {
            include_idle: true,
            ..Default::default()
        };
        assert_eq!(in_flight_operations(&snapshot, &args).len(), 2);
    }

    #[test]
    fn report_serializes_with_kind_tag() {
        let value = serde_json::to_value(Report::InFlight(Vec::new())).unwrap();
        assert_eq!(value["report"], "in_flight");
        assert!(value["rows"].as_array().unwrap().is_empty());
    }
}
