//! The fixed database layouts the development environment ships with.

use crate::model::{Durability, ProvisionSpec, TableSpec};
use crate::sampler::MONITORING_DATABASE;

/// Size bound of the `dev_logs` append-only table.
pub const DEV_LOGS_CAPPED_BYTES: u64 = 100_000_000;

/// Application content tables. Soft durability suits a throwaway dev database.
pub fn content_store(database: &str) -> ProvisionSpec {
    let table = |name: &str, fields: &[&str]| {
        TableSpec::new(name)
            .indexed(fields.iter().copied())
            .durability(Durability::Soft)
    };

    ProvisionSpec::new(database)
        .table(table("users", &["email", "username"]))
        .table(table("posts", &["author_id", "created_at"]))
        .table(table("comments", &["post_id", "author_id", "created_at"]))
        .table(table("tags", &["name"]))
        .table(table("categories", &["name", "parent_id"]))
}

/// Log and scratch collections.
pub fn log_store(database: &str) -> ProvisionSpec {
    ProvisionSpec::new(database)
        .table(TableSpec::new("system_logs").indexed(["timestamp", "level", "source"]))
        .table(TableSpec::new("development_data"))
        .table(TableSpec::new("dev_logs").capped(DEV_LOGS_CAPPED_BYTES))
}

/// Tables the stats sampler writes to.
pub fn monitoring() -> ProvisionSpec {
    ["query_stats", "table_stats", "server_stats", "job_logs"]
        .into_iter()
        .fold(ProvisionSpec::new(MONITORING_DATABASE), |spec, name| {
            spec.table(TableSpec::new(name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_store_declares_five_tables_in_order() {
        let spec = content_store("development");
        let names: Vec<&str> = spec.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["users", "posts", "comments", "tags", "categories"]);
        assert_eq!(spec.tables[2].indexed_fields(), ["post_id", "author_id", "created_at"]);
        assert!(spec
            .tables
            .iter()
            .all(|t| t.options.durability == Durability::Soft));
        spec.validate().unwrap();
    }

    #[test]
    fn log_store_caps_dev_logs() {
        let spec = log_store("test");
        let dev_logs = spec.tables.iter().find(|t| t.name == "dev_logs").unwrap();
        assert_eq!(dev_logs.options.capped_bytes, Some(DEV_LOGS_CAPPED_BYTES));
        assert_eq!(spec.tables[0].indexed_fields(), ["timestamp", "level", "source"]);
    }

    #[test]
    fn monitoring_includes_sampler_tables() {
        let spec = monitoring();
        assert_eq!(spec.database_name, MONITORING_DATABASE);
        for name in ["server_stats", "query_stats"] {
            assert!(spec.tables.iter().any(|t| t.name == name));
        }
    }
}
