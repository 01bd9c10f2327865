//! Plain data describing what a bootstrap run should create.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::ProvisionError;

/// A database and the tables it must contain, in provisioning order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSpec {
    pub database_name: String,
    pub tables: Vec<TableSpec>,
}

impl ProvisionSpec {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            tables: Vec::new(),
        }
    }

    pub fn table(mut self, table: TableSpec) -> Self {
        self.tables.push(table);
        self
    }

    /// Rejects empty database names and duplicate table names.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.database_name.trim().is_empty() {
            return Err(ProvisionError::config("database name must not be empty"));
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(ProvisionError::config(format!(
                    "table name must not be empty (database '{}')",
                    self.database_name
                )));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(ProvisionError::config(format!(
                    "duplicate table '{}' in database '{}'",
                    table.name, self.database_name
                )));
            }
        }
        Ok(())
    }
}

/// Write acknowledgement strength requested for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    #[default]
    Hard,
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    pub durability: Durability,
    /// Upper bound in bytes for append-only log tables.
    pub capped_bytes: Option<u64>,
    pub primary_key: String,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            durability: Durability::Hard,
            capped_bytes: None,
            primary_key: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    indexed_fields: Vec<String>,
    pub options: TableOptions,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexed_fields: Vec::new(),
            options: TableOptions::default(),
        }
    }

    /// Adds indexed fields in order; a field already present is skipped.
    pub fn indexed<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.indexed_fields.contains(&field) {
                self.indexed_fields.push(field);
            }
        }
        self
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.options.durability = durability;
        self
    }

    pub fn capped(mut self, bytes: u64) -> Self {
        self.options.capped_bytes = Some(bytes);
        self
    }

    pub fn indexed_fields(&self) -> &[String] {
        &self.indexed_fields
    }
}

/// Proof that a database exists on the target; passed to table and index steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    name: String,
}

impl DatabaseHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Root,
    ReadWrite,
    DbAdmin,
    Read,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Root => "root",
            Role::ReadWrite => "readWrite",
            Role::DbAdmin => "dbAdmin",
            Role::Read => "read",
        };
        f.write_str(name)
    }
}

/// A role scoped to one database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleGrant {
    pub role: Role,
    pub database: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub username: String,
    pub secret: String,
    roles: Vec<RoleGrant>,
}

impl UserSpec {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            roles: Vec::new(),
        }
    }

    pub fn grant(mut self, role: Role, database: impl Into<String>) -> Self {
        let grant = RoleGrant {
            role,
            database: database.into(),
        };
        if !self.roles.contains(&grant) {
            self.roles.push(grant);
        }
        self
    }

    pub fn roles(&self) -> &[RoleGrant] {
        &self.roles
    }
}

// Keeps the secret out of logs and panic messages.
impl fmt::Debug for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSpec")
            .field("username", &self.username)
            .field("secret", &"***")
            .field("roles", &self.roles)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatCategory {
    Server,
    Query,
}

impl StatCategory {
    /// Log table the category is appended to.
    pub fn table(self) -> &'static str {
        match self {
            StatCategory::Server => "server_stats",
            StatCategory::Query => "query_stats",
        }
    }

    /// Key the payload is stored under inside the appended document.
    pub fn payload_key(self) -> &'static str {
        match self {
            StatCategory::Server => "stats",
            StatCategory::Query => "queries",
        }
    }
}

impl fmt::Display for StatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatCategory::Server => f.write_str("server"),
            StatCategory::Query => f.write_str("query"),
        }
    }
}

/// One sampled statistics record. Append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct StatSample {
    pub timestamp: OffsetDateTime,
    pub category: StatCategory,
    pub payload: serde_json::Value,
}

impl StatSample {
    /// Document shape written to the log table.
    pub fn to_document(&self) -> serde_json::Value {
        let timestamp = self
            .timestamp
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| self.timestamp.unix_timestamp().to_string());
        let mut doc = serde_json::Map::new();
        doc.insert("timestamp".to_string(), serde_json::Value::String(timestamp));
        doc.insert(
            self.category.payload_key().to_string(),
            self.payload.clone(),
        );
        serde_json::Value::Object(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_fields_keep_order_and_drop_duplicates() {
        let table = TableSpec::new("comments").indexed(["post_id", "author_id", "post_id"]);
        assert_eq!(table.indexed_fields(), ["post_id", "author_id"]);
    }

    #[test]
    fn validate_rejects_empty_database_name() {
        let err = ProvisionSpec::new("  ").validate().unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn validate_rejects_duplicate_tables() {
        let spec = ProvisionSpec::new("development")
            .table(TableSpec::new("users"))
            .table(TableSpec::new("users"));
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate table 'users'"));
    }

    #[test]
    fn user_debug_masks_secret() {
        let user = UserSpec::new("developer", "developer_password").grant(Role::ReadWrite, "development");
        let rendered = format!("{user:?}");
        assert!(!rendered.contains("developer_password"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn sample_document_uses_category_key() {
        let sample = StatSample {
            timestamp: time::macros::datetime!(2024-01-02 03:04:05 UTC),
            category: StatCategory::Query,
            payload: serde_json::json!([{"pid": 7}]),
        };
        let doc = sample.to_document();
        assert_eq!(doc["timestamp"], "2024-01-02T03:04:05Z");
        assert_eq!(doc["queries"][0]["pid"], 7);
    }

    #[test]
    fn sample_document_has_only_timestamp_and_payload() {
        let sample = StatSample {
            timestamp: time::macros::datetime!(2024-01-02 03:04:05 UTC),
            category: StatCategory::Server,
            payload: serde_json::json!({ "numbackends": 2 }),
        };
        assert_eq!(
            sample.to_document(),
            serde_json::json!({
                "timestamp": "2024-01-02T03:04:05Z",
                "stats": { "numbackends": 2 },
            })
        );
    }
}
