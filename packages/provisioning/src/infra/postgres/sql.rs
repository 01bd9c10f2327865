//! Statement text for the PostgreSQL target.
//!
//! DDL cannot take bind parameters, so identifiers and literals are quoted
//! here and nowhere else.

use crate::model::{Durability, Role, TableSpec, UserSpec};

/// Longest identifier PostgreSQL stores without truncating.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const DML: &str = "SELECT, INSERT, UPDATE, DELETE";

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

pub fn index_name(table: &str, field: &str) -> String {
    format!("{table}_{field}_idx")
}

/// Inverse of [`index_name`]; `None` for indexes this tool did not create.
pub fn field_from_index_name<'a>(table: &str, index: &'a str) -> Option<&'a str> {
    index
        .strip_prefix(table)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix("_idx"))
        .filter(|field| !field.is_empty())
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA {}", quote_ident(schema))
}

/// Document table: text key, JSONB body, insertion time.
pub fn create_table(schema: &str, table: &TableSpec) -> Vec<String> {
    let unlogged = match table.options.durability {
        Durability::Soft => "UNLOGGED ",
        Durability::Hard => "",
    };
    let mut statements = vec![format!(
        "CREATE {unlogged}TABLE {} ({} TEXT PRIMARY KEY DEFAULT gen_random_uuid()::text, \
         doc JSONB NOT NULL DEFAULT '{{}}'::jsonb, \
         created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        qualified(schema, &table.name),
        quote_ident(&table.options.primary_key),
    )];
    if let Some(bytes) = table.options.capped_bytes {
        statements.push(format!(
            "COMMENT ON TABLE {} IS {}",
            qualified(schema, &table.name),
            quote_literal(&format!("capped_bytes={bytes}")),
        ));
    }
    statements
}

pub fn create_index(schema: &str, table: &str, field: &str) -> String {
    format!(
        "CREATE INDEX {} ON {} ((doc ->> {}))",
        quote_ident(&index_name(table, field)),
        qualified(schema, table),
        quote_literal(field),
    )
}

fn role_attributes(user: &UserSpec) -> String {
    let superuser = user.roles().iter().any(|g| g.role == Role::Root);
    format!(
        "LOGIN{} PASSWORD {}",
        if superuser { " SUPERUSER" } else { "" },
        quote_literal(&user.secret)
    )
}

pub fn create_role(user: &UserSpec) -> String {
    format!(
        "CREATE ROLE {} WITH {}",
        quote_ident(&user.username),
        role_attributes(user)
    )
}

pub fn alter_role(user: &UserSpec) -> String {
    format!(
        "ALTER ROLE {} WITH {}",
        quote_ident(&user.username),
        role_attributes(user)
    )
}

/// Privileges for every scoped role. `Root` is a role attribute, not a grant.
pub fn grants(user: &UserSpec) -> Vec<String> {
    let grantee = quote_ident(&user.username);
    let mut statements = Vec::new();
    for grant in user.roles() {
        let schema = quote_ident(&grant.database);
        let (schema_privs, table_privs) = match grant.role {
            Role::Root => continue,
            Role::ReadWrite => ("USAGE", DML),
            Role::DbAdmin => ("ALL", "ALL"),
            Role::Read => ("USAGE", "SELECT"),
        };
        statements.push(format!("GRANT {schema_privs} ON SCHEMA {schema} TO {grantee}"));
        statements.push(format!(
            "GRANT {table_privs} ON ALL TABLES IN SCHEMA {schema} TO {grantee}"
        ));
        statements.push(format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT {table_privs} ON TABLES TO {grantee}"
        ));
    }
    statements
}

pub fn insert_document(schema: &str, table: &str) -> String {
    format!("INSERT INTO {} (doc) VALUES ($1)", qualified(schema, table))
}

pub const LIST_SCHEMAS: &str = "SELECT schema_name AS name FROM information_schema.schemata ORDER BY schema_name";

pub const LIST_TABLES: &str = "SELECT table_name AS name FROM information_schema.tables \
     WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name";

pub const LIST_INDEXES: &str =
    "SELECT indexname AS name FROM pg_indexes WHERE schemaname = $1 AND tablename = $2 ORDER BY indexname";

pub const INDEX_READY: &str = "SELECT (i.indisvalid AND i.indisready) AS ready \
     FROM pg_index i \
     JOIN pg_class c ON c.oid = i.indexrelid \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = $1 AND c.relname = $2";

pub const SERVER_STATS: &str = "SELECT row_to_json(s)::jsonb AS payload \
     FROM pg_stat_database s WHERE s.datname = current_database()";

pub const QUERY_STATS: &str = "SELECT COALESCE(jsonb_agg(jsonb_build_object(\
     'pid', a.pid, 'user', a.usename, 'database', a.datname, 'state', a.state, \
     'backend_type', a.backend_type, 'wait_event', a.wait_event, \
     'query_start', a.query_start, 'query', a.query)), '[]'::jsonb) AS payload \
     FROM pg_stat_activity a WHERE a.pid <> pg_backend_pid()";

pub const TABLE_STATS: &str = "SELECT c.relname AS name, \
     COALESCE(s.n_live_tup, 0)::bigint AS document_count, \
     pg_relation_size(c.oid)::bigint AS data_bytes, \
     pg_total_relation_size(c.oid)::bigint AS storage_bytes, \
     (SELECT count(*) FROM pg_index i WHERE i.indrelid = c.oid)::bigint AS index_count, \
     pg_indexes_size(c.oid)::bigint AS index_bytes \
     FROM pg_class c \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     LEFT JOIN pg_stat_user_tables s ON s.relid = c.oid \
     WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') \
     ORDER BY c.relname";

pub const INDEX_STATS: &str = "SELECT t.relname AS table_name, ic.relname AS index_name, \
     pg_relation_size(ic.oid)::bigint AS size_bytes, \
     array_to_string(ARRAY(SELECT pg_get_indexdef(i.indexrelid, k, true) \
     FROM generate_series(1, i.indnatts) AS k ORDER BY k), ',') AS key_fields \
     FROM pg_index i \
     JOIN pg_class ic ON ic.oid = i.indexrelid \
     JOIN pg_class t ON t.oid = i.indrelid \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     WHERE n.nspname = $1 \
     ORDER BY t.relname, ic.relname";

// pg_stat_statements tracks per server database, not per schema.
pub const OPERATION_LOG: &str = "SELECT s.queryid::text AS id, s.query AS statement, \
     s.max_exec_time::float8 AS duration_ms, d.datname AS namespace \
     FROM pg_stat_statements s JOIN pg_database d ON d.oid = s.dbid \
     WHERE d.datname = current_database()";

pub const CURRENT_OPERATIONS: &str = "SELECT a.pid::text AS id, \
     COALESCE(a.state, '') AS state, \
     COALESCE(a.datname, '') AS namespace, \
     COALESCE(a.backend_type, '') AS description, \
     COALESCE(a.query, '') AS query, \
     COALESCE(EXTRACT(EPOCH FROM (now() - a.query_start)), 0)::float8 AS elapsed_seconds, \
     a.wait_event_type AS wait_event_type \
     FROM pg_stat_activity a WHERE a.pid <> pg_backend_pid() \
     ORDER BY a.query_start NULLS LAST";

pub const BLOCKED_SESSIONS: &str = "SELECT a.pid::text AS session, \
     array_to_string(pg_blocking_pids(a.pid), ',') AS blocked_by, \
     COALESCE(a.query, '') AS statement, \
     COALESCE(EXTRACT(EPOCH FROM (now() - a.query_start)), 0)::float8 AS waiting_seconds \
     FROM pg_stat_activity a WHERE cardinality(pg_blocking_pids(a.pid)) > 0 \
     ORDER BY a.query_start NULLS LAST";

pub const ENABLE_STATEMENT_STATS: &str = "CREATE EXTENSION IF NOT EXISTS pg_stat_statements";

pub const CURRENT_DATABASE: &str = "SELECT current_database() AS name";

pub fn log_slow_statements(database: &str, slow_ms: u64) -> String {
    format!(
        "ALTER DATABASE {} SET log_min_duration_statement = {slow_ms}",
        quote_ident(database)
    )
}

/// First keyword of a statement, lowercased.
pub fn statement_kind(statement: &str) -> String {
    statement
        .split_whitespace()
        .next()
        .map(|word| word.trim_start_matches('(').to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_and_literals_are_escaped() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn index_names_round_trip_through_field_lookup() {
        let name = index_name("comments", "post_id");
        assert_eq!(name, "comments_post_id_idx");
        assert_eq!(field_from_index_name("comments", &name), Some("post_id"));
        assert_eq!(field_from_index_name("comments", "comments_pkey"), None);
        assert_eq!(field_from_index_name("users", "comments_post_id_idx"), None);
    }

    #[test]
    fn soft_durability_creates_unlogged_table() {
        let table = TableSpec::new("users").durability(Durability::Soft);
        let statements = create_table("development", &table);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("CREATE UNLOGGED TABLE \"development\".\"users\""));
    }

    #[test]
    fn capped_table_records_its_bound() {
        let table = TableSpec::new("dev_logs").capped(100_000_000);
        let statements = create_table("development", &table);
        assert_eq!(
            statements[1],
            "COMMENT ON TABLE \"development\".\"dev_logs\" IS 'capped_bytes=100000000'"
        );
    }

    #[test]
    fn index_targets_document_field() {
        assert_eq!(
            create_index("development", "users", "email"),
            "CREATE INDEX \"users_email_idx\" ON \"development\".\"users\" ((doc ->> 'email'))"
        );
    }

    #[test]
    fn root_role_becomes_superuser_without_grants() {
        let admin = UserSpec::new("admin", "pw").grant(Role::Root, "admin");
        assert_eq!(
            create_role(&admin),
            "CREATE ROLE \"admin\" WITH LOGIN SUPERUSER PASSWORD 'pw'"
        );
        assert!(grants(&admin).is_empty());
    }

    #[test]
    fn read_write_grants_cover_existing_and_future_tables() {
        let dev = UserSpec::new("developer", "pw").grant(Role::ReadWrite, "development");
        assert_eq!(
            grants(&dev),
            vec![
                "GRANT USAGE ON SCHEMA \"development\" TO \"developer\"".to_string(),
                "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA \"development\" TO \"developer\"".to_string(),
                "ALTER DEFAULT PRIVILEGES IN SCHEMA \"development\" GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO \"developer\"".to_string(),
            ]
        );
    }

    #[test]
    fn statement_kind_takes_first_keyword() {
        assert_eq!(statement_kind("  SELECT * FROM t"), "select");
        assert_eq!(statement_kind("(SELECT 1)"), "select");
        assert_eq!(statement_kind(""), "");
    }
}
