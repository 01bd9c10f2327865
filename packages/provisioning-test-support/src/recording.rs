//! In-memory target that records every call.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use provisioning::error::TargetError;
use provisioning::model::{StatSample, TableSpec, UserSpec};
use provisioning::sampler::Clock;
use provisioning::target::{
    CurrentOperation, IndexStats, Introspect, RecordedOperation, SchemaTarget, StatsTarget,
    SystemIssue, TableStats, UserTarget,
};
use serde_json::json;
use time::OffsetDateTime;

/// One call made against the target, with the arguments that identify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListDatabases,
    CreateDatabase { database: String },
    ListTables { database: String },
    CreateTable { database: String, table: String },
    ListIndexes { database: String, table: String },
    CreateIndex { database: String, table: String, field: String },
    WaitForIndex { database: String, table: String, field: String },
    EnableOperationLog { database: String, slow_ms: u64 },
    CreateUser { username: String },
    UpsertUser { username: String },
    ServerStats,
    QueryStats,
    CurrentIssues,
    AppendSample { database: String, table: String },
    TableStats { database: String },
    IndexStats { database: String },
    OperationLog { database: String },
    CurrentOperations,
}

/// Kind of a [`Call`], without arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListDatabases,
    CreateDatabase,
    ListTables,
    CreateTable,
    ListIndexes,
    CreateIndex,
    WaitForIndex,
    EnableOperationLog,
    CreateUser,
    UpsertUser,
    ServerStats,
    QueryStats,
    CurrentIssues,
    AppendSample,
    TableStats,
    IndexStats,
    OperationLog,
    CurrentOperations,
}

impl Call {
    pub fn create_database(database: &str) -> Self {
        Call::CreateDatabase {
            database: database.to_string(),
        }
    }

    pub fn create_table(database: &str, table: &str) -> Self {
        Call::CreateTable {
            database: database.to_string(),
            table: table.to_string(),
        }
    }

    pub fn create_index(database: &str, table: &str, field: &str) -> Self {
        Call::CreateIndex {
            database: database.to_string(),
            table: table.to_string(),
            field: field.to_string(),
        }
    }

    pub fn wait_for_index(database: &str, table: &str, field: &str) -> Self {
        Call::WaitForIndex {
            database: database.to_string(),
            table: table.to_string(),
            field: field.to_string(),
        }
    }

    pub fn create_user(username: &str) -> Self {
        Call::CreateUser {
            username: username.to_string(),
        }
    }

    pub fn append_sample(database: &str, table: &str) -> Self {
        Call::AppendSample {
            database: database.to_string(),
            table: table.to_string(),
        }
    }

    pub fn op(&self) -> Op {
        match self {
            Call::ListDatabases => Op::ListDatabases,
            Call::CreateDatabase { .. } => Op::CreateDatabase,
            Call::ListTables { .. } => Op::ListTables,
            Call::CreateTable { .. } => Op::CreateTable,
            Call::ListIndexes { .. } => Op::ListIndexes,
            Call::CreateIndex { .. } => Op::CreateIndex,
            Call::WaitForIndex { .. } => Op::WaitForIndex,
            Call::EnableOperationLog { .. } => Op::EnableOperationLog,
            Call::CreateUser { .. } => Op::CreateUser,
            Call::UpsertUser { .. } => Op::UpsertUser,
            Call::ServerStats => Op::ServerStats,
            Call::QueryStats => Op::QueryStats,
            Call::CurrentIssues => Op::CurrentIssues,
            Call::AppendSample { .. } => Op::AppendSample,
            Call::TableStats { .. } => Op::TableStats,
            Call::IndexStats { .. } => Op::IndexStats,
            Call::OperationLog { .. } => Op::OperationLog,
            Call::CurrentOperations => Op::CurrentOperations,
        }
    }

    /// Listing, statistics and introspection calls.
    pub fn is_read(&self) -> bool {
        matches!(
            self.op(),
            Op::ListDatabases
                | Op::ListTables
                | Op::ListIndexes
                | Op::ServerStats
                | Op::QueryStats
                | Op::CurrentIssues
                | Op::TableStats
                | Op::IndexStats
                | Op::OperationLog
                | Op::CurrentOperations
        )
    }
}

enum Trigger {
    Every(Call),
    Nth(Op, usize),
}

struct Fault {
    trigger: Trigger,
    error: TargetError,
}

#[derive(Default)]
struct State {
    databases: BTreeSet<String>,
    tables: BTreeMap<String, Vec<TableSpec>>,
    indexes: BTreeSet<(String, String, String)>,
    users: BTreeMap<String, UserSpec>,
    samples: Vec<(String, String, StatSample)>,
    operation_logs: BTreeMap<String, u64>,
    table_stats: BTreeMap<String, Vec<TableStats>>,
    index_stats: BTreeMap<String, Vec<IndexStats>>,
    recorded: BTreeMap<String, Vec<RecordedOperation>>,
    current: Vec<CurrentOperation>,
    issues: Vec<SystemIssue>,
    calls: Vec<Call>,
    counts: HashMap<Op, usize>,
    faults: Vec<Fault>,
}

impl State {
    fn has_table(&self, database: &str, table: &str) -> bool {
        self.tables
            .get(database)
            .is_some_and(|tables| tables.iter().any(|t| t.name == table))
    }
}

/// In-memory database server. Creating something that exists fails with
/// [`TargetError::AlreadyExists`], like a real server would.
#[derive(Default)]
pub struct RecordingTarget {
    state: Mutex<State>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Logs the call and returns the injected error, if any, for it.
    fn record(&self, call: Call) -> Result<usize, TargetError> {
        let mut state = self.state();
        let op = call.op();
        let count = {
            let count = state.counts.entry(op).or_insert(0);
            *count += 1;
            *count
        };
        let injected = state.faults.iter().find_map(|fault| {
            let hit = match &fault.trigger {
                Trigger::Every(expected) => *expected == call,
                Trigger::Nth(expected, n) => *expected == op && *n == count,
            };
            hit.then(|| fault.error.clone())
        });
        state.calls.push(call);
        match injected {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }

    // Seeding. None of these are recorded as calls.

    pub fn seed_database(&self, database: &str) {
        self.state().databases.insert(database.to_string());
    }

    pub fn seed_table(&self, database: &str, table: TableSpec) {
        let mut state = self.state();
        state.databases.insert(database.to_string());
        state
            .tables
            .entry(database.to_string())
            .or_default()
            .push(table);
    }

    pub fn seed_index(&self, database: &str, table: &str, field: &str) {
        self.state()
            .indexes
            .insert((database.to_string(), table.to_string(), field.to_string()));
    }

    pub fn seed_user(&self, user: UserSpec) {
        self.state().users.insert(user.username.clone(), user);
    }

    pub fn set_table_stats(&self, database: &str, stats: Vec<TableStats>) {
        self.state().table_stats.insert(database.to_string(), stats);
    }

    pub fn set_index_stats(&self, database: &str, stats: Vec<IndexStats>) {
        self.state().index_stats.insert(database.to_string(), stats);
    }

    pub fn set_operation_log(&self, database: &str, operations: Vec<RecordedOperation>) {
        self.state().recorded.insert(database.to_string(), operations);
    }

    pub fn set_current_operations(&self, operations: Vec<CurrentOperation>) {
        self.state().current = operations;
    }

    pub fn set_issues(&self, issues: Vec<SystemIssue>) {
        self.state().issues = issues;
    }

    /// Fails every call equal to `call`.
    pub fn fail(&self, call: Call, error: TargetError) {
        self.state().faults.push(Fault {
            trigger: Trigger::Every(call),
            error,
        });
    }

    /// Fails the `n`th call (1-based) of kind `op`.
    pub fn fail_nth(&self, op: Op, n: usize, error: TargetError) {
        self.state().faults.push(Fault {
            trigger: Trigger::Nth(op, n),
            error,
        });
    }

    // Inspection.

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Calls that create, change or wait on something.
    pub fn effects(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| !c.is_read())
            .cloned()
            .collect()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state().counts.get(&op).copied().unwrap_or(0)
    }

    pub fn clear_calls(&self) {
        let mut state = self.state();
        state.calls.clear();
        state.counts.clear();
    }

    pub fn databases(&self) -> Vec<String> {
        self.state().databases.iter().cloned().collect()
    }

    pub fn tables(&self, database: &str) -> Vec<String> {
        self.state()
            .tables
            .get(database)
            .map(|tables| tables.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn table(&self, database: &str, table: &str) -> Option<TableSpec> {
        self.state()
            .tables
            .get(database)
            .and_then(|tables| tables.iter().find(|t| t.name == table).cloned())
    }

    pub fn indexed_fields(&self, database: &str, table: &str) -> Vec<String> {
        self.state()
            .indexes
            .iter()
            .filter(|(db, t, _)| db == database && t == table)
            .map(|(_, _, field)| field.clone())
            .collect()
    }

    pub fn user(&self, username: &str) -> Option<UserSpec> {
        self.state().users.get(username).cloned()
    }

    pub fn samples(&self) -> Vec<(String, String, StatSample)> {
        self.state().samples.clone()
    }

    pub fn operation_log_threshold(&self, database: &str) -> Option<u64> {
        self.state().operation_logs.get(database).copied()
    }
}

fn exists(kind: &str, name: &str) -> TargetError {
    TargetError::already_exists(format!("{kind} \"{name}\" already exists"))
}

#[async_trait]
impl SchemaTarget for RecordingTarget {
    async fn list_databases(&self) -> Result<Vec<String>, TargetError> {
        self.record(Call::ListDatabases)?;
        Ok(self.databases())
    }

    async fn create_database(&self, database: &str) -> Result<(), TargetError> {
        self.record(Call::create_database(database))?;
        if !self.state().databases.insert(database.to_string()) {
            return Err(exists("database", database));
        }
        Ok(())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, TargetError> {
        self.record(Call::ListTables {
            database: database.to_string(),
        })?;
        Ok(self.tables(database))
    }

    async fn create_table(&self, database: &str, table: &TableSpec) -> Result<(), TargetError> {
        self.record(Call::create_table(database, &table.name))?;
        let mut state = self.state();
        if !state.databases.contains(database) {
            return Err(TargetError::failed(format!(
                "database \"{database}\" does not exist"
            )));
        }
        if state.has_table(database, &table.name) {
            return Err(exists("table", &table.name));
        }
        state
            .tables
            .entry(database.to_string())
            .or_default()
            .push(table.clone());
        Ok(())
    }

    async fn list_indexes(&self, database: &str, table: &str) -> Result<Vec<String>, TargetError> {
        self.record(Call::ListIndexes {
            database: database.to_string(),
            table: table.to_string(),
        })?;
        Ok(self.indexed_fields(database, table))
    }

    async fn create_index(&self, database: &str, table: &str, field: &str) -> Result<(), TargetError> {
        self.record(Call::create_index(database, table, field))?;
        let mut state = self.state();
        if !state.has_table(database, table) {
            return Err(TargetError::failed(format!(
                "table \"{database}.{table}\" does not exist"
            )));
        }
        let key = (database.to_string(), table.to_string(), field.to_string());
        if !state.indexes.insert(key) {
            return Err(exists("index", &format!("{table}_{field}_idx")));
        }
        Ok(())
    }

    async fn wait_for_index(&self, database: &str, table: &str, field: &str) -> Result<(), TargetError> {
        self.record(Call::wait_for_index(database, table, field))?;
        let key = (database.to_string(), table.to_string(), field.to_string());
        if self.state().indexes.contains(&key) {
            Ok(())
        } else {
            Err(TargetError::failed(format!(
                "index on '{field}' of \"{database}.{table}\" does not exist"
            )))
        }
    }

    async fn enable_operation_log(&self, database: &str, slow_ms: u64) -> Result<(), TargetError> {
        self.record(Call::EnableOperationLog {
            database: database.to_string(),
            slow_ms,
        })?;
        self.state()
            .operation_logs
            .insert(database.to_string(), slow_ms);
        Ok(())
    }
}

#[async_trait]
impl UserTarget for RecordingTarget {
    async fn create_user(&self, user: &UserSpec) -> Result<(), TargetError> {
        self.record(Call::create_user(&user.username))?;
        let mut state = self.state();
        if state.users.contains_key(&user.username) {
            return Err(exists("user", &user.username));
        }
        state.users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn upsert_user(&self, user: &UserSpec) -> Result<(), TargetError> {
        self.record(Call::UpsertUser {
            username: user.username.clone(),
        })?;
        self.state()
            .users
            .insert(user.username.clone(), user.clone());
        Ok(())
    }
}

#[async_trait]
impl StatsTarget for RecordingTarget {
    async fn server_stats(&self) -> Result<serde_json::Value, TargetError> {
        let n = self.record(Call::ServerStats)?;
        Ok(json!({ "read": n, "connections": 1 }))
    }

    async fn query_stats(&self) -> Result<serde_json::Value, TargetError> {
        let n = self.record(Call::QueryStats)?;
        Ok(json!([{ "read": n, "state": "active" }]))
    }

    async fn current_issues(&self) -> Result<Vec<SystemIssue>, TargetError> {
        self.record(Call::CurrentIssues)?;
        Ok(self.state().issues.clone())
    }

    async fn append_sample(
        &self,
        database: &str,
        table: &str,
        sample: &StatSample,
    ) -> Result<(), TargetError> {
        self.record(Call::append_sample(database, table))?;
        self.state()
            .samples
            .push((database.to_string(), table.to_string(), sample.clone()));
        Ok(())
    }
}

#[async_trait]
impl Introspect for RecordingTarget {
    async fn table_stats(&self, database: &str) -> Result<Vec<TableStats>, TargetError> {
        self.record(Call::TableStats {
            database: database.to_string(),
        })?;
        Ok(self
            .state()
            .table_stats
            .get(database)
            .cloned()
            .unwrap_or_default())
    }

    async fn index_stats(&self, database: &str) -> Result<Vec<IndexStats>, TargetError> {
        self.record(Call::IndexStats {
            database: database.to_string(),
        })?;
        Ok(self
            .state()
            .index_stats
            .get(database)
            .cloned()
            .unwrap_or_default())
    }

    async fn operation_log(&self, database: &str) -> Result<Vec<RecordedOperation>, TargetError> {
        self.record(Call::OperationLog {
            database: database.to_string(),
        })?;
        Ok(self
            .state()
            .recorded
            .get(database)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_operations(&self) -> Result<Vec<CurrentOperation>, TargetError> {
        self.record(Call::CurrentOperations)?;
        Ok(self.state().current.clone())
    }
}

/// Clock for sampler tests: starts at a fixed instant and advances by
/// `step` on every read.
pub struct TestClock {
    start: OffsetDateTime,
    step: time::Duration,
    reads: AtomicI32,
}

impl TestClock {
    pub fn fixed(start: OffsetDateTime) -> Self {
        Self::stepping(start, time::Duration::ZERO)
    }

    pub fn stepping(start: OffsetDateTime, step: time::Duration) -> Self {
        Self {
            start,
            step,
            reads: AtomicI32::new(0),
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> OffsetDateTime {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        self.start + self.step * n
    }
}
