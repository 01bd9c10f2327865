//! Idempotent provisioning of a development database server.
//!
//! A bootstrap run ensures databases, tables and field indexes exist, creates
//! users with scoped roles, installs read-only diagnostic procedures and can
//! then sample server statistics into log tables until cancelled. Every step
//! is safe to rerun against a partially or fully provisioned server.
//!
//! The logic is written against the traits in [`target`]; [`infra::postgres`]
//! implements them for PostgreSQL.

pub mod blueprint;
pub mod bootstrap;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod infra;
pub mod model;
pub mod provision;
pub mod sampler;
pub mod target;
pub mod users;

pub use bootstrap::{run_bootstrap, BootstrapReport, Profile};
pub use config::{BootstrapConfig, ConnectionParams};
pub use diagnostics::{install_procedure, ProcedureArgs, ProcedureCatalog, Report};
pub use error::{DiagnosticsError, ProvisionError, SamplingError, Step, TargetError};
pub use infra::postgres::{PgConnector, PgTarget};
pub use model::{
    DatabaseHandle, Durability, ProvisionSpec, Role, StatCategory, StatSample, TableSpec, UserSpec,
};
pub use provision::{ensure_database, ensure_index, ensure_table, provision, ProvisionReport};
pub use sampler::{Clock, StatsSampler, SystemClock};
pub use target::{with_connection, Connector};
pub use users::{ensure_user, UserMode, UserOutcome};
