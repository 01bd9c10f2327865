use clap::{Parser, Subcommand, ValueEnum};
use provisioning::bootstrap::Profile;
use provisioning::diagnostics::ProcedureArgs;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProfileArg {
    /// Log collections, create-only users, operation log
    Logs,
    /// Content tables, monitoring database, stats sampler
    Content,
}

impl From<ProfileArg> for Profile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Logs => Profile::Logs,
            ProfileArg::Content => Profile::Content,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "devdb")]
#[command(about = "Development database bootstrap and diagnostics")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Provision databases, users and diagnostics; then sample stats until interrupted
    Init {
        #[arg(long, value_enum, default_value = "content")]
        profile: ProfileArg,

        /// Exit after setup instead of sampling
        #[arg(long)]
        no_sample: bool,
    },
    /// Run a diagnostic procedure and print its report as JSON
    Report {
        /// showCollectionSizes | showSlowQueries | analyzeIndexes | showOperations
        procedure: String,

        /// Database to report on (defaults to DEV_DB_NAME)
        #[arg(long)]
        database: Option<String>,

        /// Slow-operation threshold (defaults to DEVDB_SLOW_MS)
        #[arg(long)]
        threshold_ms: Option<u64>,

        /// Include idle sessions in showOperations
        #[arg(long)]
        include_idle: bool,
    },
}

/// Report arguments, with unset flags falling back to configuration.
pub fn procedure_args(threshold_ms: Option<u64>, include_idle: bool, configured_ms: u64) -> ProcedureArgs {
    ProcedureArgs {
        threshold_ms: threshold_ms.unwrap_or(configured_ms),
        include_idle,
    }
}
