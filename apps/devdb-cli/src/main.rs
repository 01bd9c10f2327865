use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use provisioning::bootstrap::{run_bootstrap, Profile};
use provisioning::config::BootstrapConfig;
use provisioning::diagnostics::ProcedureCatalog;
use provisioning::error::{DiagnosticsError, ProvisionError};
use provisioning::infra::postgres::{PgConnector, PgTarget};
use provisioning::sampler::StatsSampler;
use provisioning::target::with_connection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod cli;
mod telemetry;

use cli::{procedure_args, Args, Command};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version come through here too
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    // A missing .env is fine; variables may come from the environment.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let config = match BootstrapConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let connector = PgConnector::default();
    let outcome = with_connection(&connector, &config.connection, |conn| {
        run(conn, args.command, &config)
    })
    .await;
    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Could not connect");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(conn: Arc<PgTarget>, command: Command, config: &BootstrapConfig) -> ExitCode {
    match command {
        Command::Init { profile, no_sample } => {
            match init(conn, config, profile.into(), !no_sample).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, step = ?e.step(), "Bootstrap failed");
                    ExitCode::from(EXIT_FAILURE)
                }
            }
        }
        Command::Report {
            procedure,
            database,
            threshold_ms,
            include_idle,
        } => {
            let database = database.unwrap_or_else(|| config.dev_db_name.clone());
            let args = procedure_args(threshold_ms, include_idle, config.slow_threshold_ms);
            match ProcedureCatalog::standard()
                .invoke(&procedure, &*conn, &database, &args)
                .await
            {
                Ok(report) => match serde_json::to_string_pretty(&report) {
                    Ok(json) => {
                        println!("{json}");
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        error!(error = %e, "Could not serialize report");
                        ExitCode::from(EXIT_FAILURE)
                    }
                },
                Err(e @ DiagnosticsError::UnknownProcedure { .. }) => {
                    eprintln!("{e}");
                    ExitCode::from(EXIT_USAGE)
                }
                Err(e) => {
                    error!(error = %e, "Report failed");
                    ExitCode::from(EXIT_FAILURE)
                }
            }
        }
    }
}

async fn init(
    conn: Arc<PgTarget>,
    config: &BootstrapConfig,
    profile: Profile,
    sample: bool,
) -> Result<(), ProvisionError> {
    let mut catalog = ProcedureCatalog::new();
    let report = run_bootstrap(&*conn, config, profile, &mut catalog).await?;
    info!(
        databases_created = report.provisioned.databases_created,
        tables_created = report.provisioned.tables_created,
        indexes_created = report.provisioned.indexes_created,
        procedures = ?report.procedures,
        "Development databases are ready"
    );

    if !(sample && profile.samples_stats()) {
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let sampler = StatsSampler::new(conn)
        .period(config.sample_interval)
        .spawn(cancel.clone());
    info!("Sampling stats; press Ctrl-C to stop");

    shutdown_signal().await;
    cancel.cancel();
    match sampler.await {
        Ok(summary) => info!(
            ticks = summary.ticks,
            appended = summary.appended,
            failures = summary.failures,
            "Sampler stopped"
        ),
        Err(e) => warn!(error = %e, "Sampler task ended abnormally"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
