//! The ordered bootstrap run: provisioner, then users, then diagnostics.

use tracing::info;

use crate::blueprint;
use crate::config::BootstrapConfig;
use crate::diagnostics::{install_procedure, standard_procedures, ProcedureCatalog};
use crate::error::{ProvisionError, Step};
use crate::model::{Role, UserSpec};
use crate::provision::{provision, ProvisionReport};
use crate::target::{SchemaTarget, UserTarget};
use crate::users::{ensure_user, UserMode, UserOutcome};

pub const TEST_DATABASE: &str = "test";
pub const ADMIN_USER: &str = "admin";
const TEST_USER: &str = "tester";
const TEST_PASSWORD: &str = "test_password";

/// Which development layout to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Log collections, create-only users, operation log enabled.
    Logs,
    /// Content tables, a monitoring database and upserted users; samples stats.
    Content,
}

impl Profile {
    pub fn samples_stats(self) -> bool {
        matches!(self, Profile::Content)
    }
}

#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub provisioned: ProvisionReport,
    pub users: Vec<(String, UserOutcome)>,
    pub procedures: Vec<String>,
}

impl BootstrapReport {
    fn record_user(&mut self, user: &UserSpec, outcome: UserOutcome) {
        self.users.push((user.username.clone(), outcome));
    }
}

fn developer(config: &BootstrapConfig, roles: &[Role]) -> UserSpec {
    roles.iter().fold(
        UserSpec::new(&config.dev_user.username, &config.dev_user.password),
        |user, role| user.grant(*role, &config.dev_db_name),
    )
}

/// Runs the whole setup for `profile`. Any fatal error aborts the remaining steps.
pub async fn run_bootstrap<T>(
    conn: &T,
    config: &BootstrapConfig,
    profile: Profile,
    catalog: &mut ProcedureCatalog,
) -> Result<BootstrapReport, ProvisionError>
where
    T: SchemaTarget + UserTarget + ?Sized,
{
    info!(
        "bootstrap=start profile={:?} database={} test_db={}",
        profile, config.dev_db_name, config.create_test_db
    );
    let mut report = BootstrapReport::default();

    let mut specs = Vec::new();
    match profile {
        Profile::Logs => {
            specs.push(blueprint::log_store(&config.dev_db_name));
            if config.create_test_db {
                specs.push(blueprint::log_store(TEST_DATABASE));
            }
        }
        Profile::Content => {
            specs.push(blueprint::content_store(&config.dev_db_name));
            if config.create_test_db {
                specs.push(blueprint::content_store(TEST_DATABASE));
            }
            specs.push(blueprint::monitoring());
        }
    }
    for spec in &specs {
        let provisioned = provision(conn, spec).await?;
        report.provisioned.merge(&provisioned);
    }

    if let Some(root_password) = &config.root_password {
        let admin = UserSpec::new(ADMIN_USER, root_password).grant(Role::Root, ADMIN_USER);
        let outcome = ensure_user(conn, &admin, UserMode::CreateOnly).await?;
        report.record_user(&admin, outcome);
    }

    match profile {
        Profile::Logs => {
            let dev = developer(config, &[Role::ReadWrite, Role::DbAdmin]);
            let outcome = ensure_user(conn, &dev, UserMode::CreateOnly).await?;
            report.record_user(&dev, outcome);

            if config.create_test_db {
                let tester = UserSpec::new(TEST_USER, TEST_PASSWORD)
                    .grant(Role::ReadWrite, TEST_DATABASE)
                    .grant(Role::DbAdmin, TEST_DATABASE);
                let outcome = ensure_user(conn, &tester, UserMode::CreateOnly).await?;
                report.record_user(&tester, outcome);
            }
        }
        Profile::Content => {
            if config.dev_user.explicit {
                let dev = developer(config, &[Role::ReadWrite]);
                let outcome = ensure_user(conn, &dev, UserMode::Upsert).await?;
                report.record_user(&dev, outcome);
            }
        }
    }

    for procedure in standard_procedures() {
        report.procedures.push(procedure.id.clone());
        install_procedure(catalog, procedure);
    }

    if profile == Profile::Logs {
        let mut databases = vec![config.dev_db_name.as_str()];
        if config.create_test_db {
            databases.push(TEST_DATABASE);
        }
        for database in databases {
            conn.enable_operation_log(database, config.slow_threshold_ms)
                .await
                .map_err(|e| {
                    ProvisionError::at(
                        Step::OperationLog {
                            database: database.to_string(),
                        },
                        e,
                    )
                })?;
            info!(database, slow_ms = config.slow_threshold_ms, "Operation log enabled");
        }
    }

    info!(
        "bootstrap=done profile={:?} databases_created={} tables_created={} indexes_created={} users={} procedures={}",
        profile,
        report.provisioned.databases_created,
        report.provisioned.tables_created,
        report.provisioned.indexes_created,
        report.users.len(),
        report.procedures.len()
    );
    Ok(report)
}
