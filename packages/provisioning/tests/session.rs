mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use provisioning::bootstrap::{run_bootstrap, Profile};
use provisioning::config::BootstrapConfig;
use provisioning::diagnostics::ProcedureCatalog;
use provisioning::error::{ProvisionError, Step, TargetError};
use provisioning::target::with_connection;
use provisioning_test_support::{Call, CountingConnector};

fn config() -> BootstrapConfig {
    let vars: HashMap<String, String> = HashMap::from([
        ("POSTGRES_USER".to_string(), "postgres".to_string()),
        ("POSTGRES_PASSWORD".to_string(), "postgres".to_string()),
    ]);
    BootstrapConfig::from_lookup(&move |key: &str| vars.get(key).cloned()).expect("valid config")
}

/// Test: a successful run releases its session once
#[tokio::test]
async fn test_session_released_after_success() -> Result<(), ProvisionError> {
    let connector = CountingConnector::new();
    let config = config();
    let mut catalog = ProcedureCatalog::new();

    let report = with_connection(&connector, &(), |target| async move {
        run_bootstrap(&*target, &config, Profile::Logs, &mut catalog).await
    })
    .await??;

    assert!(report.provisioned.created_anything());
    assert_eq!(connector.connects(), 1);
    assert_eq!(connector.releases(), 1);
    Ok(())
}

/// Test: a failing run still releases its session and hands the failure back
#[tokio::test]
async fn test_session_released_after_failure() -> Result<(), ProvisionError> {
    let connector = CountingConnector::new();
    let config = config();
    let mut catalog = ProcedureCatalog::new();

    let outcome = with_connection(&connector, &(), |target| async move {
        target.fail(
            Call::create_database("development"),
            TargetError::failed("permission denied to create schema"),
        );
        run_bootstrap(&*target, &config, Profile::Logs, &mut catalog).await
    })
    .await?;

    let err = outcome.expect_err("bootstrap must fail");
    assert_eq!(
        err.step(),
        Some(&Step::Database {
            database: "development".into()
        })
    );
    assert_eq!(connector.releases(), 1);
    assert_eq!(connector.open(), 0);
    Ok(())
}

/// Test: a refused connection never runs the body and has nothing to release
#[tokio::test]
async fn test_refused_connection_skips_run() {
    let connector = CountingConnector::new();
    connector.refuse_connections();
    let ran = AtomicBool::new(false);

    let err = with_connection(&connector, &(), |_target| async {
        ran.store(true, Ordering::SeqCst);
    })
    .await
    .expect_err("connect must fail");

    assert!(matches!(err, ProvisionError::Connect { .. }));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(connector.connects(), 0);
    assert_eq!(connector.releases(), 0);
}
