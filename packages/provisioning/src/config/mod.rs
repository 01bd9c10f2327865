//! Environment-driven configuration, read once at process start.

pub mod db;

use std::str::FromStr;
use std::time::Duration;

use crate::diagnostics::DEFAULT_SLOW_THRESHOLD_MS;
use crate::error::ProvisionError;
use crate::sampler::DEFAULT_SAMPLE_INTERVAL;

pub use db::{sanitize_db_url, ConnectionParams};

/// Variable lookup; `std::env::var` in production, a map in tests.
pub type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

fn or_default(lookup: &Lookup<'_>, name: &str, default: &str) -> String {
    lookup(name)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T: FromStr>(lookup: &Lookup<'_>, name: &str, default: T) -> Result<T, ProvisionError> {
    match lookup(name).filter(|v| !v.is_empty()) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ProvisionError::config(format!("Environment variable '{name}' has invalid value '{raw}'"))
        }),
        None => Ok(default),
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct DevUser {
    pub username: String,
    pub password: String,
    /// Both the name and the password came from the environment.
    pub explicit: bool,
}

impl std::fmt::Debug for DevUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevUser")
            .field("username", &self.username)
            .field("password", &"***")
            .field("explicit", &self.explicit)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub connection: ConnectionParams,
    pub root_password: Option<String>,
    pub dev_db_name: String,
    pub dev_user: DevUser,
    pub create_test_db: bool,
    pub sample_interval: Duration,
    pub slow_threshold_ms: u64,
}

impl BootstrapConfig {
    pub fn from_env() -> Result<Self, ProvisionError> {
        Self::from_lookup(&|name: &str| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ProvisionError> {
        let connection = ConnectionParams::from_lookup(lookup)?;

        let user = lookup("DEV_DB_USER").filter(|v| !v.is_empty());
        let password = lookup("DEV_DB_PASSWORD").filter(|v| !v.is_empty());
        let explicit = user.is_some() && password.is_some();
        let dev_user = DevUser {
            username: user.unwrap_or_else(|| "developer".to_string()),
            password: password.unwrap_or_else(|| "developer_password".to_string()),
            explicit,
        };

        let sample_interval_ms = parse_var(
            lookup,
            "DEVDB_SAMPLE_INTERVAL_MS",
            DEFAULT_SAMPLE_INTERVAL.as_millis() as u64,
        )?;
        if sample_interval_ms == 0 {
            return Err(ProvisionError::config(
                "DEVDB_SAMPLE_INTERVAL_MS must be greater than zero",
            ));
        }

        Ok(Self {
            connection,
            root_password: lookup("DEVDB_ROOT_PASSWORD").filter(|v| !v.is_empty()),
            dev_db_name: or_default(lookup, "DEV_DB_NAME", "development"),
            dev_user,
            create_test_db: lookup("CREATE_TEST_DB").as_deref() == Some("true"),
            sample_interval: Duration::from_millis(sample_interval_ms),
            slow_threshold_ms: parse_var(lookup, "DEVDB_SLOW_MS", DEFAULT_SLOW_THRESHOLD_MS)?,
        })
    }
}
