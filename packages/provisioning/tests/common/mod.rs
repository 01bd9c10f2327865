#![allow(dead_code)]

// tests/common/mod.rs
use provisioning::model::{ProvisionSpec, TableSpec};
use provisioning_test_support::Call;

// Logging is auto-installed for every test binary that declares `mod common;`
#[ctor::ctor]
fn init_logging() {
    provisioning_test_support::logging::init();
}

/// `development` with a single `users` table indexed on email and username.
pub fn users_spec() -> ProvisionSpec {
    ProvisionSpec::new("development").table(TableSpec::new("users").indexed(["email", "username"]))
}

/// Creation calls only, in order.
pub fn creates(calls: &[Call]) -> Vec<Call> {
    calls
        .iter()
        .filter(|c| {
            matches!(
                c,
                Call::CreateDatabase { .. } | Call::CreateTable { .. } | Call::CreateIndex { .. }
            )
        })
        .cloned()
        .collect()
}
