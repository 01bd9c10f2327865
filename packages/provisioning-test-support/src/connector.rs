//! Connector that hands out [`RecordingTarget`]s and counts its sessions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use provisioning::error::ProvisionError;
use provisioning::target::Connector;

use crate::recording::RecordingTarget;

#[derive(Debug, Default)]
pub struct CountingConnector {
    connects: AtomicUsize,
    releases: AtomicUsize,
    refuse: AtomicBool,
}

impl CountingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later connect fails as if the server were down.
    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Sessions connected but not yet released.
    pub fn open(&self) -> usize {
        self.connects() - self.releases()
    }
}

#[async_trait]
impl Connector for CountingConnector {
    type Params = ();
    type Connection = RecordingTarget;

    async fn connect(&self, _params: &()) -> Result<RecordingTarget, ProvisionError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ProvisionError::Connect {
                target: "recording://".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingTarget::new())
    }

    async fn release(&self, _conn: &RecordingTarget) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
