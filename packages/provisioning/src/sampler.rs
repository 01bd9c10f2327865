//! Periodic statistics sampling into append-only log tables.
//!
//! The sampler is a spawned task driven by a tokio interval and stopped by a
//! [`CancellationToken`]. Each tick also logs the server's current issues.
//! Failures inside a tick are logged and the loop continues with the next tick.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SamplePhase, SamplingError};
use crate::model::{StatCategory, StatSample};
use crate::target::StatsTarget;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
/// Shortest period the sampler accepts; tokio intervals cannot be zero.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);
pub const MONITORING_DATABASE: &str = "dev_monitoring";

/// Source of sample timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub appended: usize,
    pub failures: Vec<SamplingError>,
    /// System issues logged during the tick.
    pub issues: usize,
}

/// Totals over the sampler's lifetime, returned when it stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSummary {
    pub ticks: u64,
    pub appended: u64,
    pub failures: u64,
}

pub struct StatsSampler<T, C = SystemClock> {
    target: Arc<T>,
    clock: C,
    period: Duration,
    database: String,
}

impl<T> StatsSampler<T, SystemClock>
where
    T: StatsTarget + 'static,
{
    pub fn new(target: Arc<T>) -> Self {
        Self::with_clock(target, SystemClock)
    }
}

impl<T, C> StatsSampler<T, C>
where
    T: StatsTarget + 'static,
    C: Clock + 'static,
{
    pub fn with_clock(target: Arc<T>, clock: C) -> Self {
        Self {
            target,
            clock,
            period: DEFAULT_SAMPLE_INTERVAL,
            database: MONITORING_DATABASE.to_string(),
        }
    }

    /// Sets the tick period, raised to [`MIN_SAMPLE_INTERVAL`] if shorter.
    pub fn period(mut self, period: Duration) -> Self {
        if period < MIN_SAMPLE_INTERVAL {
            warn!(
                requested_ms = period.as_millis() as u64,
                "sample period too short; using the minimum"
            );
        }
        self.period = period.max(MIN_SAMPLE_INTERVAL);
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    async fn sample_category(&self, category: StatCategory) -> Result<(), SamplingError> {
        let read = match category {
            StatCategory::Server => self.target.server_stats().await,
            StatCategory::Query => self.target.query_stats().await,
        };
        let payload = read.map_err(|source| SamplingError {
            category,
            phase: SamplePhase::Read,
            source,
        })?;

        let sample = StatSample {
            timestamp: self.clock.now(),
            category,
            payload,
        };
        self.target
            .append_sample(&self.database, category.table(), &sample)
            .await
            .map_err(|source| SamplingError {
                category,
                phase: SamplePhase::Append,
                source,
            })
    }

    async fn log_issues(&self) -> usize {
        match self.target.current_issues().await {
            Ok(issues) => {
                for issue in &issues {
                    warn!(
                        session = %issue.session,
                        blocked_by = ?issue.blocked_by,
                        waiting_seconds = issue.waiting_seconds,
                        statement = %issue.statement,
                        "System issue"
                    );
                }
                issues.len()
            }
            Err(e) => {
                warn!(error = %e, "Error reading system issues");
                0
            }
        }
    }

    /// Samples every category once and logs current system issues.
    /// Never fails; failures are reported in the outcome.
    pub async fn tick(&self) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        for category in [StatCategory::Server, StatCategory::Query] {
            match self.sample_category(category).await {
                Ok(()) => outcome.appended += 1,
                Err(e) => {
                    warn!(error = %e, category = %category, "Error collecting stats");
                    outcome.failures.push(e);
                }
            }
        }
        outcome.issues = self.log_issues().await;
        outcome
    }

    /// Starts ticking one period from now until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<SamplerSummary> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut summary = SamplerSummary::default();

            info!(
                period_ms = self.period.as_millis() as u64,
                database = %self.database,
                "sampler=start"
            );

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = self.tick().await;
                        summary.ticks += 1;
                        summary.appended += outcome.appended as u64;
                        summary.failures += outcome.failures.len() as u64;
                        debug!(
                            tick = summary.ticks,
                            appended = outcome.appended,
                            failures = outcome.failures.len(),
                            issues = outcome.issues,
                            "sampler=tick"
                        );
                    }
                }
            }

            info!(
                ticks = summary.ticks,
                appended = summary.appended,
                failures = summary.failures,
                "sampler=stopped"
            );
            summary
        })
    }
}
