//! Test support for the provisioning crate.
//!
//! [`RecordingTarget`] is an in-memory database server that implements every
//! target trait, records each call in order and fails on demand. Logging is
//! initialized once per test binary through [`logging::init`].
//! [`CountingConnector`] counts the sessions it opens and releases.

pub mod connector;
pub mod logging;
pub mod recording;

pub use connector::CountingConnector;
pub use recording::{Call, Op, RecordingTarget, TestClock};
