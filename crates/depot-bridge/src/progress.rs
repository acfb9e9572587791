//! Progress observers
//!
//! Backends report command start/stop and intermediate ticks to a
//! [`ProgressSink`]. Nothing in the bridge depends on these notifications.

use std::fmt::Debug;

/// Observer for backend command progress
pub trait ProgressSink: Send + Sync + Debug {
    /// Command `key` started
    fn start(&self, key: u32);

    /// Command `key` finished
    fn stop(&self, key: u32);

    /// Intermediate progress for command `key`; return `false` to request
    /// cancellation where the backend supports it
    fn tick(&self, key: u32, marker: Option<&str>) -> bool;
}

/// Ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn start(&self, _key: u32) {}

    fn stop(&self, _key: u32) {}

    fn tick(&self, _key: u32, _marker: Option<&str>) -> bool {
        true
    }
}

/// Forwards notifications to `tracing` at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn start(&self, key: u32) {
        tracing::debug!(key, "starting command");
    }

    fn stop(&self, key: u32) {
        tracing::debug!(key, "stopping command");
    }

    fn tick(&self, key: u32, marker: Option<&str>) -> bool {
        if let Some(marker) = marker {
            tracing::debug!(key, marker, "command progress");
        }
        true
    }
}
