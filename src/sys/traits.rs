// src/sys/traits.rs
//
// 🛡️ SOLID: the CLI only talks to these contracts, so tests and alternate
// platforms can swap the concrete managers without touching main.rs.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

use crate::error::Result;
use crate::render::Rendering;

// ==============================================================================
// 1. Process-wide Environment File
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    Changed,
    Unchanged,
}

#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Replaces the variables named by `rendering` and leaves every other line alone.
    async fn apply(&self, rendering: &Rendering) -> Result<ApplyOutcome>;
}

// ==============================================================================
// 2. Service Overrides
// ==============================================================================

/// Services don't inherit /etc/environment, so each one needs its own drop-in
/// followed by a daemon reload and a restart.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Writes the drop-in body for `unit` and returns the path written.
    async fn write_override(&self, unit: &str, body: &str) -> Result<(PathBuf, ApplyOutcome)>;
    async fn reload_daemon(&self) -> Result<()>;
    async fn restart(&self, unit: &str) -> Result<()>;
}

// ==============================================================================
// 3. Log Sources (Diagnostics)
// ==============================================================================

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Human-readable name for reports, e.g. a file path or `journal:<unit>`.
    fn describe(&self) -> String;

    /// At most `window` of the most recent lines, oldest first.
    async fn recent_lines(&self, window: usize) -> Result<Vec<String>>;
}
