// src/validate/mod.rs
//
// One-shot diagnostics. Each check gets a single attempt and its own timeout.

pub mod logscan;
pub mod metadata;

use crate::error::Result;
use crate::sys::traits::LogSource;
use logscan::{LogHealth, check_logs};
use metadata::{MetadataProbe, MetadataReport};

pub struct Diagnosis {
    pub metadata: Result<MetadataReport>,
    pub logs: Result<LogHealth>,
}

impl Diagnosis {
    pub fn is_healthy(&self) -> bool {
        self.metadata.is_ok() && matches!(&self.logs, Ok(health) if health.is_healthy())
    }
}

/// Runs both checks concurrently; neither can fail or time out the other.
pub async fn run_all(probe: &MetadataProbe, source: &dyn LogSource, window: usize) -> Diagnosis {
    let (metadata, logs) = tokio::join!(probe.check(), check_logs(source, window));
    Diagnosis { metadata, logs }
}
