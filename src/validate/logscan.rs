// src/validate/logscan.rs

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::error::{NoProxyError, Result};
use crate::sys::traits::LogSource;

/// What the SSM agent logs when its IMDS traffic is being sent to the proxy.
pub const FAILURE_INDICATORS: &[&str] = &[
    "failed to assume any identity",
    "failed to fetch IMDS token",
];

// Leading `2024-05-01 12:00:00` (agent log) or `2024-05-01T12:00:00+0000` (journal short-iso).
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}:\d{2})").expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LogHealth {
    Healthy {
        scanned: usize,
    },
    Degraded {
        indicator: String,
        occurrences: usize,
        /// The most recent matching line.
        line: String,
        timestamp: Option<NaiveDateTime>,
    },
}

impl LogHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }

    /// Turns a degraded report into `LogIndicatorFound` for callers that only care about pass/fail.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Degraded {
                indicator,
                occurrences,
                line,
                ..
            } => Err(NoProxyError::LogIndicatorFound {
                indicator,
                occurrences,
                line,
            }),
            healthy => Ok(healthy),
        }
    }
}

pub fn parse_timestamp(line: &str) -> Option<NaiveDateTime> {
    let caps = TIMESTAMP.captures(line)?;
    let stamp = format!("{} {}", &caps[1], &caps[2]);
    NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S").ok()
}

/// Case-insensitive search for any failure indicator; the last match wins.
pub fn scan_lines<S: AsRef<str>>(lines: &[S]) -> LogHealth {
    let needles: Vec<String> = FAILURE_INDICATORS
        .iter()
        .map(|i| i.to_ascii_lowercase())
        .collect();

    let mut occurrences = 0;
    let mut last: Option<(usize, &str)> = None;

    for line in lines {
        let line = line.as_ref();
        let lowered = line.to_ascii_lowercase();
        if let Some(idx) = needles.iter().position(|n| lowered.contains(n.as_str())) {
            occurrences += 1;
            last = Some((idx, line));
        }
    }

    match last {
        None => LogHealth::Healthy {
            scanned: lines.len(),
        },
        Some((idx, line)) => LogHealth::Degraded {
            indicator: FAILURE_INDICATORS[idx].to_string(),
            occurrences,
            line: line.trim_end().to_string(),
            timestamp: parse_timestamp(line),
        },
    }
}

pub async fn check_logs(source: &dyn LogSource, window: usize) -> Result<LogHealth> {
    let lines = source.recent_lines(window).await?;
    let health = scan_lines(&lines);

    match &health {
        LogHealth::Healthy { scanned } => {
            info!(source = %source.describe(), scanned, "No proxy failure indicators in recent log window");
        }
        LogHealth::Degraded {
            indicator,
            occurrences,
            timestamp,
            ..
        } => {
            warn!(
                source = %source.describe(),
                indicator = %indicator,
                occurrences,
                last_seen = ?timestamp,
                "Proxy failure indicator found in recent log window"
            );
        }
    }
    Ok(health)
}
