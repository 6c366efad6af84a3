// src/error.rs

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Everything the tool can report back to the operator.
///
/// None of these are recovered from internally: every check is a one-shot
/// diagnostic and the operator decides what to do with the result.
#[derive(Error, Debug)]
pub enum NoProxyError {
    /// An exclusion pattern, unit name or config value that would corrupt the rendered output.
    #[error("Malformed configuration: {0}")]
    ConfigMalformed(String),

    #[error("Invalid proxy or endpoint URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    /// Network-level failure, unexpected status, or an empty instance id.
    #[error("Metadata unreachable at {url}: {reason}")]
    MetadataUnreachable { url: String, reason: String },

    /// Timeout or refused connection. On a proxied host this usually means
    /// the request was routed to the proxy instead of the link-local address.
    #[error("Metadata blocked at {url} after {elapsed:?}: {reason}")]
    MetadataBlocked {
        url: String,
        elapsed: Duration,
        reason: String,
    },

    #[error("Degraded: '{indicator}' found {occurrences} time(s), last: {line}")]
    LogIndicatorFound {
        indicator: String,
        occurrences: usize,
        line: String,
    },

    #[error("Log source error: {0}")]
    LogSource(String),

    #[error("systemctl {action} {unit} failed: {stderr}")]
    Service {
        unit: String,
        action: String,
        stderr: String,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NoProxyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable snake_case tag for JSON reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigMalformed(_) => "config_malformed",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::MetadataUnreachable { .. } => "metadata_unreachable",
            Self::MetadataBlocked { .. } => "metadata_blocked",
            Self::LogIndicatorFound { .. } => "log_indicator_found",
            Self::LogSource(_) => "log_source",
            Self::Service { .. } => "service",
            Self::Io { .. } => "io",
        }
    }

    /// Process exit code: 1 for a failed or degraded check, 2 for anything
    /// the operator has to fix before a check can even run.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MetadataUnreachable { .. }
            | Self::MetadataBlocked { .. }
            | Self::LogIndicatorFound { .. } => 1,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, NoProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_split_checks_from_config() {
        let blocked = NoProxyError::MetadataBlocked {
            url: "http://169.254.169.254".into(),
            elapsed: Duration::from_millis(2000),
            reason: "timed out".into(),
        };
        assert_eq!(blocked.exit_code(), 1);

        let degraded = NoProxyError::LogIndicatorFound {
            indicator: "failed to fetch IMDS token".into(),
            occurrences: 2,
            line: "ERROR failed to fetch IMDS token".into(),
        };
        assert_eq!(degraded.exit_code(), 1);

        assert_eq!(NoProxyError::ConfigMalformed("empty".into()).exit_code(), 2);
    }

    #[test]
    fn test_io_error_names_path() {
        let err = NoProxyError::io(
            "/etc/environment",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/etc/environment"));
    }
}
