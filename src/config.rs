// src/config.rs

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{NoProxyError, Result};

pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254";
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_ENV_FILE: &str = "/etc/environment";
pub const DEFAULT_SYSTEMD_DIR: &str = "/etc/systemd/system";
pub const DEFAULT_LOG_PATH: &str = "/var/log/amazon/ssm/amazon-ssm-agent.log";
pub const DEFAULT_LOG_WINDOW: usize = 1000;

#[derive(Clone, Debug)]
pub struct ToolConfig {
    // 🛡️ Diagnostics
    pub metadata_endpoint: Url,
    pub timeout: Duration,

    // 📂 Platform Agnostic Paths
    pub env_file: PathBuf,
    pub systemd_dir: PathBuf,
    pub log_path: PathBuf,
    pub log_window: usize,

    // Proxy settings picked up from the invoking shell. Kept raw: only
    // render/apply parse them, so a value curl accepts but we don't
    // (socks4://, say) can't take down `rules` or the checks.
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub extra_exclusions: Vec<String>,
}

impl ToolConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't have to touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Numeric values are parsed strictly: a typo must not silently become the default.
        let timeout_ms = match get("NOPROXY_TIMEOUT_MS") {
            Some(raw) => parse_number::<u64>("NOPROXY_TIMEOUT_MS", &raw)?,
            None => DEFAULT_TIMEOUT_MS,
        };
        if timeout_ms == 0 {
            return Err(NoProxyError::ConfigMalformed(
                "NOPROXY_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let log_window = match get("NOPROXY_LOG_WINDOW") {
            Some(raw) => parse_number::<usize>("NOPROXY_LOG_WINDOW", &raw)?,
            None => DEFAULT_LOG_WINDOW,
        };

        let endpoint_raw =
            get("NOPROXY_METADATA_ENDPOINT").unwrap_or_else(|| DEFAULT_METADATA_ENDPOINT.to_string());
        let metadata_endpoint = parse_endpoint(&endpoint_raw)?;

        // Both spellings are honoured; uppercase wins when both are set.
        let http_proxy = get("HTTP_PROXY").or_else(|| get("http_proxy"));
        let https_proxy = get("HTTPS_PROXY").or_else(|| get("https_proxy"));

        let extra_exclusions = get("NOPROXY_EXTRA")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            metadata_endpoint,
            timeout: Duration::from_millis(timeout_ms),
            env_file: get("NOPROXY_ENV_FILE")
                .unwrap_or_else(|| DEFAULT_ENV_FILE.to_string())
                .into(),
            systemd_dir: get("NOPROXY_SYSTEMD_DIR")
                .unwrap_or_else(|| DEFAULT_SYSTEMD_DIR.to_string())
                .into(),
            log_path: get("NOPROXY_LOG_PATH")
                .unwrap_or_else(|| DEFAULT_LOG_PATH.to_string())
                .into(),
            log_window,
            http_proxy,
            https_proxy,
            extra_exclusions,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        NoProxyError::ConfigMalformed(format!("{} must be a non-negative integer, got '{}'", key, raw))
    })
}

/// The metadata endpoint is a base URL. A path prefix is kept and given a
/// trailing slash so `latest/...` is joined below it instead of replacing it.
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).map_err(|e| NoProxyError::InvalidUrl {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(NoProxyError::InvalidUrl {
            value: raw.to_string(),
            reason: format!("metadata endpoint must be http(s), got '{}'", url.scheme()),
        });
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(NoProxyError::InvalidUrl {
            value: raw.to_string(),
            reason: "metadata endpoint must not carry a query or fragment".to_string(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Comma-separated list, blanks dropped. Entries are validated later by `ProxyConfig`.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ToolConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ToolConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.metadata_endpoint.as_str(), "http://169.254.169.254/");
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert_eq!(config.env_file, PathBuf::from("/etc/environment"));
        assert_eq!(config.systemd_dir, PathBuf::from("/etc/systemd/system"));
        assert_eq!(config.log_window, 1000);
        assert!(config.http_proxy.is_none());
        assert!(config.extra_exclusions.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("NOPROXY_TIMEOUT_MS", "500"),
            ("NOPROXY_LOG_WINDOW", "50"),
            ("NOPROXY_ENV_FILE", "/tmp/env"),
            ("https_proxy", "proxy.corp:3128"),
            ("NOPROXY_EXTRA", " 10.0.0.0/8, ,.corp.example.com "),
        ])
        .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.log_window, 50);
        assert_eq!(config.env_file, PathBuf::from("/tmp/env"));
        assert_eq!(config.https_proxy.as_deref(), Some("proxy.corp:3128"));
        assert_eq!(config.extra_exclusions, vec!["10.0.0.0/8", ".corp.example.com"]);
    }

    #[test]
    fn test_uppercase_proxy_wins() {
        let config = config_from(&[
            ("HTTP_PROXY", "http://upper:1"),
            ("http_proxy", "http://lower:2"),
        ])
        .unwrap();
        assert_eq!(config.http_proxy.as_deref(), Some("http://upper:1"));
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(matches!(
            config_from(&[("NOPROXY_TIMEOUT_MS", "fast")]),
            Err(NoProxyError::ConfigMalformed(_))
        ));
        assert!(matches!(
            config_from(&[("NOPROXY_TIMEOUT_MS", "0")]),
            Err(NoProxyError::ConfigMalformed(_))
        ));
        assert!(matches!(
            config_from(&[("NOPROXY_METADATA_ENDPOINT", "not a url")]),
            Err(NoProxyError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_unsupported_shell_proxy_does_not_block_loading() {
        let config = config_from(&[("HTTPS_PROXY", "socks4://proxy.corp:1080")]).unwrap();
        assert_eq!(config.https_proxy.as_deref(), Some("socks4://proxy.corp:1080"));
        assert_eq!(config.metadata_endpoint.as_str(), "http://169.254.169.254/");
    }

    #[test]
    fn test_endpoint_path_is_kept_as_prefix() {
        let url = parse_endpoint("http://127.0.0.1:8080/imds").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/imds/");
        assert_eq!(
            url.join("latest/meta-data/instance-id").unwrap().as_str(),
            "http://127.0.0.1:8080/imds/latest/meta-data/instance-id"
        );
        assert_eq!(parse_endpoint("http://169.254.169.254").unwrap().as_str(), "http://169.254.169.254/");
        assert!(parse_endpoint("http://169.254.169.254/?x=1").is_err());
    }
}
