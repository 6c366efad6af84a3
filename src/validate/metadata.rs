// src/validate/metadata.rs

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{NoProxyError, Result};

pub const TOKEN_PATH: &str = "latest/api/token";
pub const INSTANCE_ID_PATH: &str = "latest/meta-data/instance-id";
pub const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
pub const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "21600";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataReport {
    pub endpoint: String,
    pub instance_id: String,
    /// True when a session token was issued and used.
    pub imds_v2: bool,
    pub elapsed_ms: u64,
}

/// Fetches the instance id directly from IMDS, never through a proxy.
pub struct MetadataProbe {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl MetadataProbe {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        Self::with_builder(reqwest::Client::builder(), endpoint, timeout)
    }

    /// Finishes `builder` into the probe's client. Whatever proxies the
    /// builder carries are discarded.
    fn with_builder(builder: reqwest::ClientBuilder, endpoint: Url, timeout: Duration) -> Result<Self> {
        // 🛡️ `.no_proxy()` ignores HTTP(S)_PROXY entirely: this is the
        // "does the direct path work" check, whatever NO_PROXY says.
        let client = builder
            .no_proxy()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("imds-noproxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NoProxyError::MetadataUnreachable {
                url: endpoint.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        self.endpoint.join(path).map_err(|e| NoProxyError::InvalidUrl {
            value: format!("{}{}", self.endpoint, path),
            reason: e.to_string(),
        })
    }

    fn blocked(&self, url: &Url, started: Instant) -> NoProxyError {
        NoProxyError::MetadataBlocked {
            url: url.to_string(),
            elapsed: started.elapsed(),
            reason: format!("no response within {:?}", self.timeout),
        }
    }

    /// Timeouts and refused connections mean something is in the way;
    /// anything else is reported as plain unreachability.
    fn classify(&self, url: &Url, started: Instant, err: reqwest::Error) -> NoProxyError {
        if err.is_timeout() {
            self.blocked(url, started)
        } else if is_connection_refused(&err) {
            NoProxyError::MetadataBlocked {
                url: url.to_string(),
                elapsed: started.elapsed(),
                reason: "connection refused".to_string(),
            }
        } else {
            NoProxyError::MetadataUnreachable {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// One IMDSv2 token attempt within half the budget. Any failure, including
    /// a hung PUT behind a hop limit of 1, falls back to IMDSv1.
    async fn fetch_token(&self) -> Option<SecretString> {
        let url = self.url_for(TOKEN_PATH).ok()?;
        let response = match self
            .client
            .put(url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .timeout(self.timeout / 2)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "IMDSv2 token request failed, falling back to IMDSv1");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "IMDSv2 token not issued, falling back to IMDSv1");
            return None;
        }

        let token = response.text().await.ok()?;
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        Some(SecretString::from(token.to_string()))
    }

    /// The whole check, token included, is bounded by the configured timeout.
    pub async fn check(&self) -> Result<MetadataReport> {
        let started = Instant::now();
        let url = self.url_for(INSTANCE_ID_PATH)?;

        let report = tokio::time::timeout(self.timeout, self.fetch_instance_id(&url, started))
            .await
            .map_err(|_| self.blocked(&url, started))??;

        info!(
            instance_id = %report.instance_id,
            imds_v2 = report.imds_v2,
            elapsed_ms = report.elapsed_ms,
            "Metadata reachable without proxy"
        );
        Ok(report)
    }

    async fn fetch_instance_id(&self, url: &Url, started: Instant) -> Result<MetadataReport> {
        let token = self.fetch_token().await;

        let mut request = self.client.get(url.clone());
        if let Some(token) = &token {
            request = request.header(TOKEN_HEADER, token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.classify(url, started, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, url = %url, "Metadata endpoint answered with an error status");
            return Err(NoProxyError::MetadataUnreachable {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.classify(url, started, e))?;

        let instance_id = parse_instance_id(&body).ok_or_else(|| NoProxyError::MetadataUnreachable {
            url: url.to_string(),
            reason: "response did not contain an instance id".to_string(),
        })?;

        Ok(MetadataReport {
            endpoint: self.endpoint.to_string(),
            instance_id,
            imds_v2: token.is_some(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        if e.to_string().to_ascii_lowercase().contains("connection refused") {
            return true;
        }
        source = e.source();
    }
    false
}

/// IMDS answers in plain text; some proxies and test doubles wrap it in JSON.
fn parse_instance_id(body: &str) -> Option<String> {
    let body = body.trim();
    let id = if body.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        value
            .get("instance-id")
            .or_else(|| value.get("instanceId"))
            .and_then(|v| v.as_str())?
            .trim()
            .to_string()
    } else {
        body.to_string()
    };
    (!id.is_empty()).then_some(id)
}
