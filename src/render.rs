// src/render.rs

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use url::Url;

use crate::error::{NoProxyError, Result};
use crate::rules::{mandatory_patterns, validate_pattern};

/// Where a rendering will be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderTarget {
    /// `KEY=value`, as read from /etc/environment or a shell profile.
    EnvFile,
    /// `Environment="KEY=value"`, inside a `[Service]` stanza.
    SystemdOverride,
}

impl FromStr for RenderTarget {
    type Err = NoProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "env" | "env-file" => Ok(Self::EnvFile),
            "systemd" | "systemd-override" => Ok(Self::SystemdOverride),
            other => Err(NoProxyError::ConfigMalformed(format!(
                "Unknown render target '{}' (expected env or systemd)",
                other
            ))),
        }
    }
}

/// The uppercase- and lowercase-keyed forms of one variable.
///
/// Both are always emitted: curl and most Go/Python clients read the
/// lowercase name, while others only honour the uppercase one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedPair {
    pub upper: String,
    pub lower: String,
}

/// systemd expands `%` specifiers inside `Environment=` and unescapes C-style
/// within the quotes, so percent-encoded proxy credentials must be doubled.
fn systemd_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%%"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

fn render_line(key: &str, value: &str, target: RenderTarget) -> String {
    match target {
        RenderTarget::EnvFile => format!("{}={}", key, value),
        RenderTarget::SystemdOverride => format!("Environment=\"{}={}\"", key, systemd_escape(value)),
    }
}

fn render_pair(key: &str, value: &str, target: RenderTarget) -> RenderedPair {
    RenderedPair {
        upper: render_line(&key.to_ascii_uppercase(), value, target),
        lower: render_line(&key.to_ascii_lowercase(), value, target),
    }
}

/// Renders exactly the given entries, in order, as `NO_PROXY`/`no_proxy`.
///
/// No mandatory entries are added here; that guarantee belongs to `ProxyConfig`.
pub fn render_no_proxy<S: AsRef<str>>(entries: &[S], target: RenderTarget) -> Result<RenderedPair> {
    for entry in entries {
        validate_pattern(entry.as_ref())?;
    }
    let value = entries
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(",");
    Ok(render_pair("NO_PROXY", &value, target))
}

/// Parses a proxy URL, accepting the `host:port` shorthand people put in HTTP_PROXY.
pub fn parse_proxy_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&candidate).map_err(|e| NoProxyError::InvalidUrl {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
        return Err(NoProxyError::InvalidUrl {
            value: raw.to_string(),
            reason: format!("unsupported proxy scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(NoProxyError::InvalidUrl {
            value: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

/// `Url` always serializes a root path as a trailing slash; proxy variables
/// are conventionally written without it.
fn proxy_value(url: &Url) -> &str {
    let s = url.as_str();
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        s.trim_end_matches('/')
    } else {
        s
    }
}

/// The proxy settings for one target environment.
///
/// `no_proxy` starts as the full rule table; additions are appended and
/// can never displace a mandatory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    http_proxy: Option<Url>,
    https_proxy: Option<Url>,
    no_proxy: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self {
            http_proxy: None,
            https_proxy: None,
            no_proxy: mandatory_patterns().map(str::to_string).collect(),
        }
    }

    pub fn with_http_proxy(mut self, url: Url) -> Self {
        self.http_proxy = Some(url);
        self
    }

    pub fn with_https_proxy(mut self, url: Url) -> Self {
        self.https_proxy = Some(url);
        self
    }

    /// Appends additional exclusions after the rule table.
    /// Case-insensitive duplicates are dropped, first occurrence wins.
    pub fn with_exclusions<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            validate_pattern(pattern)?;
            if !self.no_proxy.iter().any(|p| p.eq_ignore_ascii_case(pattern)) {
                self.no_proxy.push(pattern.to_string());
            }
        }
        Ok(self)
    }

    pub fn render(&self, target: RenderTarget) -> Result<Rendering> {
        Ok(Rendering {
            http_proxy: self
                .http_proxy
                .as_ref()
                .map(|url| render_pair("HTTP_PROXY", proxy_value(url), target)),
            https_proxy: self
                .https_proxy
                .as_ref()
                .map(|url| render_pair("HTTPS_PROXY", proxy_value(url), target)),
            no_proxy: render_no_proxy(self.no_proxy.as_slice(), target)?,
        })
    }

    /// A complete drop-in body for `<unit>.d/<name>.conf`.
    pub fn render_override(&self) -> Result<String> {
        let rendering = self.render(RenderTarget::SystemdOverride)?;
        let mut out = String::from("# Managed by imds-noproxy\n[Service]\n");
        for line in rendering.lines() {
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }
}

/// All lines produced for one target, proxy URLs first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendering {
    pub http_proxy: Option<RenderedPair>,
    pub https_proxy: Option<RenderedPair>,
    pub no_proxy: RenderedPair,
}

impl Rendering {
    pub fn lines(&self) -> Vec<&str> {
        [&self.http_proxy, &self.https_proxy]
            .into_iter()
            .flatten()
            .chain(std::iter::once(&self.no_proxy))
            .flat_map(|pair| [pair.upper.as_str(), pair.lower.as_str()])
            .collect()
    }
}

impl fmt::Display for Rendering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
