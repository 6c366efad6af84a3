// src/cli.rs

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{ToolConfig, parse_endpoint};
use crate::error::Result;
use crate::render::{ProxyConfig, RenderTarget, parse_proxy_url};
use crate::sys::systemd::DEFAULT_DROP_IN;

/// imds-noproxy - keep instance metadata traffic off the corporate proxy
///
/// Renders the recommended NO_PROXY exclusions for EC2 hosts, applies them
/// to /etc/environment or a systemd service, and checks that the metadata
/// service is reachable directly.
#[derive(Parser, Debug)]
#[command(name = "imds-noproxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the built-in exclusion table with the reason for each entry
    Rules,

    /// Print NO_PROXY/no_proxy lines for an environment file or a systemd override
    #[command(after_help = "EXAMPLES:
    # Lines for /etc/environment
    imds-noproxy render

    # Environment= directives for a service override, plus the VPC range
    imds-noproxy render --target systemd --extra 10.0.0.0/8
")]
    Render(RenderArgs),

    /// Write the rendered settings to the system
    #[command(subcommand)]
    Apply(ApplyCommand),

    /// Run diagnostics (exit 0 when healthy, 1 when a check fails)
    #[command(subcommand)]
    Check(CheckCommand),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ProxyArgs {
    /// Additional exclusion appended after the built-in table (repeatable)
    #[arg(long = "extra", value_name = "PATTERN")]
    pub extra: Vec<String>,

    /// HTTP proxy URL to render alongside NO_PROXY [default: $HTTP_PROXY]
    #[arg(long, value_name = "URL")]
    pub http_proxy: Option<String>,

    /// HTTPS proxy URL to render alongside NO_PROXY [default: $HTTPS_PROXY]
    #[arg(long, value_name = "URL")]
    pub https_proxy: Option<String>,
}

impl ProxyArgs {
    /// Flags win over the environment; extras from both are kept, environment first.
    pub fn resolve(&self, config: &ToolConfig) -> Result<ProxyConfig> {
        let mut proxy = ProxyConfig::new()
            .with_exclusions(config.extra_exclusions.iter().chain(self.extra.iter()))?;

        let http = self
            .http_proxy
            .as_deref()
            .or(config.http_proxy.as_deref())
            .map(parse_proxy_url)
            .transpose()?;
        let https = self
            .https_proxy
            .as_deref()
            .or(config.https_proxy.as_deref())
            .map(parse_proxy_url)
            .transpose()?;

        if let Some(url) = http {
            proxy = proxy.with_http_proxy(url);
        }
        if let Some(url) = https {
            proxy = proxy.with_https_proxy(url);
        }
        Ok(proxy)
    }
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Output format: env (KEY=value) or systemd (Environment="KEY=value")
    #[arg(long, default_value = "env")]
    pub target: RenderTarget,

    /// Print a complete [Service] drop-in instead of bare lines (systemd target only)
    #[arg(long)]
    pub stanza: bool,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

#[derive(Subcommand, Debug)]
pub enum ApplyCommand {
    /// Replace the proxy lines of a KEY=value environment file
    EnvFile {
        /// Environment file [default: $NOPROXY_ENV_FILE or /etc/environment]
        #[arg(long)]
        path: Option<PathBuf>,

        #[command(flatten)]
        proxy: ProxyArgs,
    },

    /// Write a systemd drop-in for a service, reload, and restart it
    Service {
        /// Unit to override, e.g. amazon-ssm-agent
        #[arg(long)]
        unit: String,

        /// Drop-in file name inside <unit>.d/
        #[arg(long, default_value = DEFAULT_DROP_IN)]
        drop_in: String,

        /// Only write the drop-in; skip daemon-reload and restart
        #[arg(long)]
        no_restart: bool,

        #[command(flatten)]
        proxy: ProxyArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct MetadataArgs {
    /// Metadata base URL [default: $NOPROXY_METADATA_ENDPOINT or http://169.254.169.254]
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Request timeout [default: $NOPROXY_TIMEOUT_MS or 2000]
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Log file to scan [default: $NOPROXY_LOG_PATH or the SSM agent log]
    #[arg(long, conflicts_with = "unit")]
    pub path: Option<PathBuf>,

    /// Scan the journal of this unit instead of a file
    #[arg(long)]
    pub unit: Option<String>,

    /// Number of most recent lines to scan [default: $NOPROXY_LOG_WINDOW or 1000]
    #[arg(long, value_name = "LINES")]
    pub window: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum CheckCommand {
    /// Fetch the instance id directly, bypassing any proxy
    Metadata(MetadataArgs),

    /// Look for proxy failure indicators in recent agent logs
    Logs(LogArgs),

    /// Run both checks concurrently
    All {
        #[command(flatten)]
        metadata: MetadataArgs,

        #[command(flatten)]
        logs: LogArgs,
    },
}

impl MetadataArgs {
    pub fn apply_to(&self, config: &mut ToolConfig) -> Result<()> {
        if let Some(raw) = &self.endpoint {
            config.metadata_endpoint = parse_endpoint(raw)?;
        }
        if let Some(ms) = self.timeout_ms {
            if ms == 0 {
                return Err(crate::error::NoProxyError::ConfigMalformed(
                    "--timeout-ms must be greater than zero".to_string(),
                ));
            }
            config.timeout = std::time::Duration::from_millis(ms);
        }
        Ok(())
    }
}
