// src/main.rs

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod error;
mod render;
mod rules;
mod sys;
mod validate;

use crate::cli::{ApplyCommand, CheckCommand, Cli, Commands, LogArgs, LogFormat, MetadataArgs};
use crate::config::ToolConfig;
use crate::error::{NoProxyError, Result};
use crate::render::RenderTarget;
use crate::rules::RULE_TABLE;
use crate::sys::envfile::EnvFileStore;
use crate::sys::logs::{FileLogSource, JournalLogSource};
use crate::sys::systemd::SystemdOverrideManager;
use crate::sys::traits::{EnvironmentStore, LogSource, ServiceManager};
use crate::validate::logscan::{LogHealth, check_logs};
use crate::validate::metadata::MetadataProbe;

// Exit codes: 0 healthy/success, 1 failed or degraded check, 2 usage or config error.
const EXIT_CHECK_FAILED: u8 = 1;

// Diagnostics are one-shot, so a single-threaded runtime is all we need;
// `check all` still overlaps its two checks via tokio::join!.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "imds-noproxy failed");
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so rendered lines on stdout can be piped straight into a file.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ToolConfig::load()?;
    let json = cli.json;

    match cli.command {
        Commands::Rules => {
            if json {
                print_json(&RULE_TABLE)?;
            } else {
                let width = RULE_TABLE.iter().map(|e| e.pattern.len()).max().unwrap_or(0);
                for entry in RULE_TABLE {
                    println!("{:<width$}  {}", entry.pattern, entry.rationale, width = width);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Render(args) => {
            let proxy = args.proxy.resolve(&config)?;
            if args.stanza {
                if args.target != RenderTarget::SystemdOverride {
                    return Err(NoProxyError::ConfigMalformed(
                        "--stanza is only valid with --target systemd".to_string(),
                    ));
                }
                print!("{}", proxy.render_override()?);
            } else {
                let rendering = proxy.render(args.target)?;
                if json {
                    print_json(&rendering)?;
                } else {
                    print!("{}", rendering);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Apply(ApplyCommand::EnvFile { path, proxy }) => {
            let path = path.unwrap_or(config.env_file.clone());
            warn_if_not_root();

            let rendering = proxy.resolve(&config)?.render(RenderTarget::EnvFile)?;
            let store: Box<dyn EnvironmentStore> = Box::new(EnvFileStore::new(path.clone()));
            let outcome = store.apply(&rendering).await?;

            report(json, json!({ "path": path, "outcome": outcome }), || {
                format!("{}: {:?}", path.display(), outcome)
            })?;
            // Existing login sessions and services keep their old environment.
            info!("New logins pick this up; running services need `apply service`");
            Ok(ExitCode::SUCCESS)
        }

        Commands::Apply(ApplyCommand::Service {
            unit,
            drop_in,
            no_restart,
            proxy,
        }) => {
            warn_if_not_root();

            let body = proxy.resolve(&config)?.render_override()?;
            let manager: Box<dyn ServiceManager> =
                Box::new(SystemdOverrideManager::new(config.systemd_dir.clone(), &drop_in)?);

            let (path, outcome) = manager.write_override(&unit, &body).await?;
            // The unit only sees the new Environment= lines after a reload and restart.
            if !no_restart {
                manager.reload_daemon().await?;
                manager.restart(&unit).await?;
            }

            report(
                json,
                json!({ "unit": unit, "path": path, "outcome": outcome, "restarted": !no_restart }),
                || format!("{}: {:?}{}", path.display(), outcome, if no_restart { "" } else { ", restarted" }),
            )?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check(CheckCommand::Metadata(args)) => {
            let probe = build_probe(&args, &mut config)?;
            let result = probe.check().await;
            print_metadata(json, &result)?;
            Ok(exit_for(result.is_ok()))
        }

        Commands::Check(CheckCommand::Logs(args)) => {
            let (source, window) = build_log_source(&args, &config);
            let health = check_logs(source.as_ref(), window).await?;
            print_logs(json, &source.describe(), &Ok(health.clone()))?;
            match health.into_result() {
                Ok(_) => Ok(ExitCode::SUCCESS),
                Err(e) => Ok(ExitCode::from(e.exit_code() as u8)),
            }
        }

        Commands::Check(CheckCommand::All { metadata, logs }) => {
            let probe = build_probe(&metadata, &mut config)?;
            let (source, window) = build_log_source(&logs, &config);

            let diagnosis = validate::run_all(&probe, source.as_ref(), window).await;
            if json {
                print_json(&json!({
                    "metadata": result_json(&diagnosis.metadata),
                    "logs": result_json(&diagnosis.logs),
                    "healthy": diagnosis.is_healthy(),
                }))?;
            } else {
                print_metadata(false, &diagnosis.metadata)?;
                print_logs(false, &source.describe(), &diagnosis.logs)?;
            }
            Ok(exit_for(diagnosis.is_healthy()))
        }
    }
}

fn build_probe(args: &MetadataArgs, config: &mut ToolConfig) -> Result<MetadataProbe> {
    args.apply_to(config)?;
    MetadataProbe::new(config.metadata_endpoint.clone(), config.timeout)
}

fn build_log_source(args: &LogArgs, config: &ToolConfig) -> (Box<dyn LogSource>, usize) {
    let window = args.window.unwrap_or(config.log_window);
    let source: Box<dyn LogSource> = match (&args.unit, &args.path) {
        (Some(unit), _) => Box::new(JournalLogSource::new(unit.clone())),
        (None, Some(path)) => Box::new(FileLogSource::new(path.clone())),
        (None, None) => Box::new(FileLogSource::new(config.log_path.clone())),
    };
    (source, window)
}

fn warn_if_not_root() {
    if !sys::running_as_root() {
        warn!("Not running as root; writes under /etc and systemctl calls will likely fail");
    }
}

fn exit_for(healthy: bool) -> ExitCode {
    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CHECK_FAILED)
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| NoProxyError::ConfigMalformed(format!("failed to serialize output: {}", e)))?;
    println!("{}", out);
    Ok(())
}

fn report<F: FnOnce() -> String>(json: bool, value: serde_json::Value, text: F) -> Result<()> {
    if json {
        print_json(&value)
    } else {
        println!("{}", text());
        Ok(())
    }
}

fn error_json(e: &NoProxyError) -> serde_json::Value {
    json!({ "status": "error", "kind": e.kind(), "message": e.to_string() })
}

fn result_json<T: Serialize>(result: &Result<T>) -> serde_json::Value {
    match result {
        Ok(value) => serde_json::to_value(value).unwrap_or_else(|e| json!({ "status": "error", "message": e.to_string() })),
        Err(e) => error_json(e),
    }
}

fn print_metadata(json: bool, result: &Result<validate::metadata::MetadataReport>) -> Result<()> {
    if json {
        return print_json(&result_json(result));
    }
    match result {
        Ok(report) => println!(
            "metadata: ok ({}, {}, {} ms)",
            report.instance_id,
            if report.imds_v2 { "IMDSv2" } else { "IMDSv1" },
            report.elapsed_ms
        ),
        Err(e) => println!("metadata: {} ({})", e.kind(), e),
    }
    Ok(())
}

fn print_logs(json: bool, source: &str, result: &Result<LogHealth>) -> Result<()> {
    if json {
        return print_json(&result_json(result));
    }
    match result {
        Ok(LogHealth::Healthy { scanned }) => println!("logs: healthy ({}, {} lines scanned)", source, scanned),
        Ok(LogHealth::Degraded {
            indicator,
            occurrences,
            line,
            timestamp,
        }) => {
            let seen = timestamp
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown time".to_string());
            println!(
                "logs: degraded ({}): '{}' x{}, last at {}\n  {}",
                source, indicator, occurrences, seen, line
            );
        }
        Err(e) => println!("logs: {} ({})", e.kind(), e),
    }
    Ok(())
}
