//! Admin backend for the DHCP → AdGuard Home sync service on OPNsense.
//!
//! Every command prints one JSON response document on stdout; logging goes
//! to syslog or stderr.
//!
//! Usage:
//!   dhcpsync-admin get
//!   dhcpsync-admin set --payload request.json
//!   dhcpsync-admin service restart
//!   dhcpsync-admin test-connection --stderr -v

mod config;
mod endpoint;
mod error;
mod flatconfig;
mod logs;
mod probe;
mod service;
mod settings;
mod store;
mod util;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{self, ExitCode};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};
use serde::Serialize;

use crate::endpoint::{SaveResult, SetResponse, SettingsEndpoint};
use crate::error::AdminError;
use crate::logs::LogLevel;
use crate::probe::{ConnectionReport, ProbeStatus};
use crate::service::{CommandOutcome, ConfigdRunner, ServiceAction, ServiceEndpoint};
use crate::store::XmlSettingsStore;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "dhcpsync-admin", about = "Settings and service control for dhcp-adguard-sync")]
struct Cli {
    /// Path to the admin backend configuration file.
    #[arg(short = 'c', long = "config", default_value = "/usr/local/etc/dhcpsync/admin.conf")]
    config: PathBuf,

    /// Log to stderr instead of syslog (useful for debugging).
    #[arg(long, global = true)]
    stderr: bool,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the current settings.
    Get,
    /// Save a settings payload and regenerate the daemon config file.
    Set {
        /// JSON request body; `-` reads stdin.
        #[arg(long, default_value = "-")]
        payload: String,
    },
    /// Run a lifecycle action against the sync daemon.
    Service {
        #[arg(value_enum)]
        action: ServiceAction,
        /// Minimum level for `logs`.
        #[arg(long, value_enum)]
        level: Option<LogLevel>,
    },
    /// Check that AdGuard Home is reachable with the stored credentials.
    TestConnection,
    /// Report malformed lines in the daemon config file.
    Check {
        /// File to check instead of the configured one.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the daemon config file the stored settings would produce.
    Render,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("dhcpsync-admin: config error: {e}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = config::validate_config(&cfg) {
        eprintln!("dhcpsync-admin: config validation: {e}");
        return ExitCode::from(2);
    }

    let use_syslog = cfg.log_syslog && !cli.stderr;
    if let Err(e) = setup_logging(use_syslog, cli.verbose) {
        eprintln!("dhcpsync-admin: {e:#}");
    }

    match run(cli.command, &cfg).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("dhcpsync-admin: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatch one command.  Failures are reported as JSON response documents;
/// `Ok(false)` means the response says `failed`.  `Err` is left for stdout
/// itself being unusable.
async fn run(command: Command, cfg: &config::AdminConfig) -> anyhow::Result<bool> {
    let settings = SettingsEndpoint::new(
        XmlSettingsStore::new(&cfg.store_file),
        &cfg.flat_config,
        cfg.strict_parse,
    );

    match command {
        Command::Get => {
            let resp = settings.get();
            let ok = resp.error.is_none();
            print_json(&resp)?;
            Ok(ok)
        }
        Command::Set { payload } => {
            let resp = match read_payload(&payload) {
                Ok(value) => settings.set(&value),
                Err(e) => {
                    error!("{e:#}");
                    SetResponse::failed(format!("{e:#}"))
                }
            };
            print_json(&resp)?;
            Ok(resp.result == SaveResult::Saved)
        }
        Command::Service { action, level } => {
            let runner = ConfigdRunner::new(&cfg.configctl);
            let resp = ServiceEndpoint::new(runner, cfg.service_name.as_str(), settings.enabled()).run(action, level);
            print_json(&resp)?;
            Ok(resp.result == CommandOutcome::Ok)
        }
        Command::TestConnection => {
            let report = match run_probe(&settings, cfg).await {
                Ok(r) => r,
                Err(e) => {
                    error!("{e:#}");
                    ConnectionReport::failed(format!("Connection failed: {e:#}"), None)
                }
            };
            info!("connectivity test: {}", report.message);
            print_json(&report)?;
            Ok(report.status == ProbeStatus::Ok)
        }
        Command::Check { file } => {
            let path = file.unwrap_or_else(|| settings.flat_path().to_path_buf());
            let doc = match endpoint::check_flat_file(&path) {
                Ok(issues) => {
                    let ok = issues.as_ref().is_some_and(|i| i.is_empty());
                    serde_json::json!({
                        "file":   path.display().to_string(),
                        "exists": issues.is_some(),
                        "result": if ok { "ok" } else { "failed" },
                        "issues": issues.unwrap_or_default(),
                    })
                }
                Err(e) => {
                    error!("checking {}: {e}", path.display());
                    failure_document(&path, &e)
                }
            };
            print_json(&doc)?;
            Ok(doc["result"] == "ok")
        }
        Command::Render => match settings.render_current() {
            Ok(text) => {
                print!("{text}");
                Ok(true)
            }
            Err(e) => {
                error!("rendering {}: {e}", settings.flat_path().display());
                print_json(&failure_document(settings.flat_path(), &e))?;
                Ok(false)
            }
        },
    }
}

async fn run_probe(
    settings: &SettingsEndpoint<XmlSettingsStore>,
    cfg: &config::AdminConfig,
) -> anyhow::Result<ConnectionReport> {
    let current = settings.load_effective().context("loading settings")?;
    let client = probe::build_probe_client(cfg.connect_timeout(), cfg.request_timeout())?;
    Ok(probe::test_connection(&client, &current.sync).await)
}

fn failure_document(path: &Path, err: &AdminError) -> serde_json::Value {
    serde_json::json!({
        "file":   path.display().to_string(),
        "result": "failed",
        "error":  err.to_string(),
    })
}

fn read_payload(source: &str) -> anyhow::Result<serde_json::Value> {
    let body = if source == "-" {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("reading payload from stdin")?;
        body
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading payload {source}"))?
    };
    serde_json::from_str(&body).context("payload is not valid JSON")
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_LOCAL3,
            hostname: None,
            process:  "dhcpsync-admin".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .init();
    }
    Ok(())
}
