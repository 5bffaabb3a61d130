//! Admin backend configuration file parser.
//!
//! Parses `key = value` lines (`#` comments) from `admin.conf`.  A missing
//! file yields the compiled-in defaults, which match a stock OPNsense layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AdminError, Result};
use crate::util;

// Default timeouts (seconds)
const CONNECT_TIMEOUT: u64 = 10;
const REQUEST_TIMEOUT: u64 = 30;

/// Full admin backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminConfig {
    // ── Files ─────────────────────────────────────────────────────────────────
    /// Flat `KEY="value"` file consumed by the sync daemon.
    pub flat_config: PathBuf,
    /// Structured settings store (XML).
    pub store_file:  PathBuf,
    // ── Service control ───────────────────────────────────────────────────────
    /// configd service name, the first word of every action.
    pub service_name: String,
    /// Path to the `configctl` binary.
    pub configctl:    PathBuf,
    // ── Connectivity probe ────────────────────────────────────────────────────
    pub connect_timeout: u64,
    pub request_timeout: u64,
    // ── Behaviour ─────────────────────────────────────────────────────────────
    pub log_syslog:   bool,
    /// Refuse to overwrite a flat config file that has malformed lines.
    pub strict_parse: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            flat_config:     PathBuf::from("/usr/local/etc/dhcpsync/config.env"),
            store_file:      PathBuf::from("/usr/local/etc/dhcpsync/settings.xml"),
            service_name:    "dhcpsync".to_string(),
            configctl:       PathBuf::from("/usr/local/sbin/configctl"),
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            log_syslog:      false,
            strict_parse:    false,
        }
    }
}

impl AdminConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// Load `path` as an `admin.conf` file; a missing file means defaults.
pub fn load_config(path: &Path) -> Result<AdminConfig> {
    let content = util::read_optional(path)
        .map_err(|e| AdminError::Config(format!("cannot read {}: {e}", path.display())))?;
    Ok(content.map(|c| parse_config(&c)).unwrap_or_default())
}

fn is_true(val: &str) -> bool {
    val == "true" || val == "1" || val == "yes"
}

/// Parse `admin.conf` content.  Unknown keys are ignored and unparsable
/// numbers keep their defaults.
pub fn parse_config(content: &str) -> AdminConfig {
    let mut cfg = AdminConfig::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, val)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let val = val.trim().trim_matches('"').to_string();
        if val.is_empty() {
            continue;
        }

        match key.as_str() {
            "flat_config"     => cfg.flat_config     = PathBuf::from(&val),
            "store_file"      => cfg.store_file      = PathBuf::from(&val),
            "service_name"    => cfg.service_name    = val,
            "configctl"       => cfg.configctl       = PathBuf::from(&val),
            "connect_timeout" => cfg.connect_timeout = val.parse().unwrap_or(CONNECT_TIMEOUT),
            "request_timeout" => cfg.request_timeout = val.parse().unwrap_or(REQUEST_TIMEOUT),
            "log_syslog"      => cfg.log_syslog      = is_true(&val),
            "strict_parse"    => cfg.strict_parse    = is_true(&val),
            _ => {} // ignore unknown keys
        }
    }

    cfg
}

/// Validate that required fields are usable.
pub fn validate_config(cfg: &AdminConfig) -> Result<()> {
    if cfg.flat_config.as_os_str().is_empty() {
        return Err(AdminError::Config("flat_config is required".into()));
    }
    if cfg.store_file.as_os_str().is_empty() {
        return Err(AdminError::Config("store_file is required".into()));
    }
    if cfg.flat_config == cfg.store_file {
        return Err(AdminError::Config("flat_config and store_file must differ".into()));
    }
    if cfg.service_name.split_whitespace().count() != 1 {
        return Err(AdminError::Config("service_name must be a single word".into()));
    }
    if cfg.connect_timeout == 0 || cfg.request_timeout == 0 {
        return Err(AdminError::Config("timeouts must be at least one second".into()));
    }
    Ok(())
}
