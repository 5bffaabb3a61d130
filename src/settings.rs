//! Structured sync settings as the admin UI sees them.
//!
//! [`SyncSettings`] is the four-field model the translator works on.
//! [`GeneralSettings`] adds the service `enabled` flag kept in the settings
//! store.  [`SettingsForm`] is what a save request submits: every field is
//! optional (absent fields keep their stored value) and the DHCP backend may
//! arrive either as a plain string or as a one-hot option map.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::flatconfig;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

// ── DHCP backend ──────────────────────────────────────────────────────────────

/// Which DHCP server's lease file the sync daemon reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DhcpBackend {
    #[default]
    Dnsmasq,
    Isc,
}

impl DhcpBackend {
    pub const ALL: [DhcpBackend; 2] = [DhcpBackend::Dnsmasq, DhcpBackend::Isc];

    pub fn as_str(self) -> &'static str {
        match self {
            DhcpBackend::Dnsmasq => "dnsmasq",
            DhcpBackend::Isc     => "isc",
        }
    }

    /// Lease file the sync daemon should watch for this backend.
    pub fn lease_path(self) -> &'static str {
        match self {
            DhcpBackend::Dnsmasq => "/var/db/dnsmasq.leases",
            DhcpBackend::Isc     => "/var/dhcpd/var/db/dhcpd.leases",
        }
    }

    /// Case-insensitive lookup; `None` for anything but the two known names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dnsmasq" => Some(DhcpBackend::Dnsmasq),
            "isc"     => Some(DhcpBackend::Isc),
            _         => None,
        }
    }
}

// ── Settings models ───────────────────────────────────────────────────────────

/// The settings owned by the admin UI and mirrored into the flat config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub adguard_username: String,
    pub adguard_password: String,
    /// Full base URL including scheme, e.g. `https://adguard.lan:3000`.
    pub adguard_url: String,
    pub dhcp_backend: DhcpBackend,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            adguard_username: String::new(),
            adguard_password: String::new(),
            adguard_url:      DEFAULT_BASE_URL.to_string(),
            dhcp_backend:     DhcpBackend::Dnsmasq,
        }
    }
}

/// Everything kept in the settings store under `general`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneralSettings {
    pub enabled: bool,
    pub sync: SyncSettings,
}

// ── Form payload ──────────────────────────────────────────────────────────────

/// A loosely-typed boolean as HTML forms and older UI revisions send it:
/// `1`, `"1"` or `true`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FormFlag {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Default for FormFlag {
    fn default() -> Self { FormFlag::Int(0) }
}

impl FormFlag {
    pub fn is_set(&self) -> bool {
        match self {
            FormFlag::Bool(b) => *b,
            FormFlag::Int(n)  => *n == 1,
            FormFlag::Text(s) => {
                let s = s.trim();
                s == "1" || s.eq_ignore_ascii_case("true")
            }
        }
    }
}

/// One candidate in a one-hot option map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendOption {
    #[serde(default)]
    pub selected: FormFlag,
}

/// DHCP backend as submitted by the form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BackendSelection {
    Plain(String),
    /// `{"dnsmasq": {"selected": 0}, "isc": {"selected": 1}}`
    OneHot(IndexMap<String, BackendOption>),
}

impl BackendSelection {
    /// The first flagged entry wins; nothing flagged or an unknown name
    /// resolves to the default backend.
    pub fn resolve(&self) -> DhcpBackend {
        let name = match self {
            BackendSelection::Plain(s) => Some(s.as_str()),
            BackendSelection::OneHot(options) => options
                .iter()
                .find(|(_, opt)| opt.selected.is_set())
                .map(|(name, _)| name.as_str()),
        };
        name.and_then(DhcpBackend::from_name).unwrap_or_default()
    }
}

/// The `general` node of a save request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsForm {
    #[serde(alias = "Enabled")]
    pub enabled: Option<FormFlag>,
    #[serde(alias = "AdguardHomeUsername")]
    pub adguard_username: Option<String>,
    #[serde(alias = "AdguardHomePassword")]
    pub adguard_password: Option<String>,
    #[serde(alias = "AdguardHomeURL")]
    pub adguard_url: Option<String>,
    #[serde(alias = "DHCPServer", alias = "dhcp_server")]
    pub dhcp_backend: Option<BackendSelection>,
}

impl SettingsForm {
    /// Overlay the submitted fields on `current`.
    pub fn merge_into(self, current: GeneralSettings) -> GeneralSettings {
        let GeneralSettings { enabled, sync } = current;
        GeneralSettings {
            enabled: self.enabled.map(|f| f.is_set()).unwrap_or(enabled),
            sync: SyncSettings {
                adguard_username: self.adguard_username.unwrap_or(sync.adguard_username),
                adguard_password: self.adguard_password.unwrap_or(sync.adguard_password),
                adguard_url:      self.adguard_url.map(|u| normalize_url(&u)).unwrap_or(sync.adguard_url),
                dhcp_backend:     self.dhcp_backend.map(|b| b.resolve()).unwrap_or(sync.dhcp_backend),
            },
        }
    }
}

/// Trim the submitted URL, drop a trailing `/` and supply `http://` when no
/// scheme was typed.
fn normalize_url(raw: &str) -> String {
    let url = raw.trim().trim_end_matches('/');
    if url.is_empty() || url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

/// A field constraint violation, reported back to the caller before any write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field:   String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: &str) -> Self {
        Self { field: format!("general.{field}"), message: message.to_string() }
    }
}

/// Check the constraints the flat config format and the sync daemon rely on.
/// Anything accepted here survives a write and re-read of the flat file
/// unchanged.
pub fn validate(settings: &GeneralSettings) -> Vec<ValidationError> {
    let sync = &settings.sync;
    let mut errors = Vec::new();

    for (field, value) in [
        ("adguard_username", &sync.adguard_username),
        ("adguard_password", &sync.adguard_password),
        ("adguard_url",      &sync.adguard_url),
    ] {
        if value.chars().any(|c| c == '"' || c.is_control()) {
            errors.push(ValidationError::new(
                field,
                "Double quotes and control characters are not allowed.",
            ));
        } else if has_loose_edge(value) {
            errors.push(ValidationError::new(
                field,
                "Leading or trailing spaces and single quotes are not allowed.",
            ));
        }
    }

    if sync.adguard_url.trim().is_empty() {
        errors.push(ValidationError::new("adguard_url", "An AdGuard Home URL is required."));
    } else {
        match flatconfig::parse_base_url(&sync.adguard_url) {
            None => errors.push(ValidationError::new(
                "adguard_url",
                "Please provide a valid URL, e.g. http://192.168.1.1:3000.",
            )),
            Some(url) if !url.rest.is_empty() => errors.push(ValidationError::new(
                "adguard_url",
                "The URL must not contain a path, query or fragment.",
            )),
            Some(_) if !sync.adguard_url.contains("://") => errors.push(ValidationError::new(
                "adguard_url",
                "The URL must start with http:// or https://.",
            )),
            Some(_) => {}
        }
    }

    errors
}

/// The flat file reader strips these from both ends of a value.
fn has_loose_edge(value: &str) -> bool {
    let loose = |c: char| c == '\'' || c.is_whitespace();
    value.starts_with(loose) || value.ends_with(loose)
}
