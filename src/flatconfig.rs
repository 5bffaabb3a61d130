//! The sync daemon's flat `KEY="value"` configuration file.
//!
//! The file is the only channel between the admin UI and the daemon.  It is
//! read before every save so keys the UI does not own (log rotation,
//! timeouts, debug switches) survive, including their commented-out state:
//!
//! ```text
//! # DHCP lease file configuration
//! DHCP_LEASE_PATH="/var/dhcpd/var/db/dhcpd.leases"
//! LEASE_FORMAT="isc"    # Lease format: "isc" or "dnsmasq"
//!
//! # Optional settings
//! #DEBUG="true"
//! ```
//!
//! Parsing and translation never fail: malformed lines are skipped and
//! unknown values fall back to defaults, so a hand-edited file can always be
//! loaded.  [`parse_flat_config_strict`] reports the skipped lines for
//! callers that want to refuse such files instead.

use indexmap::IndexMap;
use serde::Serialize;
use url::Url;

use crate::settings::{DhcpBackend, SyncSettings, DEFAULT_BASE_URL};

pub const ADGUARD_USERNAME: &str = "ADGUARD_USERNAME";
pub const ADGUARD_PASSWORD: &str = "ADGUARD_PASSWORD";
pub const ADGUARD_URL:      &str = "ADGUARD_URL";
pub const ADGUARD_SCHEME:   &str = "ADGUARD_SCHEME";
pub const DHCP_LEASE_PATH:  &str = "DHCP_LEASE_PATH";
pub const LEASE_FORMAT:     &str = "LEASE_FORMAT";

const DEFAULT_HOST:   &str = "localhost:3000";
const DEFAULT_SCHEME: &str = "http";

const LEASE_FORMAT_NOTE: &str = "    # Lease format: \"isc\" or \"dnsmasq\"";
const EXTRA_SECTION:     &str = "# Additional settings";

/// `(key, default value, disabled by default)`
const DEFAULTS: &[(&str, &str, bool)] = &[
    (ADGUARD_USERNAME,         "",                       false),
    (ADGUARD_PASSWORD,         "",                       false),
    (ADGUARD_URL,              DEFAULT_HOST,             false),
    (ADGUARD_SCHEME,           DEFAULT_SCHEME,           false),
    (DHCP_LEASE_PATH,          "/var/db/dnsmasq.leases", false),
    (LEASE_FORMAT,             "dnsmasq",                false),
    ("PRESERVE_DELETED_HOSTS", "false",                  true),
    ("DEBUG",                  "false",                  true),
    ("DRY_RUN",                "false",                  true),
    ("ADGUARD_TIMEOUT",        "10",                     false),
    ("LOG_LEVEL",              "info",                   false),
    ("LOG_FILE",               "/var/log/dhcpsync.log",  false),
    ("SYSLOG_FACILITY",        "local3",                 false),
    ("MAX_LOG_SIZE",           "100",                    false),
    ("MAX_BACKUPS",            "3",                      false),
    ("MAX_AGE",                "28",                     false),
    ("NO_COMPRESS",            "false",                  true),
];

/// Fixed section layout of the rendered file.
const SECTIONS: &[(&str, &[&str])] = &[
    ("# AdGuard Home credentials",         &[ADGUARD_USERNAME, ADGUARD_PASSWORD]),
    ("# AdGuard Home connection settings", &[ADGUARD_URL, ADGUARD_SCHEME]),
    ("# DHCP lease file configuration",    &[DHCP_LEASE_PATH, LEASE_FORMAT]),
    ("# Optional settings",                &["PRESERVE_DELETED_HOSTS", "DEBUG", "DRY_RUN", "ADGUARD_TIMEOUT"]),
    (
        "# Logging configuration - OPNsense optimized",
        &["LOG_LEVEL", "LOG_FILE", "SYSLOG_FACILITY", "MAX_LOG_SIZE", "MAX_BACKUPS", "MAX_AGE", "NO_COMPRESS"],
    ),
];

// ── Model ─────────────────────────────────────────────────────────────────────

/// One key's value and whether it is commented out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    pub value:    String,
    pub disabled: bool,
}

impl FlatEntry {
    pub fn active(value: impl Into<String>) -> Self {
        Self { value: value.into(), disabled: false }
    }

    pub fn disabled(value: impl Into<String>) -> Self {
        Self { value: value.into(), disabled: true }
    }
}

/// Parsed flat config, keyed by bare key name in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatConfig {
    entries: IndexMap<String, FlatEntry>,
}

impl FlatConfig {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: &str) -> Option<&FlatEntry> {
        self.entries.get(key)
    }

    /// Value of `key` if present and not commented out.
    pub fn active(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|e| !e.disabled)
            .map(|e| e.value.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: FlatEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// Set `key` to `value` and make it active.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.insert(key, FlatEntry::active(value));
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlatEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// A line that is neither blank, a comment, nor a `KEY=value` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineIssue {
    /// 1-based line number.
    pub line:    usize,
    pub content: String,
}

enum Line<'a> {
    Blank,
    Comment,
    Entry { key: &'a str, entry: FlatEntry },
    Malformed,
}

/// Parse file content leniently.  Never fails; unparseable lines are skipped.
pub fn parse_flat_config(text: &str) -> FlatConfig {
    parse_collecting(text).0
}

/// Parse file content, rejecting it if any line is malformed.
pub fn parse_flat_config_strict(text: &str) -> std::result::Result<FlatConfig, Vec<LineIssue>> {
    let (flat, issues) = parse_collecting(text);
    if issues.is_empty() { Ok(flat) } else { Err(issues) }
}

fn parse_collecting(text: &str) -> (FlatConfig, Vec<LineIssue>) {
    let mut flat = FlatConfig::new();
    let mut issues = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        match classify_line(raw) {
            Line::Blank | Line::Comment => {}
            Line::Entry { key, entry } => flat.insert(key, entry),
            Line::Malformed => issues.push(LineIssue {
                line:    idx + 1,
                content: raw.to_string(),
            }),
        }
    }
    (flat, issues)
}

/// A `#` line is prose unless what follows the marker still has the
/// `KEY=value` shape, in which case it is a disabled entry.
fn classify_line(raw: &str) -> Line<'_> {
    let line = raw.trim();
    if line.is_empty() {
        return Line::Blank;
    }

    let (body, disabled) = match line.strip_prefix('#') {
        Some(rest) => (rest.trim_start_matches('#').trim_start(), true),
        None => (line, false),
    };
    let not_an_entry = if disabled { Line::Comment } else { Line::Malformed };

    let Some((key, value)) = body.split_once('=') else {
        return not_an_entry;
    };
    let key = key.trim();
    if !is_key(key) {
        return not_an_entry;
    }

    Line::Entry {
        key,
        entry: FlatEntry { value: unquote(value), disabled },
    }
}

fn is_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

/// Strip surrounding quotes and whitespace.  A quoted value followed by an
/// inline `# comment` keeps only the quoted part.
fn unquote(raw: &str) -> String {
    let v = raw.trim();
    if let Some(q) = v.chars().next().filter(|c| is_quote(*c)) {
        if let Some(end) = v[1..].find(q) {
            let rest = v[1 + end + 1..].trim_start();
            if rest.is_empty() || rest.starts_with('#') {
                return v[1..1 + end].to_string();
            }
        }
    }
    v.trim_matches(|c: char| is_quote(c) || c.is_whitespace()).to_string()
}

// ── Translation ───────────────────────────────────────────────────────────────

/// Read the UI-owned settings out of a flat config.  Total: absent or
/// unrecognized values fall back to [`SyncSettings::default`].
pub fn to_sync_settings(flat: &FlatConfig) -> SyncSettings {
    let field = |key: &str| flat.active(key).map(strip_quotes);

    let adguard_url = match (field(ADGUARD_SCHEME), field(ADGUARD_URL)) {
        (Some(scheme), Some(host)) if !scheme.is_empty() && !host.is_empty() => {
            format!("{scheme}://{host}")
        }
        _ => DEFAULT_BASE_URL.to_string(),
    };

    SyncSettings {
        adguard_username: field(ADGUARD_USERNAME).unwrap_or_default(),
        adguard_password: field(ADGUARD_PASSWORD).unwrap_or_default(),
        adguard_url,
        dhcp_backend: flat
            .active(LEASE_FORMAT)
            .map(lease_format_backend)
            .unwrap_or_default(),
    }
}

fn strip_quotes(v: &str) -> String {
    v.trim_matches(|c: char| is_quote(c) || c == ' ').to_string()
}

/// `LEASE_FORMAT` tolerates an unquoted trailing comment.
fn lease_format_backend(raw: &str) -> DhcpBackend {
    let value = raw.split('#').next().unwrap_or_default();
    DhcpBackend::from_name(&strip_quotes(value.trim())).unwrap_or_default()
}

/// Overlay `settings` on `baseline`, touching only the keys the UI owns,
/// then fill in defaults for any known key the baseline lacks.
pub fn apply_sync_settings(settings: &SyncSettings, baseline: &FlatConfig) -> FlatConfig {
    let mut flat = baseline.clone();

    flat.set(ADGUARD_USERNAME, settings.adguard_username.as_str());
    flat.set(ADGUARD_PASSWORD, settings.adguard_password.as_str());

    let (scheme, host) = split_base_url(&settings.adguard_url)
        .unwrap_or_else(|| (DEFAULT_SCHEME.to_string(), DEFAULT_HOST.to_string()));
    flat.set(ADGUARD_URL, host);
    flat.set(ADGUARD_SCHEME, scheme);

    let backend = settings.dhcp_backend;
    flat.set(LEASE_FORMAT, backend.as_str());
    flat.set(DHCP_LEASE_PATH, backend.lease_path());

    fill_defaults(&mut flat);
    flat
}

fn fill_defaults(flat: &mut FlatConfig) {
    for &(key, value, disabled) in DEFAULTS {
        if !flat.contains_key(key) {
            let entry = if disabled { FlatEntry::disabled(value) } else { FlatEntry::active(value) };
            flat.insert(key, entry);
        }
    }
}

/// A base URL cut into the pieces the flat file stores, as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseUrl<'a> {
    pub scheme:    &'a str,
    /// `host[:port]` exactly as given, case and explicit port included.
    pub authority: &'a str,
    /// Path, query or fragment following the authority; empty for a bare base.
    pub rest:      &'a str,
}

/// Cut a base URL into scheme, authority and the remainder.  A missing
/// scheme is taken to be `http`.  `url::Url` only checks that the pieces
/// form a valid http(s) URL with a host; the returned slices are never
/// normalized.  `None` for other schemes, credentials, or no host.
pub fn parse_base_url(raw: &str) -> Option<BaseUrl<'_>> {
    let raw = raw.trim();
    let (scheme, after) = match raw.split_once("://") {
        Some((scheme, after)) => (scheme, after),
        None => (DEFAULT_SCHEME, raw),
    };
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return None;
    }

    let end = after.find(['/', '?', '#']).unwrap_or(after.len());
    let (authority, rest) = after.split_at(end);
    if authority.is_empty() || authority.contains('@') {
        return None;
    }

    let url = Url::parse(&format!("{scheme}://{authority}")).ok()?;
    url.host_str().filter(|h| !h.is_empty())?;
    Some(BaseUrl { scheme, authority, rest })
}

/// Split a base URL into `(scheme, host[:port])`, dropping any path.
pub fn split_base_url(raw: &str) -> Option<(String, String)> {
    parse_base_url(raw).map(|u| (u.scheme.to_string(), u.authority.to_string()))
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Serialize into the fixed section layout.  Keys outside every section
/// follow in first-seen order under an extra header.
pub fn render(flat: &FlatConfig) -> String {
    let mut out = String::new();

    for (header, keys) in SECTIONS {
        out.push_str(header);
        out.push('\n');
        for key in *keys {
            let entry = flat.get(key).cloned().unwrap_or_else(|| default_entry(key));
            push_entry(&mut out, key, &entry);
            if *key == LEASE_FORMAT {
                out.push_str(LEASE_FORMAT_NOTE);
            }
            out.push('\n');
        }
        out.push('\n');
    }

    let mut extra = flat.iter().filter(|(key, _)| !is_sectioned(key)).peekable();
    if extra.peek().is_some() {
        out.push_str(EXTRA_SECTION);
        out.push('\n');
        for (key, entry) in extra {
            push_entry(&mut out, key, entry);
            out.push('\n');
        }
        out.push('\n');
    }

    out
}

fn push_entry(out: &mut String, key: &str, entry: &FlatEntry) {
    if entry.disabled {
        out.push('#');
    }
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&entry.value);
    out.push('"');
}

fn default_entry(key: &str) -> FlatEntry {
    DEFAULTS
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|&(_, value, disabled)| FlatEntry { value: value.to_string(), disabled })
        .unwrap_or_else(|| FlatEntry::active(""))
}

fn is_sectioned(key: &str) -> bool {
    SECTIONS.iter().any(|(_, keys)| keys.contains(&key))
}
