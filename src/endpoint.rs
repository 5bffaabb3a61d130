//! Settings endpoint: get/set of the sync settings.
//!
//! A save validates the submitted form, stores it, then regenerates the
//! daemon's flat config file from the stored settings and the file's
//! previous content.  The two writes are not transactional: if the flat
//! file cannot be written after the store was saved, the response says
//! `failed` and the store keeps the new values.  Concurrent saves are
//! last-writer-wins on both files.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::error::{AdminError, Result};
use crate::flatconfig::{self, FlatConfig, LineIssue};
use crate::settings::{DhcpBackend, GeneralSettings, SettingsForm, ValidationError};
use crate::store::SettingsStore;
use crate::util;

/// Key the settings form is submitted under.
pub const PAYLOAD_KEY: &str = "dhcpadguardsync";

/// Keys used by earlier UI revisions, still accepted on input.
const PAYLOAD_ALIASES: &[&str] = &["frm_settings", "settings", "frm_GeneralSettings", "dhcpsync"];

/// The flat file holds the AdGuard password.
const FLAT_FILE_MODE: u32 = 0o600;

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveResult {
    Saved,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    pub result: SaveResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<ValidationError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<LineIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SetResponse {
    fn saved() -> Self {
        Self { result: SaveResult::Saved, validations: Vec::new(), issues: Vec::new(), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..Self::rejected() }
    }

    fn rejected() -> Self {
        Self { result: SaveResult::Failed, ..Self::saved() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub value:    &'static str,
    pub selected: u8,
}

/// The `general` node as the UI reads it back.
#[derive(Debug, Clone, Serialize)]
pub struct GeneralView {
    pub enabled:          &'static str,
    pub adguard_username: String,
    pub adguard_password: String,
    pub adguard_url:      String,
    pub dhcp_backend:     IndexMap<&'static str, OptionView>,
}

impl From<&GeneralSettings> for GeneralView {
    fn from(s: &GeneralSettings) -> Self {
        let dhcp_backend = DhcpBackend::ALL
            .iter()
            .map(|b| {
                let opt = OptionView { value: b.as_str(), selected: u8::from(*b == s.sync.dhcp_backend) };
                (b.as_str(), opt)
            })
            .collect();
        Self {
            enabled:          if s.enabled { "1" } else { "0" },
            adguard_username: s.sync.adguard_username.clone(),
            adguard_password: s.sync.adguard_password.clone(),
            adguard_url:      s.sync.adguard_url.clone(),
            dhcp_backend,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsDocument {
    pub general: GeneralView,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    #[serde(rename = "dhcpadguardsync", skip_serializing_if = "Option::is_none")]
    pub document: Option<SettingsDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SaveResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

pub struct SettingsEndpoint<S> {
    store:     S,
    flat_path: PathBuf,
    strict:    bool,
}

impl<S: SettingsStore> SettingsEndpoint<S> {
    pub fn new(store: S, flat_path: impl Into<PathBuf>, strict: bool) -> Self {
        Self { store, flat_path: flat_path.into(), strict }
    }

    /// Current settings: the store, overlaid with whatever the flat file
    /// says so hand edits to the file show up in the UI.
    pub fn load_effective(&self) -> Result<GeneralSettings> {
        let mut settings = self.store.load()?;
        if let Some(text) = util::read_optional(&self.flat_path)? {
            settings.sync = flatconfig::to_sync_settings(&flatconfig::parse_flat_config(&text));
        }
        Ok(settings)
    }

    /// The stored `general.enabled` flag.  An unloadable store counts as
    /// disabled so lifecycle actions that need no settings still run.
    pub fn enabled(&self) -> bool {
        match self.store.load() {
            Ok(s) => s.enabled,
            Err(e) => {
                warn!("loading settings: {e}; treating service as disabled");
                false
            }
        }
    }

    pub fn get(&self) -> GetResponse {
        match self.load_effective() {
            Ok(settings) => GetResponse {
                document: Some(SettingsDocument { general: GeneralView::from(&settings) }),
                result:   None,
                error:    None,
            },
            Err(e) => {
                error!("loading settings: {e}");
                GetResponse { document: None, result: Some(SaveResult::Failed), error: Some(e.to_string()) }
            }
        }
    }

    /// Validate, store, and regenerate the flat config from a request body.
    pub fn set(&self, payload: &Value) -> SetResponse {
        let form = match extract_form(payload) {
            Ok(f) => f,
            Err(e) => return SetResponse::failed(e.to_string()),
        };

        let current = match self.store.load() {
            Ok(s) => s,
            Err(e) => return SetResponse::failed(format!("loading settings: {e}")),
        };
        let settings = form.merge_into(current);

        let validations = self.store.validate(&settings);
        if !validations.is_empty() {
            debug!("rejected settings: {validations:?}");
            return SetResponse { validations, ..SetResponse::rejected() };
        }

        let baseline = match self.read_baseline() {
            Ok(b) => b,
            Err(Baseline::Io(e)) => {
                return SetResponse::failed(format!("reading {}: {e}", self.flat_path.display()));
            }
            Err(Baseline::Malformed(issues)) => {
                warn!("{} has {} malformed line(s), not overwriting", self.flat_path.display(), issues.len());
                return SetResponse {
                    issues,
                    error: Some(format!("{} contains malformed lines", self.flat_path.display())),
                    ..SetResponse::rejected()
                };
            }
        };

        debug!("baseline {} has {} key(s)", self.flat_path.display(), baseline.len());
        if baseline.is_empty() {
            info!("{} absent or empty, writing defaults", self.flat_path.display());
        }

        if let Err(e) = self.store.save(&settings) {
            return SetResponse::failed(format!("saving settings: {e}"));
        }

        let flat = flatconfig::apply_sync_settings(&settings.sync, &baseline);
        if let Err(e) = util::write_atomic(&self.flat_path, flatconfig::render(&flat).as_bytes(), FLAT_FILE_MODE) {
            error!(
                "settings stored but {} was not written, daemon config is stale: {e}",
                self.flat_path.display()
            );
            return SetResponse::failed(format!("Failed to write config file {}: {e}", self.flat_path.display()));
        }

        info!("settings saved, {} regenerated", self.flat_path.display());
        SetResponse::saved()
    }

    /// The flat file the stored settings would produce right now.
    pub fn render_current(&self) -> Result<String> {
        let settings = self.store.load()?;
        let baseline = match self.read_baseline() {
            Ok(b) => b,
            Err(Baseline::Io(e)) => return Err(AdminError::Io(e)),
            Err(Baseline::Malformed(issues)) => {
                return Err(AdminError::Config(format!(
                    "{} has {} malformed line(s)",
                    self.flat_path.display(),
                    issues.len()
                )));
            }
        };
        Ok(flatconfig::render(&flatconfig::apply_sync_settings(&settings.sync, &baseline)))
    }

    pub fn flat_path(&self) -> &Path {
        &self.flat_path
    }

    fn read_baseline(&self) -> std::result::Result<FlatConfig, Baseline> {
        let Some(text) = util::read_optional(&self.flat_path).map_err(Baseline::Io)? else {
            return Ok(FlatConfig::new());
        };
        if self.strict {
            flatconfig::parse_flat_config_strict(&text).map_err(Baseline::Malformed)
        } else {
            Ok(flatconfig::parse_flat_config(&text))
        }
    }
}

enum Baseline {
    Io(std::io::Error),
    Malformed(Vec<LineIssue>),
}

/// Strict-parse a flat config file; `Ok(None)` when the file is absent.
pub fn check_flat_file(path: &Path) -> Result<Option<Vec<LineIssue>>> {
    let Some(text) = util::read_optional(path)? else {
        return Ok(None);
    };
    Ok(Some(flatconfig::parse_flat_config_strict(&text).err().unwrap_or_default()))
}

/// Find the settings form in a request body.  The canonical key wins over
/// aliases; the form may sit under `general` or directly under the key.
fn extract_form(payload: &Value) -> Result<SettingsForm> {
    let obj = payload
        .as_object()
        .ok_or_else(|| AdminError::Config("payload must be a JSON object".into()))?;

    let (key, node) = std::iter::once(PAYLOAD_KEY)
        .chain(PAYLOAD_ALIASES.iter().copied())
        .find_map(|k| obj.get(k).map(|v| (k, v)))
        .ok_or_else(|| AdminError::Config(format!("payload has no \"{PAYLOAD_KEY}\" object")))?;
    if key != PAYLOAD_KEY {
        debug!("accepted legacy payload key \"{key}\"");
    }

    let general = node.get("general").unwrap_or(node);
    if !general.is_object() {
        return Err(AdminError::Config(format!("\"{key}\" must be an object")));
    }
    Ok(serde_json::from_value(general.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SyncSettings;
    use crate::store::XmlSettingsStore;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn endpoint(tmp: &TempDir, strict: bool) -> SettingsEndpoint<XmlSettingsStore> {
        SettingsEndpoint::new(
            XmlSettingsStore::new(tmp.path().join("settings.xml")),
            tmp.path().join("dhcpsync").join("config.env"),
            strict,
        )
    }

    fn example_payload() -> Value {
        json!({
            "dhcpadguardsync": {
                "general": {
                    "enabled": "1",
                    "adguard_username": "admin",
                    "adguard_password": "secret",
                    "adguard_url": "https://ads.local:444",
                    "dhcp_backend": "isc"
                }
            }
        })
    }

    #[test]
    fn set_writes_store_and_flat_file() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);

        let r = ep.set(&example_payload());
        assert_eq!(r.result, SaveResult::Saved, "{r:?}");

        let text = fs::read_to_string(ep.flat_path()).unwrap();
        for line in [
            "ADGUARD_USERNAME=\"admin\"",
            "ADGUARD_PASSWORD=\"secret\"",
            "ADGUARD_URL=\"ads.local:444\"",
            "ADGUARD_SCHEME=\"https\"",
            "DHCP_LEASE_PATH=\"/var/dhcpd/var/db/dhcpd.leases\"",
            "LEASE_FORMAT=\"isc\"",
        ] {
            assert!(text.contains(line), "missing {line} in\n{text}");
        }

        let stored = ep.store.load().unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.sync.dhcp_backend, DhcpBackend::Isc);
    }

    #[test]
    fn set_preserves_unmanaged_and_disabled_keys() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);
        fs::create_dir_all(ep.flat_path().parent().unwrap()).unwrap();
        fs::write(ep.flat_path(), "LOG_LEVEL=\"debug\"\n#DEBUG=\"true\"\nADGUARD_USERNAME=\"old\"\n").unwrap();

        assert_eq!(ep.set(&example_payload()).result, SaveResult::Saved);

        let text = fs::read_to_string(ep.flat_path()).unwrap();
        assert!(text.contains("LOG_LEVEL=\"debug\""));
        assert!(text.contains("#DEBUG=\"true\""));
        assert!(text.contains("ADGUARD_USERNAME=\"admin\""));
        assert!(!text.contains("old"));
    }

    #[test]
    fn validation_failure_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);

        let r = ep.set(&json!({ "dhcpadguardsync": { "general": { "adguard_url": "" } } }));
        assert_eq!(r.result, SaveResult::Failed);
        assert_eq!(r.validations.len(), 1);
        assert!(!ep.flat_path().exists());
        assert!(!tmp.path().join("settings.xml").exists());
    }

    #[test]
    fn legacy_payload_keys_and_field_names() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);

        let r = ep.set(&json!({
            "frm_GeneralSettings": {
                "AdguardHomeUsername": "legacy",
                "AdguardHomeURL": "10.0.0.2:3000",
                "DHCPServer": { "dnsmasq": { "selected": 0 }, "isc": { "selected": 1 } }
            }
        }));
        assert_eq!(r.result, SaveResult::Saved, "{r:?}");

        let s = ep.store.load().unwrap().sync;
        assert_eq!(s.adguard_username, "legacy");
        assert_eq!(s.dhcp_backend, DhcpBackend::Isc);
        let text = fs::read_to_string(ep.flat_path()).unwrap();
        assert!(text.contains("ADGUARD_URL=\"10.0.0.2:3000\""));
        assert!(text.contains("ADGUARD_SCHEME=\"http\""));
    }

    #[test]
    fn canonical_key_wins_over_alias() {
        let form = extract_form(&json!({
            "settings": { "adguard_username": "alias" },
            "dhcpadguardsync": { "general": { "adguard_username": "canonical" } }
        }))
        .unwrap();
        assert_eq!(form.adguard_username.as_deref(), Some("canonical"));
    }

    #[test]
    fn malformed_payload_fails() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);
        for payload in [json!([]), json!({ "other": {} }), json!({ "dhcpadguardsync": 3 })] {
            let r = ep.set(&payload);
            assert_eq!(r.result, SaveResult::Failed, "{payload}");
            assert!(r.error.is_some());
        }
    }

    #[test]
    fn strict_mode_refuses_malformed_file() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, true);
        fs::create_dir_all(ep.flat_path().parent().unwrap()).unwrap();
        fs::write(ep.flat_path(), "LOG_LEVEL=info\nthis is not valid\n").unwrap();

        let r = ep.set(&example_payload());
        assert_eq!(r.result, SaveResult::Failed);
        assert_eq!(r.issues.len(), 1);
        assert_eq!(r.issues[0].line, 2);
        assert_eq!(fs::read_to_string(ep.flat_path()).unwrap(), "LOG_LEVEL=info\nthis is not valid\n");
        assert!(!tmp.path().join("settings.xml").exists());
    }

    #[test]
    fn lenient_mode_drops_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);
        fs::create_dir_all(ep.flat_path().parent().unwrap()).unwrap();
        fs::write(ep.flat_path(), "this is not valid\n").unwrap();

        assert_eq!(ep.set(&example_payload()).result, SaveResult::Saved);
        assert!(!fs::read_to_string(ep.flat_path()).unwrap().contains("not valid"));
    }

    #[test]
    fn unreadable_flat_file_aborts_before_store_save() {
        let tmp = TempDir::new().unwrap();
        // A directory where the flat file should be cannot be read as text.
        let flat = tmp.path().join("config.env");
        fs::create_dir_all(flat.join("occupied")).unwrap();
        let ep = SettingsEndpoint::new(XmlSettingsStore::new(tmp.path().join("settings.xml")), &flat, false);

        let r = ep.set(&example_payload());
        assert_eq!(r.result, SaveResult::Failed);
        assert!(r.error.unwrap().starts_with("reading "));
        assert!(!tmp.path().join("settings.xml").exists());
    }

    #[test]
    fn get_overlays_flat_file() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);
        assert_eq!(ep.set(&example_payload()).result, SaveResult::Saved);

        // Hand edit of the daemon file.
        let text = fs::read_to_string(ep.flat_path()).unwrap()
            .replace("LEASE_FORMAT=\"isc\"", "LEASE_FORMAT=\"dnsmasq\"");
        fs::write(ep.flat_path(), text).unwrap();

        let doc = serde_json::to_value(ep.get()).unwrap();
        let general = &doc["dhcpadguardsync"]["general"];
        assert_eq!(general["enabled"], "1");
        assert_eq!(general["adguard_url"], "https://ads.local:444");
        assert_eq!(general["dhcp_backend"]["dnsmasq"]["selected"], 1);
        assert_eq!(general["dhcp_backend"]["isc"]["selected"], 0);
    }

    #[test]
    fn corrupt_store_reads_as_disabled() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);
        assert_eq!(ep.set(&example_payload()).result, SaveResult::Saved);
        assert!(ep.enabled());

        fs::write(tmp.path().join("settings.xml"), "<opnsense/>").unwrap();
        assert!(!ep.enabled());
        assert_eq!(ep.get().result, Some(SaveResult::Failed));
    }

    #[test]
    fn get_without_files_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let r = endpoint(&tmp, false).get();
        let general = r.document.unwrap().general;
        assert_eq!(general.enabled, "0");
        assert_eq!(general.adguard_url, SyncSettings::default().adguard_url);
    }

    #[test]
    fn render_current_matches_saved_file() {
        let tmp = TempDir::new().unwrap();
        let ep = endpoint(&tmp, false);
        ep.set(&example_payload());
        assert_eq!(ep.render_current().unwrap(), fs::read_to_string(ep.flat_path()).unwrap());
    }

    #[test]
    fn check_reports_issues() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.env");
        assert_eq!(check_flat_file(&path).unwrap(), None);

        fs::write(&path, "A=1\nbroken\n").unwrap();
        let issues = check_flat_file(&path).unwrap().unwrap();
        assert_eq!(issues.len(), 1);

        fs::write(&path, "A=1\n").unwrap();
        assert_eq!(check_flat_file(&path).unwrap(), Some(Vec::new()));
    }
}
