//! Persistent structured settings store.
//!
//! The admin backend keeps its own copy of the settings as a small XML
//! document shaped like an OPNsense model section:
//!
//! ```xml
//! <dhcpadguardsync version="1.0.0">
//!   <general>
//!     <enabled>1</enabled>
//!     <adguard_username>admin</adguard_username>
//!     <adguard_password>secret</adguard_password>
//!     <adguard_url>https://ads.local:444</adguard_url>
//!     <dhcp_backend>isc</dhcp_backend>
//!   </general>
//! </dhcpadguardsync>
//! ```
//!
//! The flat config translator never sees this shape; it only gets the
//! [`GeneralSettings`] loaded from it.

use std::path::PathBuf;

use log::{debug, info};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{AdminError, Result};
use crate::settings::{self, DhcpBackend, GeneralSettings, ValidationError};
use crate::util;

const ROOT:    &str = "dhcpadguardsync";
const GENERAL: &str = "general";
const VERSION: &str = "1.0.0";

/// Load/validate/save contract of the structured store.
pub trait SettingsStore {
    fn load(&self) -> Result<GeneralSettings>;

    fn validate(&self, settings: &GeneralSettings) -> Vec<ValidationError> {
        settings::validate(settings)
    }

    fn save(&self, settings: &GeneralSettings) -> Result<()>;
}

/// [`SettingsStore`] backed by an XML file.  A missing file loads as defaults.
#[derive(Debug, Clone)]
pub struct XmlSettingsStore {
    path: PathBuf,
}

impl XmlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for XmlSettingsStore {
    fn load(&self) -> Result<GeneralSettings> {
        match util::read_optional(&self.path)? {
            Some(xml) => parse_document(&xml),
            None => {
                debug!("settings store {} not found, using defaults", self.path.display());
                Ok(GeneralSettings::default())
            }
        }
    }

    fn save(&self, settings: &GeneralSettings) -> Result<()> {
        let xml = write_document(settings)?;
        util::write_atomic(&self.path, &xml, 0o600)?;
        info!("settings saved to {}", self.path.display());
        Ok(())
    }
}

// ── XML codec ─────────────────────────────────────────────────────────────────

/// Read `<ROOT><general><field>text</field>…` into settings.  Unknown
/// elements are ignored; absent fields keep their defaults.
fn parse_document(xml: &str) -> Result<GeneralSettings> {
    // Field text is kept verbatim; indentation text outside fields is ignored.
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut settings = GeneralSettings::default();
    let mut path: Vec<String> = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = std::str::from_utf8(e.name().as_ref())?.to_string();
                if path.is_empty() {
                    if name != ROOT {
                        return Err(AdminError::Config(format!(
                            "settings store: unexpected root element <{name}>"
                        )));
                    }
                    saw_root = true;
                }
                path.push(name);
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(e) => {
                if let [_, section, field] = path.as_slice() {
                    if section == GENERAL {
                        let text = e.unescape()?;
                        set_field(&mut settings, field, &text);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(AdminError::Config("settings store: no root element".into()));
    }
    Ok(settings)
}

fn set_field(settings: &mut GeneralSettings, field: &str, value: &str) {
    let sync = &mut settings.sync;
    match field {
        "enabled"          => settings.enabled = value.trim() == "1",
        "adguard_username" => sync.adguard_username = value.to_string(),
        "adguard_password" => sync.adguard_password = value.to_string(),
        "adguard_url"      => sync.adguard_url = value.to_string(),
        "dhcp_backend"     => sync.dhcp_backend = DhcpBackend::from_name(value).unwrap_or_default(),
        _ => debug!("settings store: ignoring unknown field <{field}>"),
    }
}

fn write_document(settings: &GeneralSettings) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_tree(&mut writer, settings)?;
    let mut xml = writer.into_inner();
    xml.push(b'\n');
    Ok(xml)
}

fn write_tree(writer: &mut Writer<Vec<u8>>, settings: &GeneralSettings) -> std::result::Result<(), quick_xml::Error> {
    let sync = &settings.sync;

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new(ROOT);
    root.push_attribute(("version", VERSION));
    writer.write_event(Event::Start(root))?;
    writer.write_event(Event::Start(BytesStart::new(GENERAL)))?;

    let enabled = if settings.enabled { "1" } else { "0" };
    for (name, value) in [
        ("enabled",          enabled),
        ("adguard_username", sync.adguard_username.as_str()),
        ("adguard_password", sync.adguard_password.as_str()),
        ("adguard_url",      sync.adguard_url.as_str()),
        ("dhcp_backend",     sync.dhcp_backend.as_str()),
    ] {
        if value.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new(name)))?;
        } else {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            writer.write_event(Event::Text(BytesText::new(value)))?;
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new(GENERAL)))?;
    writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
    Ok(())
}
