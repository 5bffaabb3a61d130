//! Error types for the dhcpsync admin backend.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Config: {0}")]
    Config(String),

    #[error("Command: {0}")]
    Command(String),
}

pub type Result<T> = std::result::Result<T, AdminError>;
