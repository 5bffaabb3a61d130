//! AdGuard Home connectivity test.
//!
//! A single `GET …/control/status` with basic auth.  AdGuard Home installs
//! on firewalls commonly run with self-signed certificates, so certificate
//! and hostname checks are disabled for this request.  Nothing is persisted.

use std::error::Error as _;
use std::time::Duration;

use log::{debug, info};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::error::{AdminError, Result};
use crate::settings::SyncSettings;

/// Characters of the response body echoed back for diagnostics.
const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeDebug {
    pub url:              String,
    /// `0` when no HTTP response was received.
    pub http_code:        u16,
    pub error:            String,
    pub headers:          String,
    pub response_preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub status:  ProbeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug:   Option<ProbeDebug>,
}

impl ConnectionReport {
    pub fn failed(message: impl Into<String>, debug: Option<ProbeDebug>) -> Self {
        Self { status: ProbeStatus::Failed, message: message.into(), debug }
    }
}

/// Build the permissive HTTP client used for the status probe.
pub fn build_probe_client(connect_timeout: Duration, timeout: Duration) -> Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(AdminError::Http)
}

/// Status endpoint for a configured base URL.  A base that already points
/// at `/control` only gets `/status` appended.
pub fn status_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let lower = base.to_ascii_lowercase();
    let base = if lower.starts_with("http://") || lower.starts_with("https://") {
        base.to_string()
    } else {
        format!("http://{base}")
    };
    if base.ends_with("/control") {
        format!("{base}/status")
    } else {
        format!("{base}/control/status")
    }
}

/// Probe AdGuard Home with the given settings.  Never returns an error;
/// every failure is folded into the report.
pub async fn test_connection(client: &Client, settings: &SyncSettings) -> ConnectionReport {
    if settings.adguard_url.trim().is_empty() || settings.adguard_username.is_empty() {
        return ConnectionReport::failed("Please fill in all required fields (URL, Username)", None);
    }

    let url = status_url(&settings.adguard_url);
    info!("testing AdGuard Home connectivity: {url}");

    let mut dbg = ProbeDebug { url: url.clone(), ..ProbeDebug::default() };

    let resp = match client
        .get(&url)
        .basic_auth(&settings.adguard_username, Some(&settings.adguard_password))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            dbg.error = error_chain(&e);
            debug!("probe {url} failed: {}", dbg.error);
            let message = format!("Connection failed: {}", dbg.error);
            return ConnectionReport::failed(message, Some(dbg));
        }
    };

    let status = resp.status();
    dbg.http_code = status.as_u16();
    dbg.headers = format_headers(&resp);
    match resp.text().await {
        Ok(body) => dbg.response_preview = body.chars().take(PREVIEW_CHARS).collect(),
        Err(e) => dbg.error = error_chain(&e),
    }
    debug!("probe {url} → {status}");

    let message = match status {
        StatusCode::OK => {
            return ConnectionReport {
                status:  ProbeStatus::Ok,
                message: "Connection successful!".into(),
                debug:   Some(dbg),
            };
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            "Authentication failed. Please check your username and password.".to_string()
        }
        _ if !dbg.error.is_empty() => format!("Connection failed: {}", dbg.error),
        _ => format!("Connection failed: HTTP Error {}", status.as_u16()),
    };
    ConnectionReport::failed(message, Some(dbg))
}

fn format_headers(resp: &reqwest::Response) -> String {
    let mut out = format!("{:?} {}\r\n", resp.version(), resp.status());
    for (name, value) in resp.headers() {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(value.to_str().unwrap_or("<binary>"));
        out.push_str("\r\n");
    }
    out
}

/// reqwest's top-level message is terse; append the underlying causes.
fn error_chain(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serve one canned HTTP response on localhost; the request head is sent
    /// back through the channel.
    fn one_shot_server(response: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            stream.write_all(response.as_bytes()).unwrap();
            let _ = tx.send(head);
        });
        (format!("http://{addr}"), rx)
    }

    fn settings(url: &str) -> SyncSettings {
        SyncSettings {
            adguard_username: "admin".into(),
            adguard_password: "secret".into(),
            adguard_url:      url.into(),
            ..SyncSettings::default()
        }
    }

    fn client() -> Client {
        build_probe_client(Duration::from_secs(2), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn status_url_variants() {
        assert_eq!(status_url("http://h:3000"), "http://h:3000/control/status");
        assert_eq!(status_url("http://h:3000/"), "http://h:3000/control/status");
        assert_eq!(status_url("https://h/control/"), "https://h/control/status");
        assert_eq!(status_url("http://h/api"), "http://h/api/control/status");
        assert_eq!(status_url("h:3000"), "http://h:3000/control/status");
    }

    #[tokio::test]
    async fn missing_fields_short_circuit() {
        let mut s = settings("http://127.0.0.1:1");
        s.adguard_username.clear();
        let r = test_connection(&client(), &s).await;
        assert_eq!(r.status, ProbeStatus::Failed);
        assert!(r.message.contains("required fields"));
        assert!(r.debug.is_none());
    }

    #[tokio::test]
    async fn ok_on_200() {
        let (base, rx) = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 16\r\nConnection: close\r\n\r\n{\"running\":true}",
        );
        let r = test_connection(&client(), &settings(&base)).await;
        assert_eq!(r.status, ProbeStatus::Ok, "{r:?}");
        assert_eq!(r.message, "Connection successful!");

        let head = rx.recv().unwrap();
        assert!(head.starts_with("GET /control/status HTTP/1.1"), "{head}");
        // "admin:secret"
        assert!(head.to_ascii_lowercase().contains("authorization: basic ywrtaw46c2vjcmv0"), "{head}");
    }

    #[tokio::test]
    async fn auth_failure_on_401() {
        let (base, _rx) = one_shot_server(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 12\r\nConnection: close\r\n\r\nUnauthorized",
        );
        let r = test_connection(&client(), &settings(&base)).await;
        assert_eq!(r.status, ProbeStatus::Failed);
        assert_eq!(r.message, "Authentication failed. Please check your username and password.");
        let dbg = r.debug.unwrap();
        assert_eq!(dbg.http_code, 401);
        assert_eq!(dbg.response_preview, "Unauthorized");
        assert!(dbg.headers.starts_with("HTTP/1.1 401 Unauthorized"), "{}", dbg.headers);
    }

    #[tokio::test]
    async fn generic_failure_on_500() {
        let (base, _rx) = one_shot_server(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let r = test_connection(&client(), &settings(&base)).await;
        assert_eq!(r.message, "Connection failed: HTTP Error 500");
    }

    #[tokio::test]
    async fn connection_refused_is_reported() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let r = test_connection(&client(), &settings(&format!("http://127.0.0.1:{port}"))).await;
        assert_eq!(r.status, ProbeStatus::Failed);
        assert!(r.message.starts_with("Connection failed: "), "{}", r.message);
        assert_eq!(r.debug.unwrap().http_code, 0);
    }
}
