//! Service endpoint: lifecycle control of the sync daemon through configd.
//!
//! configd only hands back the command's text output, so success is inferred
//! from what the output says.  That inference lives in
//! [`CommandOutcome::classify`] and [`ServiceStatus::classify`]; nothing
//! above this module looks at raw output to make decisions.

use std::path::PathBuf;
use std::process::Command;

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{AdminError, Result};
use crate::logs::{self, LogEntry, LogLevel};

// ── Command runner ────────────────────────────────────────────────────────────

/// Executes a configd action such as `dhcpsync restart` and returns its
/// captured output.
pub trait CommandRunner {
    fn run(&self, action: &str) -> Result<String>;
}

/// Runs actions through `configctl`.
#[derive(Debug, Clone)]
pub struct ConfigdRunner {
    configctl: PathBuf,
}

impl ConfigdRunner {
    pub fn new(configctl: impl Into<PathBuf>) -> Self {
        Self { configctl: configctl.into() }
    }
}

impl CommandRunner for ConfigdRunner {
    fn run(&self, action: &str) -> Result<String> {
        debug!("{} {action}", self.configctl.display());
        let out = Command::new(&self.configctl)
            .args(action.split_whitespace())
            .output()
            .map_err(|e| AdminError::Command(format!("{}: {e}", self.configctl.display())))?;

        if !out.status.success() {
            // The exit code is not a reliable signal; the text is classified instead.
            debug!("configctl {action} exited with {}", out.status);
        }

        let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        Ok(text)
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOutcome {
    Ok,
    Failed,
    Unknown,
}

impl CommandOutcome {
    /// configd answers `OK` on a line of its own for accepted actions; the
    /// daemon's own `test` subcommand reports `success`.  Both must appear
    /// as whole words.
    pub fn classify(output: &str) -> Self {
        let ok_line = output
            .lines()
            .any(|l| l.split(|c: char| !c.is_ascii_alphanumeric()).find(|w| !w.is_empty()) == Some("OK"));
        let success = words(output).any(|w| matches!(w.as_str(), "success" | "successful" | "succeeded"));
        let lower = output.to_ascii_lowercase();
        if ok_line || success {
            CommandOutcome::Ok
        } else if lower.contains("fail") || lower.contains("error") {
            CommandOutcome::Failed
        } else {
            CommandOutcome::Unknown
        }
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Disabled,
    Unknown,
}

impl ServiceStatus {
    /// rc scripts report `dhcpsync is running as pid 123.` or
    /// `dhcpsync is not running.`
    pub fn classify(output: &str) -> Self {
        let lower = output.to_ascii_lowercase();
        if lower.contains("not running") || lower.contains("stopped") {
            ServiceStatus::Stopped
        } else if lower.contains("is running") {
            ServiceStatus::Running
        } else {
            ServiceStatus::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceAction {
    Status,
    Start,
    Stop,
    Restart,
    Reconfigure,
    Test,
    Logs,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceResponse {
    pub result: CommandOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<LogEntry>>,
}

impl ServiceResponse {
    fn from_output(result: CommandOutcome, response: String) -> Self {
        Self { result, status: None, message: None, response, entries: None }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            result:   CommandOutcome::Failed,
            status:   None,
            message:  Some(message.into()),
            response: String::new(),
            entries:  None,
        }
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

pub struct ServiceEndpoint<R> {
    runner:  R,
    service: String,
    enabled: bool,
}

impl<R: CommandRunner> ServiceEndpoint<R> {
    /// `enabled` is the stored `general.enabled` flag.
    pub fn new(runner: R, service: impl Into<String>, enabled: bool) -> Self {
        Self { runner, service: service.into(), enabled }
    }

    pub fn run(&self, action: ServiceAction, min_level: Option<LogLevel>) -> ServiceResponse {
        match action {
            ServiceAction::Status      => self.status(),
            ServiceAction::Start       => self.start(),
            ServiceAction::Stop        => self.stop(),
            ServiceAction::Restart     => self.restart(),
            ServiceAction::Reconfigure => self.reconfigure(),
            ServiceAction::Test        => self.test(),
            ServiceAction::Logs        => self.logs(min_level),
        }
    }

    pub fn status(&self) -> ServiceResponse {
        match self.call("status") {
            Ok(out) => {
                let status = if self.enabled {
                    ServiceStatus::classify(&out)
                } else {
                    ServiceStatus::Disabled
                };
                ServiceResponse {
                    status: Some(status),
                    ..ServiceResponse::from_output(CommandOutcome::Ok, out)
                }
            }
            Err(e) => ServiceResponse::failed(e.to_string()),
        }
    }

    pub fn start(&self) -> ServiceResponse {
        if !self.enabled {
            return ServiceResponse::failed(self.disabled_message());
        }
        self.lifecycle("start")
    }

    pub fn stop(&self) -> ServiceResponse {
        self.lifecycle("stop")
    }

    pub fn restart(&self) -> ServiceResponse {
        if !self.enabled {
            return ServiceResponse::failed(self.disabled_message());
        }
        self.lifecycle("restart")
    }

    /// Apply the stored enabled flag: restart when enabled, stop otherwise.
    pub fn reconfigure(&self) -> ServiceResponse {
        if self.enabled {
            self.lifecycle("restart")
        } else {
            info!("{} disabled, stopping", self.service);
            self.lifecycle("stop")
        }
    }

    /// Ask the daemon to verify its configuration and AdGuard connectivity.
    pub fn test(&self) -> ServiceResponse {
        match self.call("test") {
            Ok(out) => {
                let outcome = match CommandOutcome::classify(&out) {
                    CommandOutcome::Ok => CommandOutcome::Ok,
                    _ => CommandOutcome::Failed,
                };
                ServiceResponse::from_output(outcome, out)
            }
            Err(e) => ServiceResponse::failed(e.to_string()),
        }
    }

    pub fn logs(&self, min_level: Option<LogLevel>) -> ServiceResponse {
        match self.call("logs") {
            Ok(out) => ServiceResponse {
                entries: Some(logs::parse_log(&out, min_level)),
                ..ServiceResponse::from_output(CommandOutcome::Ok, out)
            },
            Err(e) => ServiceResponse::failed(e.to_string()),
        }
    }

    fn lifecycle(&self, verb: &str) -> ServiceResponse {
        match self.call(verb) {
            Ok(out) => {
                let outcome = CommandOutcome::classify(&out);
                if outcome != CommandOutcome::Ok {
                    warn!("{} {verb}: {}", self.service, out.trim());
                }
                ServiceResponse::from_output(outcome, out)
            }
            Err(e) => ServiceResponse::failed(e.to_string()),
        }
    }

    fn call(&self, verb: &str) -> Result<String> {
        let action = format!("{} {verb}", self.service);
        let out = self.runner.run(&action);
        if let Err(e) = &out {
            warn!("{action}: {e}");
        }
        out
    }

    fn disabled_message(&self) -> String {
        format!("{} is disabled; enable it in the settings first", self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Canned outputs per action; records every call.
    #[derive(Default)]
    struct FakeRunner {
        outputs: HashMap<&'static str, &'static str>,
        calls:   RefCell<Vec<String>>,
    }

    impl FakeRunner {
        fn with(outputs: &[(&'static str, &'static str)]) -> Self {
            Self { outputs: outputs.iter().copied().collect(), calls: RefCell::default() }
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, action: &str) -> Result<String> {
            self.calls.borrow_mut().push(action.to_string());
            self.outputs
                .get(action)
                .map(|s| s.to_string())
                .ok_or_else(|| AdminError::Command(format!("no such action: {action}")))
        }
    }

    #[test]
    fn classify_output() {
        assert_eq!(CommandOutcome::classify("OK\n"), CommandOutcome::Ok);
        assert_eq!(CommandOutcome::classify("Connection test: Success"), CommandOutcome::Ok);
        assert_eq!(CommandOutcome::classify("Action not found"), CommandOutcome::Unknown);
        assert_eq!(CommandOutcome::classify("error: failed to bind"), CommandOutcome::Failed);
        assert_eq!(CommandOutcome::classify(""), CommandOutcome::Unknown);
    }

    #[test]
    fn ok_must_lead_a_line_as_a_word() {
        assert_eq!(CommandOutcome::classify("OK: restarted\n"), CommandOutcome::Ok);
        assert_eq!(CommandOutcome::classify("stopping\nOK\n"), CommandOutcome::Ok);
        assert_eq!(CommandOutcome::classify("NOT OK"), CommandOutcome::Unknown);
        assert_eq!(CommandOutcome::classify("BROKEN"), CommandOutcome::Unknown);
        assert_eq!(CommandOutcome::classify("TOKEN expired"), CommandOutcome::Unknown);
        assert_eq!(CommandOutcome::classify("unsuccessful: error 3"), CommandOutcome::Failed);
    }

    #[test]
    fn classify_status() {
        assert_eq!(ServiceStatus::classify("dhcpsync is running as pid 42."), ServiceStatus::Running);
        assert_eq!(ServiceStatus::classify("dhcpsync is not running."), ServiceStatus::Stopped);
        assert_eq!(ServiceStatus::classify("???"), ServiceStatus::Unknown);
    }

    #[test]
    fn start_runs_service_action() {
        let runner = FakeRunner::with(&[("dhcpsync start", "OK\n")]);
        let ep = ServiceEndpoint::new(runner, "dhcpsync", true);
        let r = ep.start();
        assert_eq!(r.result, CommandOutcome::Ok);
        assert_eq!(r.response, "OK\n");
        assert_eq!(*ep.runner.calls.borrow(), ["dhcpsync start"]);
    }

    #[test]
    fn disabled_service_is_not_started() {
        let ep = ServiceEndpoint::new(FakeRunner::default(), "dhcpsync", false);
        assert_eq!(ep.start().result, CommandOutcome::Failed);
        assert_eq!(ep.restart().result, CommandOutcome::Failed);
        assert!(ep.runner.calls.borrow().is_empty());
    }

    #[test]
    fn reconfigure_follows_enabled_flag() {
        let outputs = [("dhcpsync restart", "OK"), ("dhcpsync stop", "OK")];

        let ep = ServiceEndpoint::new(FakeRunner::with(&outputs), "dhcpsync", true);
        ep.reconfigure();
        assert_eq!(*ep.runner.calls.borrow(), ["dhcpsync restart"]);

        let ep = ServiceEndpoint::new(FakeRunner::with(&outputs), "dhcpsync", false);
        ep.reconfigure();
        assert_eq!(*ep.runner.calls.borrow(), ["dhcpsync stop"]);
    }

    #[test]
    fn status_reports_disabled_service() {
        let runner = FakeRunner::with(&[("dhcpsync status", "dhcpsync is not running.")]);
        let r = ServiceEndpoint::new(runner, "dhcpsync", false).status();
        assert_eq!(r.result, CommandOutcome::Ok);
        assert_eq!(r.status, Some(ServiceStatus::Disabled));
    }

    #[test]
    fn test_action_is_ok_or_failed() {
        let runner = FakeRunner::with(&[("dhcpsync test", "connection refused")]);
        let r = ServiceEndpoint::new(runner, "dhcpsync", true).test();
        assert_eq!(r.result, CommandOutcome::Failed);
        assert_eq!(r.response, "connection refused");
    }

    #[test]
    fn runner_error_becomes_failed_response() {
        let r = ServiceEndpoint::new(FakeRunner::default(), "dhcpsync", true).stop();
        assert_eq!(r.result, CommandOutcome::Failed);
        assert!(r.message.unwrap().contains("dhcpsync stop"));
    }

    #[test]
    fn logs_are_parsed_and_filtered() {
        let runner = FakeRunner::with(&[(
            "dhcpsync logs",
            "2025/09/20 01:07:30 [INFO] started\n2025/09/20 01:07:31 [ERROR] boom\n",
        )]);
        let r = ServiceEndpoint::new(runner, "dhcpsync", true).run(ServiceAction::Logs, Some(LogLevel::Error));
        assert_eq!(r.result, CommandOutcome::Ok);
        let entries = r.entries.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "boom");
    }

    #[test]
    fn configd_runner_reports_missing_binary() {
        let runner = ConfigdRunner::new("/nonexistent/configctl");
        assert!(matches!(runner.run("dhcpsync status"), Err(AdminError::Command(_))));
    }
}
