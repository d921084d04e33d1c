use crate::ring::Ring;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Samples kept per endpoint.
pub const HISTORY_CAPACITY: usize = 20;
/// Entries kept in the activity log.
pub const LOG_CAPACITY: usize = 50;

pub const DEFAULT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Up,
    Down,
    Unknown,
    Paused,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Up => write!(f, "UP"),
            Status::Down => write!(f, "DOWN"),
            Status::Unknown => write!(f, "UNKNOWN"),
            Status::Paused => write!(f, "PAUSED"),
        }
    }
}

/// What the operator and the scheduler may do with an endpoint in a given status.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub schedulable: bool,
    pub can_report: bool,
    pub can_pause: bool,
    pub can_resume: bool,
}

impl Status {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Status::Unknown | Status::Up => Capabilities {
                schedulable: true,
                can_report: false,
                can_pause: true,
                can_resume: false,
            },
            Status::Down => Capabilities {
                schedulable: true,
                can_report: true,
                can_pause: true,
                can_resume: false,
            },
            Status::Paused => Capabilities {
                schedulable: false,
                can_report: false,
                can_pause: false,
                can_resume: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
}

impl HttpMethod {
    /// The curl invocation shown in the activity log.
    pub fn render_command(self, url: &str) -> String {
        match self {
            HttpMethod::Get => format!("curl -X GET {}", url),
            HttpMethod::Head => format!("curl -I {}", url),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Head => write!(f, "HEAD"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Local>,
    /// 0 for a failed attempt.
    pub latency: u64,
}

/// A monitored target plus its configuration and last observed state.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: Status,
    /// Milliseconds; 0 until a check succeeds.
    pub latency: u64,
    pub last_checked: Option<DateTime<Local>>,
    pub history: Ring<HistoryPoint>,
    pub method: HttpMethod,
    /// Advisory only, the scheduler period wins.
    pub interval: u64,
    pub last_detail: Option<String>,
}

impl Endpoint {
    pub fn capabilities(&self) -> Capabilities {
        self.status.capabilities()
    }
}

/// Operator input for a new endpoint. `url` may omit the scheme.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub interval: Option<u64>,
}

impl NewEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: None,
            interval: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutcome {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Local>,
    /// Copied at append time; renames and deletes don't touch it.
    pub monitor_name: String,
    pub command: String,
    pub output: String,
    pub status: LogOutcome,
}

/// Aggregates shown in the dashboard header.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub unknown: usize,
    pub paused: usize,
    pub avg_latency: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_down_can_report() {
        for status in [Status::Up, Status::Unknown, Status::Paused] {
            assert!(!status.capabilities().can_report, "{status}");
        }
        assert!(Status::Down.capabilities().can_report);
    }

    #[test]
    fn paused_is_not_schedulable() {
        let caps = Status::Paused.capabilities();
        assert!(!caps.schedulable);
        assert!(caps.can_resume);
        assert!(!caps.can_pause);
        assert!(Status::Up.capabilities().schedulable);
    }

    #[test]
    fn status_uses_uppercase_on_the_wire() {
        assert_eq!(serde_json::to_string(&Status::Paused).unwrap(), "\"PAUSED\"");
        let m: HttpMethod = serde_json::from_str("\"HEAD\"").unwrap();
        assert_eq!(m, HttpMethod::Head);
    }

    #[test]
    fn command_reflects_method() {
        assert_eq!(HttpMethod::Head.render_command("https://a.io"), "curl -I https://a.io");
        assert_eq!(HttpMethod::Get.render_command("https://a.io"), "curl -X GET https://a.io");
    }
}
