use crate::model::{
    Endpoint, HistoryPoint, HttpMethod, NewEndpoint, Stats, Status, DEFAULT_INTERVAL_SECS,
    HISTORY_CAPACITY,
};
use crate::probe::CheckResult;
use crate::ring::Ring;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Monitor name cannot be empty")]
    EmptyName,
    #[error("Monitor URL cannot be empty")]
    EmptyUrl,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported scheme '{0}'. Must be http or https")]
    UnsupportedScheme(String),
    #[error("Monitor {0} not found")]
    NotFound(String),
    #[error("Monitor {0} is paused")]
    Paused(String),
    #[error("Monitor {0} is not paused")]
    NotPaused(String),
    #[error("Monitor {0} is not down")]
    NotDown(String),
}

static SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("static regex"));

/// Prefixes `https://` when no scheme is given, then checks the result is a
/// usable http(s) URL.
pub fn normalize_url(raw: &str) -> Result<String, RegistryError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RegistryError::EmptyUrl);
    }
    let candidate = if SCHEME.is_match(raw) {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let parsed =
        reqwest::Url::parse(&candidate).map_err(|e| RegistryError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(RegistryError::UnsupportedScheme(other.to_string())),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(RegistryError::InvalidUrl("URL must have a host".into()));
    }
    Ok(candidate)
}

/// Ordered set of monitored endpoints. Entries are replaced whole, never
/// patched field by field.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    endpoints: Vec<Endpoint>,
}

/// What a check needs to know about its target at issue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTarget {
    pub id: String,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
}

impl From<&Endpoint> for CheckTarget {
    fn from(e: &Endpoint) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            url: e.url.clone(),
            method: e.method,
        }
    }
}

impl Registry {
    pub fn add(&mut self, input: NewEndpoint) -> Result<&Endpoint, RegistryError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let url = normalize_url(&input.url)?;

        self.endpoints.push(Endpoint {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            url,
            status: Status::Unknown,
            latency: 0,
            last_checked: None,
            history: Ring::new(HISTORY_CAPACITY),
            method: input.method.unwrap_or_default(),
            interval: input.interval.unwrap_or(DEFAULT_INTERVAL_SECS),
            last_detail: None,
        });
        // just pushed
        Ok(&self.endpoints[self.endpoints.len() - 1])
    }

    pub fn remove(&mut self, id: &str) -> Option<Endpoint> {
        let idx = self.position(id)?;
        Some(self.endpoints.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    /// Target for an on-demand check. Paused endpoints are refused.
    pub fn check_target(&self, id: &str) -> Result<CheckTarget, RegistryError> {
        let endpoint = self.get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if !endpoint.capabilities().schedulable {
            return Err(RegistryError::Paused(endpoint.id.clone()));
        }
        Ok(CheckTarget::from(endpoint))
    }

    /// Targets the periodic tick should probe, in registry order.
    pub fn schedulable(&self) -> Vec<CheckTarget> {
        self.endpoints
            .iter()
            .filter(|e| e.capabilities().schedulable)
            .map(CheckTarget::from)
            .collect()
    }

    /// Endpoints that have never been checked.
    pub fn unknown_ids(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|e| e.status == Status::Unknown)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Applies one probe result as a single replacement of the entry.
    ///
    /// Returns the updated endpoint, or `None` when the id is gone or the
    /// endpoint is paused (a result never un-pauses).
    pub fn apply_result(
        &mut self,
        id: &str,
        result: &CheckResult,
        now: DateTime<Local>,
    ) -> Option<&Endpoint> {
        let idx = self.position(id)?;
        let current = &self.endpoints[idx];
        if current.status == Status::Paused {
            return None;
        }

        // Keep history ascending even if the wall clock steps back.
        let timestamp = match current.history.last() {
            Some(prev) if prev.timestamp > now => prev.timestamp,
            _ => now,
        };

        let mut history = current.history.clone();
        history.push(HistoryPoint {
            timestamp,
            latency: result.latency,
        });

        let updated = Endpoint {
            status: result.status,
            latency: result.latency,
            last_checked: Some(timestamp),
            history,
            last_detail: Some(result.detail.clone()),
            ..current.clone()
        };
        self.endpoints[idx] = updated;
        Some(&self.endpoints[idx])
    }

    pub fn pause(&mut self, id: &str) -> Result<&Endpoint, RegistryError> {
        self.transition(id, |e| {
            if e.capabilities().can_pause {
                Ok(Status::Paused)
            } else {
                Err(RegistryError::Paused(e.id.clone()))
            }
        })
    }

    /// PAUSED back to UNKNOWN, so the next trigger treats it as fresh.
    pub fn resume(&mut self, id: &str) -> Result<&Endpoint, RegistryError> {
        self.transition(id, |e| {
            if e.capabilities().can_resume {
                Ok(Status::Unknown)
            } else {
                Err(RegistryError::NotPaused(e.id.clone()))
            }
        })
    }

    fn transition<F>(&mut self, id: &str, next: F) -> Result<&Endpoint, RegistryError>
    where
        F: FnOnce(&Endpoint) -> Result<Status, RegistryError>,
    {
        let idx = self
            .position(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let status = next(&self.endpoints[idx])?;
        let updated = Endpoint {
            status,
            ..self.endpoints[idx].clone()
        };
        self.endpoints[idx] = updated;
        Ok(&self.endpoints[idx])
    }

    pub fn stats(&self) -> Stats {
        let count = |s: Status| self.endpoints.iter().filter(|e| e.status == s).count();
        let measured: Vec<u64> = self
            .endpoints
            .iter()
            .map(|e| e.latency)
            .filter(|&l| l > 0)
            .collect();
        let denominator = measured.len().max(1) as f64;
        let avg_latency = (measured.iter().sum::<u64>() as f64 / denominator).round() as u64;

        Stats {
            total: self.endpoints.len(),
            up: count(Status::Up),
            down: count(Status::Down),
            unknown: count(Status::Unknown),
            paused: count(Status::Paused),
            avg_latency,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.endpoints.iter().position(|e| e.id == id)
    }
}
