use crate::model::{HttpMethod, NewEndpoint};
use crate::report::ReportConfig;
use anyhow::Context;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "config.json";

static CONFIG_PATH: OnceCell<PathBuf> = OnceCell::new();

pub fn init_config_path(path: impl Into<PathBuf>) {
    if CONFIG_PATH.set(path.into()).is_err() {
        tracing::warn!("Config path already initialized, ignoring");
    }
}

fn config_path() -> &'static Path {
    CONFIG_PATH.get_or_init(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_ms: u64,
    /// Global tick period; per-endpoint intervals are advisory.
    pub period_ms: u64,
    /// Settle delay before a new endpoint's first check.
    pub initial_delay_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: crate::probe::DEFAULT_TIMEOUT_MS,
            period_ms: 15_000,
            initial_delay_ms: 100,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn period(&self) -> Duration {
        // interval() panics on zero
        Duration::from_millis(self.period_ms.max(1))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen: String,
    pub probe: ProbeConfig,
    pub report: ReportConfig,
    /// Also record add/remove/pause/resume in the activity log.
    pub log_operator_actions: bool,
    pub monitors: Vec<NewEndpoint>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            probe: ProbeConfig::default(),
            report: ReportConfig::default(),
            log_operator_actions: false,
            monitors: default_monitors(),
        }
    }
}

pub fn load_config() -> anyhow::Result<AppConfig> {
    let path = config_path();
    if !path.exists() {
        tracing::info!("Config file not found, creating default at {}", path.display());
        let defaults = AppConfig::default();
        save_config(&defaults)?;
        return Ok(defaults);
    }
    load_from(path)
}

fn load_from(path: &Path) -> anyhow::Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str::<AppConfig>(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

pub fn save_config(config: &AppConfig) -> anyhow::Result<()> {
    save_to(config, config_path())
}

fn save_to(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    let mut tmp_file = path.as_os_str().to_owned();
    tmp_file.push(".tmp");
    fs::write(&tmp_file, content).context("Failed to write temp config file")?;
    fs::rename(&tmp_file, path).context("Failed to replace config file")?;
    Ok(())
}

fn default_monitors() -> Vec<NewEndpoint> {
    let seed = |name: &str, url: &str| NewEndpoint {
        method: Some(HttpMethod::Get),
        interval: Some(30),
        ..NewEndpoint::new(name, url)
    };
    vec![
        seed("Google Public DNS", "https://dns.google"),
        seed("Cloudflare", "https://www.cloudflare.com"),
        // usually down outside a dev box
        seed("Localhost (Demo)", "http://localhost:3000"),
    ]
}
