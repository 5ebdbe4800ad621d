use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mail::search::{DEFAULT_LOOKBACK_WEEKS, FallbackPolicy};

const APP_DIR: &str = "mail_digest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    Week,
    Month,
    #[default]
    Lookback,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub imap_server: String,
    pub imap_port: u16,
    pub username: Option<String>,
    pub keywords: Vec<String>,
    pub fallback: FallbackMode,
    pub lookback_weeks: u32,
    pub skip_already_fetched: bool,
    pub ledger_dir: Option<String>,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub stream_delay_ms: u64,
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            imap_server: "mail.bilkent.edu.tr".to_string(),
            imap_port: 993,
            username: None,
            keywords: vec!["DAIS".to_string(), "AIRS".to_string()],
            fallback: FallbackMode::default(),
            lookback_weeks: DEFAULT_LOOKBACK_WEEKS,
            skip_already_fetched: false,
            ledger_dir: None,
            connect_timeout_secs: 30,
            io_timeout_secs: 60,
            stream_delay_ms: 0,
            poll_interval_secs: 300,
        }
    }
}

impl Config {
    pub fn fallback_policy(&self) -> FallbackPolicy {
        match self.fallback {
            FallbackMode::Week => FallbackPolicy::Week,
            FallbackMode::Month => FallbackPolicy::Month,
            FallbackMode::Lookback => FallbackPolicy::Lookback {
                max_weeks: self.lookback_weeks,
            },
        }
    }

    /// Zero disables the bound.
    pub fn connect_timeout(&self) -> Option<Duration> {
        secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        secs(self.io_timeout_secs)
    }

    pub fn stream_delay(&self) -> Option<Duration> {
        (self.stream_delay_ms > 0).then(|| Duration::from_millis(self.stream_delay_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

fn secs(n: u64) -> Option<Duration> {
    (n > 0).then(|| Duration::from_secs(n))
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow!("no config dir available"))?
        .join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    load_config_from(&path)
}

/// Writes a template and errors if the file does not exist yet.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let sample = Config {
            username: Some("you@ug.bilkent.edu.tr".to_string()),
            ..Config::default()
        };
        let tom = toml::to_string_pretty(&sample)?;
        fs::write(path, tom)?;
        return Err(anyhow!(
            "Created template config at {}. Edit it and run again.",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}

pub fn resolve_ledger_dir(cfg: &Config) -> Result<PathBuf> {
    match &cfg.ledger_dir {
        Some(p) => Ok(PathBuf::from(p)),
        None => config_dir(),
    }
}
