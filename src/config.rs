use crate::firewall::CommandTemplate;
use anyhow::{Context, Result, bail};
use log::info;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "NGINX_GUARD_CONFIG";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GuardConfig {
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,
    #[serde(default = "default_access_log")]
    pub access_log: PathBuf,
    #[serde(default = "default_deny_file")]
    pub deny_file: PathBuf,
    #[serde(default = "default_allowlist_file")]
    pub allowlist_file: PathBuf,
    #[serde(default = "default_block_command")]
    pub block_command: String,
    #[serde(default = "default_reload_command")]
    pub reload_command: String,
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_error_log() -> PathBuf {
    PathBuf::from("/var/log/nginx/error.log")
}
fn default_access_log() -> PathBuf {
    PathBuf::from("/var/log/nginx/access.log")
}
fn default_deny_file() -> PathBuf {
    PathBuf::from("/etc/nginx/deny.conf")
}
fn default_allowlist_file() -> PathBuf {
    PathBuf::from("/etc/nginx/whitelist.txt")
}
fn default_block_command() -> String {
    "ufw deny from %s to any".to_string()
}
fn default_reload_command() -> String {
    "nginx -s reload".to_string()
}
fn default_reload_interval_secs() -> u64 {
    5
}
fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            error_log: default_error_log(),
            access_log: default_access_log(),
            deny_file: default_deny_file(),
            allowlist_file: default_allowlist_file(),
            block_command: default_block_command(),
            reload_command: default_reload_command(),
            reload_interval_secs: default_reload_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl GuardConfig {
    /// Defaults, then the YAML file (if present), then environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let parsed = Self::from_yaml(&contents)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))?;
            info!("Config loaded from {}", path.display());
            parsed
        } else {
            info!(
                "Config file '{}' not found, using defaults and environment.",
                path.display()
            );
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NGINX_ERROR_LOG") {
            self.error_log = PathBuf::from(v);
        }
        if let Some(v) = lookup("NGINX_ACCESS_LOG") {
            self.access_log = PathBuf::from(v);
        }
        if let Some(v) = lookup("NGINX_DENY_FILE") {
            self.deny_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("ALLOWLIST_FILE") {
            self.allowlist_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("FIREWALL_BLOCK_CMD") {
            self.block_command = v;
        }
        if let Some(v) = lookup("NGINX_RELOAD_CMD") {
            self.reload_command = v;
        }
        if let Some(v) = lookup("RELOAD_MIN_INTERVAL") {
            self.reload_interval_secs = v
                .trim()
                .parse()
                .with_context(|| format!("RELOAD_MIN_INTERVAL is not a number of seconds: {v:?}"))?;
        }
        if let Some(v) = lookup("TAIL_POLL_INTERVAL_MS") {
            self.poll_interval_ms = v
                .trim()
                .parse()
                .with_context(|| format!("TAIL_POLL_INTERVAL_MS is not a number: {v:?}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        CommandTemplate::new(&self.block_command)?;
        if self.reload_command.trim().is_empty() {
            bail!("Reload command must not be empty");
        }
        if self.reload_interval_secs == 0 {
            bail!("Reload interval must be at least one second");
        }
        if self.poll_interval_ms == 0 {
            bail!("Poll interval must be greater than zero");
        }
        Ok(())
    }

    pub fn block_template(&self) -> Result<CommandTemplate> {
        CommandTemplate::new(&self.block_command)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
