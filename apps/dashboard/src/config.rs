use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::{api::DEFAULT_API_BASE_URL, DashboardSettings};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "dashboard.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub database_url: String,
    /// 0 turns the overview timer off.
    pub overview_refresh_seconds: u64,
    pub trend_days: u32,
    pub top_risks_limit: u32,
    pub request_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_BASE_URL.into(),
            database_url: "sqlite://./data/dashboard.db".into(),
            overview_refresh_seconds: 30,
            trend_days: 30,
            top_risks_limit: 5,
            request_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    api_url: Option<String>,
    database_url: Option<String>,
    overview_refresh_seconds: Option<u64>,
    trend_days: Option<u32>,
    top_risks_limit: Option<u32>,
    request_timeout_seconds: Option<u64>,
}

impl Settings {
    pub fn dashboard(&self) -> DashboardSettings {
        let interval = match self.overview_refresh_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        DashboardSettings {
            overview_refetch_interval: interval,
            trend_days: self.trend_days,
            top_risks_limit: self.top_risks_limit,
            ..DashboardSettings::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.api_url {
            self.api_url = v;
        }
        if let Some(v) = file.database_url {
            self.database_url = v;
        }
        if let Some(v) = file.overview_refresh_seconds {
            self.overview_refresh_seconds = v;
        }
        if let Some(v) = file.trend_days {
            self.trend_days = v;
        }
        if let Some(v) = file.top_risks_limit {
            self.top_risks_limit = v;
        }
        if let Some(v) = file.request_timeout_seconds {
            self.request_timeout_seconds = v;
        }
    }

    /// Later names win, so `APP__*` overrides the plain variable.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = last_set(&lookup, &["DASHBOARD_API_URL", "APP__API_URL"]) {
            self.api_url = v;
        }
        if let Some(v) = last_set(&lookup, &["DASHBOARD_DATABASE_URL", "APP__DATABASE_URL"]) {
            self.database_url = v;
        }
        if let Some(v) = lookup("APP__OVERVIEW_REFRESH_SECONDS").and_then(|v| v.parse().ok()) {
            self.overview_refresh_seconds = v;
        }
        if let Some(v) = lookup("APP__TREND_DAYS").and_then(|v| v.parse().ok()) {
            self.trend_days = v;
        }
        if let Some(v) = lookup("APP__TOP_RISKS_LIMIT").and_then(|v| v.parse().ok()) {
            self.top_risks_limit = v;
        }
        if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            self.request_timeout_seconds = v;
        }
    }
}

fn last_set(lookup: &impl Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
    names.iter().rev().find_map(|&name| lookup(name))
}

/// Defaults, then the config file if present, then the environment.
pub fn load_settings(config_path: &Path) -> anyhow::Result<Settings> {
    load_settings_with(config_path, |name| std::env::var(name).ok())
}

fn load_settings_with(
    config_path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if config_path.exists() {
        let raw = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config '{}'", config_path.display()))?;
        let file: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("invalid config '{}'", config_path.display()))?;
        settings.apply_file(file);
    }

    settings.apply_env(lookup);
    settings.database_url = normalize_database_url(&settings.database_url);
    Ok(settings)
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
