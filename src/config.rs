//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the path given with `-f`), then applies `BEACON_WORK_DIR`,
//! `BEACON_LOG_LEVEL` and `BEACON_ENDPOINT` env overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;
use crate::logger;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const DEFAULT_ENDPOINT: &str = "https://windchimes.turbowarp.org/api/chime";

/// Beacon submitter settings (`[beacon]`).
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    /// Fixed URL every beacon is PUT to.
    pub endpoint: String,
    /// Prefix of the `resource` field; the project id is appended after `/`.
    pub resource_prefix: String,
    /// Identifier meaning "no project loaded". Never submitted.
    pub no_project_id: String,
    /// Whether the host is an embedded player (`view/embed`) or the full
    /// editor page (`view/index`).
    pub embedded: bool,
}

/// Announcement banner settings (`[news]`).
#[derive(Debug, Clone)]
pub struct NewsConfig {
    pub enabled: bool,
    /// Identifier stored when the banner is dismissed. Changing it re-shows
    /// the banner to everyone.
    pub id: String,
    pub message: String,
    pub link: Option<String>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Preference file path (absolute, or already joined onto `work_dir`).
    pub preferences_file: PathBuf,
    pub beacon: BeaconConfig,
    pub news: NewsConfig,
}

/// Explicit overrides — tests pass these instead of mutating env vars.
#[derive(Debug, Default, Clone)]
pub struct Overrides<'a> {
    pub work_dir: Option<&'a str>,
    pub log_level: Option<&'a str>,
    pub endpoint: Option<&'a str>,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    runtime: RawRuntime,
    #[serde(default)]
    beacon: RawBeacon,
    #[serde(default)]
    preferences: RawPreferences,
    #[serde(default)]
    news: RawNews,
}

#[derive(Deserialize)]
struct RawRuntime {
    #[serde(default = "default_work_dir")]
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for RawRuntime {
    fn default() -> Self {
        Self { work_dir: default_work_dir(), log_level: default_log_level() }
    }
}

#[derive(Deserialize)]
struct RawBeacon {
    #[serde(default = "default_endpoint")]
    endpoint: String,
    #[serde(default = "default_resource_prefix")]
    resource_prefix: String,
    #[serde(default = "default_no_project_id")]
    no_project_id: String,
    #[serde(default)]
    embedded: bool,
}

impl Default for RawBeacon {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            resource_prefix: default_resource_prefix(),
            no_project_id: default_no_project_id(),
            embedded: false,
        }
    }
}

#[derive(Deserialize)]
struct RawPreferences {
    #[serde(default = "default_preferences_file")]
    file: String,
}

impl Default for RawPreferences {
    fn default() -> Self {
        Self { file: default_preferences_file() }
    }
}

#[derive(Deserialize)]
struct RawNews {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_news_id")]
    id: String,
    #[serde(default = "default_news_message")]
    message: String,
    #[serde(default)]
    link: Option<String>,
}

impl Default for RawNews {
    fn default() -> Self {
        Self {
            enabled: true,
            id: default_news_id(),
            message: default_news_message(),
            link: None,
        }
    }
}

fn default_work_dir() -> String { "~/.project-beacon".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_endpoint() -> String { DEFAULT_ENDPOINT.to_string() }
fn default_resource_prefix() -> String { "scratch".to_string() }
fn default_no_project_id() -> String { "0".to_string() }
fn default_preferences_file() -> String { "preferences.json".to_string() }
fn default_news_id() -> String { "new-compiler".to_string() }
fn default_news_message() -> String {
    "The compiler was rewritten to make projects run even faster. Bugs are possible.".to_string()
}

fn default_true() -> bool {
    true
}

/// Load config from `path` (default `config/default.toml`), then apply
/// env-var overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let work_dir = env::var("BEACON_WORK_DIR").ok();
    let log_level = env::var("BEACON_LOG_LEVEL").ok();
    let endpoint = env::var("BEACON_ENDPOINT").ok();
    load_from(
        Path::new(path.unwrap_or(DEFAULT_CONFIG_PATH)),
        Overrides {
            work_dir: work_dir.as_deref(),
            log_level: log_level.as_deref(),
            endpoint: endpoint.as_deref(),
        },
    )
}

/// Internal loader — accepts an explicit path and overrides.
pub fn load_from(path: &Path, overrides: Overrides<'_>) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;
    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: Overrides<'_>) -> Result<Config, AppError> {
    let work_dir = expand_home(overrides.work_dir.unwrap_or(&parsed.runtime.work_dir));
    let log_level = overrides.log_level.unwrap_or(&parsed.runtime.log_level).to_string();
    let endpoint = overrides.endpoint.unwrap_or(&parsed.beacon.endpoint).to_string();

    logger::parse_level(&log_level)
        .map_err(|e| AppError::Config(format!("runtime.log_level: {e}")))?;
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(AppError::Config(format!(
            "beacon.endpoint must be an http(s) URL, got '{endpoint}'"
        )));
    }
    if parsed.beacon.resource_prefix.is_empty() {
        return Err(AppError::Config("beacon.resource_prefix must not be empty".into()));
    }

    let preferences_file = {
        let p = expand_home(&parsed.preferences.file);
        if p.is_absolute() { p } else { work_dir.join(p) }
    };

    Ok(Config {
        work_dir,
        log_level,
        preferences_file,
        beacon: BeaconConfig {
            endpoint,
            resource_prefix: parsed.beacon.resource_prefix,
            no_project_id: parsed.beacon.no_project_id,
            embedded: parsed.beacon.embedded,
        },
        news: NewsConfig {
            enabled: parsed.news.enabled,
            id: parsed.news.id,
            message: parsed.news.message,
            link: parsed.news.link,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
