use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use chrono::{DateTime, Utc};
use dirs::home_dir;
use serde::Deserialize;
use crate::error::ConfigError;
use crate::models::TimeWindow;
use crate::parser::parse_timestamp;

const CONFIG_FILE: &str = ".commitlog/config.json";
const DEFAULT_DB: &str = ".commitlog/commits.db";
const DB_ENV: &str = "COMMITLOG_DB";
const GIT_ENV: &str = "COMMITLOG_GIT";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database_path: Option<PathBuf>,
    git_binary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_path: PathBuf,
    pub git_binary: String,
}

impl Settings {
    /// Resolve settings: flag, then environment (including `.env`), then
    /// `~/.commitlog/config.json`, then defaults.
    pub fn resolve(db_flag: Option<PathBuf>, git_flag: Option<String>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let file = load_file_config(&get_config_path())?;

        Ok(Self::merge(
            db_flag.or_else(|| env::var_os(DB_ENV).map(PathBuf::from)),
            git_flag.or_else(|| env::var(GIT_ENV).ok()),
            file,
        ))
    }

    fn merge(db: Option<PathBuf>, git: Option<String>, file: FileConfig) -> Self {
        Settings {
            database_path: db
                .or(file.database_path)
                .unwrap_or_else(default_db_path),
            git_binary: git
                .or(file.git_binary)
                .unwrap_or_else(|| "git".to_string()),
        }
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&content).map_err(|source| ConfigError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

pub fn get_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(env::temp_dir)
        .join(CONFIG_FILE)
}

pub fn default_db_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(DEFAULT_DB),
        None => env::temp_dir().join(format!("commitlog_{}.db", std::process::id())),
    }
}

/// Build the `[since, to)` window. Missing bounds default to the epoch and
/// the current time.
pub fn parse_window(since: Option<&str>, to: Option<&str>) -> Result<TimeWindow, ConfigError> {
    let since = since.map(parse_bound).transpose()?.unwrap_or_else(|| DateTime::<Utc>::from(UNIX_EPOCH));
    let to = to.map(parse_bound).transpose()?.unwrap_or_else(Utc::now);

    if since >= to {
        return Err(ConfigError::EmptyWindow {
            since: since.to_rfc3339(),
            to: to.to_rfc3339(),
        });
    }

    Ok(TimeWindow { since, to })
}

fn parse_bound(value: &str) -> Result<DateTime<Utc>, ConfigError> {
    parse_timestamp(value.trim()).ok_or_else(|| ConfigError::InvalidTimestamp(value.to_string()))
}
