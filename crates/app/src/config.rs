//! Binary configuration: TOML file, environment overrides, and `SQLite` URL
//! handling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "trainer.toml";
pub const DB_URL_ENV: &str = "TRAINER_DB_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_branch")]
    pub default_branch: u64,
    /// Message overrides keyed by message tag.
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
}

fn default_database_url() -> String {
    "sqlite://trainer.sqlite3".to_string()
}
fn default_log_filter() -> String {
    "info,sqlx=warn".to_string()
}
fn default_branch() -> u64 {
    1
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            log_filter: default_log_filter(),
            default_branch: default_branch(),
            messages: BTreeMap::new(),
        }
    }
}

impl TrainerConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Fails on malformed TOML.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid trainer config")
    }

    /// Apply `TRAINER_DB_URL` (if set) and normalize the database URL.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = std::env::var(DB_URL_ENV).ok().filter(|v| !v.trim().is_empty()) {
            self.database_url = url;
        }
        self.database_url = normalize_sqlite_url(self.database_url);
        self
    }
}

/// Load from an explicit path, or from `trainer.toml` in the working directory
/// when present. Falls back to defaults.
///
/// # Errors
///
/// Fails if an explicit path is missing or a file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<TrainerConfig> {
    let path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => bail!("config file not found: {}", p.display()),
        None => Some(PathBuf::from(CONFIG_FILE)).filter(|p| p.exists()),
    };

    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            TrainerConfig::from_toml(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => TrainerConfig::default(),
    };
    Ok(config.with_env_overrides())
}

/// Turn `sqlite:relative/path` or a bare path into an absolute `sqlite://` URL.
/// In-memory and already-absolute URLs pass through.
pub fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") || raw.starts_with("sqlite:file:")
    {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Create the database file (and its parent directories) so `SQLite` can open it.
///
/// # Errors
///
/// Fails for URLs without a path or when the file cannot be created.
pub fn prepare_sqlite_file(db_url: &str) -> Result<()> {
    if db_url == "sqlite::memory:" || db_url.starts_with("sqlite:file:") {
        return Ok(());
    }

    let Some(path) = db_url.strip_prefix("sqlite://") else {
        bail!("invalid database url: {db_url}");
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        bail!("invalid database url: {db_url}");
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))?;
    }
    Ok(())
}
