//! Coordinator configuration
//!
//! Settings come from a profile-keyed TOML file. `[profile.default]` supplies
//! the baseline; any other `[profile.<name>]` overlays it key by key. The
//! loaded [`Settings`] struct is immutable and passed by reference into every
//! component; no component reads ambient global state.
//!
//! A required key missing under the effective profile is fatal and aborts
//! before any cloud call is made.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Errors loading or resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file {path} is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config file has no [profile.default] section")]
    MissingDefaultProfile,

    #[error("'{key}' is not set for profile '{profile}'")]
    MissingKey { profile: String, key: &'static str },

    #[error("cannot locate a config directory for this platform")]
    NoConfigDir,
}

/// Resolved, immutable run settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Name of the profile these settings were resolved from
    pub profile: String,
    pub region: String,
    /// Template instance whose disk state seeds the worker image
    pub template_instance_id: String,
    /// Path of the test project; test cases are discovered under it
    pub project_folder: String,
    /// Local root for downloaded result artifacts
    pub result_root: PathBuf,
    pub worker_count: u32,
    pub max_bid_price: f64,
    /// Per-task timeout; also the queue's visibility timeout
    pub timeout_secs: u32,
}

/// One `[profile.<name>]` table, all keys optional until resolution
#[derive(Debug, Clone, Default, Deserialize)]
struct ProfileTable {
    region: Option<String>,
    template_instance_id: Option<String>,
    project_folder: Option<String>,
    result_root: Option<PathBuf>,
    worker_count: Option<u32>,
    max_bid_price: Option<f64>,
    timeout_secs: Option<u32>,
}

impl ProfileTable {
    /// Overlay `self` on top of `base`: explicit keys win, the rest fall back.
    fn overlaid_on(self, base: &ProfileTable) -> ProfileTable {
        ProfileTable {
            region: self.region.or_else(|| base.region.clone()),
            template_instance_id: self
                .template_instance_id
                .or_else(|| base.template_instance_id.clone()),
            project_folder: self.project_folder.or_else(|| base.project_folder.clone()),
            result_root: self.result_root.or_else(|| base.result_root.clone()),
            worker_count: self.worker_count.or(base.worker_count),
            max_bid_price: self.max_bid_price.or(base.max_bid_price),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    profile: HashMap<String, ProfileTable>,
}

impl Settings {
    /// Load settings for a profile from the given file.
    pub fn load_from(path: &Path, profile: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed: ConfigFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let default = parsed
            .profile
            .get("default")
            .ok_or(ConfigError::MissingDefaultProfile)?;

        let (effective_name, table) = match parsed.profile.get(profile) {
            Some(table) => (profile.to_string(), table.clone().overlaid_on(default)),
            None if profile == "default" => ("default".to_string(), default.clone()),
            None => {
                warn!(profile = %profile, "Profile not found, using default profile");
                ("default".to_string(), default.clone())
            }
        };

        Self::resolve(effective_name, table)
    }

    /// Load settings from the platform config path (`testfleet/config.toml`).
    pub fn load(explicit_path: Option<&Path>, profile: &str) -> Result<Self, ConfigError> {
        match explicit_path {
            Some(path) => Self::load_from(path, profile),
            None => Self::load_from(&default_config_path()?, profile),
        }
    }

    fn resolve(profile: String, table: ProfileTable) -> Result<Self, ConfigError> {
        let missing = |key: &'static str| ConfigError::MissingKey {
            profile: profile.clone(),
            key,
        };

        Ok(Settings {
            region: table.region.ok_or_else(|| missing("region"))?,
            template_instance_id: table
                .template_instance_id
                .ok_or_else(|| missing("template_instance_id"))?,
            project_folder: table
                .project_folder
                .ok_or_else(|| missing("project_folder"))?,
            result_root: table.result_root.ok_or_else(|| missing("result_root"))?,
            worker_count: table.worker_count.ok_or_else(|| missing("worker_count"))?,
            max_bid_price: table
                .max_bid_price
                .ok_or_else(|| missing("max_bid_price"))?,
            timeout_secs: table.timeout_secs.ok_or_else(|| missing("timeout_secs"))?,
            profile,
        })
    }
}

/// Platform config file path, e.g. `~/.config/testfleet/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs = directories::ProjectDirs::from("", "", "testfleet")
        .ok_or(ConfigError::NoConfigDir)?;
    Ok(dirs.config_dir().join("config.toml"))
}
