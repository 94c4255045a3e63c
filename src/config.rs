use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{HostProfile, DEFAULT_SSH_PORT};

pub const CONFIG_ENV: &str = "SSHMATE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("server '{0}' does not exist")]
    NotFound(String),
    #[error("server '{0}' already exists")]
    Duplicate(String),
    #[error("invalid server profile: {0}")]
    Invalid(String),
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub servers: Vec<HostProfile>,
}

/// Per-user application directory, e.g. `~/.config/sshmate`.
pub fn app_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sshmate"))
}

/// Explicit override, then `$SSHMATE_CONFIG`, then `<config>/sshmate/servers.json`.
pub fn config_path(path_override: Option<&Path>) -> PathBuf {
    if let Some(path) = path_override {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    match app_dir() {
        Some(dir) => dir.join("servers.json"),
        None => PathBuf::from("servers.json"),
    }
}

/// JSON-file backed list of host profiles.
#[derive(Clone, Debug)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(AppConfig::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(AppConfig::default());
        }
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, cfg: &AppConfig) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(cfg).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json).map_err(io_err)?;
        if let Err(err) = fs::rename(&tmp, &self.path) {
            // Cross-device rename; copy the bytes instead.
            warn!("config rename failed ({err}); rewriting in place");
            let written = fs::write(&self.path, &json);
            let _ = fs::remove_file(&tmp);
            written.map_err(io_err)?;
        }
        debug!("saved {} server(s) to {}", cfg.servers.len(), self.path.display());
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<HostProfile>, ConfigError> {
        Ok(self.load()?.servers)
    }

    pub fn get(&self, name: &str) -> Result<HostProfile, ConfigError> {
        let cfg = self.load()?;
        find_profile_index(&cfg, name)
            .map(|idx| cfg.servers[idx].clone())
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }

    pub fn add(&self, mut profile: HostProfile) -> Result<(), ConfigError> {
        let mut cfg = self.load()?;
        if find_profile_index(&cfg, &profile.name).is_some() {
            return Err(ConfigError::Duplicate(profile.name));
        }
        if profile.port == 0 {
            profile.port = DEFAULT_SSH_PORT;
        }
        profile.validate().map_err(ConfigError::Invalid)?;
        cfg.servers.push(profile);
        self.save(&cfg)
    }

    pub fn remove(&self, name: &str) -> Result<(), ConfigError> {
        let mut cfg = self.load()?;
        let idx = find_profile_index(&cfg, name)
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))?;
        cfg.servers.remove(idx);
        self.save(&cfg)
    }

    pub fn update(&self, mut profile: HostProfile) -> Result<(), ConfigError> {
        let mut cfg = self.load()?;
        let idx = find_profile_index(&cfg, &profile.name)
            .ok_or_else(|| ConfigError::NotFound(profile.name.clone()))?;
        if profile.port == 0 {
            profile.port = DEFAULT_SSH_PORT;
        }
        profile.validate().map_err(ConfigError::Invalid)?;
        cfg.servers[idx] = profile;
        self.save(&cfg)
    }
}

/// Names are exact-match keys.
pub fn find_profile_index(cfg: &AppConfig, name: &str) -> Option<usize> {
    cfg.servers.iter().position(|p| p.name == name)
}
