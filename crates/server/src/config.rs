use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use common::ScopeMode;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60 * 24 * 7;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub media_root: String,
    pub index_path: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,
    pub multi_user: bool,
    pub session_ttl_secs: u64,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            media_root: "media".to_string(),
            index_path: "audiotracks.redb".to_string(),
            port: DEFAULT_PORT,
            bind_addr: None,
            multi_user: false,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn scope_mode(&self) -> ScopeMode {
        ScopeMode::from_multi_user(self.multi_user)
    }

    pub fn bind_addr(&self) -> String {
        match self.bind_addr.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => addr.to_string(),
            _ => format!("0.0.0.0:{}", self.port),
        }
    }

    /// Fills blank or zero values with defaults.
    fn normalize(&mut self) {
        if self.version < CONFIG_VERSION {
            self.version = CONFIG_VERSION;
        }
        if self.media_root.trim().is_empty() {
            self.media_root = "media".to_string();
        }
        if self.index_path.trim().is_empty() {
            self.index_path = "audiotracks.redb".to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.session_ttl_secs == 0 {
            self.session_ttl_secs = DEFAULT_SESSION_TTL_SECS;
        }
        if self.max_upload_bytes == 0 {
            self.max_upload_bytes = DEFAULT_MAX_UPLOAD_BYTES;
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("AUDIOTRACKS_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Loads the config file, writing a default one first when none exists.
/// The flag is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let config = parse_config(&contents)?;
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn parse_config(contents: &str) -> Result<ServerConfig, ConfigError> {
    let mut config: ServerConfig = if contents.trim().is_empty() {
        ServerConfig::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    config.normalize();
    Ok(config)
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value.trim());
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = parse_config("multi_user: true\nport: 8080\n").unwrap();
        assert!(config.multi_user);
        assert_eq!(config.port, 8080);
        assert_eq!(config.media_root, "media");
        assert_eq!(config.index_path, "audiotracks.redb");
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.scope_mode(), ScopeMode::MultiUser);
    }

    #[test]
    fn zero_values_are_normalized() {
        let config = parse_config("port: 0\nsession_ttl_secs: 0\nmedia_root: ''\n").unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.session_ttl_secs, DEFAULT_SESSION_TTL_SECS);
        assert_eq!(config.media_root, "media");
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.yaml");

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.scope_mode(), ScopeMode::SingleUser);

        let (_, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
    }

    #[test]
    fn relative_paths_follow_config_dir() {
        let config_path = Path::new("/etc/audiotracks/config.yaml");
        assert_eq!(
            resolve_path(config_path, "media"),
            PathBuf::from("/etc/audiotracks/media")
        );
        assert_eq!(resolve_path(config_path, "/srv/media"), PathBuf::from("/srv/media"));
        assert_eq!(
            resolve_path(Path::new("config.yaml"), "audiotracks.redb"),
            PathBuf::from("./audiotracks.redb")
        );
    }
}
