use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PORT: u16 = 8200;

// General hosts get generous admission limits; constrained hosts (iSH-like
// emulated environments with a handful of usable threads) get tight ones.
#[cfg(not(feature = "constrained"))]
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 20_000;
#[cfg(feature = "constrained")]
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 15;

#[cfg(not(feature = "constrained"))]
const DEFAULT_MAX_CONCURRENT_FFMPEG: usize = 30;
#[cfg(feature = "constrained")]
const DEFAULT_MAX_CONCURRENT_FFMPEG: usize = 1;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn default_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|os| os.into_string().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or_default();
    if host.is_empty() {
        "homecast".to_string()
    } else {
        format!("homecast@{}", host)
    }
}

#[derive(Deserialize, Default, Debug)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub name: Option<String>,
    pub localhost: Option<bool>,
    pub max_concurrent_requests: Option<usize>,
    pub max_concurrent_ffmpeg: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub name: String,
    pub localhost: bool,
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub max_concurrent_ffmpeg: usize,
    pub debug: bool,
    pub debug_channels: String,
    pub password: Option<String>,
    pub test: Option<String>,
    pub test_var: Option<String>,
}

impl Config {
    pub fn resolve(file: Option<FileConfig>, args: &crate::cli::Args) -> Self {
        let file = file.unwrap_or_default();
        let debug_channels = args.debug_channels.clone().unwrap_or_default();
        Config {
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            name: file.name.unwrap_or_else(default_name),
            localhost: args.localhost || file.localhost.unwrap_or(false),
            max_concurrent_requests: args
                .max_concurrent_requests
                .or(file.max_concurrent_requests)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
            request_timeout: args.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_concurrent_ffmpeg: args
                .max_concurrent_ffmpeg
                .or(file.max_concurrent_ffmpeg)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_FFMPEG),
            // Test runs and explicit debug channels imply debug logging.
            debug: args.debug || !debug_channels.is_empty() || args.test.is_some(),
            debug_channels,
            password: args.password.clone(),
            test: args.test.clone(),
            test_var: args.test_var.clone(),
        }
    }
}

pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_owned());
    }
    let cwd_config = PathBuf::from("homecast.toml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let xdg_config = config_dir.join("homecast").join("config.toml");
        if xdg_config.exists() {
            return Some(xdg_config);
        }
    }
    None
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&content)?;
    Ok(config)
}
