//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Server used when neither the config file, the environment nor a flag names one
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Configuration for stepwise
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the assistant server
    pub api_url: Option<String>,
    /// Streaming endpoint path (default: /api/v1/convert)
    pub endpoint: Option<String>,
    /// Whether to print the processing steps
    pub show_steps: Option<bool>,
    /// Log filter directive, as accepted by RUST_LOG
    pub log_filter: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stepwise")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("STEPWISE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Parse config from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            api_url: Some(DEFAULT_API_URL.to_string()),
            endpoint: None,
            show_steps: Some(true),
            log_filter: None,
        };

        default_config.save()?;
        Ok(path)
    }

    /// Resolve the server URL: flag, then `STEPWISE_API_URL`, then file, then default
    pub fn resolve_api_url(&self, flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .or_else(|| std::env::var("STEPWISE_API_URL").ok())
            .or_else(|| self.api_url.clone())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# stepwise configuration file
# Place at ~/.config/stepwise/config.toml (Linux/Mac) or %APPDATA%\stepwise\config.toml (Windows)

# Base URL of the assistant server (STEPWISE_API_URL overrides this)
api_url = "http://localhost:8000"

# Streaming endpoint path
# endpoint = "/api/v1/convert"

# Print the processing steps under each reply
show_steps = true

# Log filter, same syntax as RUST_LOG (logs go to stderr)
# log_filter = "stepwise_session=debug,stepwise_wire=debug"
"#
}
