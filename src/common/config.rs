//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Interactive console settings
    #[serde(default)]
    pub console: ConsoleConfig,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,

    /// Value sent as `adapterID` in the initialize request
    #[serde(default)]
    pub adapter_id: Option<String>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default adapter to use
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
        }
    }
}

fn default_adapter() -> String {
    "lldb-dap".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout applied by the transport to every DAP request
    #[serde(default = "default_dap_request")]
    pub dap_request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dap_request_secs: default_dap_request(),
        }
    }
}

fn default_dap_request() -> u64 {
    30
}

/// Console configuration
#[derive(Debug, Deserialize)]
pub struct ConsoleConfig {
    /// Output event categories that never reach the console
    #[serde(default = "default_suppressed_categories")]
    pub suppressed_output_categories: Vec<String>,

    /// Prompt printed when input is opened
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Number of source lines shown by `list`
    #[serde(default = "default_list_lines")]
    pub list_lines: usize,

    /// Number of frames requested by `backtrace`
    #[serde(default = "default_backtrace_levels")]
    pub backtrace_levels: i64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            suppressed_output_categories: default_suppressed_categories(),
            prompt: default_prompt(),
            list_lines: default_list_lines(),
            backtrace_levels: default_backtrace_levels(),
        }
    }
}

fn default_suppressed_categories() -> Vec<String> {
    vec!["stderr".to_string(), "telemetry".to_string()]
}
fn default_prompt() -> String {
    "dbg> ".to_string()
}
fn default_list_lines() -> usize {
    10
}
fn default_backtrace_levels() -> i64 {
    100
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Get adapter configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        if let Some(config) = self.adapters.get(name) {
            return Some(config.clone());
        }

        which::which(name).ok().map(|path| AdapterConfig {
            path,
            args: Vec::new(),
            adapter_id: None,
        })
    }
}
