//! Configuration management for Switchboard
//!
//! Supports environment variables, config files, and runtime overrides.
//! Tool-provider rosters can also be read from the common `mcpServers` JSON
//! format.
//!
//! Config file location: ~/.config/switchboard/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{Result, SwitchboardError};

/// Main configuration for Switchboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Inference backend configuration
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    /// Orchestration engine configuration
    #[serde(default)]
    pub swarm: SwarmConfig,
    /// Tool invocation configuration
    #[serde(default)]
    pub tools: ToolConfig,
    /// Tool provider servers, keyed by provider name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Inference backend credentials and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key; empty means unconfigured
    #[serde(default)]
    pub api_key: String,
    /// Default model identifier
    pub model: String,
    /// Token budget per inference call
    pub max_tokens: u32,
    /// Messages API endpoint
    pub endpoint: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for rate-limit and server errors
    pub max_retries: u32,
}

/// Orchestration engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Agent that receives requests when no other is active
    pub default_agent: String,
    /// Upper bound on inference calls per run
    pub max_turns: usize,
    /// Capacity of the streaming event channel
    pub stream_buffer: usize,
    /// Replaces the dated system-prompt preamble when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,
}

/// Tool invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Timeout for ordinary tool calls in seconds
    pub timeout_secs: u64,
    /// Timeout for long-running tool calls in seconds
    pub extended_timeout_secs: u64,
    /// Local tool names containing any of these get the extended timeout
    pub extended_tools: Vec<String>,
    /// Retries for transient provider errors
    pub max_retries: u32,
    /// Fixed delay between retries in milliseconds
    pub retry_delay_ms: u64,
}

/// One tool provider server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Executable for a stdio server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for the executable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment for the child process
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Endpoint for an HTTP server
    #[serde(default, alias = "sse", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Agents that receive this server's tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relevant_agents: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing-subscriber filter directive
    pub filter: String,
}

/// The `{"mcpServers": {...}}` roster file
#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic: AnthropicConfig::default(),
            swarm: SwarmConfig::default(),
            tools: ToolConfig::default(),
            servers: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: env::var("AI_MODEL")
                .unwrap_or_else(|_| "claude-3-5-sonnet-20240620".to_string()),
            max_tokens: env::var("MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4096),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            default_agent: "planner_agent".to_string(),
            max_turns: env::var("SWITCHBOARD_MAX_TURNS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25),
            stream_buffer: 64,
            preamble: None,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            extended_timeout_secs: 300,
            extended_tools: vec!["browser".to_string(), "puppeteer".to_string()],
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: env::var("SWITCHBOARD_LOG").unwrap_or_else(|_| "switchboard=info".to_string()),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("switchboard")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > config file > env vars > defaults
    pub fn load() -> Self {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        match Self::load_from_path(&Self::config_file()) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SwitchboardError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| SwitchboardError::config(format!("Failed to read config: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| SwitchboardError::config(format!("Failed to parse config: {}", e)))?;

        // An empty key in the file should not hide one from the environment
        if config.anthropic.api_key.is_empty() {
            config.anthropic.api_key = env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        }

        Ok(config)
    }

    /// Merge servers from an `mcpServers` JSON roster file
    ///
    /// Entries in the file replace configured servers of the same name.
    pub fn load_servers_file(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path).map_err(|e| {
            SwitchboardError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let file: ServersFile = serde_json::from_str(&content).map_err(|e| {
            SwitchboardError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        let count = file.mcp_servers.len();
        self.servers.extend(file.mcp_servers);
        Ok(count)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_file();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| {
                SwitchboardError::config(format!("Failed to create config dir: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SwitchboardError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, content)
            .map_err(|e| SwitchboardError::config(format!("Failed to write config: {}", e)))?;

        Ok(config_path)
    }

    /// Whether an API key is configured
    pub fn has_api_key(&self) -> bool {
        !self.anthropic.api_key.trim().is_empty()
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}
