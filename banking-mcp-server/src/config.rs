//! Configuration management for the server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use banking_mcp_core::{AgentType, Error};
use banking_mcp_storage::DatabaseConfig;

const ENV_PREFIX: &str = "BANKING_MCP";
const LOG_FORMATS: [&str; 3] = ["json", "pretty", "compact"];

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub agents: AgentsConfig,
    pub rules: RulesConfig,
    pub tasks: TasksConfig,
    pub sessions: SessionsConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    /// When false the server runs memory-only
    pub enabled: bool,
    pub max_connections: u32,
    pub retry_after_secs: u64,
}

/// Outbound agent calls and health probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub dispatch_timeout_secs: u64,
    pub process_path: String,
    /// Sent as `X-API-Key` on every outbound call
    pub api_key: Option<String>,
    /// Zero disables the health monitor
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    pub max_concurrent_dispatches: usize,
    pub seed_defaults: bool,
}

/// Routing rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rule document loaded at start-up
    pub path: Option<String>,
    pub seed_defaults: bool,
    pub fallback_agent_type: String,
}

/// Task retention
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Absent means tasks are retained indefinitely
    pub retention_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub ttl_secs: u64,
}

/// Inbound API-key check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_key_header: String,
    pub require_api_key: bool,
    /// Accepted keys; empty accepts any non-empty value
    pub api_keys: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite:./banking_mcp.db?mode=rwc".to_string(),
            enabled: true,
            max_connections: 5,
            retry_after_secs: 30,
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 30,
            process_path: "/process".to_string(),
            api_key: Some("test-api-key".to_string()),
            health_check_interval_secs: 60,
            health_check_timeout_secs: 5,
            max_concurrent_dispatches: 64,
            seed_defaults: true,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: None,
            seed_defaults: true,
            fallback_agent_type: AgentType::BANKING.to_string(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { ttl_secs: 86_400 }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key_header: "X-API-Key".to_string(),
            require_api_key: true,
            api_keys: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from config files, an optional explicit file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(
            path,
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Same as [`Config::load`] with a caller-supplied environment source
    pub fn load_with_env(
        path: Option<&str>,
        environment: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(environment)
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite:./banking_mcp.db?mode=rwc")?
            .set_default("database.enabled", true)?
            .set_default("database.max_connections", 5)?
            .set_default("database.retry_after_secs", 30)?
            .set_default("agents.dispatch_timeout_secs", 30)?
            .set_default("agents.process_path", "/process")?
            .set_default("agents.api_key", "test-api-key")?
            .set_default("agents.health_check_interval_secs", 60)?
            .set_default("agents.health_check_timeout_secs", 5)?
            .set_default("agents.max_concurrent_dispatches", 64)?
            .set_default("agents.seed_defaults", true)?
            .set_default("rules.seed_defaults", true)?
            .set_default("rules.fallback_agent_type", AgentType::BANKING)?
            .set_default("sessions.ttl_secs", 86_400)?
            .set_default("security.api_key_header", "X-API-Key")?
            .set_default("security.require_api_key", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .build()?;

        settings.try_deserialize()
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> banking_mcp_core::Result<()> {
        if self.agents.dispatch_timeout_secs == 0 {
            return Err(Error::validation("agents.dispatch_timeout_secs must be positive"));
        }
        if self.agents.process_path.trim().is_empty() {
            return Err(Error::validation("agents.process_path must not be empty"));
        }
        if self.agents.max_concurrent_dispatches == 0 {
            return Err(Error::validation(
                "agents.max_concurrent_dispatches must be positive",
            ));
        }
        if self.sessions.ttl_secs == 0 {
            return Err(Error::validation("sessions.ttl_secs must be positive"));
        }
        if self.rules.fallback_agent_type.trim().is_empty() {
            return Err(Error::validation("rules.fallback_agent_type must not be empty"));
        }
        if self.security.require_api_key && self.security.api_key_header.trim().is_empty() {
            return Err(Error::validation("security.api_key_header must not be empty"));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(Error::validation(format!(
                "logging.format must be one of {}, got '{}'",
                LOG_FORMATS.join(", "),
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Get the server socket address
    pub fn server_addr(&self) -> banking_mcp_core::Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| Error::configuration(format!("Invalid server address: {e}")))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.agents.dispatch_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        match self.agents.health_check_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sessions.ttl_secs as i64)
    }

    pub fn task_retention(&self) -> Option<chrono::Duration> {
        self.tasks
            .retention_secs
            .map(|secs| chrono::Duration::seconds(secs as i64))
    }

    /// Storage settings, or `None` when persistence is switched off
    pub fn storage(&self) -> Option<DatabaseConfig> {
        self.database.enabled.then(|| DatabaseConfig {
            url: self.database.url.clone(),
            max_connections: self.database.max_connections,
            retry_after: Duration::from_secs(self.database.retry_after_secs),
        })
    }
}
