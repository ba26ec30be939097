use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "llama3.1-70b";
pub const DEFAULT_TIMEOUT_MS: u64 = 50_000;
pub const DEFAULT_ENDPOINT: &str = "/api/v2/cortex/agent:run";
pub const DEFAULT_TOOL_NAME: &str = "analyst1";
pub const TEXT_TO_SQL_TOOL_TYPE: &str = "cortex_analyst_text_to_sql";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one semantic model must be configured (--semantic-model or SNOWFLAKE_SEMANTIC_MODELS)")]
    NoSemanticModels,

    #[error("Timeout must be greater than zero")]
    InvalidTimeout,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// On-disk shape of the optional YAML config file. Every field is optional;
/// missing fields fall through to flags or built-in defaults.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AgentConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub semantic_models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl AgentConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Settings applied to every agent call. Fixed once the session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub model: String,
    pub timeout: Duration,
    /// Semantic model stage paths, queried in this order.
    pub semantic_models: Vec<String>,
    pub endpoint: String,
    pub tool_name: String,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct AgentOverrides {
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub semantic_models: Vec<String>,
}

impl AgentConfig {
    pub fn new(semantic_models: Vec<String>) -> Result<Self, ConfigError> {
        Self::resolve(AgentOverrides::default(), AgentConfigFile { semantic_models, ..Default::default() })
    }

    /// Merge overrides over the file over defaults.
    pub fn resolve(overrides: AgentOverrides, file: AgentConfigFile) -> Result<Self, ConfigError> {
        let semantic_models: Vec<String> = if overrides.semantic_models.is_empty() {
            file.semantic_models
        } else {
            overrides.semantic_models
        }
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();

        if semantic_models.is_empty() {
            return Err(ConfigError::NoSemanticModels);
        }

        let timeout_ms = overrides
            .timeout_ms
            .or(file.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        Ok(Self {
            model: overrides
                .model
                .or(file.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_millis(timeout_ms),
            semantic_models,
            endpoint: file.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            tool_name: DEFAULT_TOOL_NAME.to_string(),
        })
    }
}

/// Split a comma separated env value, keeping order.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[derive(Clone)]
pub struct ConnectionConfig {
    pub account: String,
    pub user: String,
    pub password: String,
    pub token: Option<String>,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    /// Overrides `https://{account}.snowflakecomputing.com`.
    pub base_url: Option<String>,
}

impl ConnectionConfig {
    pub fn agent_token(&self) -> &str {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.password)
    }

    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("role", &self.role)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}
