//! Connection and schema settings for the OData store

use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use tracing::warn;

use playbook_core::Relation;

pub const ENV_STORE_URL: &str = "PLAYBOOK_STORE_URL";
pub const ENV_STORE_TOKEN: &str = "PLAYBOOK_STORE_TOKEN";
pub const ENV_STORE_TIMEOUT: &str = "PLAYBOOK_STORE_TIMEOUT_SECS";

/// Invalid or missing store configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Column names of the node entity set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFields {
    pub id: String,
    /// Lookup value used in `$filter`
    pub playbook_filter: String,
    /// Lookup navigation used to bind a new record to its playbook
    pub playbook_bind: String,
    pub name: String,
    pub node_type: String,
    pub position_x: String,
    pub position_y: String,
    pub execution_order: String,
    pub payload: String,
    pub client_ref: String,
    pub depends_on: String,
    pub output_variable: String,
    pub action_bind: String,
    pub tool_bind: String,
}

impl Default for NodeFields {
    fn default() -> Self {
        Self {
            id: "playbooknodeid".to_string(),
            playbook_filter: "_playbookid_value".to_string(),
            playbook_bind: "playbookid".to_string(),
            name: "name".to_string(),
            node_type: "nodetype".to_string(),
            position_x: "positionx".to_string(),
            position_y: "positiony".to_string(),
            execution_order: "executionorder".to_string(),
            payload: "configjson".to_string(),
            client_ref: "canvasnodeid".to_string(),
            depends_on: "dependsonjson".to_string(),
            output_variable: "outputvariable".to_string(),
            action_bind: "actionid".to_string(),
            tool_bind: "toolid".to_string(),
        }
    }
}

/// Many-to-many navigation of one relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEndpoint {
    /// Navigation property on the node entity
    pub navigation: String,
    /// Entity set of the related records
    pub entity_set: String,
    /// Primary key column of the related records
    pub key: String,
}

/// Settings for [`crate::ODataStoreClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ODataStoreConfig {
    /// Service root, e.g. `https://org.example.com/api/data/v9.2`
    pub base_url: String,
    /// Pre-acquired bearer token
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Page size requested with `Prefer: odata.maxpagesize`; server default when unset
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default = "default_node_set")]
    pub node_entity_set: String,
    #[serde(default = "default_playbook_set")]
    pub playbook_entity_set: String,
    #[serde(default = "default_action_set")]
    pub action_entity_set: String,
    #[serde(default = "default_tool_set")]
    pub tool_entity_set: String,
    #[serde(default)]
    pub fields: NodeFields,
    #[serde(default = "default_skills")]
    pub skills: RelationEndpoint,
    #[serde(default = "default_knowledge")]
    pub knowledge: RelationEndpoint,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_node_set() -> String {
    "playbooknodes".to_string()
}

fn default_playbook_set() -> String {
    "playbooks".to_string()
}

fn default_action_set() -> String {
    "actions".to_string()
}

fn default_tool_set() -> String {
    "tools".to_string()
}

fn default_skills() -> RelationEndpoint {
    RelationEndpoint {
        navigation: "playbooknode_skills".to_string(),
        entity_set: "skills".to_string(),
        key: "skillid".to_string(),
    }
}

fn default_knowledge() -> RelationEndpoint {
    RelationEndpoint {
        navigation: "playbooknode_knowledge".to_string(),
        entity_set: "knowledgesources".to_string(),
        key: "knowledgesourceid".to_string(),
    }
}

impl ODataStoreConfig {
    /// Default schema against the given service root
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout_secs: default_timeout_secs(),
            page_size: None,
            node_entity_set: default_node_set(),
            playbook_entity_set: default_playbook_set(),
            action_entity_set: default_action_set(),
            tool_entity_set: default_tool_set(),
            fields: NodeFields::default(),
            skills: default_skills(),
            knowledge: default_knowledge(),
        }
    }

    /// Read the service root, token and timeout from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var(ENV_STORE_URL).map_err(|_| ConfigError::Missing(ENV_STORE_URL))?;
        let mut config = Self::new(base_url);

        if let Ok(token) = env::var(ENV_STORE_TOKEN) {
            if !token.is_empty() {
                config.token = Some(token);
            }
        }

        if let Ok(timeout) = env::var(ENV_STORE_TIMEOUT) {
            if let Ok(secs) = timeout.parse::<u64>() {
                config.timeout_secs = secs;
            } else {
                warn!("Invalid {} value: {}", ENV_STORE_TIMEOUT, timeout);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Attach a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Check that the service root is an absolute http(s) URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(ConfigError::InvalidUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    /// Navigation settings of a relation
    pub fn relation(&self, relation: Relation) -> &RelationEndpoint {
        match relation {
            Relation::Skills => &self.skills,
            Relation::Knowledge => &self.knowledge,
        }
    }

    /// Service root without a trailing slash
    pub(crate) fn root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(ODataStoreConfig::new("https://store.example.com/api/data/v9.2").validate().is_ok());
        assert!(matches!(
            ODataStoreConfig::new("not a url").validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ODataStoreConfig::new("ftp://store.example.com").validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_root_trims_trailing_slash() {
        let config = ODataStoreConfig::new("http://localhost:8080/api/");
        assert_eq!(config.root(), "http://localhost:8080/api");
    }

    #[test]
    fn test_relation_lookup() {
        let config = ODataStoreConfig::new("http://localhost");
        assert_eq!(config.relation(Relation::Skills).navigation, "playbooknode_skills");
        assert_eq!(config.relation(Relation::Knowledge).key, "knowledgesourceid");
    }

    #[test]
    fn test_token_is_not_serialized() {
        let config = ODataStoreConfig::new("http://localhost").with_token("secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ConfigError::Missing(ENV_STORE_URL).to_string(),
            "Missing required setting: PLAYBOOK_STORE_URL"
        );
    }
}
