use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// OAuth client secrets as downloaded from the Google Cloud console
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub installed: Option<ClientConfig>,
    pub web: Option<ClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ClientSecrets {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)
            .context("Failed to read client secrets file")?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse client secrets file")
    }

    /// The client section, preferring an installed-app client
    pub fn into_client_config(self) -> Result<ClientConfig> {
        self.installed
            .or(self.web)
            .ok_or_else(|| anyhow::anyhow!("Client secrets contain neither an 'installed' nor a 'web' client"))
    }
}
