use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Login details for the cloud API.
///
/// Stored on disk as base64-encoded JSON `{username, password, key}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("key", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: &str, password: &str, key: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            key: key.to_string(),
        }
    }

    /// Decode the base64 JSON text of a credentials file.
    pub fn decode(text: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(text.trim())
            .context("Credentials file is not valid base64")?;
        let creds: Credentials =
            serde_json::from_slice(&raw).context("Credentials file does not hold valid JSON")?;
        creds.validate()?;
        Ok(creds)
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Invalid or missing credentials file {:?}", path))?;
        Self::decode(&text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.encode()?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(anyhow!("Credentials are missing a username"));
        }
        if self.key.trim().is_empty() {
            return Err(anyhow!("Credentials are missing an API key"));
        }
        Ok(())
    }

    /// Value for the `Authorization` header.
    pub fn basic_auth(&self) -> String {
        let pair = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(pair))
    }
}
