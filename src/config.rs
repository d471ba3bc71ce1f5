//! Configuration for the voice call pipeline

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::Result;

/// Default speech-to-speech WebSocket endpoint
const DEFAULT_ENDPOINT: &str = "wss://api.hume.ai/v0/evi/chat";

/// Default OAuth client-credentials token endpoint
const DEFAULT_TOKEN_URL: &str = "https://api.hume.ai/oauth2-cc/token";

/// Default handshake timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// How many emotion scores are kept per user utterance
const DEFAULT_TOP_EMOTIONS: usize = 3;

/// Voice pipeline configuration
///
/// Loadable from a TOML file via [`VoiceConfig::load`] or from
/// `MELLO_VOICE_*` environment variables via [`VoiceConfig::from_env`].
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// Speech-to-speech service WebSocket endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// OAuth token endpoint, used only when `secret_key` is set
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Service API key
    #[serde(default = "default_secret")]
    pub api_key: SecretString,

    /// Optional secret key; when present, `connect` fetches an access token
    /// instead of passing the API key as a query parameter
    #[serde(default)]
    pub secret_key: Option<SecretString>,

    /// Remote session configuration ID (prompt/voice preset)
    #[serde(default)]
    pub config_id: Option<String>,

    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How many top emotion scores to keep per user utterance
    #[serde(default = "default_top_emotions")]
    pub top_emotions: usize,

    /// Additional crisis keywords merged into the built-in list
    #[serde(default)]
    pub extra_crisis_keywords: Vec<String>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_top_emotions() -> usize {
    DEFAULT_TOP_EMOTIONS
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token_url: default_token_url(),
            api_key: default_secret(),
            secret_key: None,
            config_id: None,
            connect_timeout_secs: default_connect_timeout(),
            top_emotions: default_top_emotions(),
            extra_crisis_keywords: Vec::new(),
        }
    }
}

impl VoiceConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Load configuration from `MELLO_VOICE_*` environment variables,
    /// falling back to defaults for anything unset
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("MELLO_VOICE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(url) = std::env::var("MELLO_VOICE_TOKEN_URL") {
            config.token_url = url;
        }
        if let Ok(key) = std::env::var("MELLO_VOICE_API_KEY") {
            config.api_key = SecretString::from(key);
        }
        if let Ok(key) = std::env::var("MELLO_VOICE_SECRET_KEY") {
            config.secret_key = Some(SecretString::from(key));
        }
        if let Ok(id) = std::env::var("MELLO_VOICE_CONFIG_ID") {
            config.config_id = Some(id);
        }
        if let Some(secs) = std::env::var("MELLO_VOICE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.connect_timeout_secs = secs;
        }
        config
    }

    /// Handshake timeout as a [`Duration`]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
