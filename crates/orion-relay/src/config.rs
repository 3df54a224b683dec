use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use orion_backend::{
    AnthropicUpstream, CompletionRequest, CompletionUpstream, OpenAiUpstream, UpstreamError,
};
use orion_protocol::ChatMessage;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are O.R.I.Ö.N (Observational & Responsive \
Intelligence Ödyssey Navigator), an advanced AI assistant.

Your mission is to give precise, useful and natural answers.
- Keep paragraphs short and objective (3-4 lines at most).
- Use markdown to organize answers.
- Be friendly and adapt your tone to the context.
- Go straight to the point.
- Use emojis sparingly (1-2 per answer).

Always answer in the user's language.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0} not set and no api_key_cmd configured")]
    MissingApiKey(&'static str),
    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub limits: LimitsConfig,
    /// Named agent profiles, selected by `agent_id` in the request.
    pub agents: BTreeMap<String, AgentProfile>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    pub provider: Provider,
    /// Override the provider's API root (e.g. an OpenAI-compatible gateway).
    pub base_url: Option<String>,
    /// Default model, unless an agent profile overrides it.
    pub model: String,
    /// Command to run to get the API key. The command is run via `sh -c`.
    pub api_key_cmd: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Longest silence tolerated between two upstream reads. 0 disables.
    pub idle_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key_cmd: None,
            temperature: 0.7,
            max_tokens: 2048,
            idle_timeout_secs: 60,
        }
    }
}

impl UpstreamConfig {
    /// Resolve the API key from api_key_cmd or the provider's env var.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        // Try api_key_cmd first
        if let Some(cmd) = &self.api_key_cmd {
            match Command::new("sh").arg("-c").arg(cmd).output() {
                Ok(output) if output.status.success() => {
                    let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !key.is_empty() {
                        return Ok(key);
                    }
                }
                Ok(output) => warn!(status = %output.status, "api_key_cmd failed"),
                Err(e) => warn!(error = %e, "api_key_cmd could not be run"),
            }
        }

        // Fall back to env var
        let var = self.provider.api_key_env();
        std::env::var(var).map_err(|_| ConfigError::MissingApiKey(var))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Build the upstream client for the configured provider.
    pub fn connect(&self) -> Result<Arc<dyn CompletionUpstream>, ConfigError> {
        let api_key = self.resolve_api_key()?;
        let upstream: Arc<dyn CompletionUpstream> = match (self.provider, &self.base_url) {
            (Provider::OpenAi, Some(url)) => Arc::new(OpenAiUpstream::with_base_url(api_key, url)?),
            (Provider::OpenAi, None) => Arc::new(OpenAiUpstream::new(api_key)?),
            (Provider::Anthropic, Some(url)) => {
                Arc::new(AnthropicUpstream::with_base_url(api_key, url)?)
            }
            (Provider::Anthropic, None) => Arc::new(AnthropicUpstream::new(api_key)?),
        };
        Ok(upstream)
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Instruction prepended to every conversation.
    pub system_prompt: String,
    /// Longest history accepted in one request.
    pub max_messages: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_messages: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    pub enabled: bool,
    /// Limits for callers presenting a bearer token.
    pub per_minute: usize,
    pub per_hour: usize,
    /// Limits for everyone else, keyed by client address.
    pub anonymous_per_minute: usize,
    pub anonymous_per_hour: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_minute: 30,
            per_hour: 1000,
            anonymous_per_minute: 10,
            anonymous_per_hour: 100,
        }
    }
}

/// Per-agent overrides. Unset fields use the `[relay]`/`[upstream]` values.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentProfile {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Config {
    /// Load from `ORION_CONFIG`, or `$XDG_CONFIG_HOME/orion/relay.toml`.
    /// A missing default file yields the defaults; a requested file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let requested = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ORION_CONFIG").map(PathBuf::from));

        match requested {
            Some(path) => Self::load_from(&path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the agent profile and prepend its system instruction.
    pub fn completion_request(
        &self,
        agent_id: Option<&str>,
        messages: Vec<ChatMessage>,
    ) -> CompletionRequest {
        let profile = agent_id.and_then(|id| {
            let profile = self.agents.get(id);
            if profile.is_none() {
                warn!(agent_id = id, "unknown agent, using default profile");
            }
            profile
        });

        let upstream = &self.upstream;
        CompletionRequest {
            model: profile
                .and_then(|p| p.model.clone())
                .unwrap_or_else(|| upstream.model.clone()),
            system: profile
                .and_then(|p| p.system_prompt.clone())
                .unwrap_or_else(|| self.relay.system_prompt.clone()),
            messages,
            temperature: profile
                .and_then(|p| p.temperature)
                .unwrap_or(upstream.temperature),
            max_tokens: profile
                .and_then(|p| p.max_tokens)
                .unwrap_or(upstream.max_tokens),
        }
    }
}

fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("orion").join("relay.toml")
}
