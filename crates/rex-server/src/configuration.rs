use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use rex::providers::{
    anthropic::{ANTHROPIC_HOST, ANTHROPIC_MODEL, ANTHROPIC_VERSION},
    claude_cli::{CLAUDE_CLI_COMMAND, NESTED_SESSION_ENV_PREFIXES},
    configs::{
        AnthropicProviderConfig, ClaudeCliProviderConfig, OpenAiProviderConfig, ProviderConfig,
        Timeouts, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
    },
    factory::ProviderType,
    openai::{OPENAI_HOST, OPENAI_MODEL},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                env_var: to_env_var("server.host"),
                message: e.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderSettings {
    #[serde(rename = "openai")]
    OpenAi {
        #[serde(default = "default_openai_host")]
        api_url: String,
        #[serde(default)]
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default = "default_temperature")]
        temperature: f64,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
    },
    #[serde(rename = "anthropic")]
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        api_url: String,
        #[serde(default)]
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f64>,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
        #[serde(default = "default_anthropic_version")]
        version: String,
    },
    #[serde(rename = "claude-cli")]
    ClaudeCli {
        #[serde(default = "default_cli_command")]
        command: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default = "default_user_label")]
        user_label: String,
        #[serde(default = "default_assistant_label")]
        assistant_label: String,
        #[serde(default)]
        instruction_template: Option<String>,
        #[serde(default = "default_strip_env_prefixes")]
        strip_env_prefixes: Vec<String>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
            ProviderSettings::Anthropic { .. } => ProviderType::Anthropic,
            ProviderSettings::ClaudeCli { .. } => ProviderType::ClaudeCli,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (temperature, max_tokens) = match self {
            ProviderSettings::OpenAi {
                temperature,
                max_tokens,
                ..
            } => (Some(*temperature), Some(*max_tokens)),
            ProviderSettings::Anthropic {
                temperature,
                max_tokens,
                ..
            } => (*temperature, Some(*max_tokens)),
            ProviderSettings::ClaudeCli { .. } => (None, None),
        };

        if let Some(temperature) = temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidValue {
                    env_var: to_env_var("temperature"),
                    message: format!("{} is outside 0.0..=2.0", temperature),
                });
            }
        }
        if max_tokens == Some(0) {
            return Err(ConfigError::InvalidValue {
                env_var: to_env_var("max_tokens"),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    // Convert to the rex ProviderConfig
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                api_url,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host: api_url,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Anthropic {
                api_url,
                api_key,
                model,
                temperature,
                max_tokens,
                version,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host: api_url,
                api_key,
                model,
                temperature,
                max_tokens,
                version,
            }),
            ProviderSettings::ClaudeCli {
                command,
                model,
                user_label,
                assistant_label,
                instruction_template,
                strip_env_prefixes,
            } => ProviderConfig::ClaudeCli(ClaudeCliProviderConfig {
                command,
                model,
                user_label,
                assistant_label,
                instruction_template,
                strip_env_prefixes,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            request_secs: default_request_secs(),
            idle_secs: default_idle_secs(),
            exit_grace_ms: default_exit_grace_ms(),
        }
    }
}

impl TimeoutSettings {
    pub fn into_timeouts(self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_secs),
            request: Duration::from_secs(self.request_secs),
            idle: Duration::from_secs(self.idle_secs),
            exit_grace: Duration::from_millis(self.exit_grace_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("provider.type", ProviderType::OpenAi.as_ref())?
            // Optional rex.toml in the working directory, overridden by the environment
            .add_source(File::with_name("rex").required(false))
            .add_source(
                Environment::with_prefix("REX")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("provider.strip_env_prefixes")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);

            let error_str = err.to_string();
            if error_str.contains("unknown variant") {
                ConfigError::InvalidValue {
                    env_var: to_env_var("provider.type"),
                    message: error_str,
                }
            } else if let config::ConfigError::Type { key: Some(key), .. } = &err {
                ConfigError::InvalidValue {
                    env_var: to_env_var(key),
                    message: error_str,
                }
            } else {
                ConfigError::Other(err)
            }
        })?;

        settings.provider.validate()?;
        Ok(settings)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    OPENAI_MODEL.to_string()
}

fn default_anthropic_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_anthropic_model() -> String {
    ANTHROPIC_MODEL.to_string()
}

fn default_anthropic_version() -> String {
    ANTHROPIC_VERSION.to_string()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_cli_command() -> String {
    CLAUDE_CLI_COMMAND.to_string()
}

fn default_user_label() -> String {
    ClaudeCliProviderConfig::default().user_label
}

fn default_assistant_label() -> String {
    ClaudeCliProviderConfig::default().assistant_label
}

fn default_strip_env_prefixes() -> Vec<String> {
    NESTED_SESSION_ENV_PREFIXES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_connect_secs() -> u64 {
    Timeouts::default().connect.as_secs()
}

fn default_request_secs() -> u64 {
    Timeouts::default().request.as_secs()
}

fn default_idle_secs() -> u64 {
    Timeouts::default().idle.as_secs()
}

fn default_exit_grace_ms() -> u64 {
    Timeouts::default().exit_grace.as_millis() as u64
}
