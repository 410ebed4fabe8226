use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "https://api.crisp.chat/v1/";
pub const DEFAULT_REPLY_NICKNAME: &str = "Ping-Pong";
pub const DEFAULT_REPLY_AVATAR: &str = "https://crisp.chat/favicon-512x512.png";
pub const DEFAULT_MESSAGE: &str = "Thanks for your message! We will get back to you shortly.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub crisp: CrispConfig,
    pub reply: ReplyConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct CrispConfig {
    pub identifier: String,
    pub key: SecretString,
    /// Origin marker stamped on every message this plugin sends.
    pub plugin_urn: String,
    pub api_base_url: String,
    pub timeout_secs: u64,
    /// Used for websites whose stored settings carry no usable message.
    pub default_message: String,
}

#[derive(Clone, Debug)]
pub struct ReplyConfig {
    pub nickname: String,
    pub avatar: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub crisp_identifier: Option<String>,
    pub crisp_key: Option<String>,
    pub crisp_plugin_urn: Option<String>,
    pub crisp_api_base_url: Option<String>,
    pub server_port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crisp: CrispConfig {
                identifier: String::new(),
                key: String::new().into(),
                plugin_urn: String::new(),
                api_base_url: DEFAULT_API_BASE_URL.to_string(),
                timeout_secs: 10,
                default_message: DEFAULT_MESSAGE.to_string(),
            },
            reply: ReplyConfig {
                nickname: DEFAULT_REPLY_NICKNAME.to_string(),
                avatar: DEFAULT_REPLY_AVATAR.to_string(),
            },
            server: ServerConfig { bind_address: "0.0.0.0".to_string(), port: 1234 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("pingpong.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(crisp) = patch.crisp {
            if let Some(identifier) = crisp.identifier {
                self.crisp.identifier = identifier;
            }
            if let Some(crisp_key_value) = crisp.key {
                self.crisp.key = secret_value(crisp_key_value);
            }
            if let Some(plugin_urn) = crisp.plugin_urn {
                self.crisp.plugin_urn = plugin_urn;
            }
            if let Some(api_base_url) = crisp.api_base_url {
                self.crisp.api_base_url = api_base_url;
            }
            if let Some(timeout_secs) = crisp.timeout_secs {
                self.crisp.timeout_secs = timeout_secs;
            }
            if let Some(default_message) = crisp.default_message {
                self.crisp.default_message = default_message;
            }
        }

        if let Some(reply) = patch.reply {
            if let Some(nickname) = reply.nickname {
                self.reply.nickname = nickname;
            }
            if let Some(avatar) = reply.avatar {
                self.reply.avatar = avatar;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PINGPONG_CRISP_IDENTIFIER") {
            self.crisp.identifier = value;
        }
        if let Some(value) = read_env("PINGPONG_CRISP_KEY") {
            self.crisp.key = secret_value(value);
        }
        if let Some(value) = read_env("PINGPONG_CRISP_PLUGIN_URN") {
            self.crisp.plugin_urn = value;
        }
        if let Some(value) = read_env("PINGPONG_CRISP_API_BASE_URL") {
            self.crisp.api_base_url = value;
        }
        if let Some(value) = read_env("PINGPONG_CRISP_TIMEOUT_SECS") {
            self.crisp.timeout_secs = parse_u64("PINGPONG_CRISP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PINGPONG_CRISP_DEFAULT_MESSAGE") {
            self.crisp.default_message = value;
        }

        if let Some(value) = read_env("PINGPONG_REPLY_NICKNAME") {
            self.reply.nickname = value;
        }
        if let Some(value) = read_env("PINGPONG_REPLY_AVATAR") {
            self.reply.avatar = value;
        }

        if let Some(value) = read_env("PINGPONG_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PINGPONG_SERVER_PORT") {
            self.server.port = parse_u16("PINGPONG_SERVER_PORT", &value)?;
        }

        let log_level =
            read_env("PINGPONG_LOGGING_LEVEL").or_else(|| read_env("PINGPONG_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PINGPONG_LOGGING_FORMAT").or_else(|| read_env("PINGPONG_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(identifier) = overrides.crisp_identifier {
            self.crisp.identifier = identifier;
        }
        if let Some(crisp_key) = overrides.crisp_key {
            self.crisp.key = secret_value(crisp_key);
        }
        if let Some(plugin_urn) = overrides.crisp_plugin_urn {
            self.crisp.plugin_urn = plugin_urn;
        }
        if let Some(api_base_url) = overrides.crisp_api_base_url {
            self.crisp.api_base_url = api_base_url;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_crisp(&self.crisp)?;
        validate_reply(&self.reply)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("pingpong.toml"), PathBuf::from("config/pingpong.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_crisp(crisp: &CrispConfig) -> Result<(), ConfigError> {
    if crisp.identifier.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crisp.identifier is required. Get it from https://marketplace.crisp.chat > Your Plugin > Tokens".to_string(),
        ));
    }
    if crisp.key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "crisp.key is required. Get it from https://marketplace.crisp.chat > Your Plugin > Tokens".to_string(),
        ));
    }

    let urn = crisp.plugin_urn.trim();
    if urn.is_empty() {
        return Err(ConfigError::Validation("crisp.plugin_urn is required".to_string()));
    }
    if !urn.starts_with("urn:") {
        return Err(ConfigError::Validation(format!(
            "crisp.plugin_urn must start with `urn:` (got `{urn}`)"
        )));
    }

    let base_url = crisp.api_base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "crisp.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if crisp.timeout_secs == 0 || crisp.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "crisp.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if crisp.default_message.trim().is_empty() {
        return Err(ConfigError::Validation("crisp.default_message must not be empty".to_string()));
    }

    Ok(())
}

fn validate_reply(reply: &ReplyConfig) -> Result<(), ConfigError> {
    if reply.nickname.trim().is_empty() {
        return Err(ConfigError::Validation("reply.nickname must not be empty".to_string()));
    }
    if !reply.avatar.starts_with("http://") && !reply.avatar.starts_with("https://") {
        return Err(ConfigError::Validation(
            "reply.avatar must be an http:// or https:// URL".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    crisp: Option<CrispPatch>,
    reply: Option<ReplyPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CrispPatch {
    identifier: Option<String>,
    key: Option<String>,
    plugin_urn: Option<String>,
    api_base_url: Option<String>,
    timeout_secs: Option<u64>,
    default_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyPatch {
    nickname: Option<String>,
    avatar: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
