use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WebsiteId(pub String);

impl WebsiteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WebsiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WebsiteId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for WebsiteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-website state kept for every website that has the plugin installed.
#[derive(Clone, Debug)]
pub struct WebsiteEntry {
    pub subscription_token: SecretString,
    pub message: String,
}

impl WebsiteEntry {
    pub fn new(subscription_token: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subscription_token: SecretString::from(subscription_token.into()),
            message: message.into(),
        }
    }

    /// Compares in constant time so timing does not leak how much of the token matched.
    pub fn token_matches(&self, candidate: &str) -> bool {
        self.subscription_token.expose_secret().as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

/// Typed view over the custom settings blob the vendor stores per subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSettings {
    pub message: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("plugin settings have no `message` field")]
    MissingMessage,
    #[error("plugin settings field `message` must be a string, found {found}")]
    MistypedMessage { found: &'static str },
    #[error("plugin settings could not be decoded: {0}")]
    Decode(String),
}

impl PluginSettings {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn from_value(value: &Value) -> Result<Self, SettingsError> {
        match value.get("message") {
            None | Some(Value::Null) => Err(SettingsError::MissingMessage),
            Some(Value::String(_)) => serde_json::from_value(value.clone())
                .map_err(|error| SettingsError::Decode(error.to_string())),
            Some(other) => Err(SettingsError::MistypedMessage { found: json_kind(other) }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
