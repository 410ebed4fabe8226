use thiserror::Error;

use crate::registry::RegistryError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("required field `{0}` is missing or empty")]
    MissingField(&'static str),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("integration failure: {0}")]
    Integration(String),
}

/// Error shape exposed to HTTP callers. `code` is the stable machine-readable
/// identifier placed in the JSON error envelope.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String, correlation_id: String },
    #[error("upstream failure: {message}")]
    BadGateway { code: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "invalid_body",
            message: message.into(),
            correlation_id: "unassigned".to_owned(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::Forbidden { code, .. }
            | Self::NotFound { code, .. }
            | Self::BadGateway { code, .. } => *code,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::BadGateway { .. } => 502,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::BadGateway { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. } => correlation_id,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        match &mut self {
            Self::BadRequest { correlation_id: id, .. }
            | Self::Forbidden { correlation_id: id, .. }
            | Self::NotFound { correlation_id: id, .. }
            | Self::BadGateway { correlation_id: id, .. } => *id = correlation_id.into(),
        }
        self
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        InterfaceError::from(self).with_correlation_id(correlation_id)
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::MissingField(field) => Self::BadRequest {
                code: "missing_field",
                message: format!("`{field}` is required"),
                correlation_id,
            },
            ApplicationError::Registry(RegistryError::UnknownWebsite(website_id)) => {
                Self::NotFound {
                    code: "unknown_website",
                    message: format!("website `{website_id}` is not subscribed to this plugin"),
                    correlation_id,
                }
            }
            // Never echo which part of the token was wrong.
            ApplicationError::Registry(RegistryError::InvalidToken(_)) => Self::Forbidden {
                code: "invalid_token",
                message: "the provided token is not valid for this website".to_owned(),
                correlation_id,
            },
            ApplicationError::Integration(message) => {
                Self::BadGateway { code: "vendor_error", message, correlation_id }
            }
        }
    }
}
