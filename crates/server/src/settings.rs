//! Settings routes used by site owners to configure the auto-reply message.
//!
//! - `GET  /config`         - settings form (HTML)
//! - `POST /config/update`  - token-gated message update (JSON)

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use pingpong_core::{
    ApplicationError, InterfaceError, PluginSettings, RegistryError, WebsiteId, WebsiteRegistry,
};
use pingpong_crisp::api::{ApiError, CrispApi};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

const CONFIG_TEMPLATE: &str = "config.html";

#[derive(Clone)]
pub struct SettingsState {
    pub api: Arc<dyn CrispApi>,
    pub registry: WebsiteRegistry,
    pub plugin_id: Arc<str>,
    pub templates: Arc<Tera>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub website_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("`{0}` is required")]
    MissingField(&'static str),
    #[error("request body is not valid JSON: {0}")]
    InvalidBody(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("vendor rejected the settings update: {0}")]
    Vendor(#[source] ApiError),
}

impl UpdateError {
    fn into_interface(self, correlation_id: &str) -> InterfaceError {
        let application = match self {
            Self::InvalidBody(message) => {
                return InterfaceError::invalid_body(message).with_correlation_id(correlation_id);
            }
            Self::MissingField(field) => ApplicationError::MissingField(field),
            Self::Registry(error) => ApplicationError::Registry(error),
            Self::Vendor(error) => ApplicationError::Integration(error.to_string()),
        };
        application.into_interface(correlation_id)
    }
}

/// Loads `templates/*.html` from disk when present and falls back to the
/// copy embedded at build time.
pub fn init_templates() -> Arc<Tera> {
    let mut tera = match Tera::new("templates/**/*.html") {
        Ok(tera) => tera,
        Err(e) => {
            warn!(error = %e, "failed to load templates from filesystem, using embedded copy");
            Tera::default()
        }
    };

    if !tera.get_template_names().any(|name| name == CONFIG_TEMPLATE) {
        if let Err(e) =
            tera.add_raw_template(CONFIG_TEMPLATE, include_str!("../../../templates/config.html"))
        {
            error!(error = %e, "embedded settings template failed to parse");
        }
    }

    Arc::new(tera)
}

pub fn router(state: SettingsState) -> Router {
    Router::new()
        .route("/config", get(config_page))
        .route("/config/update", post(update_config))
        .with_state(state)
}

async fn config_page(
    State(state): State<SettingsState>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    info!(event_name = "http.settings.form_viewed", "someone is configuring their plugin");

    state.templates.render(CONFIG_TEMPLATE, &Context::new()).map(Html).map_err(|e| {
        error!(
            event_name = "http.settings.render_failed",
            error = %e,
            "settings form render failed"
        );
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html("<h1>Error</h1><p>The settings form is unavailable.</p>".to_string()),
        )
    })
}

async fn update_config(
    State(state): State<SettingsState>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<UpdateResponse>, (StatusCode, Json<ErrorEnvelope>)> {
    let correlation_id = Uuid::new_v4().to_string();

    let outcome = match payload {
        Ok(Json(request)) => apply_update(&state, request, &correlation_id).await,
        Err(rejection) => Err(UpdateError::InvalidBody(rejection.body_text())),
    };

    match outcome {
        Ok(()) => Ok(Json(UpdateResponse {
            success: true,
            message: "plugin settings updated".to_string(),
        })),
        Err(update_error) => {
            warn!(
                event_name = "http.settings.update_rejected",
                correlation_id = %correlation_id,
                error = %update_error,
                "plugin settings update rejected"
            );
            Err(error_response(update_error.into_interface(&correlation_id)))
        }
    }
}

/// Validates the caller against the registry, pushes the message to the vendor,
/// and only then updates the registry. Nothing changes on any failure.
async fn apply_update(
    state: &SettingsState,
    request: UpdateRequest,
    correlation_id: &str,
) -> Result<(), UpdateError> {
    if request.website_id.trim().is_empty() {
        return Err(UpdateError::MissingField("website_id"));
    }
    if request.token.trim().is_empty() {
        return Err(UpdateError::MissingField("token"));
    }

    let website_id = WebsiteId::from(request.website_id);
    state.registry.verify_token(&website_id, &request.token)?;

    let settings = PluginSettings::new(request.message);
    state
        .api
        .update_subscription_settings(website_id.as_str(), &state.plugin_id, &settings)
        .await
        .map_err(UpdateError::Vendor)?;
    state.registry.update_message(&website_id, settings.message)?;

    info!(
        event_name = "http.settings.updated",
        correlation_id = %correlation_id,
        website_id = %website_id,
        "successfully updated plugin settings"
    );
    Ok(())
}

fn error_response(error: InterfaceError) -> (StatusCode, Json<ErrorEnvelope>) {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = ErrorEnvelope {
        error: ErrorBody { code: error.code(), message: error.message().to_owned() },
    };
    (status, Json(envelope))
}
