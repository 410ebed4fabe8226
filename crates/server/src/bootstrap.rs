use std::sync::Arc;
use std::time::Duration;

use pingpong_core::config::{AppConfig, ConfigError, LoadOptions};
use pingpong_core::WebsiteRegistry;
use pingpong_crisp::api::{ApiError, CrispApi, MessageUser};
use pingpong_crisp::events::plugin_dispatcher;
use pingpong_crisp::rest::RestClient;
use pingpong_crisp::rtm::RtmSocketTransport;
use pingpong_crisp::socket::{ConnectionState, ReconnectPolicy, RtmRunner, SocketTransport};
use thiserror::Error;
use tracing::{error, info};

use crate::loader::{load_subscribed_websites, LoadReport};

/// Identity of this plugin as known to the vendor. Resolved once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginIdentity {
    pub plugin_id: String,
}

pub struct Application {
    pub config: AppConfig,
    pub identity: PluginIdentity,
    pub api: Arc<dyn CrispApi>,
    pub registry: WebsiteRegistry,
    pub connection: ConnectionState,
    pub rtm_runner: RtmRunner,
    pub load_report: LoadReport,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("crisp client could not be built: {0}")]
    Client(#[source] ApiError),
    #[error("plugin identity could not be resolved: {0}")]
    PluginIdentity(#[source] ApiError),
    #[error("plugin identity response carried no plugin id")]
    MissingPluginId,
}

pub fn load_config(options: LoadOptions) -> Result<AppConfig, BootstrapError> {
    Ok(AppConfig::load(options)?)
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let api: Arc<dyn CrispApi> =
        Arc::new(RestClient::new(&config.crisp).map_err(BootstrapError::Client)?);
    let transport = Arc::new(RtmSocketTransport::new(
        api.clone(),
        config.crisp.identifier.clone(),
        config.crisp.key.clone(),
        Duration::from_secs(config.crisp.timeout_secs),
    ));

    assemble(config, api, transport).await
}

/// Resolves the plugin identity, loads the registry and wires the event runner
/// around the given vendor seams.
pub async fn assemble(
    config: AppConfig,
    api: Arc<dyn CrispApi>,
    transport: Arc<dyn SocketTransport>,
) -> Result<Application, BootstrapError> {
    let identity = match resolve_identity(api.as_ref()).await {
        Ok(identity) => identity,
        Err(error) => {
            error!(
                event_name = "system.bootstrap.identity_failed",
                correlation_id = "bootstrap",
                error = %error,
                "error verifying plugin connect information"
            );
            return Err(error);
        }
    };
    info!(
        event_name = "system.bootstrap.identity_resolved",
        correlation_id = "bootstrap",
        plugin_id = %identity.plugin_id,
        "plugin identity resolved"
    );

    let registry = WebsiteRegistry::new();
    let load_report =
        load_subscribed_websites(api.as_ref(), &registry, &config.crisp.default_message).await;

    let connection = ConnectionState::new();
    let dispatcher = plugin_dispatcher(
        api.clone(),
        registry.clone(),
        config.crisp.plugin_urn.clone(),
        MessageUser {
            nickname: config.reply.nickname.clone(),
            avatar: config.reply.avatar.clone(),
        },
    );
    let rtm_runner =
        RtmRunner::new(transport, dispatcher, ReconnectPolicy::default(), connection.clone());

    Ok(Application { config, identity, api, registry, connection, rtm_runner, load_report })
}

async fn resolve_identity(api: &dyn CrispApi) -> Result<PluginIdentity, BootstrapError> {
    let account = api.connect_account().await.map_err(BootstrapError::PluginIdentity)?;
    account
        .plugin_id
        .filter(|plugin_id| !plugin_id.trim().is_empty())
        .map(|plugin_id| PluginIdentity { plugin_id })
        .ok_or(BootstrapError::MissingPluginId)
}
