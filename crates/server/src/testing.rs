//! In-memory `CrispApi` used by the server tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pingpong_core::PluginSettings;
use pingpong_crisp::api::{
    ApiError, ConnectAccount, ConnectEndpoints, ConnectWebsite, ConnectWebsitePage, CrispApi,
    OutboundTextMessage,
};
use pingpong_crisp::events::EventEnvelope;
use pingpong_crisp::socket::{SocketTransport, TransportError};
use serde_json::Value;

pub struct FakeCrispApi {
    account: Result<ConnectAccount, ApiError>,
    pages: HashMap<u32, Result<ConnectWebsitePage, ApiError>>,
    update_failure: Option<ApiError>,
    calls: Mutex<Calls>,
}

#[derive(Clone, Debug, Default)]
pub struct Calls {
    pub page_requests: Vec<u32>,
    pub settings_updates: Vec<(String, String, String)>,
}

impl Default for FakeCrispApi {
    fn default() -> Self {
        Self {
            account: Ok(ConnectAccount { plugin_id: Some("plugin-42".to_owned()) }),
            pages: HashMap::new(),
            update_failure: None,
            calls: Mutex::new(Calls::default()),
        }
    }
}

impl FakeCrispApi {
    pub fn with_account(mut self, account: Result<ConnectAccount, ApiError>) -> Self {
        self.account = account;
        self
    }

    pub fn with_page(self, page: u32, result: Result<Vec<ConnectWebsite>, ApiError>) -> Self {
        self.with_listing(page, result.map(ConnectWebsitePage::from))
    }

    pub fn with_listing(mut self, page: u32, result: Result<ConnectWebsitePage, ApiError>) -> Self {
        self.pages.insert(page, result);
        self
    }

    pub fn failing_updates(mut self, error: ApiError) -> Self {
        self.update_failure = Some(error);
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().expect("calls lock").clone()
    }
}

pub fn website(website_id: &str, token: &str, settings: Value) -> ConnectWebsite {
    ConnectWebsite { website_id: website_id.to_owned(), token: token.to_owned(), settings }
}

#[async_trait]
impl CrispApi for FakeCrispApi {
    async fn connect_account(&self) -> Result<ConnectAccount, ApiError> {
        self.account.clone()
    }

    async fn list_connect_websites(
        &self,
        page: u32,
        _filter_configured: bool,
    ) -> Result<ConnectWebsitePage, ApiError> {
        self.calls.lock().expect("calls lock").page_requests.push(page);
        self.pages.get(&page).cloned().unwrap_or_else(|| Ok(ConnectWebsitePage::default()))
    }

    async fn update_subscription_settings(
        &self,
        website_id: &str,
        plugin_id: &str,
        settings: &PluginSettings,
    ) -> Result<(), ApiError> {
        self.calls.lock().expect("calls lock").settings_updates.push((
            website_id.to_owned(),
            plugin_id.to_owned(),
            settings.message.clone(),
        ));
        match &self.update_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn send_text_message(
        &self,
        _website_id: &str,
        _session_id: &str,
        _message: &OutboundTextMessage,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn connect_endpoints(&self) -> Result<ConnectEndpoints, ApiError> {
        Err(ApiError::MissingField("socket"))
    }
}

/// Transport that never manages to connect.
pub struct OfflineTransport;

#[async_trait]
impl SocketTransport for OfflineTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Err(TransportError::Connect("offline".to_owned()))
    }

    async fn next_envelope(&self) -> Result<Option<EventEnvelope>, TransportError> {
        Ok(None)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
