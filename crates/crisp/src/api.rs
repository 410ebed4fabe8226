use async_trait::async_trait;
use pingpong_core::PluginSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Event namespaces the plugin subscribes to on the RTM channel.
pub const SUBSCRIBED_EVENTS: [&str; 2] = ["message:received", "message:send"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("crisp request failed: {0}")]
    Transport(String),
    #[error("crisp returned HTTP {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("crisp response could not be decoded: {0}")]
    Decode(String),
    #[error("crisp response is missing `{0}`")]
    MissingField(&'static str),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectAccount {
    #[serde(default)]
    pub plugin_id: Option<String>,
}

/// One website that has the plugin installed, as listed by the connect API.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ConnectWebsite {
    pub website_id: String,
    pub token: String,
    #[serde(default)]
    pub settings: Value,
}

/// One page of the connect listing. Entries that cannot be decoded are
/// counted in `skipped` instead of failing the page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectWebsitePage {
    pub websites: Vec<ConnectWebsite>,
    pub skipped: usize,
}

impl ConnectWebsitePage {
    pub fn from_entries(entries: Vec<Value>) -> Self {
        let mut page = Self::default();
        for entry in entries {
            match serde_json::from_value::<ConnectWebsite>(entry) {
                Ok(website) if !website.website_id.trim().is_empty() => {
                    page.websites.push(website);
                }
                Ok(_) => {
                    warn!(event_name = "crisp.connect.entry_skipped", "listed website has no id");
                    page.skipped += 1;
                }
                Err(error) => {
                    warn!(
                        event_name = "crisp.connect.entry_skipped",
                        error = %error,
                        "listed website could not be decoded"
                    );
                    page.skipped += 1;
                }
            }
        }
        page
    }

    /// True when the vendor listed nothing at all, which marks the end of pagination.
    pub fn is_empty(&self) -> bool {
        self.websites.is_empty() && self.skipped == 0
    }
}

impl From<Vec<ConnectWebsite>> for ConnectWebsitePage {
    fn from(websites: Vec<ConnectWebsite>) -> Self {
        Self { websites, skipped: 0 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ConnectEndpoints {
    pub socket: SocketEndpoints,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SocketEndpoints {
    pub app: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageUser {
    pub nickname: String,
    pub avatar: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundTextMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub origin: String,
    pub content: String,
    pub user: MessageUser,
}

impl OutboundTextMessage {
    pub fn operator(
        content: impl Into<String>,
        origin: impl Into<String>,
        user: MessageUser,
    ) -> Self {
        Self {
            kind: "text".to_owned(),
            from: "operator".to_owned(),
            origin: origin.into(),
            content: content.into(),
            user,
        }
    }
}

/// REST surface of the vendor used by the plugin.
#[async_trait]
pub trait CrispApi: Send + Sync {
    async fn connect_account(&self) -> Result<ConnectAccount, ApiError>;

    async fn list_connect_websites(
        &self,
        page: u32,
        filter_configured: bool,
    ) -> Result<ConnectWebsitePage, ApiError>;

    async fn update_subscription_settings(
        &self,
        website_id: &str,
        plugin_id: &str,
        settings: &PluginSettings,
    ) -> Result<(), ApiError>;

    async fn send_text_message(
        &self,
        website_id: &str,
        session_id: &str,
        message: &OutboundTextMessage,
    ) -> Result<(), ApiError>;

    async fn connect_endpoints(&self) -> Result<ConnectEndpoints, ApiError>;
}
