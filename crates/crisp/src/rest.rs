//! reqwest-backed implementation of [`CrispApi`](crate::api::CrispApi).
//!
//! Every call authenticates with the plugin token pair over HTTP basic auth
//! in the `plugin` tier and unwraps the vendor's `{ error, reason, data }`
//! envelope.

use std::time::Duration;

use async_trait::async_trait;
use pingpong_core::config::CrispConfig;
use pingpong_core::PluginSettings;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::api::{
    ApiError, ConnectAccount, ConnectEndpoints, ConnectWebsitePage, CrispApi, OutboundTextMessage,
};

const TIER: &str = "plugin";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: String,
    data: Option<T>,
}

pub struct RestClient {
    client: Client,
    base_url: Url,
    identifier: String,
    key: SecretString,
}

impl RestClient {
    pub fn new(config: &CrispConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("pingpong-crisp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| ApiError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.api_base_url)?,
            identifier: config.identifier.clone(),
            key: config.key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url.join(path).map_err(|error| ApiError::Transport(error.to_string()))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(path)?;
        debug!(method = %method, url = %url, "crisp rest request");
        Ok(self
            .client
            .request(method, url)
            .basic_auth(&self.identifier, Some(self.key.expose_secret()))
            .header("X-Crisp-Tier", TIER))
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = send(builder).await?;
        let envelope: Envelope<T> = decode(response).await?;
        envelope.data.ok_or(ApiError::MissingField("data"))
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        let response = send(builder).await?;
        let _: Envelope<serde_json::Value> = decode(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CrispApi for RestClient {
    async fn connect_account(&self) -> Result<ConnectAccount, ApiError> {
        self.fetch(self.request(Method::GET, "plugin/connect/account")?).await
    }

    async fn list_connect_websites(
        &self,
        page: u32,
        filter_configured: bool,
    ) -> Result<ConnectWebsitePage, ApiError> {
        let filter = if filter_configured { "1" } else { "0" };
        let builder = self
            .request(Method::GET, &format!("plugin/connect/websites/all/{page}"))?
            .query(&[("filter_configured", filter)]);
        let entries: Vec<serde_json::Value> = self.fetch(builder).await?;
        Ok(ConnectWebsitePage::from_entries(entries))
    }

    async fn update_subscription_settings(
        &self,
        website_id: &str,
        plugin_id: &str,
        settings: &PluginSettings,
    ) -> Result<(), ApiError> {
        let path = format!("plugins/subscription/{website_id}/{plugin_id}/settings");
        self.execute(self.request(Method::PATCH, &path)?.json(settings)).await
    }

    async fn send_text_message(
        &self,
        website_id: &str,
        session_id: &str,
        message: &OutboundTextMessage,
    ) -> Result<(), ApiError> {
        let path = format!("website/{website_id}/conversation/{session_id}/message");
        self.execute(self.request(Method::POST, &path)?.json(message)).await
    }

    async fn connect_endpoints(&self) -> Result<ConnectEndpoints, ApiError> {
        self.fetch(self.request(Method::GET, "plugin/connect/endpoints")?).await
    }
}

fn normalize_base_url(raw: &str) -> Result<Url, ApiError> {
    let trimmed = raw.trim();
    let with_slash =
        if trimmed.ends_with('/') { trimmed.to_owned() } else { format!("{trimmed}/") };
    Url::parse(&with_slash).map_err(|error| ApiError::Transport(error.to_string()))
}

async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
    builder.send().await.map_err(|error| ApiError::Transport(error.to_string()))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<Envelope<T>, ApiError> {
    let status = response.status();
    let body = response.bytes().await.map_err(|error| ApiError::Transport(error.to_string()))?;

    if !status.is_success() {
        let reason = serde_json::from_slice::<Envelope<serde_json::Value>>(&body)
            .ok()
            .map(|envelope| envelope.reason)
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_owned());
        return Err(ApiError::Status { status: status.as_u16(), reason });
    }

    let envelope: Envelope<T> =
        serde_json::from_slice(&body).map_err(|error| ApiError::Decode(error.to_string()))?;
    if envelope.error {
        return Err(ApiError::Status { status: status.as_u16(), reason: envelope.reason });
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use pingpong_core::config::AppConfig;
    use pingpong_core::PluginSettings;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{normalize_base_url, RestClient};
    use crate::api::{ApiError, CrispApi, MessageUser, OutboundTextMessage};

    fn client_for(server: &MockServer) -> RestClient {
        let mut config = AppConfig::default().crisp;
        config.identifier = "ident".to_owned();
        config.key = "secret-key".to_owned().into();
        config.plugin_urn = "urn:acme:pingpong:0".to_owned();
        config.api_base_url = format!("{}/v1", server.uri());
        RestClient::new(&config).expect("client builds")
    }

    #[test]
    fn base_url_always_ends_with_slash() {
        let url = normalize_base_url("https://api.crisp.chat/v1").expect("valid url");
        assert_eq!(url.as_str(), "https://api.crisp.chat/v1/");
        assert_eq!(
            url.join("plugin/connect/account").expect("join").as_str(),
            "https://api.crisp.chat/v1/plugin/connect/account"
        );
    }

    #[tokio::test]
    async fn connect_account_sends_plugin_tier_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/plugin/connect/account"))
            .and(basic_auth("ident", "secret-key"))
            .and(header("X-Crisp-Tier", "plugin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": false,
                "reason": "resolved",
                "data": {"plugin_id": "plugin-42"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let account = client_for(&server).connect_account().await.expect("account resolves");
        assert_eq!(account.plugin_id.as_deref(), Some("plugin-42"));
    }

    #[tokio::test]
    async fn list_connect_websites_requests_the_page_with_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/plugin/connect/websites/all/3"))
            .and(query_param("filter_configured", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": false,
                "reason": "listed",
                "data": [
                    {"website_id": "w1", "token": "t1", "settings": {"message": "hi"}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page =
            client_for(&server).list_connect_websites(3, true).await.expect("page lists");
        assert_eq!(page.websites.len(), 1);
        assert_eq!(page.websites[0].website_id, "w1");
        assert_eq!(page.websites[0].settings, json!({"message": "hi"}));
        assert_eq!(page.skipped, 0);
    }

    #[tokio::test]
    async fn list_connect_websites_skips_entries_with_null_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/plugin/connect/websites/all/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": false,
                "reason": "listed",
                "data": [
                    {"website_id": "w1", "token": null, "settings": {}},
                    {"website_id": "w2", "token": "t2", "settings": {"message": "hey"}}
                ]
            })))
            .mount(&server)
            .await;

        let page =
            client_for(&server).list_connect_websites(1, true).await.expect("page still lists");
        assert_eq!(page.websites.len(), 1);
        assert_eq!(page.websites[0].website_id, "w2");
        assert_eq!(page.skipped, 1);
    }

    #[tokio::test]
    async fn update_subscription_settings_patches_message() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/plugins/subscription/w1/plugin-42/settings"))
            .and(body_json(json!({"message": "hi there"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": false, "reason": "updated", "data": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .update_subscription_settings("w1", "plugin-42", &PluginSettings::new("hi there"))
            .await
            .expect("settings update");
    }

    #[tokio::test]
    async fn send_text_message_posts_into_conversation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/website/w1/conversation/session_1/message"))
            .and(body_json(json!({
                "type": "text",
                "from": "operator",
                "origin": "urn:acme:pingpong:0",
                "content": "hello",
                "user": {"nickname": "Ping-Pong", "avatar": "https://a/b.png"}
            })))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(json!({"error": false, "reason": "dispatched", "data": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let message = OutboundTextMessage::operator(
            "hello",
            "urn:acme:pingpong:0",
            MessageUser { nickname: "Ping-Pong".to_owned(), avatar: "https://a/b.png".to_owned() },
        );
        client_for(&server).send_text_message("w1", "session_1", &message).await.expect("sent");
    }

    #[tokio::test]
    async fn error_status_surfaces_vendor_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/plugin/connect/account"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": true, "reason": "invalid_session"})),
            )
            .mount(&server)
            .await;

        let error = client_for(&server).connect_account().await.expect_err("should fail");
        assert_eq!(error, ApiError::Status { status: 401, reason: "invalid_session".to_owned() });
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/plugin/connect/endpoints"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let error = client_for(&server).connect_endpoints().await.expect_err("should fail");
        assert!(matches!(error, ApiError::Decode(_)));
    }
}
