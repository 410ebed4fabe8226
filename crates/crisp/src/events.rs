use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use pingpong_core::{WebsiteId, WebsiteRegistry};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiError, CrispApi, MessageUser, OutboundTextMessage};

pub const MESSAGE_RECEIVED: &str = "message:received";
pub const MESSAGE_SEND: &str = "message:send";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventEnvelope {
    pub envelope_id: String,
    pub event: CrispEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CrispEvent {
    MessageReceivedText(TextMessageEvent),
    MessageSendText(TextMessageEvent),
    Unsupported { event_type: String },
}

impl CrispEvent {
    pub fn event_type(&self) -> CrispEventType {
        match self {
            Self::MessageReceivedText(_) => CrispEventType::MessageReceivedText,
            Self::MessageSendText(_) => CrispEventType::MessageSendText,
            Self::Unsupported { .. } => CrispEventType::Unsupported,
        }
    }

    pub fn message(&self) -> Option<&TextMessageEvent> {
        match self {
            Self::MessageReceivedText(message) | Self::MessageSendText(message) => Some(message),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CrispEventType {
    MessageReceivedText,
    MessageSendText,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TextMessageEvent {
    pub website_id: String,
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub fingerprint: Option<u64>,
}

#[derive(Deserialize)]
struct MessagePayloadKind {
    #[serde(rename = "type")]
    kind: String,
}

/// Classifies one RTM event by name and message type. Anything that is not a
/// text message in one of the subscribed namespaces comes back `Unsupported`.
pub fn parse_event(name: &str, payload: &Value) -> CrispEvent {
    let unsupported = |event_type: String| CrispEvent::Unsupported { event_type };

    let kind = match MessagePayloadKind::deserialize(payload) {
        Ok(header) => header.kind,
        Err(_) => return unsupported(name.to_owned()),
    };
    if kind != "text" {
        return unsupported(format!("{name}/{kind}"));
    }

    let message = match TextMessageEvent::deserialize(payload) {
        Ok(message) => message,
        Err(_) => return unsupported(format!("{name}/{kind}")),
    };

    match name {
        MESSAGE_RECEIVED => CrispEvent::MessageReceivedText(message),
        MESSAGE_SEND => CrispEvent::MessageSendText(message),
        other => unsupported(other.to_owned()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Replied,
    Processed,
    Ignored,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("website `{0}` is not subscribed to this plugin")]
    UnknownWebsite(WebsiteId),
    #[error("auto-reply could not be sent: {0}")]
    Send(#[source] ApiError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> CrispEventType;
    async fn handle(
        &self,
        envelope: &EventEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<CrispEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &EventEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher wired with the auto-reply handler for inbound text and the log
/// handler for outbound text.
pub fn plugin_dispatcher(
    api: Arc<dyn CrispApi>,
    registry: WebsiteRegistry,
    plugin_urn: impl Into<String>,
    user: MessageUser,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(AutoReplyHandler::new(api, registry, plugin_urn, user));
    dispatcher.register(OutboundLogHandler);
    dispatcher
}

pub struct AutoReplyHandler {
    api: Arc<dyn CrispApi>,
    registry: WebsiteRegistry,
    plugin_urn: String,
    user: MessageUser,
}

impl AutoReplyHandler {
    pub fn new(
        api: Arc<dyn CrispApi>,
        registry: WebsiteRegistry,
        plugin_urn: impl Into<String>,
        user: MessageUser,
    ) -> Self {
        Self { api, registry, plugin_urn: plugin_urn.into(), user }
    }
}

#[async_trait]
impl EventHandler for AutoReplyHandler {
    fn event_type(&self) -> CrispEventType {
        CrispEventType::MessageReceivedText
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let CrispEvent::MessageReceivedText(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        // Our own replies come back through the same channel.
        if event.origin == self.plugin_urn {
            debug!(
                event_name = "ingress.crisp.self_message_skipped",
                correlation_id = %ctx.correlation_id,
                website_id = %event.website_id,
                session_id = %event.session_id,
                "skipping message sent by this plugin"
            );
            return Ok(HandlerResult::Ignored);
        }

        let website_id = WebsiteId::from(event.website_id.as_str());
        let content = self
            .registry
            .message(&website_id)
            .map_err(|_| EventHandlerError::UnknownWebsite(website_id.clone()))?;

        let reply = OutboundTextMessage::operator(content, &self.plugin_urn, self.user.clone());
        self.api
            .send_text_message(&event.website_id, &event.session_id, &reply)
            .await
            .map_err(EventHandlerError::Send)?;

        info!(
            event_name = "egress.crisp.auto_reply_sent",
            correlation_id = %ctx.correlation_id,
            website_id = %event.website_id,
            session_id = %event.session_id,
            "auto-reply sent"
        );
        Ok(HandlerResult::Replied)
    }
}

pub struct OutboundLogHandler;

#[async_trait]
impl EventHandler for OutboundLogHandler {
    fn event_type(&self) -> CrispEventType {
        CrispEventType::MessageSendText
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let CrispEvent::MessageSendText(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        info!(
            event_name = "ingress.crisp.message_sent",
            correlation_id = %ctx.correlation_id,
            website_id = %event.website_id,
            session_id = %event.session_id,
            from = %event.from,
            "observed outbound text message"
        );
        Ok(HandlerResult::Processed)
    }
}
