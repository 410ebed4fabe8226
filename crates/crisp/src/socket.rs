use std::sync::atomic::{AtomicBool, Ordering};
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::events::{
    DispatchError, EventContext, EventDispatcher, EventEnvelope, EventHandlerError,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport authentication was rejected: {0}")]
    Unauthorized(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport write failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed connection attempts tolerated before giving up.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 10, base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Shared "event stream connected" flag read by the health endpoint.
#[derive(Clone, Debug, Default)]
pub struct ConnectionState {
    connected: Arc<AtomicBool>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

/// A source of vendor events. `connect` must leave the stream authenticated
/// and subscribed; `next_envelope` yields `None` once the stream is closed.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<EventEnvelope>, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

pub struct RtmRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
    state: ConnectionState,
}

impl RtmRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
        state: ConnectionState,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy, state }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.clone()
    }

    /// Keeps the event stream alive until the reconnect budget is spent.
    /// Only a rejected authentication ends the loop with an error.
    pub async fn run(&self) -> Result<(), SocketError> {
        let mut failures: u32 = 0;

        loop {
            match self.transport.connect().await {
                Ok(()) => {
                    failures = 0;
                    self.state.mark_connected();
                    info!(
                        event_name = "system.rtm.connected",
                        correlation_id = "rtm",
                        "socket is connected: now listening for events"
                    );

                    let outcome = self.pump().await;
                    self.state.mark_disconnected();
                    match outcome {
                        Ok(()) => error!(
                            event_name = "system.rtm.disconnected",
                            correlation_id = "rtm",
                            "socket is disconnected: will try to reconnect"
                        ),
                        Err(transport_error) => error!(
                            event_name = "system.rtm.error",
                            correlation_id = "rtm",
                            error = %transport_error,
                            "socket error: may be broken"
                        ),
                    }

                    if let Err(disconnect_error) = self.transport.disconnect().await {
                        debug!(error = %disconnect_error, "socket teardown failed");
                    }
                }
                Err(TransportError::Unauthorized(reason)) => {
                    self.state.mark_disconnected();
                    error!(
                        event_name = "system.rtm.unauthorized",
                        correlation_id = "rtm",
                        reason = %reason,
                        "socket authentication rejected; check the plugin token pair"
                    );
                    return Err(TransportError::Unauthorized(reason).into());
                }
                Err(transport_error) => {
                    self.state.mark_disconnected();
                    failures += 1;
                    error!(
                        event_name = "system.rtm.error",
                        correlation_id = "rtm",
                        attempt = failures,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket error: may be broken"
                    );

                    if failures > self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket retries exhausted; continuing process without event stream"
                        );
                        return Ok(());
                    }
                }
            }

            let delay = self.reconnect_policy.backoff(failures);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn pump(&self) -> Result<(), TransportError> {
        while let Some(envelope) = self.transport.next_envelope().await? {
            let context = EventContext { correlation_id: envelope.envelope_id.clone() };
            let (website_id, session_id) = correlation_fields(&envelope);

            debug!(
                event_name = "ingress.crisp.event_received",
                correlation_id = %context.correlation_id,
                event_type = ?envelope.event.event_type(),
                website_id,
                session_id,
                "received crisp event"
            );

            match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(_) => {}
                Err(DispatchError::Handler(EventHandlerError::UnknownWebsite(website))) => warn!(
                    event_name = "ingress.crisp.unknown_website",
                    correlation_id = %context.correlation_id,
                    website_id = %website,
                    session_id,
                    "message received for a website missing from the registry"
                ),
                Err(dispatch_error) => error!(
                    event_name = "egress.crisp.auto_reply_failed",
                    correlation_id = %context.correlation_id,
                    website_id,
                    session_id,
                    error = %dispatch_error,
                    "event dispatch failed; continuing socket loop"
                ),
            }
        }

        Ok(())
    }
}

fn correlation_fields(envelope: &EventEnvelope) -> (&str, &str) {
    envelope.event.message().map_or(("unknown", "unknown"), |event| {
        (event.website_id.as_str(), event.session_id.as_str())
    })
}
