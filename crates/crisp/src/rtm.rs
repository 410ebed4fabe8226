//! RTM event stream: socket.io v4 over a websocket.
//!
//! Only the slice of the protocol the plugin needs is implemented: the
//! engine.io open/ping/close packets, the default-namespace connect, and
//! `EVENT` packets carrying `[name, payload]`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::api::{CrispApi, SUBSCRIBED_EVENTS};
use crate::events::{parse_event, EventEnvelope};
use crate::socket::{SocketTransport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SOCKET_IO_PATH: &str = "socket.io/";
const PONG: &str = "3";
const NAMESPACE_CONNECT: &str = "40";
const NAMESPACE_DISCONNECT: &str = "41";

/// One decoded text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Open,
    Close,
    Ping,
    Connected,
    ConnectError(String),
    Disconnected,
    Event { name: String, payload: Value },
    Other,
}

pub fn decode_frame(text: &str) -> Frame {
    let mut chars = text.chars();
    match chars.next() {
        Some('0') => Frame::Open,
        Some('1') => Frame::Close,
        Some('2') => Frame::Ping,
        Some('4') => decode_socket_packet(chars.as_str()),
        _ => Frame::Other,
    }
}

fn decode_socket_packet(packet: &str) -> Frame {
    let mut chars = packet.chars();
    let kind = chars.next();
    let body = strip_namespace(chars.as_str());

    match kind {
        Some('0') => Frame::Connected,
        Some('1') => Frame::Disconnected,
        Some('2') => decode_event(body.trim_start_matches(|ch: char| ch.is_ascii_digit())),
        Some('4') => Frame::ConnectError(
            serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_else(|| body.to_owned()),
        ),
        _ => Frame::Other,
    }
}

fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        body.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        body
    }
}

fn decode_event(body: &str) -> Frame {
    let Ok(Value::Array(mut items)) = serde_json::from_str::<Value>(body) else {
        return Frame::Other;
    };
    if items.is_empty() {
        return Frame::Other;
    }
    let payload = if items.len() > 1 { items.swap_remove(1) } else { Value::Null };
    match items.swap_remove(0) {
        Value::String(name) => Frame::Event { name, payload },
        _ => Frame::Other,
    }
}

pub fn encode_event(name: &str, payload: &Value) -> String {
    format!("42{}", json!([name, payload]))
}

/// Builds the websocket URL for the socket.io endpoint advertised by the vendor.
pub fn socket_url(app: &str) -> Result<Url, TransportError> {
    let mut base =
        Url::parse(app.trim()).map_err(|error| TransportError::Connect(error.to_string()))?;
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(TransportError::Connect(format!("unsupported scheme `{other}`"))),
    };
    base.set_scheme(scheme)
        .map_err(|()| TransportError::Connect(format!("cannot switch `{app}` to {scheme}")))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let mut url =
        base.join(SOCKET_IO_PATH).map_err(|error| TransportError::Connect(error.to_string()))?;
    url.query_pairs_mut().clear().append_pair("EIO", "4").append_pair("transport", "websocket");
    Ok(url)
}

pub struct RtmSocketTransport {
    api: Arc<dyn CrispApi>,
    identifier: String,
    key: SecretString,
    handshake_timeout: Duration,
    stream: Mutex<Option<WsStream>>,
    sequence: AtomicU64,
}

impl RtmSocketTransport {
    pub fn new(
        api: Arc<dyn CrispApi>,
        identifier: impl Into<String>,
        key: SecretString,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            api,
            identifier: identifier.into(),
            key,
            handshake_timeout,
            stream: Mutex::new(None),
            sequence: AtomicU64::new(1),
        }
    }

    fn authentication_frame(&self) -> String {
        encode_event(
            "authentication",
            &json!({
                "username": self.identifier,
                "password": self.key.expose_secret(),
                "tier": "plugin",
                "events": SUBSCRIBED_EVENTS,
            }),
        )
    }

    async fn handshake(&self, stream: &mut WsStream) -> Result<(), TransportError> {
        while let Some(message) = stream.next().await {
            let text = match message.map_err(|error| TransportError::Connect(error.to_string()))? {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };

            match decode_frame(&text) {
                Frame::Open => send_text(stream, NAMESPACE_CONNECT.to_owned()).await?,
                Frame::Ping => send_text(stream, PONG.to_owned()).await?,
                Frame::Connected => send_text(stream, self.authentication_frame()).await?,
                Frame::Event { name, .. } if name == "authenticated" => return Ok(()),
                Frame::Event { name, payload } if name == "unauthorized" => {
                    return Err(TransportError::Unauthorized(payload.to_string()));
                }
                Frame::ConnectError(reason) => return Err(TransportError::Connect(reason)),
                Frame::Close | Frame::Disconnected => break,
                other => debug!(frame = ?other, "ignoring frame during handshake"),
            }
        }

        Err(TransportError::Connect("stream closed during handshake".to_owned()))
    }

    fn envelope_for(&self, name: &str, payload: &Value) -> EventEnvelope {
        let event = parse_event(name, payload);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let envelope_id = event
            .message()
            .and_then(|message| message.fingerprint)
            .map_or_else(|| format!("rtm-{sequence}"), |fingerprint| format!("fp-{fingerprint}"));
        EventEnvelope { envelope_id, event }
    }
}

async fn send_text(stream: &mut WsStream, text: String) -> Result<(), TransportError> {
    stream
        .send(WsMessage::Text(text))
        .await
        .map_err(|error| TransportError::Send(error.to_string()))
}

#[async_trait]
impl SocketTransport for RtmSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let endpoints = self
            .api
            .connect_endpoints()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let url = socket_url(&endpoints.socket.app)?;
        info!(endpoint = %url.host_str().unwrap_or("unknown"), "opening rtm connection");

        let (mut stream, _) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        tokio::time::timeout(self.handshake_timeout, self.handshake(&mut stream))
            .await
            .map_err(|_| TransportError::Connect("handshake timed out".to_owned()))??;

        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<EventEnvelope>, TransportError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::Receive("not connected".to_owned()));
        };

        while let Some(message) = stream.next().await {
            let message = message.map_err(|error| TransportError::Receive(error.to_string()))?;
            let text = match message {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => return Ok(None),
                _ => continue,
            };

            match decode_frame(&text) {
                Frame::Ping => send_text(stream, PONG.to_owned()).await?,
                Frame::Event { name, payload } if SUBSCRIBED_EVENTS.contains(&name.as_str()) => {
                    return Ok(Some(self.envelope_for(&name, &payload)));
                }
                Frame::Close | Frame::Disconnected => return Ok(None),
                other => debug!(frame = ?other, "ignoring rtm frame"),
            }
        }

        Ok(None)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(());
        };

        // The peer may already be gone; a failed goodbye is not worth reporting.
        let _ = send_text(&mut stream, NAMESPACE_DISCONNECT.to_owned()).await;
        stream.close(None).await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use pingpong_core::PluginSettings;
    use secrecy::SecretString;
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    use super::{decode_frame, encode_event, socket_url, Frame, RtmSocketTransport};
    use crate::api::{
        ApiError, ConnectAccount, ConnectEndpoints, ConnectWebsitePage, CrispApi,
        OutboundTextMessage, SocketEndpoints,
    };
    use crate::events::CrispEvent;
    use crate::socket::{SocketTransport, TransportError};

    struct EndpointApi {
        app: String,
    }

    #[async_trait]
    impl CrispApi for EndpointApi {
        async fn connect_account(&self) -> Result<ConnectAccount, ApiError> {
            Ok(ConnectAccount::default())
        }

        async fn list_connect_websites(
            &self,
            _page: u32,
            _filter_configured: bool,
        ) -> Result<ConnectWebsitePage, ApiError> {
            Ok(ConnectWebsitePage::default())
        }

        async fn update_subscription_settings(
            &self,
            _website_id: &str,
            _plugin_id: &str,
            _settings: &PluginSettings,
        ) -> Result<(), ApiError> {
            Ok(())
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
            Ok(ConnectEndpoints { socket: SocketEndpoints { app: self.app.clone() } })
        }
    }

    /// Server side of a loopback socket.io session; keeps every text frame it reads.
    struct Peer {
        stream: WebSocketStream<TcpStream>,
        received: Vec<String>,
    }

    impl Peer {
        async fn accept(listener: TcpListener) -> Self {
            let (socket, _) = listener.accept().await.expect("accept");
            let stream = accept_async(socket).await.expect("websocket upgrade");
            Self { stream, received: Vec::new() }
        }

        async fn send(&mut self, text: &str) {
            self.stream.send(WsMessage::Text(text.to_owned())).await.expect("peer send");
        }

        async fn recv(&mut self) -> Option<String> {
            while let Some(message) = self.stream.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        self.received.push(text.clone());
                        return Some(text);
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => return None,
                    Ok(_) => continue,
                }
            }
            None
        }

        async fn authenticate(&mut self) {
            self.send(r#"0{"sid":"eio-1","pingInterval":25000,"pingTimeout":20000}"#).await;
            self.recv().await;
            self.send(r#"40{"sid":"sio-1"}"#).await;
            self.recv().await;
        }
    }

    async fn loopback() -> (TcpListener, RtmSocketTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let app = format!("http://{}", listener.local_addr().expect("local addr"));
        let transport = RtmSocketTransport::new(
            Arc::new(EndpointApi { app }),
            "ident",
            SecretString::from("secret-key".to_owned()),
            Duration::from_secs(5),
        );
        (listener, transport)
    }

    #[tokio::test]
    async fn authenticates_and_yields_subscribed_events() {
        let (listener, transport) = loopback().await;
        let server = tokio::spawn(async move {
            let mut peer = Peer::accept(listener).await;
            peer.authenticate().await;
            peer.send(r#"42["authenticated"]"#).await;
            peer.send("2").await;
            peer.send(r#"42["session:set_state",{"website_id":"w1","state":"resolved"}]"#).await;
            let inbound = json!({
                "type": "text",
                "website_id": "w1",
                "session_id": "s1",
                "content": "ping",
                "origin": "chat",
                "from": "user",
                "fingerprint": 7,
            });
            peer.send(&encode_event("message:received", &inbound)).await;
            peer.recv().await;
            peer.send("41").await;
            while peer.recv().await.is_some() {}
            peer.received
        });

        transport.connect().await.expect("handshake completes");
        let envelope =
            transport.next_envelope().await.expect("stream readable").expect("one event");
        assert_eq!(envelope.envelope_id, "fp-7");
        match envelope.event {
            CrispEvent::MessageReceivedText(message) => {
                assert_eq!(message.website_id, "w1");
                assert_eq!(message.session_id, "s1");
                assert_eq!(message.content, "ping");
                assert_eq!(message.origin, "chat");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(transport.next_envelope().await.expect("clean close").is_none());
        transport.disconnect().await.expect("disconnect");

        let received = server.await.expect("server task");
        assert_eq!(received.len(), 4, "frames seen by the server: {received:?}");
        assert_eq!(received[0], "40");
        match decode_frame(&received[1]) {
            Frame::Event { name, payload } => {
                assert_eq!(name, "authentication");
                assert_eq!(
                    payload,
                    json!({
                        "username": "ident",
                        "password": "secret-key",
                        "tier": "plugin",
                        "events": ["message:received", "message:send"],
                    })
                );
            }
            other => panic!("expected authentication event, got {other:?}"),
        }
        assert_eq!(received[2], "3");
        assert_eq!(received[3], "41");
    }

    #[tokio::test]
    async fn unauthorized_answer_fails_the_connect() {
        let (listener, transport) = loopback().await;
        let server = tokio::spawn(async move {
            let mut peer = Peer::accept(listener).await;
            peer.authenticate().await;
            peer.send(r#"42["unauthorized",{"e":1}]"#).await;
            while peer.recv().await.is_some() {}
        });

        let error = transport.connect().await.expect_err("credentials rejected");
        assert!(
            matches!(error, TransportError::Unauthorized(ref reason) if reason == r#"{"e":1}"#),
            "unexpected error: {error:?}"
        );
        assert!(matches!(transport.next_envelope().await, Err(TransportError::Receive(_))));
        drop(transport);
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn reading_before_connect_is_an_error() {
        let (_listener, transport) = loopback().await;
        assert!(matches!(transport.next_envelope().await, Err(TransportError::Receive(_))));
        transport.disconnect().await.expect("disconnect without a stream is a no-op");
    }

    #[test]
    fn decodes_engine_io_control_packets() {
        assert_eq!(decode_frame(r#"0{"sid":"abc","pingInterval":25000}"#), Frame::Open);
        assert_eq!(decode_frame("2"), Frame::Ping);
        assert_eq!(decode_frame("1"), Frame::Close);
        assert_eq!(decode_frame(r#"40{"sid":"xyz"}"#), Frame::Connected);
        assert_eq!(decode_frame("41"), Frame::Disconnected);
        assert_eq!(decode_frame(""), Frame::Other);
    }

    #[test]
    fn decodes_event_packets_with_optional_namespace_and_ack_id() {
        let expected = Frame::Event {
            name: "message:received".to_owned(),
            payload: json!({"website_id": "w1", "type": "text"}),
        };
        assert_eq!(
            decode_frame(r#"42["message:received",{"website_id":"w1","type":"text"}]"#),
            expected
        );
        assert_eq!(
            decode_frame(r#"42/plugin,17["message:received",{"website_id":"w1","type":"text"}]"#),
            expected
        );
        assert_eq!(
            decode_frame(r#"42["authenticated"]"#),
            Frame::Event { name: "authenticated".to_owned(), payload: json!(null) }
        );
        assert_eq!(decode_frame("42[42]"), Frame::Other);
        assert_eq!(decode_frame("42not-json"), Frame::Other);
    }

    #[test]
    fn decodes_connect_error_message() {
        assert_eq!(
            decode_frame(r#"44{"message":"Not authorized"}"#),
            Frame::ConnectError("Not authorized".to_owned())
        );
    }

    #[test]
    fn encodes_events_as_socket_io_arrays() {
        let frame = encode_event("authentication", &json!({"tier": "plugin"}));
        assert_eq!(frame, r#"42["authentication",{"tier":"plugin"}]"#);
        assert_eq!(
            decode_frame(&frame),
            Frame::Event { name: "authentication".to_owned(), payload: json!({"tier": "plugin"}) }
        );
    }

    #[test]
    fn socket_url_switches_to_websocket_scheme() {
        let url = socket_url("https://plugin.relay.crisp.chat").expect("url");
        assert_eq!(
            url.as_str(),
            "wss://plugin.relay.crisp.chat/socket.io/?EIO=4&transport=websocket"
        );

        let nested = socket_url("http://localhost:8080/relay").expect("url");
        assert_eq!(
            nested.as_str(),
            "ws://localhost:8080/relay/socket.io/?EIO=4&transport=websocket"
        );

        assert!(socket_url("ftp://example.com").is_err());
    }
}
