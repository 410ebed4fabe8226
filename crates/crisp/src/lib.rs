//! Crisp Integration - REST client and RTM event stream
//!
//! This crate provides the vendor side of pingpong:
//! - **REST** (`api`, `rest`) - plugin identity, subscribed websites, settings, messages
//! - **RTM** (`rtm`) - socket.io-over-websocket event stream with plugin-tier auth
//! - **Events** (`events`) - typed events, dispatcher and the auto-reply handler
//! - **Runner** (`socket`) - connect/pump loop with reconnection and a connection flag
//!
//! # Architecture
//!
//! ```text
//! Crisp RTM → RtmSocketTransport → RtmRunner → EventDispatcher → AutoReplyHandler
//!                                                                      ↓
//!                                       WebsiteRegistry → CrispApi::send_text_message
//! ```
//!
//! # Key Types
//!
//! - `CrispApi` - REST seam, implemented by `RestClient`
//! - `SocketTransport` - event stream seam, implemented by `RtmSocketTransport`
//! - `RtmRunner` - event loop with reconnection logic
//! - `EventDispatcher` - routes events to handlers by type

pub mod api;
pub mod events;
pub mod rest;
pub mod rtm;
pub mod socket;
