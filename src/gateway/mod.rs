//! RPC gateway
//!
//! Typed request/response messaging between the page context, the relay,
//! the background and the wallet UI surfaces. Transports implement
//! `Channel`; correlation (`GatewayClient`) and dispatch (`GatewayServer`)
//! sit on top and never see the transport.

mod channel;
mod client;
mod message;
mod relay;
mod server;

pub use channel::{Channel, JsonLinesChannel, MemoryChannel};
pub use client::GatewayClient;
pub use message::{Envelope, ErrorPayload, Exposure};
pub use relay::{Relay, RelayedRequest};
pub use server::{forward_notifications, GatewayServer, RequestHandler};
