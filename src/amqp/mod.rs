//! # Broker component.
//!
//! - [`AmqpSupervisor`]: owns the connection, reconnects it, starts/stops channels.
//! - [`Channel`]: one broker channel; publish/ack/nack, one consumer, drained stop.
//! - [`MessageHandler`] / [`ChannelSetup`]: user callbacks (closure adapters
//!   [`HandlerFn`] / [`SetupFn`]).
//! - [`protocol`]: the client-library seam ([`AmqpConnector`], [`AmqpProtocol`],
//!   [`AmqpChannel`]) and the message types.
//! - `LapinConnector` (feature `lapin`): the seam implemented over `lapin`.
//!
//! ## Architecture
//! ```text
//! AmqpSupervisor ──connect──► AmqpConnector ──► AmqpProtocol
//!      │  on_error (spawned reconnect loop)          │
//!      ▼                                             ▼
//!  [Channel A, Channel B, ...] ◄── ChannelLink ── channel()
//!      │
//!      └─ deliveries ─► TaskTracker ─► MessageHandler::handle(span, channel, delivery)
//! ```

mod channel;
#[cfg(feature = "lapin")]
mod client;
mod handler;
pub mod protocol;
mod supervisor;

#[cfg(test)]
pub(crate) mod mock;

pub use channel::{Channel, ChannelBuilder, PublishOptions};
#[cfg(feature = "lapin")]
pub use client::LapinConnector;
pub use handler::{ChannelSetup, HandlerFn, MessageHandler, SetupFn};
pub use protocol::{
    AmqpChannel, AmqpConnector, AmqpProtocol, ConsumeOptions, Consumer, Delivery, Envelope,
    ErrorCallback, ExchangeDeclareOk, ExchangeDeclareOptions, Properties, QueueDeclareOk,
    QueueDeclareOptions,
};
pub use supervisor::{AmqpSupervisor, ConnectionState};
