//! The linkmux client endpoint.
//!
//! One point-to-point [`Link`](linkmux_transport::Link) carries many
//! logical channels; channel 0 is the control channel and runs the
//! session protocol: channel lifecycle negotiation, server-invoked
//! capabilities (the method dispatcher), and orderly shutdown. The
//! other channels bridge byte streams: in-memory queues, spawned
//! process stdio, and opened files.
//!
//! [`Client::run`] drives three cooperating loops (input, output,
//! maintenance) until the peer destroys the session, the link goes
//! silent, or [`Client::stop`] is called.

pub mod channel;
pub mod client;
pub mod control;
pub mod error;
pub mod method;
pub mod proc;
pub mod registry;
pub mod signal;
pub mod stream;

pub use channel::{Channel, ChannelDirection, ChannelEncoding, SharedChannel};
pub use client::{Client, ShutdownHandle};
pub use error::{ClientError, MethodError, Result};
pub use registry::ChannelRegistry;
