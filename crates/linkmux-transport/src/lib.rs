//! Point-to-point link abstraction for linkmux.
//!
//! The multiplexing client rides on a [`Link`]: a byte-oriented,
//! frame-delimited pipe with a silence-timeout hook. This crate keeps
//! the client independent of the physical medium:
//! - [`MemoryLink`] — two connected in-memory endpoints for tests and
//!   demos
//! - [`StreamLink`] — runs the link over any `Read + Write` byte
//!   stream (Unix domain sockets in practice)

pub mod error;
pub mod link;
pub mod memory;
pub mod stream;

pub use error::{LinkError, Result};
pub use link::{Link, TimeoutCallback};
pub use memory::MemoryLink;
pub use stream::{StreamLink, StreamLinkConfig};
