//! Binary wire primitives and the channel frame split for linkmux.
//!
//! Every protocol message is built by concatenating a small set of
//! deterministic, big-endian primitives:
//! - fixed-width integers (`u32`, `i32`, `u8`)
//! - length-prefixed byte blocks (4-byte length + raw bytes)
//! - null-terminated UTF-8 strings
//!
//! Decoding consumes from the front of a buffer and leaves the tail.

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::{
    get_block, get_cstr, get_i32, get_u32, get_u8, put_block, put_cstr, put_i32, put_u32, put_u8,
};
pub use error::{Result, WireError};
pub use frame::{decode_frame, encode_frame, Frame, CONTROL_CHANNEL, FRAME_HEADER_SIZE};
