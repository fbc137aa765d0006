use bytes::{Bytes, BytesMut};

use linkmux_wire::{get_u32, put_u32, put_u8, Result as WireResult};

use crate::channel::{ChannelBackend, ChannelDirection, ChannelEncoding};
use crate::method::PendingMethod;

/// Control message types sent by this client. The two directions use
/// disjoint numbering so a reflected frame can never be mistaken for
/// a legitimate one.
pub mod to_server {
    pub const REQ_STAGE2: u32 = 1;
    pub const RCVD_STAGE2: u32 = 2;
    pub const STAGE2_RUNNING: u32 = 3;
    pub const RUN_METHOD_RESPONSE: u32 = 4;
    pub const ADD_CHANNEL: u32 = 5;
    pub const DESTROY_RESPONSE: u32 = 7;
    pub const PROCESS_EXITED: u32 = 8;
    pub const CHANNEL_SHOULD_CLOSE: u32 = 9;
    pub const CHANNEL_CLOSED: u32 = 10;
}

/// Control message types received from the server.
pub mod from_server {
    pub const STAGE2_RESPONSE: u32 = 1000;
    pub const RUN_METHOD: u32 = 1003;
    pub const ADD_CHANNEL_RESPONSE: u32 = 1004;
    pub const DESTROY: u32 = 1006;
    pub const CLOSE_CHANNEL: u32 = 1007;
}

/// Build a control frame body: `[4B message type][message body]`.
pub fn encode_control(msg_type: u32, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + body.len());
    put_u32(&mut buf, msg_type);
    buf.extend_from_slice(body);
    buf.freeze()
}

/// Body carrying one big-endian u32: channel ids for the lifecycle
/// messages, pids for PROCESS_EXITED.
pub fn u32_body(value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    put_u32(&mut buf, value);
    buf.freeze()
}

/// ADD_CHANNEL body: `[4B id][1B class][1B direction][1B encoding]`.
///
/// The direction byte carries the peer's view, so In and Out are
/// mirrored on the wire.
pub fn add_channel_body(
    id: u32,
    backend: &ChannelBackend,
    direction: ChannelDirection,
    encoding: ChannelEncoding,
) -> Bytes {
    let class: u8 = match backend {
        ChannelBackend::Queue => 0,
        ChannelBackend::Sink(_) => 1,
        ChannelBackend::Stream { .. } => 2,
    };
    let direction_byte: u8 = match direction {
        ChannelDirection::Bidirectional => 1,
        ChannelDirection::In => 2,
        ChannelDirection::Out => 3,
    };
    let encoding_byte: u8 = match encoding {
        ChannelEncoding::ByteArray => 1,
        ChannelEncoding::Utf8 => 2,
    };
    let mut buf = BytesMut::with_capacity(7);
    put_u32(&mut buf, id);
    put_u8(&mut buf, class);
    put_u8(&mut buf, direction_byte);
    put_u8(&mut buf, encoding_byte);
    buf.freeze()
}

/// A decoded inbound control message.
#[derive(Debug)]
pub enum ServerMessage {
    /// Execute a named capability; queued for the dispatcher.
    RunMethod(PendingMethod),
    /// The peer acknowledged a channel; it may carry data now.
    AddChannelResponse(u32),
    /// Full shutdown request.
    Destroy,
    /// Close a specific channel.
    CloseChannel(u32),
    /// Anything else, kept for the caller to log and drop.
    Unknown { msg_type: u32, body: Bytes },
}

/// Decode one control frame. Unknown types are not an error; the
/// protocol must tolerate forward-incompatible extensions.
pub fn parse_server_message(mut raw: Bytes) -> WireResult<ServerMessage> {
    let msg_type = get_u32(&mut raw)?;
    Ok(match msg_type {
        from_server::RUN_METHOD => ServerMessage::RunMethod(PendingMethod::parse(raw)?),
        from_server::ADD_CHANNEL_RESPONSE => ServerMessage::AddChannelResponse(get_u32(&mut raw)?),
        from_server::DESTROY => ServerMessage::Destroy,
        from_server::CLOSE_CHANNEL => ServerMessage::CloseChannel(get_u32(&mut raw)?),
        _ => ServerMessage::Unknown {
            msg_type,
            body: raw,
        },
    })
}
