/// Errors that can occur in the multiplexing client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Wire-level framing error.
    #[error("wire error: {0}")]
    Wire(#[from] linkmux_wire::WireError),

    /// Transport link error.
    #[error("link error: {0}")]
    Link(#[from] linkmux_transport::LinkError),

    /// A channel with this id is already registered.
    #[error("channel {0} already registered")]
    DuplicateChannel(u32),

    /// The referenced channel does not exist.
    #[error("channel {0} not found")]
    UnknownChannel(u32),

    /// Data was routed to a channel that cannot accept input.
    #[error("channel {0} does not accept input")]
    ChannelNotWritable(u32),

    /// The first allocated channel id was not the control id 0.
    #[error("control channel allocated id {0}, expected 0")]
    ControlChannelMisallocated(u32),

    /// An I/O error outside the link boundary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// RPC-level failures, surfaced to the caller through the normal
/// response channel and never out of the dispatcher loop.
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    /// No capability with this name exists.
    #[error("method not found")]
    NotFound,

    /// The capability ran and reported a failure.
    #[error("{0}")]
    Failed(String),
}

impl From<std::io::Error> for MethodError {
    fn from(err: std::io::Error) -> Self {
        MethodError::Failed(err.to_string())
    }
}

impl From<linkmux_wire::WireError> for MethodError {
    fn from(err: linkmux_wire::WireError) -> Self {
        MethodError::Failed(format!("malformed arguments: {err}"))
    }
}
