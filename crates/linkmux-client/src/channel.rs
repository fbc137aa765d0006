use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::signal::Signal;

/// Bytes moved per output-loop pass and per pump read.
pub const CHUNK_SIZE: usize = 4096;

/// Data flow of a channel, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    Bidirectional,
    /// Carries data toward the client only.
    In,
    /// Carries data toward the peer only.
    Out,
}

/// How higher layers interpret payload bytes. Advisory only; framing
/// never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEncoding {
    ByteArray,
    Utf8,
}

/// What sits behind a channel's queues.
pub enum ChannelBackend {
    /// Plain buffered queues (control channel, announced channels).
    Queue,
    /// Inbound bytes are written straight through to an OS sink
    /// (process stdin). A write failure marks the channel for close.
    Sink(Box<dyn Write + Send>),
    /// Output comes from an OS stream. `passthrough` reads directly
    /// from the stream at dequeue time; otherwise a pump thread fills
    /// the output queue. Inbound bytes are written to the stream.
    Stream {
        source: Arc<Mutex<File>>,
        passthrough: bool,
        eof: bool,
    },
}

impl std::fmt::Debug for ChannelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelBackend::Queue => f.write_str("Queue"),
            ChannelBackend::Sink(_) => f.write_str("Sink"),
            ChannelBackend::Stream {
                passthrough, eof, ..
            } => f
                .debug_struct("Stream")
                .field("passthrough", passthrough)
                .field("eof", eof)
                .finish(),
        }
    }
}

/// A logical, independently flow-controlled byte pipe multiplexed over
/// the link. Ids are assigned once by the registry and never reused.
#[derive(Debug)]
pub struct Channel {
    id: u32,
    direction: ChannelDirection,
    encoding: ChannelEncoding,
    /// Set once the peer has acknowledged the channel; gates output.
    pub is_linked: bool,
    /// Local decision that this channel is done.
    pub should_close: bool,
    /// The peer (or a local unilateral close) asked for removal.
    pub close_requested_by_local: bool,
    /// CHANNEL_SHOULD_CLOSE has been sent; never send a second one.
    pub close_requested_to_remote: bool,
    in_queue: Option<VecDeque<Bytes>>,
    out_queue: Option<VecDeque<Bytes>>,
    backend: ChannelBackend,
}

/// Channels are shared between the loops and the bridge pump threads.
pub type SharedChannel = Arc<Mutex<Channel>>;

impl Channel {
    pub fn new(
        id: u32,
        direction: ChannelDirection,
        encoding: ChannelEncoding,
        backend: ChannelBackend,
    ) -> Self {
        let in_queue = (direction != ChannelDirection::Out).then(VecDeque::new);
        let out_queue = (direction != ChannelDirection::In).then(VecDeque::new);
        Self {
            id,
            direction,
            encoding,
            is_linked: false,
            should_close: false,
            close_requested_by_local: false,
            close_requested_to_remote: false,
            in_queue,
            out_queue,
            backend,
        }
    }

    pub fn shared(self) -> SharedChannel {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn direction(&self) -> ChannelDirection {
        self.direction
    }

    pub fn encoding(&self) -> ChannelEncoding {
        self.encoding
    }

    pub fn backend(&self) -> &ChannelBackend {
        &self.backend
    }

    /// Deliver inbound bytes from the link.
    ///
    /// Sink- and stream-backed channels write straight through; queue
    /// channels buffer for their owner to read.
    pub fn enqueue_input(&mut self, data: Bytes) -> Result<()> {
        if self.direction == ChannelDirection::Out {
            return Err(ClientError::ChannelNotWritable(self.id));
        }
        match &mut self.backend {
            ChannelBackend::Sink(sink) => {
                if sink.write_all(&data).and_then(|_| sink.flush()).is_err() {
                    debug!(channel = self.id, "sink write failed, closing channel");
                    self.should_close = true;
                }
            }
            ChannelBackend::Stream { source, .. } => {
                let mut source = source.lock().unwrap_or_else(|e| e.into_inner());
                if source.write_all(&data).is_err() {
                    debug!(channel = self.id, "stream write failed, closing channel");
                    self.should_close = true;
                }
            }
            ChannelBackend::Queue => {
                if let Some(queue) = self.in_queue.as_mut() {
                    queue.push_back(data);
                }
            }
        }
        Ok(())
    }

    pub fn has_pending_input(&self) -> bool {
        self.in_queue.as_ref().is_some_and(|q| !q.is_empty())
    }

    /// Take the next inbound chunk.
    pub fn read_input(&mut self) -> Option<Bytes> {
        self.in_queue.as_mut().and_then(|q| q.pop_front())
    }

    /// Buffer outbound bytes. The caller raises the output signal.
    pub fn enqueue_output(&mut self, data: Bytes) {
        if let Some(queue) = self.out_queue.as_mut() {
            queue.push_back(data);
        }
    }

    pub fn has_pending_output(&self) -> bool {
        match &self.backend {
            ChannelBackend::Stream {
                passthrough: true,
                eof,
                ..
            } => !eof,
            _ => self.out_queue.as_ref().is_some_and(|q| !q.is_empty()),
        }
    }

    /// Take at most one outbound chunk.
    ///
    /// Passthrough stream channels read directly from the OS stream
    /// here, with no intermediate buffering; EOF marks the channel for
    /// close.
    pub fn dequeue_output(&mut self) -> Option<Bytes> {
        if let ChannelBackend::Stream {
            source,
            passthrough: true,
            eof,
        } = &mut self.backend
        {
            let mut buf = [0u8; CHUNK_SIZE];
            let read = {
                let mut source = source.lock().unwrap_or_else(|e| e.into_inner());
                source.read(&mut buf)
            };
            return match read {
                Ok(0) | Err(_) => {
                    *eof = true;
                    self.should_close = true;
                    None
                }
                Ok(n) => Some(Bytes::copy_from_slice(&buf[..n])),
            };
        }
        self.out_queue.as_mut().and_then(|q| q.pop_front())
    }

    /// Release backend resources and drop buffered data. Runs once,
    /// after the channel has been removed from the registry.
    pub fn teardown(&mut self) {
        match std::mem::replace(&mut self.backend, ChannelBackend::Queue) {
            ChannelBackend::Queue => {}
            ChannelBackend::Sink(sink) => drop(sink),
            ChannelBackend::Stream { source, .. } => drop(source),
        }
        if let Some(queue) = self.in_queue.as_mut() {
            queue.clear();
        }
        if let Some(queue) = self.out_queue.as_mut() {
            queue.clear();
        }
    }
}

/// Feed an OS reader into a channel's output queue, one chunk at a
/// time, raising the output signal per chunk. EOF or a read error
/// marks the channel for close and wakes the maintenance loop.
pub(crate) fn spawn_output_pump(
    mut reader: impl Read + Send + 'static,
    channel: SharedChannel,
    output_ready: Signal,
    work_ready: Signal,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => {
                    let mut guard = channel.lock().unwrap_or_else(|e| e.into_inner());
                    guard.should_close = true;
                    drop(guard);
                    work_ready.raise();
                    return;
                }
                Ok(n) => {
                    let mut guard = channel.lock().unwrap_or_else(|e| e.into_inner());
                    if guard.close_requested_by_local {
                        return;
                    }
                    guard.enqueue_output(Bytes::copy_from_slice(&buf[..n]));
                    drop(guard);
                    output_ready.raise();
                }
            }
        }
    });
}
