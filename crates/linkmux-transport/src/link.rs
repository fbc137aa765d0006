use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Called with the elapsed link silence in milliseconds.
pub type TimeoutCallback = Box<dyn Fn(u64) + Send + Sync>;

/// A point-to-point transport link carrying delimited frames.
///
/// Implementations own the physical framing; callers read and write
/// whole frames and never see partial delivery. All methods take
/// `&self` so one link can be shared across the client's loops.
pub trait Link: Send + Sync {
    /// Block until inbound data is available, the link closes, or the
    /// timeout elapses. Returns true if data is ready.
    fn wait_for_data(&self, timeout: Duration) -> bool;

    /// Whether at least one inbound frame is queued.
    fn has_data(&self) -> bool;

    /// Take the next inbound frame, or `None` if the queue is empty.
    fn read_input_stream(&self) -> Option<Bytes>;

    /// Queue one frame for transmission. `high_priority` frames may
    /// overtake queued normal-priority ones where the medium allows.
    fn write_output_stream(&self, frame: &[u8], high_priority: bool) -> Result<()>;

    /// Register the callback invoked when the link has been silent
    /// longer than its configured threshold.
    fn register_timeout_callback(&self, cb: TimeoutCallback);

    /// Stop the link. Blocked waits return and further writes fail.
    fn stop(&self);
}
