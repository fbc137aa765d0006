use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{LinkError, Result};
use crate::link::{Link, TimeoutCallback};

/// Frames queued toward one endpoint, split by priority.
#[derive(Default)]
struct QueueState {
    high: VecDeque<Bytes>,
    normal: VecDeque<Bytes>,
    closed: bool,
}

impl QueueState {
    fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }

    fn pop(&mut self) -> Option<Bytes> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

#[derive(Default)]
struct FrameQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl FrameQueue {
    fn push(&self, frame: Bytes, high_priority: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Err(LinkError::Closed);
        }
        if high_priority {
            state.high.push_back(frame);
        } else {
            state.normal.push_back(frame);
        }
        self.ready.notify_all();
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        self.ready.notify_all();
    }
}

/// An in-memory link endpoint. [`MemoryLink::pair`] yields two
/// connected endpoints: frames written on one side become readable on
/// the other, with high-priority frames delivered first.
pub struct MemoryLink {
    inbound: Arc<FrameQueue>,
    outbound: Arc<FrameQueue>,
    timeout_cb: Mutex<Option<TimeoutCallback>>,
}

impl MemoryLink {
    /// Create two connected endpoints.
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let a_to_b = Arc::new(FrameQueue::default());
        let b_to_a = Arc::new(FrameQueue::default());
        let a = MemoryLink {
            inbound: Arc::clone(&b_to_a),
            outbound: Arc::clone(&a_to_b),
            timeout_cb: Mutex::new(None),
        };
        let b = MemoryLink {
            inbound: a_to_b,
            outbound: b_to_a,
            timeout_cb: Mutex::new(None),
        };
        (a, b)
    }

    /// Simulate link silence: invoke the registered timeout callback
    /// with the given elapsed milliseconds. Test hook.
    pub fn fire_timeout(&self, elapsed_ms: u64) {
        let cb = self.timeout_cb.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cb) = cb.as_ref() {
            cb(elapsed_ms);
        }
    }
}

impl Link for MemoryLink {
    fn wait_for_data(&self, timeout: Duration) -> bool {
        let state = self
            .inbound
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let (state, _) = self
            .inbound
            .ready
            .wait_timeout_while(state, timeout, |s| s.is_empty() && !s.closed)
            .unwrap_or_else(|e| e.into_inner());
        !state.is_empty()
    }

    fn has_data(&self) -> bool {
        !self
            .inbound
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    fn read_input_stream(&self) -> Option<Bytes> {
        self.inbound
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
    }

    fn write_output_stream(&self, frame: &[u8], high_priority: bool) -> Result<()> {
        self.outbound
            .push(Bytes::copy_from_slice(frame), high_priority)
    }

    fn register_timeout_callback(&self, cb: TimeoutCallback) {
        *self.timeout_cb.lock().unwrap_or_else(|e| e.into_inner()) = Some(cb);
    }

    fn stop(&self) {
        self.inbound.close();
        self.outbound.close();
    }
}
