use std::collections::HashMap;
use std::sync::Mutex;

use crate::channel::{ChannelDirection, SharedChannel};
use crate::error::{ClientError, Result};

/// Owns the set of live channels, indexed by id.
///
/// Input-capable and output-capable channels are kept in separate maps;
/// a bidirectional channel is in both. The single lock is held only
/// while touching the maps, never across channel work.
pub struct ChannelRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    input: HashMap<u32, SharedChannel>,
    output: HashMap<u32, SharedChannel>,
    next_id: u32,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                input: HashMap::new(),
                output: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Hand out the next channel id. Ids are monotonic and never
    /// reused within a session; the first allocation is the control
    /// channel's 0.
    pub fn allocate_id(&self) -> u32 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        id
    }

    /// Insert a channel into the map(s) its direction calls for.
    pub fn register(&self, channel: SharedChannel) -> Result<u32> {
        let (id, direction) = {
            let guard = channel.lock().unwrap_or_else(|e| e.into_inner());
            (guard.id(), guard.direction())
        };

        let mut inner = self.lock();
        if inner.input.contains_key(&id) || inner.output.contains_key(&id) {
            return Err(ClientError::DuplicateChannel(id));
        }
        if direction != ChannelDirection::Out {
            inner.input.insert(id, channel.clone());
        }
        if direction != ChannelDirection::In {
            inner.output.insert(id, channel);
        }
        Ok(id)
    }

    /// Look up a channel by id in either map.
    pub fn get(&self, id: u32) -> Option<SharedChannel> {
        let inner = self.lock();
        inner
            .input
            .get(&id)
            .or_else(|| inner.output.get(&id))
            .cloned()
    }

    /// Remove a channel from both maps, returning it for teardown.
    pub fn remove(&self, id: u32) -> Option<SharedChannel> {
        let mut inner = self.lock();
        let from_input = inner.input.remove(&id);
        let from_output = inner.output.remove(&id);
        from_input.or(from_output)
    }

    pub fn contains(&self, id: u32) -> bool {
        let inner = self.lock();
        inner.input.contains_key(&id) || inner.output.contains_key(&id)
    }

    /// Snapshot of output-capable channels.
    pub fn output_channels(&self) -> Vec<SharedChannel> {
        self.lock().output.values().cloned().collect()
    }

    /// Snapshot of every live channel, deduplicated by id.
    pub fn all_channels(&self) -> Vec<SharedChannel> {
        let inner = self.lock();
        let mut seen: HashMap<u32, SharedChannel> = HashMap::new();
        for (id, ch) in inner.input.iter().chain(inner.output.iter()) {
            seen.entry(*id).or_insert_with(|| ch.clone());
        }
        seen.into_values().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
