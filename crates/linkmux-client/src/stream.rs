use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::MethodError;

/// A shared handle to one OS stream. The handle table and any channel
/// wrapping the stream hold clones of the same handle.
pub type SharedStream = Arc<Mutex<File>>;

/// The opaque stream-handle table owned by the stream bridge.
///
/// Handle ids come from an explicit monotonic counter starting at 1;
/// they are never derived from object identity.
pub struct StreamTable {
    inner: Mutex<Inner>,
}

struct Inner {
    handles: HashMap<i32, SharedStream>,
    next_id: i32,
}

impl StreamTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handles: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Store an opened stream, returning its freshly minted handle id.
    pub fn insert(&self, file: File) -> i32 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handles.insert(id, Arc::new(Mutex::new(file)));
        id
    }

    pub fn get(&self, id: i32) -> Option<SharedStream> {
        self.lock().handles.get(&id).cloned()
    }

    /// Drop a handle from the table. A channel still wrapping the
    /// stream keeps its own clone alive.
    pub fn remove(&self, id: i32) -> Option<SharedStream> {
        let removed = self.lock().handles.remove(&id);
        if removed.is_some() {
            debug!(stream = id, "stream handle removed");
        }
        removed
    }

    pub fn contains(&self, id: i32) -> bool {
        self.lock().handles.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().handles.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `Read` adapter over a [`SharedStream`] for output pump threads.
pub struct SharedStreamReader(pub SharedStream);

impl Read for SharedStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).read(buf)
    }
}

/// Translate the wire-level file mode and access bytes into open
/// options. Modes: 1 CreateNew, 2 Create, 3 Open, 4 OpenOrCreate,
/// 5 Truncate, 6 Append; access: 1 Read, 2 Write, 3 ReadWrite.
pub fn open_options(mode: u8, access: u8) -> Result<OpenOptions, MethodError> {
    let mut options = OpenOptions::new();
    match access {
        1 => {
            options.read(true);
        }
        2 => {
            options.write(true);
        }
        3 => {
            options.read(true).write(true);
        }
        other => return Err(MethodError::Failed(format!("unknown access mode {other}"))),
    }
    match mode {
        1 => {
            options.write(true).create_new(true);
        }
        2 => {
            options.write(true).create(true).truncate(true);
        }
        3 => {}
        4 => {
            options.write(true).create(true);
        }
        5 => {
            options.write(true).truncate(true);
        }
        6 => {
            options.append(true);
        }
        other => return Err(MethodError::Failed(format!("unknown file mode {other}"))),
    }
    Ok(options)
}
