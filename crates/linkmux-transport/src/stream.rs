use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::link::{Link, TimeoutCallback};

const LEN_PREFIX_SIZE: usize = 4;

/// Configuration for a [`StreamLink`].
#[derive(Debug, Clone)]
pub struct StreamLinkConfig {
    /// Maximum inbound/outbound frame size. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Fire the timeout callback after this much link silence.
    pub silence_timeout: Option<Duration>,
}

impl Default for StreamLinkConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            silence_timeout: None,
        }
    }
}

struct Inbound {
    state: Mutex<(VecDeque<Bytes>, bool)>,
    ready: Condvar,
}

impl Inbound {
    fn new() -> Self {
        Self {
            state: Mutex::new((VecDeque::new(), false)),
            ready: Condvar::new(),
        }
    }

    fn push(&self, frame: Bytes) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.0.push_back(frame);
        self.ready.notify_all();
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.1 = true;
        self.ready.notify_all();
    }
}

struct Shared {
    inbound: Inbound,
    writer: Mutex<Box<dyn Write + Send>>,
    running: AtomicBool,
    timeout_cb: Mutex<Option<TimeoutCallback>>,
    timeout_fired: AtomicBool,
    last_activity: Mutex<Instant>,
    shutdown: Mutex<Option<Box<dyn Fn() + Send>>>,
    config: StreamLinkConfig,
}

/// Runs the link over any byte stream with `[4B len][frame]` link
/// framing. A background reader thread reassembles inbound frames; an
/// optional monitor thread watches for link silence and fires the
/// registered timeout callback once.
///
/// Byte streams cannot reorder in flight, so the `high_priority` write
/// flag is accepted and ignored.
pub struct StreamLink {
    shared: Arc<Shared>,
}

impl fmt::Debug for StreamLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLink").finish_non_exhaustive()
    }
}

impl StreamLink {
    /// Build a link over separate read and write halves of a stream.
    ///
    /// `shutdown` is invoked on [`Link::stop`] to unblock the reader
    /// thread (e.g. `UnixStream::shutdown`).
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        shutdown: Option<Box<dyn Fn() + Send>>,
        config: StreamLinkConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            inbound: Inbound::new(),
            writer: Mutex::new(Box::new(writer)),
            running: AtomicBool::new(true),
            timeout_cb: Mutex::new(None),
            timeout_fired: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            shutdown: Mutex::new(shutdown),
            config,
        });

        let reader_shared = Arc::clone(&shared);
        std::thread::spawn(move || read_loop(reader, reader_shared));

        if shared.config.silence_timeout.is_some() {
            let monitor_shared = Arc::clone(&shared);
            std::thread::spawn(move || monitor_loop(monitor_shared));
        }

        Self { shared }
    }

    /// Connect to a Unix domain socket and run the link over it.
    #[cfg(unix)]
    pub fn connect_uds(path: impl AsRef<std::path::Path>, config: StreamLinkConfig) -> Result<Self> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| LinkError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        let reader = stream.try_clone()?;
        let shutdown_stream = stream.try_clone()?;
        debug!(?path, "connected stream link over unix domain socket");
        Ok(Self::new(
            reader,
            stream,
            Some(Box::new(move || {
                let _ = shutdown_stream.shutdown(std::net::Shutdown::Both);
            })),
            config,
        ))
    }
}

fn read_loop(mut reader: impl Read, shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        let mut len_buf = [0u8; LEN_PREFIX_SIZE];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > shared.config.max_frame_size {
            warn!(len, max = shared.config.max_frame_size, "oversized link frame, closing");
            break;
        }

        let mut frame = vec![0u8; len];
        if reader.read_exact(&mut frame).is_err() {
            break;
        }

        *shared
            .last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
        shared.inbound.push(Bytes::from(frame));
    }
    shared.inbound.close();
}

fn monitor_loop(shared: Arc<Shared>) {
    let threshold = match shared.config.silence_timeout {
        Some(t) => t,
        None => return,
    };
    while shared.running.load(Ordering::SeqCst) {
        std::thread::sleep(threshold.min(Duration::from_millis(250)));
        let elapsed = shared
            .last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed();
        if elapsed >= threshold && !shared.timeout_fired.swap(true, Ordering::SeqCst) {
            let cb = shared.timeout_cb.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cb) = cb.as_ref() {
                cb(elapsed.as_millis() as u64);
            }
            return;
        }
    }
}

impl Link for StreamLink {
    fn wait_for_data(&self, timeout: Duration) -> bool {
        let state = self
            .shared
            .inbound
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let (state, _) = self
            .shared
            .inbound
            .ready
            .wait_timeout_while(state, timeout, |(queue, closed)| {
                queue.is_empty() && !*closed
            })
            .unwrap_or_else(|e| e.into_inner());
        !state.0.is_empty()
    }

    fn has_data(&self) -> bool {
        !self
            .shared
            .inbound
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .0
            .is_empty()
    }

    fn read_input_stream(&self) -> Option<Bytes> {
        self.shared
            .inbound
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .0
            .pop_front()
    }

    fn write_output_stream(&self, frame: &[u8], _high_priority: bool) -> Result<()> {
        if frame.len() > self.shared.config.max_frame_size {
            return Err(LinkError::FrameTooLarge {
                size: frame.len(),
                max: self.shared.config.max_frame_size,
            });
        }
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }

        let mut writer = self
            .shared
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        writer.write_all(&(frame.len() as u32).to_be_bytes())?;
        writer.write_all(frame)?;
        writer.flush()?;
        Ok(())
    }

    fn register_timeout_callback(&self, cb: TimeoutCallback) {
        *self
            .shared
            .timeout_cb
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(cb);
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let shutdown = self
            .shared
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(shutdown) = shutdown.as_ref() {
            shutdown();
        }
        self.shared.inbound.close();
    }
}
