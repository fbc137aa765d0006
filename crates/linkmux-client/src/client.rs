use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use linkmux_transport::{Link, LinkError};
use linkmux_wire::{decode_frame, encode_frame, CONTROL_CHANNEL};

use crate::channel::{Channel, ChannelBackend, ChannelDirection, ChannelEncoding};
use crate::control::{
    add_channel_body, encode_control, parse_server_message, to_server, u32_body,
    ServerMessage,
};
use crate::error::{ClientError, Result};
use crate::method::{self, PendingMethod};
use crate::proc::ProcessTable;
use crate::registry::ChannelRegistry;
use crate::signal::Signal;
use crate::stream::StreamTable;

/// Bound on every blocking wait so the running flag is re-checked
/// even when the link is silent.
const LOOP_TICK: Duration = Duration::from_millis(100);

/// State shared between the three loops and the bridge threads.
///
/// One lock per table; a table lock is never taken while the registry
/// lock is held.
pub struct ClientShared {
    pub(crate) link: Arc<dyn Link>,
    pub(crate) registry: ChannelRegistry,
    pub(crate) methods: Mutex<HashMap<u32, PendingMethod>>,
    pub(crate) procs: ProcessTable,
    pub(crate) exited: Mutex<Vec<u32>>,
    pub(crate) streams: StreamTable,
    pub(crate) running: AtomicBool,
    pub(crate) output_ready: Signal,
    pub(crate) work_ready: Signal,
}

impl ClientShared {
    fn new(link: Arc<dyn Link>) -> Self {
        Self {
            link,
            registry: ChannelRegistry::new(),
            methods: Mutex::new(HashMap::new()),
            procs: ProcessTable::new(),
            exited: Mutex::new(Vec::new()),
            streams: StreamTable::new(),
            running: AtomicBool::new(true),
            output_ready: Signal::new(false),
            work_ready: Signal::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a control message on channel 0. Delivery is the output
    /// loop's job; a missing control channel is a startup bug and is
    /// logged rather than propagated into the calling loop.
    pub(crate) fn send_control_message(&self, msg_type: u32, body: &[u8]) {
        let Some(control) = self.registry.get(CONTROL_CHANNEL) else {
            warn!(msg_type, "control channel missing, message dropped");
            return;
        };
        control
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .enqueue_output(encode_control(msg_type, body));
        self.output_ready.raise();
    }

    /// Flip the running flag and release every blocked wait. Loops and
    /// watcher threads observe the flag and return on their own.
    pub(crate) fn initiate_shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("shutting down");
            self.link.stop();
            self.output_ready.raise();
            self.work_ready.raise();
        }
    }

    /// Acknowledge a destroy request straight on the link, bypassing
    /// the output queue the shutdown is about to tear down.
    fn acknowledge_destroy(&self) {
        let frame = encode_frame(
            CONTROL_CHANNEL,
            &encode_control(to_server::DESTROY_RESPONSE, &[]),
        );
        if let Err(err) = self.link.write_output_stream(&frame, false) {
            debug!(%err, "destroy acknowledgement not delivered");
        }
    }
}

/// The client endpoint: a channel-multiplexing session over one link.
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Bind a client to a link. The control channel is allocated
    /// first and must receive id 0.
    pub fn new(link: Arc<dyn Link>) -> Result<Self> {
        let shared = Arc::new(ClientShared::new(link));

        let id = shared.registry.allocate_id();
        if id != CONTROL_CHANNEL {
            return Err(ClientError::ControlChannelMisallocated(id));
        }
        let control = Channel::new(
            id,
            ChannelDirection::Bidirectional,
            ChannelEncoding::ByteArray,
            ChannelBackend::Queue,
        )
        .shared();
        shared.registry.register(control)?;

        let weak: Weak<ClientShared> = Arc::downgrade(&shared);
        shared.link.register_timeout_callback(Box::new(move |elapsed_ms| {
            if let Some(shared) = weak.upgrade() {
                warn!(elapsed_ms, "link silent past threshold");
                shared.acknowledge_destroy();
                shared.initiate_shutdown();
            }
        }));

        Ok(Self { shared })
    }

    /// A handle for requesting shutdown from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Open a queue-backed channel and announce it to the peer. The
    /// channel carries no data until the peer links it.
    pub fn open_channel(
        &self,
        direction: ChannelDirection,
        encoding: ChannelEncoding,
    ) -> Result<u32> {
        let channel = Channel::new(
            self.shared.registry.allocate_id(),
            direction,
            encoding,
            ChannelBackend::Queue,
        )
        .shared();
        let id = self.shared.registry.register(channel)?;
        self.shared.send_control_message(
            to_server::ADD_CHANNEL,
            &add_channel_body(id, &ChannelBackend::Queue, direction, encoding),
        );
        Ok(id)
    }

    /// Look up a channel by id.
    pub fn channel(&self, id: u32) -> Option<crate::channel::SharedChannel> {
        self.shared.registry.get(id)
    }

    /// Queue outbound data on a channel. It leaves the endpoint once
    /// the peer has linked the channel.
    pub fn send(&self, id: u32, data: Bytes) -> Result<()> {
        let channel = self
            .shared
            .registry
            .get(id)
            .ok_or(ClientError::UnknownChannel(id))?;
        channel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .enqueue_output(data);
        self.shared.output_ready.raise();
        Ok(())
    }

    /// Run the session to completion: input and output loops on their
    /// own threads, maintenance on the calling thread.
    pub fn run(&self) -> Result<()> {
        let input = spawn_loop("linkmux-input", &self.shared, input_loop);
        let output = spawn_loop("linkmux-output", &self.shared, output_loop);

        self.shared
            .send_control_message(to_server::STAGE2_RUNNING, &[]);
        info!("client running");

        while self.shared.is_running() {
            self.shared.work_ready.wait_timeout(LOOP_TICK);
            maintenance_pass(&self.shared);
        }

        if input.join().is_err() || output.join().is_err() {
            warn!("a worker loop panicked during shutdown");
        }
        Ok(())
    }

    /// Request cooperative shutdown.
    pub fn stop(&self) {
        self.shared.initiate_shutdown();
    }
}

/// Clonable, weakly-held shutdown trigger (for signal handlers).
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Weak<ClientShared>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.initiate_shutdown();
        }
    }
}

fn spawn_loop(
    name: &str,
    shared: &Arc<ClientShared>,
    body: fn(Arc<ClientShared>),
) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(shared))
        .unwrap_or_else(|err| panic!("failed to spawn {name} thread: {err}"))
}

/// Route inbound frames to channel input queues and run the control
/// state machine. This is the only loop producing control side
/// effects from inbound traffic.
fn input_loop(shared: Arc<ClientShared>) {
    while shared.is_running() {
        if !shared.link.wait_for_data(LOOP_TICK) {
            continue;
        }
        while let Some(raw) = shared.link.read_input_stream() {
            let frame = match decode_frame(raw) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%err, "malformed frame dropped");
                    continue;
                }
            };
            if frame.channel == CONTROL_CHANNEL {
                handle_control(&shared, frame.payload);
                continue;
            }
            let Some(channel) = shared.registry.get(frame.channel) else {
                warn!(channel = frame.channel, "frame for unknown channel dropped");
                continue;
            };
            let mut channel = channel.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = channel.enqueue_input(frame.payload) {
                warn!(channel = channel.id(), %err, "inbound data dropped");
            }
            if channel.should_close {
                shared.work_ready.raise();
            }
        }
    }
    debug!("input loop stopped");
}

fn handle_control(shared: &Arc<ClientShared>, payload: Bytes) {
    let message = match parse_server_message(payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(%err, "malformed control message dropped");
            return;
        }
    };
    match message {
        ServerMessage::RunMethod(pending) => {
            debug!(id = pending.id, method = %pending.name, "method queued");
            shared
                .methods
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(pending.id, pending);
            shared.work_ready.raise();
        }
        ServerMessage::AddChannelResponse(id) => match shared.registry.get(id) {
            Some(channel) => {
                channel.lock().unwrap_or_else(|e| e.into_inner()).is_linked = true;
                shared.output_ready.raise();
            }
            None => warn!(channel = id, "link acknowledgement for unknown channel"),
        },
        ServerMessage::Destroy => {
            info!("destroy requested by peer");
            shared.acknowledge_destroy();
            shared.initiate_shutdown();
        }
        ServerMessage::CloseChannel(id) => match shared.registry.get(id) {
            Some(channel) => {
                channel
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .close_requested_by_local = true;
                shared.work_ready.raise();
            }
            None => warn!(channel = id, "close request for unknown channel"),
        },
        ServerMessage::Unknown { msg_type, body } => {
            warn!(msg_type, len = body.len(), "unknown control message dropped");
        }
    }
}

/// Drain pending output, one chunk per channel per pass. Only the
/// control channel and peer-linked channels may transmit.
fn output_loop(shared: Arc<ClientShared>) {
    while shared.is_running() {
        shared.output_ready.wait_timeout(LOOP_TICK);
        let mut remainder = false;
        for channel in shared.registry.output_channels() {
            let (id, frame) = {
                let mut channel = channel.lock().unwrap_or_else(|e| e.into_inner());
                let id = channel.id();
                if id != CONTROL_CHANNEL && !channel.is_linked {
                    continue;
                }
                let Some(chunk) = channel.dequeue_output() else {
                    if channel.should_close {
                        shared.work_ready.raise();
                    }
                    continue;
                };
                if channel.has_pending_output() {
                    remainder = true;
                }
                (id, encode_frame(id, &chunk))
            };
            // Data gets priority; control rides along at normal.
            match shared.link.write_output_stream(&frame, id != CONTROL_CHANNEL) {
                Ok(()) => {}
                Err(LinkError::Closed) => {
                    warn!("link closed, stopping");
                    shared.initiate_shutdown();
                    return;
                }
                Err(err) => warn!(channel = id, %err, "frame transmission failed"),
            }
        }
        if remainder {
            shared.output_ready.raise();
        }
    }
    debug!("output loop stopped");
}

/// One maintenance pass: close negotiation, process reconciliation,
/// then method dispatch.
pub(crate) fn maintenance_pass(shared: &Arc<ClientShared>) {
    sweep_closing_channels(shared);
    reap_exited_processes(shared);
    dispatch_methods(shared);
}

/// Two-phase close. A channel marked `should_close` announces it once
/// with CHANNEL_SHOULD_CLOSE and is released locally in the same
/// breath; a channel the peer asked to close is removed, torn down,
/// and acknowledged with exactly one CHANNEL_CLOSED.
fn sweep_closing_channels(shared: &Arc<ClientShared>) {
    let mut announce = Vec::new();
    let mut remove = Vec::new();
    for channel in shared.registry.all_channels() {
        let mut channel = channel.lock().unwrap_or_else(|e| e.into_inner());
        if channel.id() == CONTROL_CHANNEL {
            continue;
        }
        if channel.should_close && !channel.close_requested_to_remote {
            channel.close_requested_to_remote = true;
            channel.close_requested_by_local = true;
            announce.push(channel.id());
        }
        if channel.close_requested_by_local {
            remove.push(channel.id());
        }
    }
    for id in announce {
        debug!(channel = id, "requesting channel close");
        shared.send_control_message(to_server::CHANNEL_SHOULD_CLOSE, &u32_body(id));
    }
    for id in remove {
        // `remove` yields the channel exactly once, so the CLOSED
        // acknowledgement cannot repeat.
        let Some(channel) = shared.registry.remove(id) else {
            continue;
        };
        channel.lock().unwrap_or_else(|e| e.into_inner()).teardown();
        debug!(channel = id, "channel closed");
        shared.send_control_message(to_server::CHANNEL_CLOSED, &u32_body(id));
    }
}

/// Reconcile processes the watcher threads reported as exited: close
/// their bridged channels, reap the child, announce the exit once.
fn reap_exited_processes(shared: &Arc<ClientShared>) {
    let exited: Vec<u32> = shared
        .exited
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .drain(..)
        .collect();
    for pid in exited {
        if let Some(record) = shared.procs.remove(pid) {
            for id in record.channel_ids.into_iter().flatten() {
                if let Some(channel) = shared.registry.get(id) {
                    channel
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .should_close = true;
                }
            }
            let _ = record
                .child
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .wait();
        }
        info!(pid, "process exited");
        shared.send_control_message(to_server::PROCESS_EXITED, &u32_body(pid));
        shared.work_ready.raise();
    }
}

/// Run every not-yet-started method exactly once. The started flag is
/// flipped under the table lock; the implementation runs without it,
/// so a handler touching the registry cannot deadlock here.
fn dispatch_methods(shared: &Arc<ClientShared>) {
    let ready: Vec<(u32, String, Bytes)> = {
        let mut methods = shared.methods.lock().unwrap_or_else(|e| e.into_inner());
        methods
            .values_mut()
            .filter(|pending| !pending.started)
            .map(|pending| {
                pending.started = true;
                (pending.id, pending.name.clone(), pending.args.clone())
            })
            .collect()
    };
    for (id, name, args) in ready {
        let outcome = method::execute(shared, &name, &args);
        let response = {
            let mut methods = shared.methods.lock().unwrap_or_else(|e| e.into_inner());
            let Some(mut pending) = methods.remove(&id) else {
                continue;
            };
            pending.outcome = Some(outcome);
            pending.encode_response()
        };
        shared.send_control_message(to_server::RUN_METHOD_RESPONSE, &response);
    }
}

#[cfg(test)]
pub(crate) fn test_shared() -> Arc<ClientShared> {
    let (link, _peer) = linkmux_transport::MemoryLink::pair();
    Arc::new(ClientShared::new(Arc::new(link)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_with_control() -> Arc<ClientShared> {
        let shared = test_shared();
        let id = shared.registry.allocate_id();
        assert_eq!(id, CONTROL_CHANNEL);
        let control = Channel::new(
            id,
            ChannelDirection::Bidirectional,
            ChannelEncoding::ByteArray,
            ChannelBackend::Queue,
        )
        .shared();
        shared.registry.register(control).unwrap();
        shared
    }

    #[test]
    fn control_messages_queue_on_channel_zero() {
        let shared = shared_with_control();
        shared.send_control_message(to_server::STAGE2_RUNNING, &[]);

        let control = shared.registry.get(CONTROL_CHANNEL).unwrap();
        let mut control = control.lock().unwrap();
        let frame = control.dequeue_output().unwrap();
        assert_eq!(frame.as_ref(), &[0, 0, 0, 3]);
        assert!(shared.output_ready.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn close_sweep_announces_once_and_removes() {
        let shared = shared_with_control();
        let channel = Channel::new(
            shared.registry.allocate_id(),
            ChannelDirection::Bidirectional,
            ChannelEncoding::ByteArray,
            ChannelBackend::Queue,
        )
        .shared();
        let id = shared.registry.register(channel.clone()).unwrap();
        channel.lock().unwrap().should_close = true;

        maintenance_pass(&shared);
        maintenance_pass(&shared);

        assert!(!shared.registry.contains(id));
        let control = shared.registry.get(CONTROL_CHANNEL).unwrap();
        let mut control = control.lock().unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = control.dequeue_output() {
            frames.push(frame);
        }
        // One SHOULD_CLOSE and one CLOSED, nothing else.
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), &[0, 0, 0, 9, 0, 0, 0, 1]);
        assert_eq!(frames[1].as_ref(), &[0, 0, 0, 10, 0, 0, 0, 1]);
    }

    #[test]
    fn peer_close_request_removes_without_should_close() {
        let shared = shared_with_control();
        let channel = Channel::new(
            shared.registry.allocate_id(),
            ChannelDirection::Bidirectional,
            ChannelEncoding::ByteArray,
            ChannelBackend::Queue,
        )
        .shared();
        let id = shared.registry.register(channel.clone()).unwrap();
        channel.lock().unwrap().close_requested_by_local = true;

        maintenance_pass(&shared);

        assert!(!shared.registry.contains(id));
        let control = shared.registry.get(CONTROL_CHANNEL).unwrap();
        let mut control = control.lock().unwrap();
        let frame = control.dequeue_output().unwrap();
        assert_eq!(frame.as_ref(), &[0, 0, 0, 10, 0, 0, 0, 1]);
        assert!(control.dequeue_output().is_none());
    }

    #[test]
    fn dispatch_runs_each_method_once() {
        let shared = shared_with_control();
        let pending = PendingMethod {
            id: 5,
            name: "echo".to_string(),
            args: Bytes::from_static(&[9, 9]),
            started: false,
            outcome: None,
        };
        shared.methods.lock().unwrap().insert(5, pending);

        maintenance_pass(&shared);
        maintenance_pass(&shared);

        assert!(shared.methods.lock().unwrap().is_empty());
        let control = shared.registry.get(CONTROL_CHANNEL).unwrap();
        let mut control = control.lock().unwrap();
        let frame = control.dequeue_output().unwrap();
        // RUN_METHOD_RESPONSE, id 5, success, echoed payload.
        assert_eq!(frame.as_ref(), &[0, 0, 0, 4, 0, 0, 0, 5, 0, 9, 9]);
        assert!(control.dequeue_output().is_none());
    }

    #[test]
    fn constructor_claims_channel_zero() {
        let (link, _peer) = linkmux_transport::MemoryLink::pair();
        let client = Client::new(Arc::new(link)).unwrap();
        assert!(client.shared.registry.contains(CONTROL_CHANNEL));
    }
}
