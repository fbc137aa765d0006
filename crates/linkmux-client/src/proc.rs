use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::channel::{
    spawn_output_pump, Channel, ChannelBackend, ChannelDirection, ChannelEncoding,
};
use crate::client::ClientShared;
use crate::error::MethodError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One spawned child process the client is responsible for.
pub struct ProcessRecord {
    pub pid: u32,
    pub filename: String,
    pub args: String,
    pub child: Arc<Mutex<Child>>,
    /// stdin/stdout/stderr channel ids when channel-backed I/O was
    /// requested.
    pub channel_ids: Option<[u32; 3]>,
}

/// Pending (not yet reaped) processes, keyed by OS pid.
pub struct ProcessTable {
    inner: Mutex<HashMap<u32, ProcessRecord>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: ProcessRecord) {
        self.lock().insert(record.pid, record);
    }

    pub fn remove(&self, pid: u32) -> Option<ProcessRecord> {
        self.lock().remove(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.lock().contains_key(&pid)
    }

    /// Signal termination to a still-pending process.
    pub fn kill(&self, pid: u32) -> Result<(), MethodError> {
        let table = self.lock();
        let record = table
            .get(&pid)
            .ok_or_else(|| MethodError::Failed(format!("process {pid} not known")))?;
        let mut child = record.child.lock().unwrap_or_else(|e| e.into_inner());
        child.kill()?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, ProcessRecord>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Start an OS process, optionally bridging its three standard streams
/// into channels. The channels are created and registered before the
/// caller builds its response, so the returned ids are already live.
pub fn spawn_process(
    shared: &Arc<ClientShared>,
    filename: &str,
    args: &str,
    use_channels: bool,
) -> Result<(u32, Option<[u32; 3]>), MethodError> {
    let mut command = Command::new(filename);
    command.args(args.split_whitespace());
    if use_channels {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
    } else {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
    }

    let mut child = command.spawn()?;
    let pid = child.id();
    info!(pid, filename, "process spawned");

    let channel_ids = if use_channels {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MethodError::Failed("child stdin pipe missing".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MethodError::Failed("child stdout pipe missing".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MethodError::Failed("child stderr pipe missing".to_string()))?;

        let stdin_ch = Channel::new(
            shared.registry.allocate_id(),
            ChannelDirection::In,
            ChannelEncoding::Utf8,
            ChannelBackend::Sink(Box::new(stdin)),
        )
        .shared();
        let stdout_ch = Channel::new(
            shared.registry.allocate_id(),
            ChannelDirection::Out,
            ChannelEncoding::Utf8,
            ChannelBackend::Queue,
        )
        .shared();
        let stderr_ch = Channel::new(
            shared.registry.allocate_id(),
            ChannelDirection::Out,
            ChannelEncoding::Utf8,
            ChannelBackend::Queue,
        )
        .shared();

        let ids = [
            register(shared, &stdin_ch)?,
            register(shared, &stdout_ch)?,
            register(shared, &stderr_ch)?,
        ];

        spawn_output_pump(
            stdout,
            stdout_ch,
            shared.output_ready.clone(),
            shared.work_ready.clone(),
        );
        spawn_output_pump(
            stderr,
            stderr_ch,
            shared.output_ready.clone(),
            shared.work_ready.clone(),
        );

        Some(ids)
    } else {
        None
    };

    let child = Arc::new(Mutex::new(child));
    shared.procs.insert(ProcessRecord {
        pid,
        filename: filename.to_string(),
        args: args.to_string(),
        child: Arc::clone(&child),
        channel_ids,
    });

    spawn_exit_watcher(Arc::clone(shared), child, pid);

    Ok((pid, channel_ids))
}

fn register(
    shared: &Arc<ClientShared>,
    channel: &crate::channel::SharedChannel,
) -> Result<u32, MethodError> {
    shared
        .registry
        .register(Arc::clone(channel))
        .map_err(|err| MethodError::Failed(err.to_string()))
}

/// Poll the child on a bounded interval; on exit, move the pid to the
/// exited set and wake the maintenance loop. Polling (rather than a
/// blocking wait) keeps the child lock available for `kill_proc`.
fn spawn_exit_watcher(shared: Arc<ClientShared>, child: Arc<Mutex<Child>>, pid: u32) {
    std::thread::spawn(move || {
        while shared.running.load(Ordering::SeqCst) {
            let status = {
                let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
                child.try_wait()
            };
            match status {
                Ok(Some(status)) => {
                    debug!(pid, ?status, "process exited");
                    shared
                        .exited
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(pid);
                    shared.work_ready.raise();
                    return;
                }
                Ok(None) => {}
                Err(_) => {
                    shared
                        .exited
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(pid);
                    shared.work_ready.raise();
                    return;
                }
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_unknown_pid_is_method_error() {
        let table = ProcessTable::new();
        let err = table.kill(99999).unwrap_err();
        assert!(matches!(err, MethodError::Failed(msg) if msg.contains("not known")));
    }

    #[test]
    fn insert_remove_roundtrip() {
        let table = ProcessTable::new();
        let child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        table.insert(ProcessRecord {
            pid,
            filename: "true".to_string(),
            args: String::new(),
            child: Arc::new(Mutex::new(child)),
            channel_ids: None,
        });
        assert!(table.contains(pid));
        let record = table.remove(pid).unwrap();
        assert_eq!(record.filename, "true");
        assert!(!table.contains(pid));
        // Reap so the test leaves no zombie behind.
        let _ = record.child.lock().unwrap().wait();
    }
}
