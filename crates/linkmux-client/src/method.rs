use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use linkmux_wire::{
    get_cstr, get_i32, get_u32, get_u8, put_cstr, put_i32, put_u32, put_u8,
    Result as WireResult,
};

use crate::channel::{Channel, ChannelBackend, ChannelDirection, ChannelEncoding, spawn_output_pump};
use crate::client::ClientShared;
use crate::error::MethodError;
use crate::proc::spawn_process;
use crate::stream::{open_options, SharedStreamReader};

/// A server-requested capability invocation, correlated by id.
///
/// State moves monotonically `!started → started → finished`; the
/// implementation runs at most once no matter how many maintenance
/// passes happen before it finishes.
#[derive(Debug)]
pub struct PendingMethod {
    pub id: u32,
    pub name: String,
    pub args: Bytes,
    pub started: bool,
    pub outcome: Option<MethodOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOutcome {
    Success(Vec<u8>),
    Error(String),
}

impl PendingMethod {
    /// Decode a RUN_METHOD body: `[4B id][cstr name][rest = args]`.
    pub fn parse(mut raw: Bytes) -> WireResult<Self> {
        let id = get_u32(&mut raw)?;
        let name = get_cstr(&mut raw)?;
        Ok(Self {
            id,
            name,
            args: raw,
            started: false,
            outcome: None,
        })
    }

    pub fn finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Build the RUN_METHOD_RESPONSE body:
    /// `[4B id][1B status]` + result bytes (0) or `[cstr error]` (1).
    pub fn encode_response(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, self.id);
        match &self.outcome {
            Some(MethodOutcome::Success(bytes)) => {
                put_u8(&mut buf, 0);
                buf.extend_from_slice(bytes);
            }
            Some(MethodOutcome::Error(message)) => {
                put_u8(&mut buf, 1);
                // NULs inside the message would truncate the cstr.
                let clean = message.replace('\0', " ");
                let _ = put_cstr(&mut buf, &clean);
            }
            // Encoding an unfinished method is a logic error upstream;
            // report it rather than panic.
            None => {
                put_u8(&mut buf, 1);
                let _ = put_cstr(&mut buf, "method did not finish");
            }
        }
        buf.freeze()
    }
}

type MethodHandler = fn(&Arc<ClientShared>, &Bytes) -> Result<Vec<u8>, MethodError>;

/// The fixed capability set, resolved statically by name.
fn lookup(name: &str) -> Option<MethodHandler> {
    Some(match name {
        "fs_command" => fs_command,
        "inform_channel_added" => inform_channel_added,
        "fs_open_file" => fs_open_file,
        "fs_close_stream" => fs_close_stream,
        "open_stream_channel" => open_stream_channel,
        "kill_proc" => kill_proc,
        "create_proc" => create_proc,
        "echo" => echo,
        _ => return None,
    })
}

/// Run a named capability once, folding every failure into the error
/// string the peer sees. Nothing escapes the dispatcher.
pub fn execute(shared: &Arc<ClientShared>, name: &str, args: &Bytes) -> MethodOutcome {
    let result = match lookup(name) {
        Some(handler) => handler(shared, args),
        None => Err(MethodError::NotFound),
    };
    match result {
        Ok(result) => MethodOutcome::Success(result),
        Err(MethodError::NotFound) => {
            debug!(method = name, "method not found");
            MethodOutcome::Error(format!("method '{name}' not found"))
        }
        Err(MethodError::Failed(message)) => {
            debug!(method = name, %message, "method failed");
            MethodOutcome::Error(format!("method '{name}' failed: {message}"))
        }
    }
}

fn fs_command(_shared: &Arc<ClientShared>, args: &Bytes) -> Result<Vec<u8>, MethodError> {
    let mut args = args.clone();
    let command = get_cstr(&mut args)?;
    let output = match command.as_str() {
        "pwd" => std::env::current_dir()?.display().to_string(),
        "ls" => {
            let target = get_cstr(&mut args)?;
            let mut listing = String::new();
            for entry in std::fs::read_dir(&target)? {
                let entry = entry?;
                listing.push_str(&entry.file_name().to_string_lossy());
                listing.push('\n');
            }
            listing
        }
        "cd" => {
            let target = get_cstr(&mut args)?;
            std::env::set_current_dir(&target)?;
            std::env::current_dir()?.display().to_string()
        }
        other => return Err(MethodError::Failed(format!("unknown command {other}"))),
    };

    let mut buf = BytesMut::new();
    put_cstr(&mut buf, &output)?;
    Ok(buf.to_vec())
}

fn inform_channel_added(shared: &Arc<ClientShared>, args: &Bytes) -> Result<Vec<u8>, MethodError> {
    let mut args = args.clone();
    let id = get_u32(&mut args)?;
    let channel = shared
        .registry
        .get(id)
        .ok_or_else(|| MethodError::Failed(format!("channel {id} not found")))?;
    channel.lock().unwrap_or_else(|e| e.into_inner()).is_linked = true;
    // Buffered output may now flow.
    shared.output_ready.raise();

    let mut buf = BytesMut::new();
    put_cstr(&mut buf, &format!("channel {id} marked as linked"))?;
    Ok(buf.to_vec())
}

fn fs_open_file(shared: &Arc<ClientShared>, args: &Bytes) -> Result<Vec<u8>, MethodError> {
    let mut args = args.clone();
    let filename = get_cstr(&mut args)?;
    let mode = get_u8(&mut args)?;
    let access = get_u8(&mut args)?;

    let file = open_options(mode, access)?.open(&filename)?;
    let handle = shared.streams.insert(file);
    debug!(stream = handle, filename, "stream opened");

    let mut buf = BytesMut::new();
    put_i32(&mut buf, handle);
    Ok(buf.to_vec())
}

fn fs_close_stream(shared: &Arc<ClientShared>, args: &Bytes) -> Result<Vec<u8>, MethodError> {
    let mut args = args.clone();
    let handle = get_i32(&mut args)?;
    shared
        .streams
        .remove(handle)
        .ok_or_else(|| MethodError::Failed(format!("stream {handle} does not exist")))?;

    let mut buf = BytesMut::new();
    put_i32(&mut buf, handle);
    Ok(buf.to_vec())
}

fn open_stream_channel(shared: &Arc<ClientShared>, args: &Bytes) -> Result<Vec<u8>, MethodError> {
    let mut args = args.clone();
    let handle = get_i32(&mut args)?;
    let passthrough = get_u8(&mut args)? == 1;

    let source = shared
        .streams
        .get(handle)
        .ok_or_else(|| MethodError::Failed(format!("stream {handle} does not exist")))?;

    let channel = Channel::new(
        shared.registry.allocate_id(),
        ChannelDirection::Bidirectional,
        ChannelEncoding::ByteArray,
        ChannelBackend::Stream {
            source: Arc::clone(&source),
            passthrough,
            eof: false,
        },
    )
    .shared();
    let channel_id = shared
        .registry
        .register(Arc::clone(&channel))
        .map_err(|err| MethodError::Failed(err.to_string()))?;

    if !passthrough {
        spawn_output_pump(
            SharedStreamReader(source),
            channel,
            shared.output_ready.clone(),
            shared.work_ready.clone(),
        );
    }
    debug!(stream = handle, channel = channel_id, passthrough, "stream channel opened");

    let mut buf = BytesMut::new();
    put_u32(&mut buf, channel_id);
    Ok(buf.to_vec())
}

fn kill_proc(shared: &Arc<ClientShared>, args: &Bytes) -> Result<Vec<u8>, MethodError> {
    let mut args = args.clone();
    let pid = get_u32(&mut args)?;
    shared.procs.kill(pid)?;

    let mut buf = BytesMut::new();
    put_u32(&mut buf, pid);
    Ok(buf.to_vec())
}

fn create_proc(shared: &Arc<ClientShared>, args: &Bytes) -> Result<Vec<u8>, MethodError> {
    let mut args = args.clone();
    let use_channels = get_u8(&mut args)? != 0;
    let filename = get_cstr(&mut args)?;
    let proc_args = get_cstr(&mut args)?;

    let (pid, channel_ids) = spawn_process(shared, &filename, &proc_args, use_channels)?;

    let mut buf = BytesMut::new();
    put_u32(&mut buf, pid);
    match channel_ids {
        Some([stdin, stdout, stderr]) => {
            put_u8(&mut buf, 1);
            put_u32(&mut buf, stdin);
            put_u32(&mut buf, stdout);
            put_u32(&mut buf, stderr);
        }
        None => {
            put_u8(&mut buf, 0);
            put_u32(&mut buf, 0);
            put_u32(&mut buf, 0);
            put_u32(&mut buf, 0);
        }
    }
    Ok(buf.to_vec())
}

fn echo(_shared: &Arc<ClientShared>, args: &Bytes) -> Result<Vec<u8>, MethodError> {
    Ok(args.to_vec())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use super::*;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "linkmux-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn expect_success(outcome: MethodOutcome) -> Bytes {
        match outcome {
            MethodOutcome::Success(bytes) => Bytes::from(bytes),
            MethodOutcome::Error(message) => panic!("expected success, got error: {message}"),
        }
    }

    #[test]
    fn parse_splits_id_name_args() {
        let mut raw = BytesMut::new();
        put_u32(&mut raw, 42);
        put_cstr(&mut raw, "fs_command").unwrap();
        raw.extend_from_slice(b"tail");

        let method = PendingMethod::parse(raw.freeze()).unwrap();
        assert_eq!(method.id, 42);
        assert_eq!(method.name, "fs_command");
        assert_eq!(method.args.as_ref(), b"tail");
        assert!(!method.started);
        assert!(!method.finished());
    }

    #[test]
    fn success_response_layout() {
        let method = PendingMethod {
            id: 7,
            name: "echo".to_string(),
            args: Bytes::new(),
            started: true,
            outcome: Some(MethodOutcome::Success(vec![0xAA, 0xBB])),
        };
        assert_eq!(method.encode_response().as_ref(), &[0, 0, 0, 7, 0, 0xAA, 0xBB]);
    }

    #[test]
    fn error_response_carries_cstr() {
        let method = PendingMethod {
            id: 8,
            name: "nope".to_string(),
            args: Bytes::new(),
            started: true,
            outcome: Some(MethodOutcome::Error("bad".to_string())),
        };
        assert_eq!(
            method.encode_response().as_ref(),
            &[0, 0, 0, 8, 1, b'b', b'a', b'd', 0]
        );
    }

    #[test]
    fn unknown_capability_names_the_method() {
        let shared = crate::client::test_shared();
        let outcome = execute(&shared, "no_such_method", &Bytes::new());
        assert_eq!(
            outcome,
            MethodOutcome::Error("method 'no_such_method' not found".to_string())
        );
    }

    #[test]
    fn echo_roundtrip() {
        let shared = crate::client::test_shared();
        let outcome = execute(&shared, "echo", &Bytes::from_static(&[1, 2, 3]));
        assert_eq!(outcome, MethodOutcome::Success(vec![1, 2, 3]));
    }

    #[test]
    fn fs_open_file_missing_references_method_name() {
        let shared = crate::client::test_shared();
        let mut args = BytesMut::new();
        put_cstr(&mut args, "/definitely/missing.txt").unwrap();
        put_u8(&mut args, 3); // Open
        put_u8(&mut args, 1); // Read

        let outcome = execute(&shared, "fs_open_file", &args.freeze());
        match outcome {
            MethodOutcome::Error(message) => assert!(message.contains("fs_open_file")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(shared.streams.is_empty());
    }

    #[test]
    fn fs_close_stream_unknown_handle() {
        let shared = crate::client::test_shared();
        let mut args = BytesMut::new();
        put_i32(&mut args, 12);

        let outcome = execute(&shared, "fs_close_stream", &args.freeze());
        match outcome {
            MethodOutcome::Error(message) => assert!(message.contains("does not exist")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(shared.streams.is_empty());
    }

    #[test]
    fn malformed_args_become_method_error() {
        let shared = crate::client::test_shared();
        // kill_proc wants a u32; give it one byte.
        let outcome = execute(&shared, "kill_proc", &Bytes::from_static(&[1]));
        assert!(matches!(outcome, MethodOutcome::Error(_)));
    }

    #[test]
    fn fs_command_lists_a_directory() {
        let shared = crate::client::test_shared();
        let dir = unique_temp_dir("ls");
        std::fs::write(dir.join("alpha.txt"), b"a").unwrap();
        std::fs::write(dir.join("beta.txt"), b"b").unwrap();

        let mut args = BytesMut::new();
        put_cstr(&mut args, "ls").unwrap();
        put_cstr(&mut args, &dir.display().to_string()).unwrap();

        let mut response = expect_success(execute(&shared, "fs_command", &args.freeze()));
        let listing = get_cstr(&mut response).expect("listing should decode");
        assert!(listing.contains("alpha.txt"));
        assert!(listing.contains("beta.txt"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn inform_channel_added_links_the_channel() {
        let shared = crate::client::test_shared();
        let channel = Channel::new(
            shared.registry.allocate_id(),
            ChannelDirection::Out,
            ChannelEncoding::ByteArray,
            ChannelBackend::Queue,
        )
        .shared();
        let id = shared.registry.register(channel.clone()).unwrap();
        assert!(!channel.lock().unwrap().is_linked);

        let mut args = BytesMut::new();
        put_u32(&mut args, id);
        expect_success(execute(&shared, "inform_channel_added", &args.freeze()));

        assert!(channel.lock().unwrap().is_linked);
        // Linking wakes the output loop so buffered data can flow.
        assert!(shared.output_ready.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn passthrough_stream_channel_serves_file_contents() {
        let shared = crate::client::test_shared();
        let dir = unique_temp_dir("passthrough");
        let path = dir.join("data.bin");
        std::fs::write(&path, b"wrapped bytes").unwrap();

        let mut args = BytesMut::new();
        put_cstr(&mut args, &path.display().to_string()).unwrap();
        put_u8(&mut args, 3); // open existing
        put_u8(&mut args, 1); // read
        let mut response = expect_success(execute(&shared, "fs_open_file", &args.freeze()));
        let handle = get_i32(&mut response).expect("handle should decode");
        assert!(handle >= 1);

        let mut args = BytesMut::new();
        put_i32(&mut args, handle);
        put_u8(&mut args, 1); // passthrough
        let mut response =
            expect_success(execute(&shared, "open_stream_channel", &args.freeze()));
        let channel_id = get_u32(&mut response).expect("channel id should decode");

        let channel = shared
            .registry
            .get(channel_id)
            .expect("stream channel should be registered");
        let mut channel = channel.lock().unwrap();
        assert!(channel.has_pending_output());
        assert_eq!(channel.dequeue_output().unwrap().as_ref(), b"wrapped bytes");
        // The handle stays in the table while wrapped.
        assert!(shared.streams.contains(handle));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn pumped_stream_channel_fills_its_queue() {
        let shared = crate::client::test_shared();
        let dir = unique_temp_dir("pumped");
        let path = dir.join("data.bin");
        std::fs::write(&path, b"pumped bytes").unwrap();

        let mut args = BytesMut::new();
        put_cstr(&mut args, &path.display().to_string()).unwrap();
        put_u8(&mut args, 3);
        put_u8(&mut args, 1);
        let mut response = expect_success(execute(&shared, "fs_open_file", &args.freeze()));
        let handle = get_i32(&mut response).expect("handle should decode");

        let mut args = BytesMut::new();
        put_i32(&mut args, handle);
        put_u8(&mut args, 0); // pump thread feeds the queue
        let mut response =
            expect_success(execute(&shared, "open_stream_channel", &args.freeze()));
        let channel_id = get_u32(&mut response).expect("channel id should decode");

        // The pump raises the work signal once it hits EOF.
        assert!(shared.work_ready.wait_timeout(Duration::from_secs(2)));
        let channel = shared
            .registry
            .get(channel_id)
            .expect("stream channel should be registered");
        let mut channel = channel.lock().unwrap();
        assert_eq!(channel.dequeue_output().unwrap().as_ref(), b"pumped bytes");
        assert!(channel.should_close);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn kill_proc_stops_a_running_child() {
        let shared = crate::client::test_shared();

        let mut args = BytesMut::new();
        put_u8(&mut args, 0); // no stdio channels
        put_cstr(&mut args, "sleep").unwrap();
        put_cstr(&mut args, "30").unwrap();
        let mut response = expect_success(execute(&shared, "create_proc", &args.freeze()));
        let pid = get_u32(&mut response).expect("pid should decode");
        let flag = get_u8(&mut response).expect("flag should decode");
        assert_ne!(pid, 0);
        assert_eq!(flag, 0);
        assert!(shared.procs.contains(pid));

        let mut args = BytesMut::new();
        put_u32(&mut args, pid);
        let mut response = expect_success(execute(&shared, "kill_proc", &args.freeze()));
        assert_eq!(get_u32(&mut response).unwrap(), pid);

        // The exit watcher notices the kill well before the child's
        // sleep would have finished.
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if shared.exited.lock().unwrap().contains(&pid) {
                break;
            }
            assert!(Instant::now() < deadline, "killed child was never reported");
            std::thread::sleep(Duration::from_millis(20));
        }

        // Reap so the test leaves no zombie behind.
        let record = shared.procs.remove(pid).expect("record should still exist");
        let _ = record.child.lock().unwrap().wait();
    }
}
