//! Multiplexed JSON-RPC transport over a pair of byte streams.
//!
//! A single reader task owns the read half. It parses one JSON message per
//! line and resolves the pending call whose ID matches, so responses may
//! arrive in any order. Callers never touch the read half; they register a
//! oneshot slot, write their request through the shared writer, and wait.
//!
//! Pending slots live in a `std::sync::Mutex` so a cancelled call can remove
//! its own slot from `Drop` without an executor.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};

/// Largest single message accepted from a tool process (4 MiB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<Mutex<BoxedWriter>>;
type Slot = oneshot::Sender<Result<JsonRpcResponse>>;

const OPEN: u8 = 0;
const CLOSED: u8 = 1;
const BROKEN: u8 = 2;

/// Lifecycle of a transport. `Closed` and `Broken` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Open,
    /// The peer went away (EOF or write failure).
    Closed,
    /// The peer sent something that is not valid JSON-RPC for this session.
    Broken,
}

/// How an incoming frame should be dispatched.
#[derive(Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `id`, no `method`: answers one of our requests.
    Response,
    /// Has `id` and `method`: the tool process is asking us something.
    IncomingRequest,
    /// Has `method`, no `id`.
    Notification,
    /// Neither a usable `id` nor a `method`.
    Invalid,
}

/// Classify a JSON-RPC message by inspecting its `id` and `method` fields.
pub fn classify_message(json: &Value) -> MessageKind {
    let has_id = json.get("id").is_some_and(|id| !id.is_null());
    let has_method = json.get("method").and_then(Value::as_str).is_some();

    match (has_id, has_method) {
        (true, true) => MessageKind::IncomingRequest,
        (true, false) => MessageKind::Response,
        (false, true) => MessageKind::Notification,
        (false, false) => MessageKind::Invalid,
    }
}

struct Shared {
    pending: StdMutex<HashMap<i64, Slot>>,
    next_id: AtomicI64,
    state: AtomicU8,
    broken_reason: StdMutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            state: AtomicU8::new(OPEN),
            broken_reason: StdMutex::new(None),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<i64, Slot>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> TransportState {
        match self.state.load(Ordering::SeqCst) {
            OPEN => TransportState::Open,
            CLOSED => TransportState::Closed,
            _ => TransportState::Broken,
        }
    }

    fn broken_reason(&self) -> String {
        self.broken_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| "transport broken".to_string())
    }

    fn check_open(&self) -> Result<()> {
        match self.state() {
            TransportState::Open => Ok(()),
            TransportState::Closed => Err(Error::ProcessExited),
            TransportState::Broken => Err(Error::Protocol(self.broken_reason())),
        }
    }

    fn fail_all(&self, make_error: impl Fn() -> Error) {
        let drained: Vec<Slot> = self.pending().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            let _ = slot.send(Err(make_error()));
        }
    }

    fn close(&self) {
        let _ = self
            .state
            .compare_exchange(OPEN, CLOSED, Ordering::SeqCst, Ordering::SeqCst);
        self.fail_all(|| Error::ProcessExited);
    }

    fn break_with(&self, reason: String) {
        *self.broken_reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.clone());
        self.state.store(BROKEN, Ordering::SeqCst);
        self.fail_all(|| Error::Protocol(reason.clone()));
    }

    /// An ID below the counter was issued by us; its caller is gone.
    fn was_issued(&self, id: i64) -> bool {
        id > 0 && id < self.next_id.load(Ordering::SeqCst)
    }
}

/// Removes a pending slot when its call finishes, times out, or is dropped.
struct SlotGuard<'a> {
    shared: &'a Shared,
    id: i64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

/// JSON-RPC client multiplexing concurrent calls over one stream pair.
pub struct RpcTransport {
    shared: Arc<Shared>,
    writer: SharedWriter,
    reader: JoinHandle<()>,
}

impl RpcTransport {
    /// Start the reader task over `reader` and serialize writes into `writer`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared::new());
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));

        let reader = tokio::spawn(reader_loop(
            BufReader::new(reader),
            Arc::clone(&shared),
            Arc::clone(&writer),
        ));

        Self {
            shared,
            writer,
            reader,
        }
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// Send a request and wait up to `timeout` for the response with its ID.
    ///
    /// Dropping the returned future releases the pending slot; a response
    /// that arrives afterwards is discarded by the reader.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.shared.check_open()?;

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);
        let _slot = SlotGuard {
            shared: &self.shared,
            id,
        };

        // The reader may have failed all slots between the check and the insert.
        self.shared.check_open()?;

        let request = JsonRpcRequest::new(id, method).with_params(params);
        debug!(id, method, "sending request");
        write_message(&self.writer, &request)
            .await
            .map_err(|e| self.write_failed(e))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome?.into_result()?),
            Ok(Err(_)) => Err(self.shared.check_open().err().unwrap_or(Error::ProcessExited)),
            Err(_) => {
                debug!(id, method, ?timeout, "request timed out");
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.shared.check_open()?;

        let mut notification = JsonRpcNotification::new(method);
        notification.params = params;
        write_message(&self.writer, &notification)
            .await
            .map_err(|e| self.write_failed(e))
    }

    /// Stop reading and fail every waiting call with `ProcessExited`.
    pub fn close(&self) {
        self.reader.abort();
        self.shared.close();
    }

    fn write_failed(&self, err: Error) -> Error {
        match err {
            Error::Io(e)
                if matches!(
                    e.kind(),
                    ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof
                ) =>
            {
                debug!("write to tool process failed: {e}");
                self.shared.close();
                Error::ProcessExited
            }
            other => other,
        }
    }
}

impl Drop for RpcTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_message(writer: &SharedWriter, message: &impl Serialize) -> Result<()> {
    let mut line = serde_json::to_string(message)?;
    trace!("-> {line}");
    line.push('\n');

    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn reader_loop<R>(mut reader: BufReader<R>, shared: Arc<Shared>, writer: SharedWriter)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        // One byte past the limit so a full-size message can keep its newline.
        let mut limited = (&mut reader).take(MAX_MESSAGE_SIZE as u64 + 1);
        match limited.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("tool process closed its output");
                shared.close();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("read from tool process failed: {e}");
                shared.close();
                return;
            }
        }

        if buf.len() > MAX_MESSAGE_SIZE && buf.last() != Some(&b'\n') {
            let reason = Error::OutputTooLarge {
                size: buf.len(),
                max: MAX_MESSAGE_SIZE,
            }
            .to_string();
            warn!("{reason}");
            shared.break_with(reason);
            return;
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!("tool process wrote non UTF-8 output");
                shared.break_with(format!("invalid output: {e}"));
                return;
            }
        };

        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        trace!("<- {message}");

        if let Err(reason) = dispatch(message, &shared, &writer) {
            warn!("protocol error from tool process: {reason}");
            shared.break_with(reason);
            return;
        }
    }
}

fn dispatch(
    message: &str,
    shared: &Shared,
    writer: &SharedWriter,
) -> std::result::Result<(), String> {
    let value: Value =
        serde_json::from_str(message).map_err(|e| format!("invalid JSON from tool process: {e}"))?;

    match classify_message(&value) {
        MessageKind::Response => {
            let response: JsonRpcResponse =
                serde_json::from_value(value).map_err(|e| format!("malformed response: {e}"))?;
            let Some(id) = response.id.as_number() else {
                return Err(format!("response with foreign id {:?}", response.id));
            };

            let slot = shared.pending().remove(&id);
            match slot {
                Some(slot) => {
                    // The caller may have been cancelled after we removed the slot.
                    let _ = slot.send(Ok(response));
                }
                None if shared.was_issued(id) => {
                    debug!(id, "discarding late response");
                }
                None => return Err(format!("response for id {id} that was never issued")),
            }
        }
        MessageKind::IncomingRequest => {
            let method = value
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let id: RequestId = serde_json::from_value(value["id"].clone())
                .map_err(|e| format!("request with invalid id: {e}"))?;
            debug!(method, "rejecting request from tool process");

            let reply = JsonRpcErrorResponse::method_not_found(id, &method);
            let writer = Arc::clone(writer);
            tokio::spawn(async move {
                if let Err(e) = write_message(&writer, &reply).await {
                    debug!("failed to reject request: {e}");
                }
            });
        }
        MessageKind::Notification => {
            let method = value.get("method").and_then(Value::as_str).unwrap_or_default();
            trace!(method, "ignoring notification");
        }
        MessageKind::Invalid => {
            return Err("message has neither id nor method".to_string());
        }
    }

    Ok(())
}
