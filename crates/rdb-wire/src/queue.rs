use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use super::{
    codec::{decode_reply, encode_command, FrameHeader, HEADER_LEN},
    listeners::{ListenerId, ListenerSet, Subscription},
    types::{Address, Command, CommandFailure, CommandKind, RequestId, Result, WireError},
};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
    /// Largest frame (header included) accepted from the target.
    pub max_frame_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

/// In-flight commands by request id. `None` once the connection is closed, so
/// nothing can be registered after the final round of failures.
type PendingMap = Option<HashMap<RequestId, Command>>;

struct Inner {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<PendingMap>,
    listeners: Arc<ListenerSet<Command>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    config: QueueConfig,
}

impl Inner {
    /// Settle a pending command with a reply from the target and notify listeners.
    fn complete(&self, request_id: RequestId, status: u8, body: Vec<u8>) {
        let Some(mut command) = self.take_pending(request_id) else {
            tracing::trace!(
                target: "rdb.wire",
                request_id,
                "discarding reply for a command that is no longer pending"
            );
            return;
        };

        let settled = decode_reply(command.kind(), status, body);
        if let Err(err) = command.settle(settled) {
            tracing::warn!(
                target: "rdb.wire",
                request_id,
                error = %err,
                "dropping duplicate settle"
            );
            return;
        }
        self.notify(command);
    }

    fn take_pending(&self, request_id: RequestId) -> Option<Command> {
        self.pending.lock().as_mut()?.remove(&request_id)
    }

    fn notify(&self, command: Command) {
        let delivered = self.listeners.dispatch(&command);
        if delivered == 0 {
            tracing::trace!(
                target: "rdb.wire",
                request_id = command.request_id(),
                "no listener registered for completed command"
            );
        }
    }

    /// Tear down the connection and fail everything still in flight.
    ///
    /// Failures are dispatched before the shutdown token fires, so a waiter woken
    /// by the token always finds its command's failure already queued.
    fn close(&self, reason: Option<String>) {
        let pending = self.pending.lock().take().unwrap_or_default();
        if let Some(reason) = reason.as_deref() {
            tracing::debug!(
                target: "rdb.wire",
                reason,
                pending = pending.len(),
                "target connection terminated"
            );
        }

        let mut pending: Vec<_> = pending.into_values().collect();
        pending.sort_by_key(Command::request_id);
        for mut command in pending {
            if command.fail(CommandFailure::ConnectionClosed).is_ok() {
                self.notify(command);
            }
        }

        self.shutdown.cancel();
    }
}

/// Single point of command submission and reply dispatch for one target connection.
///
/// Submission never blocks: the encoded frame is handed to a writer task and the
/// request id is returned immediately. Replies are read by a background task,
/// matched against the pending registry, and broadcast to every registered
/// [`Listener`] in arrival order.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, QueueConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: QueueConfig) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| WireError::ConnectTimeout)??;
        let _ = stream.set_nodelay(true);
        tracing::debug!(target: "rdb.wire", %addr, "connected to target");
        Ok(Self::from_stream(stream, config))
    }

    /// Run the queue over an already established stream (TCP, pipe, in-memory duplex).
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<S>(stream: S, config: QueueConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outgoing, frames) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            outgoing,
            pending: Mutex::new(Some(HashMap::new())),
            listeners: ListenerSet::new(),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone()));
        tokio::spawn(write_loop(writer, frames, inner.clone()));

        Self { inner }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn shutdown(&self) {
        self.inner.close(Some("shutdown requested".to_string()));
    }

    /// A token that is cancelled when the queue shuts down, either explicitly via
    /// [`CommandQueue::shutdown`] or because the target connection went away.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
    }

    /// Queue `kind` for transmission and return its freshly assigned request id.
    ///
    /// Register a [`Listener`] *before* submitting, otherwise a fast reply can be
    /// dispatched before anyone is listening for it.
    pub fn submit(&self, kind: CommandKind) -> Result<RequestId> {
        let request_id = {
            let mut pending = self.inner.pending.lock();
            let Some(pending) = pending.as_mut() else {
                return Err(WireError::NotConnected);
            };
            let request_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            pending.insert(request_id, Command::new(request_id, kind));
            request_id
        };

        let frame = encode_command(request_id, &kind);
        if self.inner.outgoing.send(frame).is_err() {
            self.inner.take_pending(request_id);
            return Err(WireError::NotConnected);
        }

        tracing::trace!(target: "rdb.wire", request_id, ?kind, "submitted command");
        Ok(request_id)
    }

    pub fn register_listener(&self) -> Listener {
        Listener {
            subscription: self.inner.listeners.register(),
            inner: self.inner.clone(),
        }
    }

    /// Unregister a listener by id. Commands it was waiting for stay pending; their
    /// replies go to the remaining listeners and are dropped if there are none.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().as_ref().map_or(0, HashMap::len)
    }

    /// Submit `kind` and wait for its completion using the configured reply timeout.
    pub async fn execute(&self, kind: CommandKind) -> Result<Command> {
        let mut listener = self.register_listener();
        let request_id = self.submit(kind)?;
        listener
            .wait_for(request_id, self.inner.config.reply_timeout)
            .await
    }

    pub async fn read_memory(&self, address: Address, length: u32) -> Result<Vec<u8>> {
        let command = self
            .execute(CommandKind::ReadMemory { address, length })
            .await?;
        Ok(command.bytes()?.to_vec())
    }

    pub async fn read_string(&self, address: Address) -> Result<String> {
        let command = self.execute(CommandKind::ReadString { address }).await?;
        Ok(command.string()?.to_owned())
    }
}

/// A registered observer of command completions.
///
/// Every completed or failed command is delivered to every listener; use
/// [`Listener::wait_for`] to pick out a particular request. Dropping the listener
/// removes it from the queue.
pub struct Listener {
    subscription: Subscription<Command>,
    inner: Arc<Inner>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.subscription.id()
    }

    /// A settled command that was already delivered, without waiting.
    pub fn try_next(&mut self) -> Option<Command> {
        self.subscription.try_recv()
    }

    /// Next settled command, or `None` once the listener was removed.
    pub async fn next(&mut self) -> Option<Command> {
        self.subscription.recv().await
    }

    /// Wait for the completion of `request_id`, ignoring every other command.
    ///
    /// On timeout the command is dropped from the pending registry so a late reply
    /// is treated as an orphan.
    pub async fn wait_for(&mut self, request_id: RequestId, timeout: Duration) -> Result<Command> {
        let shutdown = self.inner.shutdown.clone();
        let wait = async {
            loop {
                tokio::select! {
                    biased;
                    command = self.subscription.recv() => match command {
                        Some(command) if command.request_id() == request_id => return Ok(command),
                        Some(_) => continue,
                        None => return Err(WireError::Cancelled),
                    },
                    _ = shutdown.cancelled() => {
                        // Drain failures that were dispatched while closing.
                        while let Some(command) = self.subscription.try_recv() {
                            if command.request_id() == request_id {
                                return Ok(command);
                            }
                        }
                        return Err(WireError::ConnectionClosed);
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_elapsed) => {
                self.inner.take_pending(request_id);
                tracing::debug!(target: "rdb.wire", request_id, ?timeout, "reply timed out");
                Err(WireError::Timeout { request_id })
            }
        }
    }
}

async fn read_loop<R>(mut reader: R, inner: Arc<Inner>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let mut header = [0u8; HEADER_LEN];
        let header_read = tokio::select! {
            _ = inner.shutdown.cancelled() => break None,
            res = reader.read_exact(&mut header) => res,
        };
        if let Err(err) = header_read {
            break Some(format!("read failed: {err}"));
        }

        let header = FrameHeader::parse(&header);
        let body_len = match header.body_len(inner.config.max_frame_len) {
            Ok(len) => len,
            Err(err) => break Some(err.to_string()),
        };

        let mut body = vec![0u8; body_len];
        let body_read = tokio::select! {
            _ = inner.shutdown.cancelled() => break None,
            res = reader.read_exact(&mut body) => res,
        };
        if let Err(err) = body_read {
            break Some(format!("read failed: {err}"));
        }

        if !header.is_reply() {
            // The target never sends commands of its own; ignore them.
            tracing::trace!(
                target: "rdb.wire",
                request_id = header.request_id,
                code = header.code,
                "ignoring non-reply packet from target"
            );
            continue;
        }

        inner.complete(header.request_id, header.code, body);
    };

    inner.close(reason);
}

async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    inner: Arc<Inner>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else { break };

        if let Err(err) = writer.write_all(&frame).await {
            inner.close(Some(format!("write failed: {err}")));
            break;
        }
    }

    let _ = writer.shutdown().await;
}
