use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use super::{
    codec::{decode_command_body, encode_reply, FrameHeader, HEADER_LEN, STATUS_ERROR, STATUS_OK},
    types::{Address, CommandKind, RequestId},
};

/// Sparse memory image of a fake target process.
///
/// Memory is a set of non-overlapping regions; a read succeeds only when the
/// whole requested range lies inside a single region.
#[derive(Clone, Debug, Default)]
pub struct TargetMemory {
    regions: BTreeMap<Address, Vec<u8>>,
}

impl TargetMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `address`, replacing any region starting at the same address.
    pub fn write(&mut self, address: Address, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.regions.insert(address, bytes.as_ref().to_vec());
        self
    }

    pub fn write_c_string(&mut self, address: Address, s: &str) -> &mut Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.write(address, bytes)
    }

    fn region(&self, address: Address) -> Option<(Address, &[u8])> {
        let (start, bytes) = self.regions.range(..=address).next_back()?;
        let offset = usize::try_from(address - start).ok()?;
        (offset < bytes.len()).then(|| (*start, bytes.as_slice()))
    }

    pub fn read(&self, address: Address, length: u32) -> Option<Vec<u8>> {
        if length == 0 {
            return Some(Vec::new());
        }
        let (start, bytes) = self.region(address)?;
        let offset = (address - start) as usize;
        let end = offset.checked_add(length as usize)?;
        bytes.get(offset..end).map(<[u8]>::to_vec)
    }

    /// Bytes from `address` up to and including the first NUL.
    pub fn read_c_string(&self, address: Address) -> Option<Vec<u8>> {
        let (start, bytes) = self.region(address)?;
        let tail = &bytes[(address - start) as usize..];
        let end = tail.iter().position(|b| *b == 0)?;
        Some(tail[..=end].to_vec())
    }
}

#[derive(Clone, Debug)]
pub enum ReplyAction {
    /// Reply normally, but only after `Duration`.
    Delay(Duration),
    /// Never reply.
    Drop,
    /// Reply with only the first `usize` bytes of the real payload.
    Truncate(usize),
    /// Reply with an error status and the given message.
    Error(String),
}

/// Overrides how the mock answers commands addressed at `address`.
#[derive(Clone, Debug)]
pub struct ReplyOverride {
    pub address: Address,
    pub action: ReplyAction,
}

#[derive(Clone, Debug, Default)]
pub struct MockTargetConfig {
    pub memory: TargetMemory,
    pub overrides: Vec<ReplyOverride>,
}

/// A command as observed by the mock target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub request_id: RequestId,
    pub kind: CommandKind,
    /// Number of replies the mock had written when this command arrived.
    pub replies_sent_before: usize,
}

struct State {
    memory: Mutex<TargetMemory>,
    overrides: Vec<ReplyOverride>,
    received: Mutex<Vec<ReceivedCommand>>,
    replies_sent: AtomicUsize,
}

/// A tiny target-side debug server used for unit/integration testing.
///
/// It answers `ReadMemory` / `ReadString` from a [`TargetMemory`] image and can be
/// told to delay, drop, truncate or reject replies for specific addresses.
pub struct MockTargetServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

impl MockTargetServer {
    pub async fn spawn(memory: TargetMemory) -> std::io::Result<Self> {
        Self::spawn_with_config(MockTargetConfig {
            memory,
            ..MockTargetConfig::default()
        })
        .await
    }

    pub async fn spawn_with_config(config: MockTargetConfig) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let state = Arc::new(State {
            memory: Mutex::new(config.memory),
            overrides: config.overrides,
            received: Mutex::new(Vec::new()),
            replies_sent: AtomicUsize::new(0),
        });

        let task_shutdown = shutdown.clone();
        let task_state = state.clone();
        tokio::spawn(async move {
            let _ = run(listener, task_state, task_shutdown).await;
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn write_memory(&self, address: Address, bytes: impl AsRef<[u8]>) {
        self.state.memory.lock().await.write(address, bytes);
    }

    pub async fn received_commands(&self) -> Vec<ReceivedCommand> {
        self.state.received.lock().await.clone()
    }

    pub fn replies_sent(&self) -> usize {
        self.state.replies_sent.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockTargetServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    loop {
        let (socket, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            res = listener.accept() => res?,
        };
        let state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = handle_connection(socket, state, shutdown).await;
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (mut reader, writer) = socket.into_split();
    let writer = Arc::new(Mutex::new(writer));

    loop {
        let mut header = [0u8; HEADER_LEN];
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            res = reader.read_exact(&mut header) => { res?; }
        }
        let header = FrameHeader::parse(&header);
        let body_len = header
            .body_len(usize::MAX)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body).await?;

        let kind = match decode_command_body(header.code, &body) {
            Ok(kind) => kind,
            Err(err) => {
                let reply =
                    encode_reply(header.request_id, STATUS_ERROR, err.to_string().as_bytes());
                send(&writer, &state, reply).await?;
                continue;
            }
        };

        state.received.lock().await.push(ReceivedCommand {
            request_id: header.request_id,
            kind,
            replies_sent_before: state.replies_sent.load(Ordering::SeqCst),
        });

        let (status, mut payload) = {
            let memory = state.memory.lock().await;
            answer(&memory, &kind)
        };

        let action = state
            .overrides
            .iter()
            .find(|o| o.address == kind.address())
            .map(|o| o.action.clone());

        match action {
            None => {
                send(&writer, &state, encode_reply(header.request_id, status, &payload)).await?;
            }
            Some(ReplyAction::Drop) => {}
            Some(ReplyAction::Truncate(len)) => {
                payload.truncate(len);
                send(&writer, &state, encode_reply(header.request_id, status, &payload)).await?;
            }
            Some(ReplyAction::Error(message)) => {
                let reply = encode_reply(header.request_id, STATUS_ERROR, message.as_bytes());
                send(&writer, &state, reply).await?;
            }
            Some(ReplyAction::Delay(delay)) => {
                let writer = writer.clone();
                let state = state.clone();
                let reply = encode_reply(header.request_id, status, &payload);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = send(&writer, &state, reply).await;
                });
            }
        }
    }
}

fn answer(memory: &TargetMemory, kind: &CommandKind) -> (u8, Vec<u8>) {
    let bytes = match *kind {
        CommandKind::ReadMemory { address, length } => memory.read(address, length),
        CommandKind::ReadString { address } => memory.read_c_string(address),
    };
    match bytes {
        Some(bytes) => (STATUS_OK, bytes),
        None => (
            STATUS_ERROR,
            format!("address 0x{:x} is not mapped", kind.address()).into_bytes(),
        ),
    }
}

async fn send(
    writer: &Mutex<OwnedWriteHalf>,
    state: &State,
    reply: Vec<u8>,
) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(&reply).await?;
    state.replies_sent.fetch_add(1, Ordering::SeqCst);
    Ok(())
}
