//! Relay connection registry and per-connection state machine.
//!
//! # Responsibilities
//! - Open the outbound side of each relay (family-matched, optional
//!   source bind, TCP_NODELAY on both sides)
//! - Track connection state (Connecting → Connected → removed) and
//!   per-direction transfer counters
//! - Relay bytes bidirectionally with bounded buffering
//!
//! # Design Decisions
//! - One task per connection; the task owns both streams and both
//!   buffers, so teardown is the task returning and is always atomic
//! - Buffers are allocated only once the outbound connect succeeds
//! - A relay direction prefers flushing pending output over admitting
//!   new input, and stops reading while its buffer is full (backpressure)
//! - Orderly close and I/O errors take the identical removal path

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::AbortHandle;

use crate::net::buffer::RelayBuffer;
use crate::net::listener::Accepted;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Relay connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outbound connect still pending.
    Connecting,
    /// Both sides open, bytes flowing.
    Connected,
}

struct ConnectionEntry {
    state: ConnectionState,
    client: SocketAddr,
    client_fd: RawFd,
    peer_fd: Option<RawFd>,
    /// Bytes written toward the accept side (remote → client).
    received: Arc<AtomicU64>,
    /// Bytes written toward the remote side (client → remote).
    sent: Arc<AtomicU64>,
    abort: Option<AbortHandle>,
}

/// Tracks all open relay connections.
///
/// Shared with the relay tasks, which record their own lifecycle
/// transitions; the map is concurrent for that reason.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    buffer_size: usize,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(buffer_size: usize, max_connections: usize) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            buffer_size,
            max_connections,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn state_of(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|e| e.state)
    }

    /// Sum of the per-connection counters over all open connections:
    /// (bytes relayed toward clients, bytes relayed toward remotes).
    pub fn totals(&self) -> (u64, u64) {
        let mut received = 0;
        let mut sent = 0;
        for entry in self.connections.iter() {
            received += entry.received.load(Ordering::Relaxed);
            sent += entry.sent.load(Ordering::Relaxed);
        }
        (received, sent)
    }

    /// Register an accepted connection and spawn its relay task.
    ///
    /// Setup failures before the task starts drop the accepted stream and
    /// leave no registry entry behind.
    pub fn initiate(&self, accepted: Accepted) {
        if self.max_connections != 0 && self.connections.len() >= self.max_connections {
            tracing::warn!(peer = %accepted.peer, "connection limit reached, dropping client");
            return;
        }
        if let Err(e) = accepted.stream.set_nodelay(true) {
            tracing::error!(peer = %accepted.peer, error = %e, "error on set_nodelay(), not adding client");
            return;
        }

        let id = ConnectionId::new();
        self.connections.insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Connecting,
                client: accepted.peer,
                client_fd: accepted.stream.as_raw_fd(),
                peer_fd: None,
                received: Arc::new(AtomicU64::new(0)),
                sent: Arc::new(AtomicU64::new(0)),
                abort: None,
            },
        );

        let registry = self.clone();
        let handle = tokio::spawn(async move {
            registry.run_relay(id, accepted).await;
        });
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.abort = Some(handle.abort_handle());
        }
    }

    /// Remove a connection from the registry.
    pub fn remove(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Abort every relay task and clear the registry.
    pub fn abort_all(&self) {
        for entry in self.connections.iter() {
            if let Some(abort) = &entry.abort {
                abort.abort();
            }
        }
        self.connections.clear();
    }

    /// Log one line per connection: state, id, descriptors, counters.
    pub fn dump(&self) {
        for entry in self.connections.iter() {
            let state = match entry.state {
                ConnectionState::Connecting => '>',
                ConnectionState::Connected => 'c',
            };
            tracing::info!(
                "[{}] client {} ({}): fds {}/{}: {} bytes received, {} bytes sent",
                state,
                entry.key(),
                entry.client,
                entry.client_fd,
                entry.peer_fd.unwrap_or(-1),
                entry.received.load(Ordering::Relaxed),
                entry.sent.load(Ordering::Relaxed),
            );
        }
    }

    async fn run_relay(&self, id: ConnectionId, accepted: Accepted) {
        let Accepted {
            stream: client,
            peer,
            remote,
            source,
        } = accepted;

        let peer_stream = match connect_peer(remote, source).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::info!(client = %id, remote = %remote, error = %e, "error on connect(), removing client");
                self.remove(id);
                return;
            }
        };

        // promote to CONNECTED; buffers exist only from this point on
        let (received, sent) = {
            let Some(mut entry) = self.connections.get_mut(&id) else {
                return;
            };
            entry.state = ConnectionState::Connected;
            entry.peer_fd = Some(peer_stream.as_raw_fd());
            (entry.received.clone(), entry.sent.clone())
        };
        tracing::info!(client = %id, peer = %peer, remote = %remote, "successfully added client");

        let (client_rd, client_wr) = client.into_split();
        let (peer_rd, peer_wr) = peer_stream.into_split();
        let outbound = pump(client_rd, peer_wr, RelayBuffer::new(self.buffer_size), sent);
        let inbound = pump(peer_rd, client_wr, RelayBuffer::new(self.buffer_size), received);

        // either direction ending, orderly or not, tears down the whole relay
        let end = tokio::select! {
            r = outbound => r,
            r = inbound => r,
        };
        match end {
            Ok(()) => tracing::info!(client = %id, "connection closed, removing client"),
            Err(e) => tracing::info!(client = %id, error = %e, "relay error, removing client"),
        }
        self.remove(id);
        // both streams and both buffers drop together here
    }
}

/// Open the outbound side: family-matched socket, optional source bind,
/// non-blocking connect, Nagle disabled.
async fn connect_peer(
    remote: SocketAddr,
    source: Option<SocketAddr>,
) -> std::io::Result<TcpStream> {
    let socket = if remote.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(source) = source {
        socket.bind(source)?;
    }
    let stream = socket.connect(remote).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

enum Op {
    Wrote(usize),
    Read(usize),
}

/// Relay one direction until the source closes or either side errors.
///
/// At most one read or one write per loop turn; when both are possible
/// the write wins, draining backlog before admitting new bytes.
async fn pump(
    mut rd: OwnedReadHalf,
    mut wr: OwnedWriteHalf,
    mut buf: RelayBuffer,
    transferred: Arc<AtomicU64>,
) -> std::io::Result<()> {
    loop {
        let op = if buf.is_empty() {
            Op::Read(rd.read(buf.spare_mut()).await?)
        } else if buf.is_full() {
            // destination buffer full: reads stay suspended until a write drains it
            Op::Wrote(wr.write(buf.filled()).await?)
        } else {
            let (filled, spare) = buf.split_mut();
            tokio::select! {
                biased;
                res = wr.write(filled) => Op::Wrote(res?),
                res = rd.read(spare) => Op::Read(res?),
            }
        };

        match op {
            // orderly close takes the same removal path as an error
            Op::Read(0) => return Ok(()),
            Op::Read(n) => buf.advance(n),
            Op::Wrote(0) => return Err(std::io::ErrorKind::WriteZero.into()),
            Op::Wrote(n) => {
                transferred.fetch_add(n as u64, Ordering::Relaxed);
                buf.consume(n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn unreachable_remote_removes_connection() {
        // a port nothing listens on
        let closed = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let registry = ConnectionRegistry::new(1024, 0);

        let client = tokio::net::TcpStream::connect(local).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        registry.initiate(Accepted {
            stream,
            peer,
            remote: closed,
            source: None,
        });

        // the connect must fail and the CONNECTING entry disappear
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(registry.is_empty());
        drop(client);
    }

    #[tokio::test]
    async fn connection_limit_drops_excess_clients() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let registry = ConnectionRegistry::new(1024, 1);

        let backend = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = backend.local_addr().unwrap();

        let mut clients = Vec::new();
        for _ in 0..2 {
            clients.push(tokio::net::TcpStream::connect(local).await.unwrap());
            let (stream, peer) = listener.accept().await.unwrap();
            registry.initiate(Accepted {
                stream,
                peer,
                remote,
                source: None,
            });
        }
        assert_eq!(registry.len(), 1);
        drop(clients);
    }
}
