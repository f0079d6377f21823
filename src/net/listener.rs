//! Listener registry with hot, gapless reconfiguration.
//!
//! # Responsibilities
//! - Resolve listener specs and bind local endpoints
//! - Accept incoming TCP connections and hand them to the run loop
//! - Reconcile a new configuration onto existing listeners, reusing
//!   bound sockets for unchanged local endpoints
//!
//! # Design Decisions
//! - Lifecycle NEW → ACTIVE → ZOMBIE → removed; reconciliation marks all
//!   active listeners zombie, revives the ones whose endpoint survives by
//!   transferring the bound socket, and sweeps the rest
//! - Reconciliation is best-effort: a bind failure marks that listener
//!   zombie and is recorded, but never aborts the pass or disturbs others
//! - Accept failures are logged and leave the listener active

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::schema::ListenSpec;
use crate::net::endpoint::{self, ResolveError};

const ACCEPT_BACKLOG: u32 = 1024;

/// Error type for listener activation.
#[derive(Debug, thiserror::Error)]
#[error("error binding {local}: {source}")]
pub struct BindError {
    pub local: SocketAddr,
    #[source]
    pub source: std::io::Error,
}

/// Listener lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    New,
    Active,
    Zombie,
}

impl ListenerState {
    fn as_char(self) -> char {
        match self {
            ListenerState::New => 'n',
            ListenerState::Active => 'a',
            ListenerState::Zombie => 'z',
        }
    }
}

/// An accepted connection together with the relay endpoints of the
/// listener that accepted it.
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub remote: SocketAddr,
    pub source: Option<SocketAddr>,
}

/// A single listening endpoint forwarding to a fixed remote endpoint.
pub struct Listener {
    socket: Option<Arc<TcpListener>>,
    task: Option<JoinHandle<()>>,
    local: SocketAddr,
    remote: SocketAddr,
    source: Option<SocketAddr>,
    state: ListenerState,
}

impl Listener {
    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Owns all listeners; mutated only by the run loop.
pub struct ListenerRegistry {
    listeners: Vec<Listener>,
    accept_tx: mpsc::UnboundedSender<Accepted>,
}

impl ListenerRegistry {
    pub fn new(accept_tx: mpsc::UnboundedSender<Accepted>) -> Self {
        Self {
            listeners: Vec::new(),
            accept_tx,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Resolve listener specs and append one NEW listener per resolved
    /// local address.
    ///
    /// On error the entries appended so far stay in the registry; the
    /// caller decides between `revert()` and retrying.
    pub async fn configure(&mut self, specs: &[ListenSpec]) -> Result<(), ResolveError> {
        for spec in specs {
            let local_port = spec.local_port.ok_or(ResolveError::MissingLocalPort)?;
            let remote_addr = spec
                .remote_addr
                .as_deref()
                .ok_or(ResolveError::MissingRemoteAddr)?;
            let remote_port = spec.remote_port.ok_or(ResolveError::MissingRemotePort)?;

            let remote =
                endpoint::resolve_remote(remote_addr, remote_port, spec.remote_family).await?;
            let source = match &spec.source_addr {
                Some(addr) => Some(endpoint::resolve_source(addr, spec.remote_family).await?),
                None => None,
            };
            let locals =
                endpoint::resolve_local(spec.local_addr.as_deref(), local_port, spec.local_family)
                    .await?;

            for local in locals {
                self.listeners.push(Listener {
                    socket: None,
                    task: None,
                    local,
                    remote,
                    source,
                    state: ListenerState::New,
                });
            }
        }
        Ok(())
    }

    /// Remove every listener still in state NEW.
    pub fn revert(&mut self) {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.state != ListenerState::New);
        tracing::debug!(count = before - self.listeners.len(), "new listeners reverted");
    }

    /// Map the NEW entries from the latest `configure()` onto the running
    /// set of listeners.
    ///
    /// Active listeners whose local endpoint reappears keep their bound
    /// socket, so the address never stops accepting. Returns the first
    /// bind error encountered; the pass always runs to completion.
    pub async fn reconcile(&mut self) -> Result<(), BindError> {
        for l in &mut self.listeners {
            if l.state == ListenerState::Active {
                l.state = ListenerState::Zombie;
            }
        }

        let mut first_err: Option<BindError> = None;
        for i in 0..self.listeners.len() {
            if self.listeners[i].state != ListenerState::New {
                continue;
            }
            let local = self.listeners[i].local;

            if let Some(z) = self.find_zombie(local) {
                let socket = self.listeners[z].socket.take();
                if let Some(task) = self.listeners[z].task.take() {
                    task.abort();
                }
                let l = &mut self.listeners[i];
                l.socket = socket;
                l.state = ListenerState::Active;
                tracing::info!(
                    local = %l.local,
                    remote = %l.remote,
                    source = ?l.source,
                    "reusing listener socket"
                );
            } else {
                match bind_listener(local) {
                    Ok(socket) => {
                        let l = &mut self.listeners[i];
                        l.socket = Some(Arc::new(socket));
                        l.state = ListenerState::Active;
                        tracing::info!(
                            local = %l.local,
                            remote = %l.remote,
                            source = ?l.source,
                            "listening"
                        );
                    }
                    Err(e) => {
                        self.listeners[i].state = ListenerState::Zombie;
                        tracing::error!(local = %local, error = %e, "failed to activate listener");
                        if first_err.is_none() {
                            first_err = Some(BindError { local, source: e });
                        }
                        continue;
                    }
                }
            }

            self.spawn_accept(i);
        }

        let before = self.listeners.len();
        self.listeners.retain(|l| l.state != ListenerState::Zombie);
        tracing::debug!(
            count = before - self.listeners.len(),
            "listener zombies removed"
        );

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn find_zombie(&self, local: SocketAddr) -> Option<usize> {
        self.listeners
            .iter()
            .position(|l| l.state == ListenerState::Zombie && l.local == local)
    }

    fn spawn_accept(&mut self, i: usize) {
        let l = &self.listeners[i];
        let Some(socket) = l.socket.clone() else {
            return;
        };
        let (local, remote, source) = (l.local, l.remote, l.source);
        let tx = self.accept_tx.clone();

        let handle = tokio::spawn(async move {
            loop {
                // one accept per readiness; a failure leaves the listener active
                match socket.accept().await {
                    Ok((stream, peer)) => {
                        tracing::info!(peer = %peer, local = %local, "new client");
                        if tx
                            .send(Accepted {
                                stream,
                                peer,
                                remote,
                                source,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(local = %local, error = %e, "error on accept()");
                    }
                }
            }
        });
        self.listeners[i].task = Some(handle);
    }

    /// Look up a listener by its local endpoint.
    pub fn find(&self, local: SocketAddr) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.local == local)
    }

    /// Remove (and close) the listener bound to `local`, if any.
    pub fn remove(&mut self, local: SocketAddr) {
        self.listeners.retain(|l| l.local != local);
    }

    /// Raw descriptor of the socket serving `local`, for diagnostics and
    /// reuse verification.
    pub fn descriptor_of(&self, local: SocketAddr) -> Option<RawFd> {
        self.find(local)
            .and_then(|l| l.socket.as_ref())
            .map(|s| s.as_raw_fd())
    }

    /// Drop all listeners, closing their sockets and stopping their
    /// accept tasks.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Log one line per listener: state, descriptor, endpoints.
    pub fn dump(&self) {
        for l in &self.listeners {
            let fd = l.socket.as_ref().map(|s| s.as_raw_fd()).unwrap_or(-1);
            match l.source {
                Some(source) => tracing::info!(
                    "[{}] listener #{}: {} -> {} with source {}",
                    l.state.as_char(),
                    fd,
                    l.local,
                    l.remote,
                    source
                ),
                None => tracing::info!(
                    "[{}] listener #{}: {} -> {}",
                    l.state.as_char(),
                    fd,
                    l.local,
                    l.remote
                ),
            }
        }
    }
}

fn bind_listener(local: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if local.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(local)?;
    socket.listen(ACCEPT_BACKLOG)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(local_port: u16, remote_port: u16) -> ListenSpec {
        ListenSpec {
            local_addr: Some("127.0.0.1".into()),
            local_port: Some(local_port),
            remote_addr: Some("127.0.0.1".into()),
            remote_port: Some(remote_port),
            ..Default::default()
        }
    }

    fn registry() -> ListenerRegistry {
        let (tx, _rx) = mpsc::unbounded_channel();
        ListenerRegistry::new(tx)
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn configure_reconcile_activates_one_listener_per_endpoint() {
        let mut reg = registry();
        let p1 = free_port();
        let p2 = free_port();
        reg.configure(&[spec(p1, 19001), spec(p2, 19001)])
            .await
            .unwrap();
        reg.reconcile().await.unwrap();

        assert_eq!(reg.len(), 2);
        for port in [p1, p2] {
            let local: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
            let l = reg.find(local).unwrap();
            assert_eq!(l.state(), ListenerState::Active);
            assert!(reg.descriptor_of(local).is_some());
        }
    }

    #[tokio::test]
    async fn unchanged_endpoint_keeps_its_descriptor() {
        let mut reg = registry();
        let port = free_port();
        reg.configure(&[spec(port, 19001)]).await.unwrap();
        reg.reconcile().await.unwrap();

        let local: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let fd_before = reg.descriptor_of(local).unwrap();

        reg.configure(&[spec(port, 19001)]).await.unwrap();
        reg.reconcile().await.unwrap();

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.descriptor_of(local).unwrap(), fd_before);
    }

    #[tokio::test]
    async fn removed_endpoint_is_swept() {
        let mut reg = registry();
        let p1 = free_port();
        let p2 = free_port();
        reg.configure(&[spec(p1, 19001), spec(p2, 19001)])
            .await
            .unwrap();
        reg.reconcile().await.unwrap();
        assert_eq!(reg.len(), 2);

        reg.configure(&[spec(p1, 19001)]).await.unwrap();
        reg.reconcile().await.unwrap();

        assert_eq!(reg.len(), 1);
        let gone: SocketAddr = format!("127.0.0.1:{}", p2).parse().unwrap();
        assert!(reg.find(gone).is_none());

        // the aborted accept task must release its socket handle before
        // the port frees up
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        std::net::TcpListener::bind(gone).unwrap();
    }

    #[tokio::test]
    async fn reuse_updates_remote_endpoint() {
        let mut reg = registry();
        let port = free_port();
        reg.configure(&[spec(port, 19001)]).await.unwrap();
        reg.reconcile().await.unwrap();

        reg.configure(&[spec(port, 19002)]).await.unwrap();
        reg.reconcile().await.unwrap();

        let local: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        assert_eq!(reg.find(local).unwrap().remote().port(), 19002);
    }

    #[tokio::test]
    async fn missing_fields_fail_configure() {
        let mut reg = registry();
        let bad = ListenSpec {
            local_port: Some(free_port()),
            ..Default::default()
        };
        let err = reg.configure(&[bad]).await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingRemoteAddr));

        let none = ListenSpec::default();
        let err = reg.configure(&[none]).await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingLocalPort));
    }

    #[tokio::test]
    async fn revert_drops_only_new_entries() {
        let mut reg = registry();
        let p1 = free_port();
        reg.configure(&[spec(p1, 19001)]).await.unwrap();
        reg.reconcile().await.unwrap();

        // a failed configure leaves entries appended so far in state NEW
        let p2 = free_port();
        let bad = ListenSpec {
            local_port: Some(free_port()),
            remote_addr: Some("127.0.0.1".into()),
            ..Default::default()
        };
        assert!(reg.configure(&[spec(p2, 19001), bad]).await.is_err());
        assert_eq!(reg.len(), 2);

        reg.revert();
        assert_eq!(reg.len(), 1);
        let kept: SocketAddr = format!("127.0.0.1:{}", p1).parse().unwrap();
        assert_eq!(reg.find(kept).unwrap().state(), ListenerState::Active);
    }

    #[tokio::test]
    async fn bind_conflict_is_isolated() {
        // occupy a port so the bind must fail
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken = blocker.local_addr().unwrap().port();
        let good = free_port();

        let mut reg = registry();
        reg.configure(&[spec(taken, 19001), spec(good, 19001)])
            .await
            .unwrap();
        let err = reg.reconcile().await.unwrap_err();
        assert_eq!(err.local.port(), taken);

        // the failing entry was swept, the other listener is active
        assert_eq!(reg.len(), 1);
        let local: SocketAddr = format!("127.0.0.1:{}", good).parse().unwrap();
        assert_eq!(reg.find(local).unwrap().state(), ListenerState::Active);
    }

    #[tokio::test]
    async fn remove_closes_listener() {
        let mut reg = registry();
        let port = free_port();
        reg.configure(&[spec(port, 19001)]).await.unwrap();
        reg.reconcile().await.unwrap();

        let local: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        reg.remove(local);
        assert!(reg.is_empty());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        std::net::TcpListener::bind(local).unwrap();
    }
}
