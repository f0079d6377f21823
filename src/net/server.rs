//! Relay run loop.
//!
//! # Responsibilities
//! - Compose the listener and connection registries with the external
//!   control-event source (signals, optional config watcher)
//! - Dispatch accepted connections to the connection registry
//! - Drive reconfiguration: configure() + reconcile() on reload
//!
//! # Design Decisions
//! - The run loop is the sole mutator of the listener registry; no locks
//! - A failed reload keeps the previous configuration in force and never
//!   disturbs listeners unaffected by the failing entry
//! - Terminate aborts relay tasks and closes all listeners synchronously

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{ListenSpec, RelayConfig};
use crate::lifecycle::signals::ControlEvent;
use crate::net::connection::ConnectionRegistry;
use crate::net::listener::{Accepted, BindError, ListenerRegistry};

/// Error type for applying a listener configuration.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Resolve(#[from] crate::net::endpoint::ResolveError),
    #[error(transparent)]
    Bind(#[from] BindError),
}

/// The relay server: both registries plus the channels feeding them.
pub struct RelayServer {
    listeners: ListenerRegistry,
    connections: ConnectionRegistry,
    accept_rx: mpsc::UnboundedReceiver<Accepted>,
    config_path: Option<PathBuf>,
    current: Arc<ArcSwap<RelayConfig>>,
}

enum Step {
    Ctrl(Option<ControlEvent>),
    Update(Option<RelayConfig>),
    Accepted(Option<Accepted>),
}

impl RelayServer {
    pub fn new(config: RelayConfig, config_path: Option<PathBuf>) -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            listeners: ListenerRegistry::new(accept_tx),
            connections: ConnectionRegistry::new(config.buffer_size, config.max_connections),
            accept_rx,
            config_path,
            current: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Handle onto the connection registry, e.g. for diagnostics.
    pub fn connections(&self) -> ConnectionRegistry {
        self.connections.clone()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Snapshot of the configuration currently in force.
    pub fn current_config(&self) -> Arc<RelayConfig> {
        self.current.load_full()
    }

    /// Apply listener specs: configure() + reconcile().
    ///
    /// A resolution failure reverts the NEW entries and leaves the
    /// running listeners untouched. A bind failure is returned after the
    /// reconcile pass has completed for all other entries.
    pub async fn apply(&mut self, specs: &[ListenSpec]) -> Result<(), ApplyError> {
        if let Err(e) = self.listeners.configure(specs).await {
            self.listeners.revert();
            return Err(e.into());
        }
        self.listeners.reconcile().await?;
        Ok(())
    }

    async fn reload(&mut self) {
        let Some(path) = self.config_path.clone() else {
            tracing::info!("ignoring reload request: no config file specified");
            return;
        };
        tracing::info!(path = ?path, "re-reading config file");
        match load_config(&path) {
            Ok(config) => self.apply_config(config).await,
            Err(e) => {
                tracing::error!(error = %e, "config reload failed, keeping current configuration");
            }
        }
    }

    async fn apply_config(&mut self, config: RelayConfig) {
        let current = self.current.load();
        if config.buffer_size != current.buffer_size {
            tracing::warn!("buffer-size change takes effect after restart");
        }
        if config.max_connections != current.max_connections {
            tracing::warn!("max-connections change takes effect after restart");
        }
        drop(current);

        match self.apply(&config.listen).await {
            Ok(()) => self.current.store(Arc::new(config)),
            Err(ApplyError::Resolve(e)) => {
                tracing::error!(error = %e, "reconfiguration failed, keeping current listeners");
            }
            Err(ApplyError::Bind(e)) => {
                // best-effort: the other listeners of the new config are live
                tracing::error!(error = %e, "reconfiguration completed with bind errors");
                self.current.store(Arc::new(config));
            }
        }
    }

    /// Run until a terminate event arrives or the control channel closes.
    pub async fn run(
        mut self,
        mut ctrl: mpsc::UnboundedReceiver<ControlEvent>,
        mut updates: Option<mpsc::UnboundedReceiver<RelayConfig>>,
    ) {
        tracing::info!("entering main loop");
        loop {
            let step = tokio::select! {
                event = ctrl.recv() => Step::Ctrl(event),
                config = recv_update(&mut updates) => Step::Update(config),
                accepted = self.accept_rx.recv() => Step::Accepted(accepted),
            };

            match step {
                Step::Ctrl(None) | Step::Ctrl(Some(ControlEvent::Shutdown)) => break,
                Step::Ctrl(Some(ControlEvent::Reload)) => self.reload().await,
                Step::Ctrl(Some(ControlEvent::DumpListeners)) => self.listeners.dump(),
                Step::Ctrl(Some(ControlEvent::DumpConnections)) => self.connections.dump(),
                Step::Update(Some(config)) => self.apply_config(config).await,
                Step::Update(None) => updates = None,
                Step::Accepted(Some(accepted)) => self.connections.initiate(accepted),
                // the registry keeps a sender alive, so this is unreachable
                // while the server exists; treat it as a stop regardless
                Step::Accepted(None) => break,
            }
        }

        self.connections.abort_all();
        self.listeners.clear();
        tracing::info!("main loop finished");
    }
}

async fn recv_update(
    updates: &mut Option<mpsc::UnboundedReceiver<RelayConfig>>,
) -> Option<RelayConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
