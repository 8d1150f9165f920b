//! TCP ingest server lifecycle.
//!
//! Owns the shared batch context and the accept loop, and coordinates
//! shutdown: stop the acceptor first, then unblock and drain every live
//! session, and only then release the shared context.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::batch::{BatchHandle, Batcher};
use crate::config::Config;
use crate::registry::Registry;
use crate::session;

/// Server instance
pub struct Server {
    config: Config,
    batcher: Arc<dyn Batcher>,
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
    shared: Option<Arc<BatchHandle>>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a new server instance. Nothing is bound until [`Server::start`].
    pub fn new(config: Config, batcher: Arc<dyn Batcher>) -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);

        Server {
            config,
            batcher,
            registry: Arc::new(Registry::new()),
            shutdown_tx,
            shared: None,
            acceptor: None,
        }
    }

    /// Open the shared batch context, bind the listen port, and start
    /// accepting connections. Returns the bound address (port 0 in the
    /// config picks an ephemeral port).
    pub async fn start(&mut self) -> io::Result<SocketAddr> {
        let shared = self
            .batcher
            .open(self.config.bulk_size)
            .map(Arc::new)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "accumulator refused shared context")
            })?;

        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        let addr = listener.local_addr()?;
        info!(address = %addr, bulk_size = self.config.bulk_size, "server listening");

        let acceptor = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            Arc::clone(&self.batcher),
            self.config.bulk_size,
            Arc::clone(&self.registry),
            self.shutdown_tx.clone(),
        ));

        self.shared = Some(shared);
        self.acceptor = Some(acceptor);
        Ok(addr)
    }

    /// Stop accepting, unblock and drain every live session, then release
    /// the shared batch context.
    ///
    /// Join errors are swallowed; shutdown is best-effort and always runs to
    /// completion. Safe to call when the server never started.
    pub async fn stop(&mut self) {
        info!("stopping server");
        // The signaled state persists, so even a session that subscribes
        // after this send observes it. send_replace never depends on a
        // receiver still listening.
        self.shutdown_tx.send_replace(true);

        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.await;
        }

        while let Some(task) = self.registry.pop() {
            debug!("waiting for session to finish");
            let _ = task.await;
        }

        // Every session task has exited and dropped its clone, so this is
        // the last reference and the shared context closes here.
        self.shared = None;
        info!("server stopped");
    }

    /// Number of currently connected clients.
    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<BatchHandle>,
    batcher: Arc<dyn Batcher>,
    capacity: usize,
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
) {
    let mut shutdown = shutdown_tx.subscribe();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let id = registry.insert();
                debug!(session = id, %peer, "new client connected");

                let task = tokio::spawn(session::run(
                    id,
                    stream,
                    Arc::clone(&shared),
                    Arc::clone(&batcher),
                    capacity,
                    Arc::clone(&registry),
                    shutdown_tx.subscribe(),
                ));
                registry.attach(id, task);
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }

    debug!("accept loop stopped");
}
