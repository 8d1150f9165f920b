//! Per-connection ingest session.
//!
//! Each accepted socket gets its own task running a read/split/route/feed
//! loop: bytes accumulate in a buffer, complete passes are split into command
//! tokens, and every token is routed to either the server-wide shared batch
//! context or this connection's private one. The protocol is receive-only;
//! the session never writes to the socket.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::batch::{BatchHandle, Batcher};
use crate::protocol::{split_commands, BlockRouter, Route};
use crate::registry::{Registry, SessionId};

/// Read buffer size
const BUFFER_SIZE: usize = 512;

enum Exit {
    Disconnected,
    Shutdown,
}

/// Run one session to completion.
///
/// Returns when the peer disconnects, the read fails, or the shutdown signal
/// arrives. On disconnect the session deregisters itself; when unblocked by
/// shutdown it leaves its registry entry in place so the lifecycle drain can
/// await this task through it. Either way the private batch context is
/// released exactly once (by drop).
pub async fn run(
    id: SessionId,
    mut stream: TcpStream,
    shared: Arc<BatchHandle>,
    batcher: Arc<dyn Batcher>,
    capacity: usize,
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) {
    // The reference tolerates a failed private allocation: block-routed
    // commands are then dropped instead of killing the connection.
    let private = batcher.open(capacity);
    if private.is_none() {
        warn!(session = id, "no private batch context; block commands will be dropped");
    }

    let mut router = BlockRouter::new();
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    let exit = loop {
        // A receiver subscribed after the signal was sent gets no change
        // notification, so a session accepted while stop is underway must
        // check the current value before parking in a read.
        if *shutdown.borrow() {
            debug!(session = id, "session unblocked by shutdown");
            break Exit::Shutdown;
        }

        let read = tokio::select! {
            // Ok is the signal; Err means the server is gone. Either way
            // this session is being torn down.
            _ = shutdown.changed() => {
                debug!(session = id, "session unblocked by shutdown");
                break Exit::Shutdown;
            }
            read = stream.read_buf(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                debug!(session = id, "client disconnected");
                break Exit::Disconnected;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(session = id, error = %e, "read failed, dropping client");
                break Exit::Disconnected;
            }
        }

        // Split only once a terminator is present, then dispatch everything
        // currently buffered, including any unterminated trailing fragment,
        // and start the next read from an empty buffer.
        if buffer.contains(&b'\n') {
            for command in split_commands(&buffer) {
                debug!(session = id, %command, "received");
                dispatch(&mut router, &command, &shared, private.as_ref());
            }
            buffer.clear();
        }
    };

    if matches!(exit, Exit::Disconnected) {
        registry.remove(id);
    }
    // `private` drops here, closing the context exactly once.
}

fn dispatch(
    router: &mut BlockRouter,
    command: &str,
    shared: &BatchHandle,
    private: Option<&BatchHandle>,
) {
    match router.route(command) {
        Route::Shared => shared.feed(command.as_bytes()),
        Route::Private => {
            if let Some(private) = private {
                private.feed(command.as_bytes());
            }
        }
    }
}
