//! Threaded bTCP server socket
//!
//! The channel reader drives the [`ServerConnection`] and replies from inside
//! the handler; the caller only waits for the handshake and drains the receive
//! queue.

use crate::error::{BtcpError, Result};
use btcp_io::{Channel, Impairment, SegmentSender, UdpEndpoint};
use btcp_protocol::{ServerConnection, ServerState, ServerStats, SocketConfig};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct Shared {
    conn: Mutex<ServerConnection>,
    changed: Condvar,
    sender: SegmentSender,
}

impl Shared {
    fn on_segment(&self, raw: &[u8]) {
        let mut conn = self.conn.lock();
        let was = conn.state();
        if let Some(reply) = conn.handle_segment(raw) {
            self.sender.send_lossy(&reply);
        }

        match (was, conn.state()) {
            (ServerState::Listen, ServerState::Established) => {
                info!("Accepted connection from {}", self.sender.remote())
            }
            (ServerState::Established, ServerState::Closed) => {
                info!("Client {} closed the connection", self.sender.remote())
            }
            _ => {}
        }
        drop(conn);
        self.changed.notify_all();
    }
}

/// Server end of a bTCP connection
pub struct ServerSocket {
    config: SocketConfig,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    channel: Option<Channel>,
}

impl ServerSocket {
    /// Bind `local` and listen for a client at `remote`
    pub fn bind(config: SocketConfig, local: SocketAddr, remote: SocketAddr) -> Result<Self> {
        Self::with_endpoint(config, UdpEndpoint::bind(local)?, remote, None)
    }

    /// Build on an already bound endpoint, optionally impairing outgoing traffic
    pub fn with_endpoint(
        config: SocketConfig,
        endpoint: UdpEndpoint,
        remote: SocketAddr,
        impairment: Option<Impairment>,
    ) -> Result<Self> {
        config.validate()?;
        let local_addr = endpoint.local_addr()?;
        let sender = SegmentSender::new(&endpoint, remote, impairment)?;

        let shared = Arc::new(Shared {
            conn: Mutex::new(ServerConnection::new(config)),
            changed: Condvar::new(),
            sender: sender.clone(),
        });

        let input = Arc::clone(&shared);
        let channel = Channel::spawn(endpoint, sender, move |raw, _from| input.on_segment(raw))?;

        debug!("Server socket {} listening for {}", local_addr, remote);
        Ok(ServerSocket {
            config,
            local_addr,
            shared,
            channel: Some(channel),
        })
    }

    /// Get the socket configuration
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Get the bound local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the current connection state
    pub fn state(&self) -> ServerState {
        self.shared.conn.lock().state()
    }

    /// Get a snapshot of connection statistics
    pub fn stats(&self) -> ServerStats {
        self.shared.conn.lock().stats().clone()
    }

    /// Payloads received but not yet read
    pub fn queued(&self) -> usize {
        self.shared.conn.lock().queued()
    }

    /// Block until a client completes the handshake
    pub fn accept(&self) -> Result<()> {
        if self.channel.is_none() {
            return Err(BtcpError::Closed);
        }
        let mut conn = self.shared.conn.lock();
        while conn.state() == ServerState::Listen {
            self.shared.changed.wait(&mut conn);
        }
        Ok(())
    }

    /// Like [`accept`](Self::accept), giving up after `timeout`
    ///
    /// Returns whether a handshake completed.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<bool> {
        if self.channel.is_none() {
            return Err(BtcpError::Closed);
        }
        let deadline = Instant::now() + timeout;
        let mut conn = self.shared.conn.lock();
        while conn.state() == ServerState::Listen {
            if self.shared.changed.wait_until(&mut conn, deadline).timed_out() {
                break;
            }
        }
        Ok(conn.state() != ServerState::Listen)
    }

    /// Block for the next in-order payload
    ///
    /// Returns `None` once the client has closed and every payload was read.
    pub fn recv(&self) -> Option<Bytes> {
        let mut conn = self.shared.conn.lock();
        loop {
            if let Some(payload) = conn.pop_payload() {
                return Some(payload);
            }
            if conn.is_closed() {
                return None;
            }
            self.shared.changed.wait(&mut conn);
        }
    }

    /// Iterate over payloads until the stream ends
    pub fn incoming(&self) -> Incoming<'_> {
        Incoming {
            socket: self,
            done: false,
        }
    }

    /// Stop the channel and discard anything still queued
    pub fn close(&mut self) {
        {
            let mut conn = self.shared.conn.lock();
            conn.reset();
        }
        self.shared.changed.notify_all();

        if let Some(mut channel) = self.channel.take() {
            channel.teardown();
            debug!("Server socket {} closed", self.local_addr);
        }
    }

    /// True while the channel reader is alive
    pub fn is_running(&self) -> bool {
        self.channel.as_ref().is_some_and(Channel::is_running)
    }
}

impl Drop for ServerSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Payload iterator returned by [`ServerSocket::incoming`]
///
/// Ends for good at the first `None`.
pub struct Incoming<'a> {
    socket: &'a ServerSocket,
    done: bool,
}

impl Iterator for Incoming<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }
        let next = self.socket.recv();
        self.done = next.is_none();
        next
    }
}

impl std::iter::FusedIterator for Incoming<'_> {}
