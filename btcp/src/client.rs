//! Threaded bTCP client socket
//!
//! Three threads touch a client connection: the caller, the channel reader and
//! the retransmission timer. They share one mutex and one condvar; every state
//! change is followed by `notify_all`, and segments produced under the lock are
//! written before it is released.

use crate::error::{BtcpError, Result};
use btcp_io::{Channel, Impairment, SegmentSender, UdpEndpoint};
use btcp_protocol::{ClientConnection, ClientState, ClientStats, SeqNumber, SocketConfig};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

struct Shared {
    conn: Mutex<ClientConnection>,
    changed: Condvar,
    sender: SegmentSender,
    /// Only written with `conn` held so the timer cannot miss the wakeup
    closing: AtomicBool,
}

impl Shared {
    fn transmit(&self, segments: Vec<Bytes>) {
        for segment in segments {
            self.sender.send_lossy(&segment);
        }
    }

    fn on_segment(&self, raw: &[u8]) {
        let mut conn = self.conn.lock();
        let out = conn.handle_segment(raw, Instant::now());
        self.transmit(out);
        drop(conn);
        self.changed.notify_all();
    }
}

/// Client end of a bTCP connection
pub struct ClientSocket {
    config: SocketConfig,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    channel: Option<Channel>,
    timer: Option<JoinHandle<()>>,
}

impl ClientSocket {
    /// Bind `local` and prepare a connection to `remote`
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
            conn: Mutex::new(ClientConnection::new(config)),
            changed: Condvar::new(),
            sender: sender.clone(),
            closing: AtomicBool::new(false),
        });

        let input = Arc::clone(&shared);
        let channel = Channel::spawn(endpoint, sender, move |raw, _from| input.on_segment(raw))?;

        let timer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("btcp-timer-{}", local_addr.port()))
                .spawn(move || run_timer(&shared))
                .map_err(btcp_io::ChannelError::from)?
        };

        debug!("Client socket {} -> {}", local_addr, remote);
        Ok(ClientSocket {
            config,
            local_addr,
            shared,
            channel: Some(channel),
            timer: Some(timer),
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
    pub fn state(&self) -> ClientState {
        self.shared.conn.lock().state()
    }

    /// Check if the handshake has completed
    pub fn is_connected(&self) -> bool {
        self.shared.conn.lock().is_established()
    }

    /// Get a snapshot of connection statistics
    pub fn stats(&self) -> ClientStats {
        self.shared.conn.lock().stats().clone()
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.channel {
            Some(_) => Ok(()),
            None => Err(BtcpError::Closed),
        }
    }

    /// Perform the three-way handshake
    ///
    /// Sends up to `max_attempts` SYNs, waiting `timeout` for each SYNACK.
    pub fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        let attempts = self.config.max_attempts;

        let mut conn = self.shared.conn.lock();
        if conn.is_established() {
            return Ok(());
        }
        let mut syn = conn.start_handshake(SeqNumber::random());

        for attempt in 1..=attempts {
            debug!("Sending SYN (attempt {}/{})", attempt, attempts);
            self.shared.sender.send_lossy(&syn);

            let deadline = Instant::now() + self.config.timeout;
            while !conn.is_established() {
                if self.shared.changed.wait_until(&mut conn, deadline).timed_out() {
                    break;
                }
            }

            if conn.is_established() {
                self.shared.sender.send_lossy(&conn.handshake_ack());
                info!(
                    "Connected to {} (isn={}, window={})",
                    self.shared.sender.remote(),
                    conn.isn(),
                    conn.peer_window()
                );
                return Ok(());
            }
            syn = conn.syn();
        }

        conn.reset();
        drop(conn);
        self.shared.changed.notify_all();
        warn!("Handshake with {} failed", self.shared.sender.remote());
        Err(BtcpError::ConnectFailed { attempts })
    }

    /// Reliably send `data`
    ///
    /// Blocks until every byte is acknowledged, or until the retransmission
    /// timer fires `max_attempts` times in a row without progress. Returns the
    /// number of bytes the server acknowledged.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let mut conn = self.shared.conn.lock();
        if !conn.is_established() {
            return Err(BtcpError::NotConnected);
        }

        let acked_before = conn.stats().bytes_acked;
        let out = conn.queue_data(data, Instant::now());
        self.shared.transmit(out);
        // The timer thread may be waiting without a deadline
        self.shared.changed.notify_all();

        while conn.is_established() && !conn.is_drained() && !conn.has_stalled() {
            self.shared.changed.wait(&mut conn);
        }

        if conn.has_stalled() {
            warn!(
                "Send stalled after {} timeouts, {} segments abandoned",
                self.config.max_attempts,
                conn.in_flight() + conn.unsent_len()
            );
            conn.discard_pending();
        }

        let acked = conn.stats().bytes_acked - acked_before;
        debug!("Send finished, {} of {} bytes acknowledged", acked, data.len());
        Ok(acked as usize)
    }

    /// Tear the connection down
    ///
    /// Best effort: the socket ends up closed even when no FINACK arrives.
    pub fn disconnect(&self) {
        let mut conn = self.shared.conn.lock();
        match conn.state() {
            ClientState::Closed => return,
            ClientState::Established => {}
            _ => {
                conn.reset();
                drop(conn);
                self.shared.changed.notify_all();
                return;
            }
        }

        let attempts = self.config.max_attempts;
        let mut fin = conn.start_teardown();
        self.shared.changed.notify_all();

        for attempt in 1..=attempts {
            debug!("Sending FIN (attempt {}/{})", attempt, attempts);
            self.shared.sender.send_lossy(&fin);

            let deadline = Instant::now() + self.config.timeout;
            while !conn.is_closed() {
                if self.shared.changed.wait_until(&mut conn, deadline).timed_out() {
                    break;
                }
            }

            if conn.is_closed() {
                info!("Disconnected from {}", self.shared.sender.remote());
                return;
            }
            fin = conn.fin();
        }

        warn!(
            "No FINACK from {} after {} attempts, closing anyway",
            self.shared.sender.remote(),
            attempts
        );
        conn.reset();
        drop(conn);
        self.shared.changed.notify_all();
    }

    /// Stop the timer and the channel, releasing the socket
    ///
    /// Does not send a FIN; call [`disconnect`](Self::disconnect) first.
    pub fn close(&mut self) {
        {
            let mut conn = self.shared.conn.lock();
            conn.reset();
            self.shared.closing.store(true, Ordering::Release);
        }
        self.shared.changed.notify_all();

        if let Some(timer) = self.timer.take() {
            if timer.join().is_err() {
                warn!("Retransmission timer panicked");
            }
        }
        if let Some(mut channel) = self.channel.take() {
            channel.teardown();
            debug!("Client socket {} closed", self.local_addr);
        }
    }

    /// True while any background thread is alive
    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
            || self.channel.as_ref().is_some_and(Channel::is_running)
    }
}

impl Drop for ClientSocket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fire the retransmission timer whenever its deadline passes
fn run_timer(shared: &Shared) {
    let mut conn = shared.conn.lock();
    loop {
        if shared.closing.load(Ordering::Acquire) {
            return;
        }

        match conn.timer_deadline() {
            Some(deadline) if Instant::now() >= deadline => {
                let out = conn.handle_timeout(Instant::now());
                shared.transmit(out);
                shared.changed.notify_all();
            }
            Some(deadline) => {
                shared.changed.wait_until(&mut conn, deadline);
            }
            None => shared.changed.wait(&mut conn),
        }
    }
}
