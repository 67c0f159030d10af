//! bTCP client connection state machine
//!
//! The machine is sans-IO: every method that changes state returns the encoded
//! segments that must be put on the wire, and time is passed in by the caller.
//! The threaded socket in the `btcp` crate wraps it in a mutex and feeds it
//! arriving datagrams, timer expirations and application data.
//!
//! ```text
//! CLOSED --connect--> SYN_SENT --SYNACK--> ESTABLISHED --disconnect--> FIN_SENT --FINACK--> CLOSED
//! ```

use crate::checksum::validate;
use crate::config::SocketConfig;
use crate::segment::{Flags, Segment, SegmentHeader, HEADER_SIZE, PAYLOAD_SIZE};
use crate::sequence::SeqNumber;
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, trace};

/// Identical ACKs that trigger a fast retransmit
pub const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection
    Closed,
    /// SYN sent, waiting for SYNACK
    SynSent,
    /// Handshake complete, data may flow
    Established,
    /// FIN sent, waiting for FINACK
    FinSent,
}

/// Client-side counters
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Data segments sent for the first time
    pub segments_sent: u64,
    /// Segments resent because the retransmission timer expired
    pub timeout_retransmits: u64,
    /// Segments resent after three duplicate ACKs
    pub fast_retransmits: u64,
    /// Duplicate ACKs received
    pub duplicate_acks: u64,
    /// Segments dropped for a bad checksum or malformed header
    pub dropped: u64,
    /// Payload bytes cumulatively acknowledged by the server
    pub bytes_acked: u64,
}

/// Sender side of a bTCP connection
pub struct ClientConnection {
    config: SocketConfig,
    state: ClientState,
    /// Initial sequence number chosen for the SYN
    isn: SeqNumber,
    /// Sequence number of the next new segment
    next_seq: SeqNumber,
    /// Highest cumulative ACK received
    last_ack: SeqNumber,
    /// Ack number carried by our own segments (server ISN + 1)
    peer_ack: SeqNumber,
    /// Window last advertised by the server
    peer_window: u8,
    /// Application chunks not yet transmitted
    unsent: VecDeque<Bytes>,
    /// Encoded segments sent but not acknowledged, oldest first
    retransmit_queue: VecDeque<Bytes>,
    duplicate_acks: u32,
    /// Set once the current run of duplicates has triggered a resend
    fast_retransmitted: bool,
    timer_deadline: Option<Instant>,
    /// Timer expirations since the last new ACK
    consecutive_timeouts: u32,
    stats: ClientStats,
}

impl ClientConnection {
    /// Create a closed connection
    pub fn new(config: SocketConfig) -> Self {
        ClientConnection {
            config,
            state: ClientState::Closed,
            isn: SeqNumber::new(0),
            next_seq: SeqNumber::new(0),
            last_ack: SeqNumber::new(0),
            peer_ack: SeqNumber::new(0),
            peer_window: 0,
            unsent: VecDeque::new(),
            retransmit_queue: VecDeque::new(),
            duplicate_acks: 0,
            fast_retransmitted: false,
            timer_deadline: None,
            consecutive_timeouts: 0,
            stats: ClientStats::default(),
        }
    }

    /// Get the connection configuration
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Get the current state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Check if the handshake has completed
    pub fn is_established(&self) -> bool {
        self.state == ClientState::Established
    }

    /// Check if the connection is closed
    pub fn is_closed(&self) -> bool {
        self.state == ClientState::Closed
    }

    /// Get the initial sequence number
    pub fn isn(&self) -> SeqNumber {
        self.isn
    }

    /// Get the sequence number of the next new segment
    pub fn next_seq(&self) -> SeqNumber {
        self.next_seq
    }

    /// Get the highest cumulative ACK received
    pub fn last_ack(&self) -> SeqNumber {
        self.last_ack
    }

    /// Get the window last advertised by the server
    pub fn peer_window(&self) -> u8 {
        self.peer_window
    }

    /// Segments sent but not yet cumulatively acknowledged
    pub fn in_flight(&self) -> usize {
        self.retransmit_queue.len()
    }

    /// How many segments may be in flight right now
    ///
    /// This is the server's last advertised window, except that a zero
    /// advertisement still leaves room for one segment. That probe is the
    /// only way to learn that the window reopened, since the server never
    /// sends unsolicited window updates.
    pub fn usable_window(&self) -> usize {
        usize::from(self.peer_window.max(1))
    }

    /// Get the length of the current run of duplicate ACKs
    pub fn duplicate_acks(&self) -> u32 {
        self.duplicate_acks
    }

    /// Get the retransmission timer deadline, if armed
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer_deadline
    }

    /// Chunks queued by the application and not yet transmitted
    pub fn unsent_len(&self) -> usize {
        self.unsent.len()
    }

    /// True when every queued byte has been sent and acknowledged
    pub fn is_drained(&self) -> bool {
        self.unsent.is_empty() && self.retransmit_queue.is_empty()
    }

    /// True once the retransmission timer fired `max_attempts` times in a row
    /// without any progress
    pub fn has_stalled(&self) -> bool {
        self.consecutive_timeouts >= self.config.max_attempts
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Enter SYN_SENT with the given initial sequence number
    ///
    /// Returns the SYN to transmit.
    pub fn start_handshake(&mut self, isn: SeqNumber) -> Bytes {
        self.isn = isn;
        self.next_seq = isn;
        self.last_ack = isn;
        self.state = ClientState::SynSent;
        debug!("Client handshake started, isn={}", isn);
        self.syn()
    }

    /// The SYN for the current handshake attempt
    pub fn syn(&self) -> Bytes {
        Segment::control(self.isn, SeqNumber::new(0), Flags::Syn, self.config.window).encode()
    }

    /// Final ACK of the three-way handshake
    pub fn handshake_ack(&self) -> Bytes {
        Segment::control(self.next_seq, self.peer_ack, Flags::Ack, self.config.window).encode()
    }

    /// Enter FIN_SENT
    ///
    /// Returns the FIN to transmit.
    pub fn start_teardown(&mut self) -> Bytes {
        self.state = ClientState::FinSent;
        self.fin()
    }

    /// The FIN for the current teardown attempt
    pub fn fin(&self) -> Bytes {
        Segment::control(self.next_seq, self.peer_ack, Flags::Fin, self.config.window).encode()
    }

    /// Drop all connection state and return to CLOSED
    pub fn reset(&mut self) {
        self.state = ClientState::Closed;
        self.unsent.clear();
        self.retransmit_queue.clear();
        self.duplicate_acks = 0;
        self.fast_retransmitted = false;
        self.timer_deadline = None;
        self.consecutive_timeouts = 0;
    }

    /// Give up on everything not yet acknowledged
    ///
    /// The connection stays open and the next segment reuses the sequence
    /// number the server expects.
    pub fn discard_pending(&mut self) {
        let dropped = self.unsent.len() + self.retransmit_queue.len();
        self.unsent.clear();
        self.retransmit_queue.clear();
        self.next_seq = self.last_ack;
        self.duplicate_acks = 0;
        self.fast_retransmitted = false;
        self.timer_deadline = None;
        self.consecutive_timeouts = 0;
        debug!("Discarded {} pending segments, next_seq={}", dropped, self.next_seq);
    }

    /// Queue application data and transmit as much as the window allows
    pub fn queue_data(&mut self, data: &[u8], now: Instant) -> Vec<Bytes> {
        self.unsent
            .extend(data.chunks(PAYLOAD_SIZE).map(Bytes::copy_from_slice));
        self.poll_transmit(now)
    }

    /// Transmit unsent chunks while the window has room
    pub fn poll_transmit(&mut self, now: Instant) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.state != ClientState::Established {
            return out;
        }

        while self.in_flight() < self.usable_window() {
            let Some(payload) = self.unsent.pop_front() else {
                break;
            };

            let header =
                SegmentHeader::new(self.next_seq, self.peer_ack, Flags::None, self.config.window);
            let encoded = Segment { header, payload }.encode();
            trace!("Sending segment seq={}", self.next_seq);

            self.retransmit_queue.push_back(encoded.clone());
            self.next_seq.increment();
            self.stats.segments_sent += 1;
            self.fast_retransmitted = false;
            if self.timer_deadline.is_none() {
                self.timer_deadline = Some(now + self.config.timeout);
            }
            out.push(encoded);
        }

        out
    }

    /// Process a datagram from the server
    pub fn handle_segment(&mut self, raw: &[u8], now: Instant) -> Vec<Bytes> {
        if !validate(raw) {
            debug!("Dropping segment with bad checksum ({} bytes)", raw.len());
            self.stats.dropped += 1;
            return Vec::new();
        }

        let segment = match Segment::decode(raw) {
            Ok(segment) => segment,
            Err(e) => {
                debug!("Dropping malformed segment: {}", e);
                self.stats.dropped += 1;
                return Vec::new();
            }
        };
        let header = segment.header;

        match header.flags {
            Flags::SynAck => {
                self.handle_synack(&header);
                Vec::new()
            }
            Flags::FinAck => {
                if self.state == ClientState::FinSent {
                    debug!("FINACK received, connection closed");
                    self.reset();
                }
                Vec::new()
            }
            Flags::Ack => self.handle_ack(&header, now),
            other => {
                trace!("Ignoring {} segment", other);
                Vec::new()
            }
        }
    }

    fn handle_synack(&mut self, header: &SegmentHeader) {
        if self.state != ClientState::SynSent || header.ack != self.next_seq.next() {
            trace!("Ignoring SYNACK ack={} in {:?}", header.ack, self.state);
            return;
        }

        self.next_seq.increment();
        self.last_ack = self.next_seq;
        self.peer_ack = header.seq.next();
        self.peer_window = header.window;
        self.state = ClientState::Established;
        debug!(
            "Client established, next_seq={}, peer_window={}",
            self.next_seq, self.peer_window
        );
    }

    fn handle_ack(&mut self, header: &SegmentHeader, now: Instant) -> Vec<Bytes> {
        if self.state != ClientState::Established {
            return Vec::new();
        }

        let advanced = self.last_ack.distance_to(header.ack);
        let outstanding = self.last_ack.distance_to(self.next_seq);

        if advanced > 0 && advanced <= outstanding {
            for _ in 0..advanced {
                if let Some(acked) = self.retransmit_queue.pop_front() {
                    self.stats.bytes_acked += (acked.len() - HEADER_SIZE) as u64;
                }
            }
            self.last_ack = header.ack;
            self.peer_window = header.window;
            self.duplicate_acks = 0;
            self.fast_retransmitted = false;
            self.consecutive_timeouts = 0;
            self.timer_deadline = if self.retransmit_queue.is_empty() {
                None
            } else {
                Some(now + self.config.timeout)
            };
            trace!("ACK {} (window {})", header.ack, header.window);
            return self.poll_transmit(now);
        }

        if advanced == 0 {
            self.peer_window = header.window;
            let Some(oldest) = self.retransmit_queue.front().cloned() else {
                return self.poll_transmit(now);
            };

            self.duplicate_acks += 1;
            self.stats.duplicate_acks += 1;

            if self.duplicate_acks >= FAST_RETRANSMIT_THRESHOLD && !self.fast_retransmitted {
                debug!("Fast retransmit of seq={}", self.last_ack);
                self.fast_retransmitted = true;
                self.stats.fast_retransmits += 1;
                return vec![oldest];
            }
            return self.poll_transmit(now);
        }

        trace!("Ignoring stale ACK {} (last_ack={})", header.ack, self.last_ack);
        Vec::new()
    }

    /// Fire the retransmission timer if its deadline has passed
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<Bytes> {
        match self.timer_deadline {
            Some(deadline) if now >= deadline => {}
            _ => return Vec::new(),
        }

        let Some(oldest) = self.retransmit_queue.front().cloned() else {
            self.timer_deadline = None;
            return Vec::new();
        };

        self.consecutive_timeouts += 1;
        self.fast_retransmitted = false;
        self.stats.timeout_retransmits += 1;
        self.timer_deadline = Some(now + self.config.timeout);
        debug!(
            "Retransmission timeout, resending seq={} (attempt {})",
            self.last_ack, self.consecutive_timeouts
        );
        vec![oldest]
    }
}
