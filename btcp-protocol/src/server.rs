//! bTCP server connection state machine
//!
//! Like the client, the server machine performs no I/O. Each arriving datagram
//! produces at most one reply, which the caller transmits.

use crate::checksum::validate;
use crate::config::SocketConfig;
use crate::segment::{Flags, Segment};
use crate::sequence::SeqNumber;
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Server connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for a SYN
    Listen,
    /// Handshake complete, accepting data
    Established,
    /// FIN received
    Closed,
}

/// Server-side counters
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// In-order data segments accepted
    pub segments_accepted: u64,
    /// Duplicate ACKs sent for out-of-order, repeated or corrupt segments
    pub duplicate_acks_sent: u64,
    /// Segments that failed the checksum
    pub corrupt_dropped: u64,
    /// Payload bytes handed to the application
    pub bytes_delivered: u64,
}

/// Receiver side of a bTCP connection
pub struct ServerConnection {
    config: SocketConfig,
    state: ServerState,
    /// Sequence number of the client's SYN
    client_isn: Option<SeqNumber>,
    /// Our own initial sequence number
    isn: SeqNumber,
    /// Next in-order sequence number expected from the client
    expected: SeqNumber,
    /// Window advertised by the client's SYN
    peer_window: u8,
    /// In-order payloads not yet read by the application
    receive_queue: VecDeque<Bytes>,
    stats: ServerStats,
}

impl ServerConnection {
    /// Create a listening connection
    pub fn new(config: SocketConfig) -> Self {
        ServerConnection {
            config,
            state: ServerState::Listen,
            client_isn: None,
            isn: SeqNumber::new(0),
            expected: SeqNumber::new(0),
            peer_window: 0,
            receive_queue: VecDeque::new(),
            stats: ServerStats::default(),
        }
    }

    /// Get the connection configuration
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Get the current state
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Check if a client is connected
    pub fn is_established(&self) -> bool {
        self.state == ServerState::Established
    }

    /// Check if the client has closed the connection
    pub fn is_closed(&self) -> bool {
        self.state == ServerState::Closed
    }

    /// Get the next in-order sequence number expected
    pub fn expected(&self) -> SeqNumber {
        self.expected
    }

    /// Get the server initial sequence number
    pub fn isn(&self) -> SeqNumber {
        self.isn
    }

    /// Get the window the client advertised in its SYN
    pub fn peer_window(&self) -> u8 {
        self.peer_window
    }

    /// Get the number of payloads waiting to be read
    pub fn queued(&self) -> usize {
        self.receive_queue.len()
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Window to advertise with `queued` payloads waiting
    fn window_for(&self, queued: usize) -> u8 {
        let queued = u8::try_from(queued).unwrap_or(u8::MAX);
        self.config.window.saturating_sub(queued)
    }

    /// Process a datagram from the client
    ///
    /// Returns the reply to transmit, if any.
    pub fn handle_segment(&mut self, raw: &[u8]) -> Option<Bytes> {
        if !validate(raw) {
            debug!("Dropping segment with bad checksum ({} bytes)", raw.len());
            self.stats.corrupt_dropped += 1;
            return self.duplicate_ack();
        }

        let segment = match Segment::decode(raw) {
            Ok(segment) => segment,
            Err(e) => {
                debug!("Dropping malformed segment: {}", e);
                return self.duplicate_ack();
            }
        };
        let header = segment.header;

        match (header.flags, self.state) {
            (Flags::Syn, ServerState::Listen) => {
                self.client_isn = Some(header.seq);
                self.peer_window = header.window;
                self.expected = header.seq.next();
                self.isn = SeqNumber::random();
                self.state = ServerState::Established;
                debug!(
                    "Server established, client isn={}, peer_window={}",
                    header.seq, header.window
                );
                Some(self.synack())
            }
            // Our SYNACK was lost and the client tried again
            (Flags::Syn, ServerState::Established) if self.client_isn == Some(header.seq) => {
                trace!("Repeating SYNACK for isn={}", header.seq);
                Some(self.synack())
            }
            (Flags::Ack, _) => None,
            (Flags::Fin, ServerState::Established | ServerState::Closed) => {
                if self.state == ServerState::Established {
                    debug!("FIN received, connection closed");
                }
                self.state = ServerState::Closed;
                Some(
                    Segment::control(
                        self.isn.next(),
                        self.expected.next(),
                        Flags::FinAck,
                        self.config.window,
                    )
                    .encode(),
                )
            }
            (Flags::None, ServerState::Established) if header.seq == self.expected => {
                let window = self.window_for(self.receive_queue.len()).saturating_sub(1);
                self.receive_queue.push_back(segment.payload);
                self.expected.increment();
                self.stats.segments_accepted += 1;
                trace!("Accepted seq={}, advertising window {}", header.seq, window);
                Some(self.ack(window))
            }
            (flags, state) => {
                trace!("Unexpected {} seq={} in {:?}", flags, header.seq, state);
                self.duplicate_ack()
            }
        }
    }

    fn synack(&self) -> Bytes {
        Segment::control(self.isn, self.expected, Flags::SynAck, self.config.window).encode()
    }

    fn ack(&self, window: u8) -> Bytes {
        Segment::control(self.isn.next(), self.expected, Flags::Ack, window).encode()
    }

    /// Repeat the current cumulative ACK while connected
    fn duplicate_ack(&mut self) -> Option<Bytes> {
        if self.state != ServerState::Established {
            return None;
        }
        self.stats.duplicate_acks_sent += 1;
        Some(self.ack(self.window_for(self.receive_queue.len())))
    }

    /// Hand the oldest in-order payload to the application
    pub fn pop_payload(&mut self) -> Option<Bytes> {
        let payload = self.receive_queue.pop_front()?;
        self.stats.bytes_delivered += payload.len() as u64;
        Some(payload)
    }

    /// Drop queued payloads and stop accepting segments
    pub fn reset(&mut self) {
        self.state = ServerState::Closed;
        self.receive_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentHeader;
    use std::time::Duration;

    const CLIENT_ISN: u16 = 1000;

    fn server(window: u8) -> ServerConnection {
        ServerConnection::new(SocketConfig::new(window, Duration::from_millis(100)))
    }

    fn control(seq: u16, flags: Flags) -> Bytes {
        Segment::control(SeqNumber::new(seq), SeqNumber::new(0), flags, 50).encode()
    }

    fn data(seq: u16, payload: &'static [u8]) -> Bytes {
        let header = SegmentHeader::new(SeqNumber::new(seq), SeqNumber::new(0), Flags::None, 50);
        Segment::new(header, Bytes::from_static(payload))
            .unwrap()
            .encode()
    }

    fn established(window: u8) -> ServerConnection {
        let mut server = server(window);
        server.handle_segment(&control(CLIENT_ISN, Flags::Syn));
        assert!(server.is_established());
        server
    }

    fn decode(reply: Option<Bytes>) -> SegmentHeader {
        Segment::decode(&reply.expect("reply")).unwrap().header
    }

    #[test]
    fn test_syn_answered_with_synack() {
        let mut server = server(20);
        let reply = decode(server.handle_segment(&control(CLIENT_ISN, Flags::Syn)));

        assert_eq!(reply.flags, Flags::SynAck);
        assert_eq!(reply.ack.as_raw(), CLIENT_ISN + 1);
        assert_eq!(reply.window, 20);
        assert_eq!(server.peer_window(), 50);
        assert_eq!(server.expected().as_raw(), CLIENT_ISN + 1);
    }

    #[test]
    fn test_repeated_syn_repeats_synack() {
        let mut server = established(20);
        let isn = server.isn();
        let reply = decode(server.handle_segment(&control(CLIENT_ISN, Flags::Syn)));

        assert_eq!(reply.flags, Flags::SynAck);
        assert_eq!(reply.seq, isn);
        assert_eq!(server.expected().as_raw(), CLIENT_ISN + 1);
    }

    #[test]
    fn test_handshake_ack_is_silent() {
        let mut server = established(20);
        assert!(server.handle_segment(&control(CLIENT_ISN + 1, Flags::Ack)).is_none());
        assert_eq!(server.queued(), 0);
    }

    #[test]
    fn test_in_order_data_shrinks_window() {
        let mut server = established(20);

        let first = decode(server.handle_segment(&data(CLIENT_ISN + 1, b"one")));
        assert_eq!(first.flags, Flags::Ack);
        assert_eq!(first.ack.as_raw(), CLIENT_ISN + 2);
        assert_eq!(first.window, 19);

        let second = decode(server.handle_segment(&data(CLIENT_ISN + 2, b"two")));
        assert_eq!(second.ack.as_raw(), CLIENT_ISN + 3);
        assert_eq!(second.window, 18);

        assert_eq!(server.pop_payload(), Some(Bytes::from_static(b"one")));
        assert_eq!(server.pop_payload(), Some(Bytes::from_static(b"two")));
        assert_eq!(server.pop_payload(), None);
        assert_eq!(server.stats().bytes_delivered, 6);
    }

    #[test]
    fn test_out_of_order_triggers_duplicate_ack() {
        let mut server = established(20);
        server.handle_segment(&data(CLIENT_ISN + 1, b"one"));

        let dup = decode(server.handle_segment(&data(CLIENT_ISN + 3, b"three")));
        assert_eq!(dup.flags, Flags::Ack);
        assert_eq!(dup.ack.as_raw(), CLIENT_ISN + 2);
        assert_eq!(dup.window, 19);
        assert_eq!(server.queued(), 1);

        // Already delivered segment
        let dup = decode(server.handle_segment(&data(CLIENT_ISN + 1, b"one")));
        assert_eq!(dup.ack.as_raw(), CLIENT_ISN + 2);
        assert_eq!(server.queued(), 1);
        assert_eq!(server.stats().duplicate_acks_sent, 2);
    }

    #[test]
    fn test_corrupt_segment_triggers_duplicate_ack() {
        let mut server = established(20);
        let mut corrupted = data(CLIENT_ISN + 1, b"payload").to_vec();
        corrupted[12] ^= 0x01;

        let dup = decode(server.handle_segment(&corrupted));
        assert_eq!(dup.ack.as_raw(), CLIENT_ISN + 1);
        assert_eq!(server.queued(), 0);
        assert_eq!(server.stats().corrupt_dropped, 1);
    }

    #[test]
    fn test_corrupt_segment_before_handshake_is_silent() {
        let mut server = server(20);
        let mut corrupted = control(CLIENT_ISN, Flags::Syn).to_vec();
        corrupted[0] ^= 0x01;
        assert!(server.handle_segment(&corrupted).is_none());
        assert_eq!(server.state(), ServerState::Listen);
    }

    #[test]
    fn test_fin_answered_with_finack() {
        let mut server = established(20);
        let reply = decode(server.handle_segment(&control(CLIENT_ISN + 1, Flags::Fin)));
        assert_eq!(reply.flags, Flags::FinAck);
        assert!(server.is_closed());

        // FINACK lost, FIN repeated
        let reply = decode(server.handle_segment(&control(CLIENT_ISN + 1, Flags::Fin)));
        assert_eq!(reply.flags, Flags::FinAck);

        // Late data after teardown is ignored
        assert!(server.handle_segment(&data(CLIENT_ISN + 1, b"late")).is_none());
    }

    #[test]
    fn test_data_before_handshake_ignored() {
        let mut server = server(20);
        assert!(server.handle_segment(&data(CLIENT_ISN + 1, b"early")).is_none());
        assert_eq!(server.queued(), 0);
    }
}
