//! bTCP I/O
//!
//! This crate provides the UDP endpoint, the reader-thread channel that feeds
//! datagrams to the protocol state machines, and an optional impairment layer
//! for exercising the protocol over a hostile network.

pub mod channel;
pub mod impair;
pub mod socket;

pub use channel::{Channel, ChannelError, SegmentSender, MAX_DATAGRAM};
pub use impair::{DelayLine, FaultInjector, Impairment};
pub use socket::{SocketError, UdpEndpoint, POLL_INTERVAL};
