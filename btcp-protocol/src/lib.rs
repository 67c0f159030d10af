//! bTCP Protocol Core Implementation
//!
//! This crate implements the bTCP segment format and checksum, 16-bit sequence
//! arithmetic, socket configuration, and the sans-IO client and server
//! connection state machines.

pub mod checksum;
pub mod client;
pub mod config;
pub mod segment;
pub mod sequence;
pub mod server;

pub use checksum::{checksum, validate};
pub use client::{ClientConnection, ClientState, ClientStats, FAST_RETRANSMIT_THRESHOLD};
pub use config::{ConfigError, SocketConfig};
pub use segment::{
    encode_header, split, Flags, Segment, SegmentError, SegmentHeader, HEADER_SIZE, PAYLOAD_SIZE,
    SEGMENT_SIZE,
};
pub use sequence::SeqNumber;
pub use server::{ServerConnection, ServerState, ServerStats};
