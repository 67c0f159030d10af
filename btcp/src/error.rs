//! Errors surfaced by bTCP sockets

use btcp_io::{ChannelError, SocketError};
use btcp_protocol::ConfigError;
use thiserror::Error;

/// Socket-level errors
///
/// Network faults are absorbed by the protocol and never show up here.
#[derive(Error, Debug)]
pub enum BtcpError {
    #[error("Handshake not completed after {attempts} attempts")]
    ConnectFailed { attempts: u32 },

    #[error("Socket is not connected")]
    NotConnected,

    #[error("Socket is closed")]
    Closed,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),
}

pub type Result<T> = std::result::Result<T, BtcpError>;
