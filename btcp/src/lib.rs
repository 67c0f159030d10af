//! bTCP - reliable transport over UDP
//!
//! High-level blocking sockets on top of the sans-IO state machines in
//! `btcp-protocol` and the UDP channel in `btcp-io`.
//!
//! ```no_run
//! use btcp::{ClientSocket, SocketConfig};
//!
//! let config = SocketConfig::default();
//! let client = ClientSocket::bind(
//!     config,
//!     btcp::DEFAULT_CLIENT_ADDR.parse()?,
//!     btcp::DEFAULT_SERVER_ADDR.parse()?,
//! )?;
//! client.connect()?;
//! client.send(b"hello")?;
//! client.disconnect();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use btcp_io as io;
pub use btcp_protocol as protocol;

pub mod client;
pub mod error;
pub mod server;

pub use client::ClientSocket;
pub use error::{BtcpError, Result};
pub use server::{Incoming, ServerSocket};

// Re-export commonly used types
pub use io::Impairment;
pub use protocol::{ClientStats, ServerStats, SocketConfig};

/// Default client address
pub const DEFAULT_CLIENT_ADDR: &str = "127.0.0.1:20000";

/// Default server address
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:30000";
