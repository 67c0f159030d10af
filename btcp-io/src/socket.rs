//! UDP endpoint for bTCP
//!
//! The socket is created and tuned through `socket2` and then handed over as a
//! blocking `std::net::UdpSocket` with a short read timeout, so the channel's
//! reader thread can notice a shutdown request between datagrams.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;

/// How long a blocked receive waits before checking for shutdown
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("IPv6 is not supported: {0}")]
    Ipv6Unsupported(SocketAddr),
}

/// A bound UDP socket, not yet attached to a channel
pub struct UdpEndpoint {
    inner: UdpSocket,
}

impl UdpEndpoint {
    /// Create a socket bound to the given IPv4 address
    ///
    /// Port 0 picks an ephemeral port; read it back with [`local_addr`](Self::local_addr).
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        if addr.is_ipv6() {
            return Err(SocketError::Ipv6Unsupported(addr));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        // The peer may still be draining the previous run on the same port
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        Ok(UdpEndpoint {
            inner: socket.into(),
        })
    }

    /// Set the receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        socket2::SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Get the receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(socket2::SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Send one datagram
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive one datagram
    ///
    /// Returns `Ok(None)` when the poll interval elapsed without traffic.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.inner.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    /// Try to clone the socket
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(UdpEndpoint {
            inner: self.inner.try_clone()?,
        })
    }

    pub(crate) fn into_inner(self) -> UdpSocket {
        self.inner
    }
}
