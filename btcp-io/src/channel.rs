//! Datagram channel between two fixed endpoints
//!
//! A [`Channel`] owns one reader thread that hands every inbound datagram to a
//! handler, and a cloneable [`SegmentSender`] for fire-and-forget output.
//! [`Channel::teardown`] stops and joins the reader and releases the socket
//! before it returns.

use crate::impair::{DelayLine, FaultInjector, Impairment};
use crate::socket::{SocketError, UdpEndpoint, POLL_INTERVAL};
use parking_lot::{Mutex, RwLock};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Largest datagram the reader accepts
pub const MAX_DATAGRAM: usize = 2048;

/// Channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Channel is closed")]
    Closed,
}

struct SenderInner {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    remote: SocketAddr,
    faults: Option<Mutex<FaultInjector>>,
    delay_line: Mutex<Option<DelayLine>>,
}

/// Send half of a channel
///
/// Clones share the same socket and impairment state.
#[derive(Clone)]
pub struct SegmentSender {
    inner: Arc<SenderInner>,
}

impl SegmentSender {
    /// Create the send half for `endpoint`
    pub fn new(
        endpoint: &UdpEndpoint,
        remote: SocketAddr,
        impairment: Option<Impairment>,
    ) -> Result<Self, ChannelError> {
        let socket = Arc::new(endpoint.try_clone()?.into_inner());

        let impairment = impairment.filter(|i| !i.is_noop());
        let delay_line = match &impairment {
            Some(i) if i.delays() => Some(DelayLine::spawn(Arc::clone(&socket), remote)?),
            _ => None,
        };
        if let Some(i) = &impairment {
            debug!("Channel to {} impaired: {:?}", remote, i);
        }

        Ok(SegmentSender {
            inner: Arc::new(SenderInner {
                socket: RwLock::new(Some(socket)),
                remote,
                faults: impairment.map(|i| Mutex::new(FaultInjector::new(i))),
                delay_line: Mutex::new(delay_line),
            }),
        })
    }

    pub fn remote(&self) -> SocketAddr {
        self.inner.remote
    }

    pub fn is_closed(&self) -> bool {
        self.inner.socket.read().is_none()
    }

    /// Send one segment to the remote address
    pub fn send(&self, segment: &[u8]) -> Result<(), ChannelError> {
        let guard = self.inner.socket.read();
        let socket = guard.as_ref().ok_or(ChannelError::Closed)?;

        let Some(faults) = &self.inner.faults else {
            socket.send_to(segment, self.inner.remote)?;
            return Ok(());
        };

        let copies = faults.lock().apply(segment);
        let delay_line = self.inner.delay_line.lock();
        for (datagram, delay) in copies {
            match delay_line.as_ref() {
                Some(line) => line.schedule(datagram, delay),
                None => {
                    socket.send_to(&datagram, self.inner.remote)?;
                }
            }
        }
        Ok(())
    }

    /// Send a segment, logging instead of failing
    pub fn send_lossy(&self, segment: &[u8]) {
        if let Err(e) = self.send(segment) {
            trace!("Send to {} failed: {}", self.inner.remote, e);
        }
    }

    /// Stop the delay line and release the socket
    pub fn close(&self) {
        if let Some(mut line) = self.inner.delay_line.lock().take() {
            line.shutdown();
        }
        self.inner.socket.write().take();
    }
}

/// A bound socket with a running reader thread
pub struct Channel {
    sender: SegmentSender,
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Channel {
    /// Bind-and-start in one step
    pub fn open<F>(
        endpoint: UdpEndpoint,
        remote: SocketAddr,
        impairment: Option<Impairment>,
        handler: F,
    ) -> Result<Self, ChannelError>
    where
        F: FnMut(&[u8], SocketAddr) + Send + 'static,
    {
        let sender = SegmentSender::new(&endpoint, remote, impairment)?;
        Self::spawn(endpoint, sender, handler)
    }

    /// Start the reader thread
    ///
    /// `sender` must have been created from the same endpoint. The handler
    /// runs on the reader thread and must not call [`teardown`](Self::teardown).
    pub fn spawn<F>(
        endpoint: UdpEndpoint,
        sender: SegmentSender,
        mut handler: F,
    ) -> Result<Self, ChannelError>
    where
        F: FnMut(&[u8], SocketAddr) + Send + 'static,
    {
        let local_addr = endpoint.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let reader = thread::Builder::new()
            .name(format!("btcp-reader-{}", local_addr.port()))
            .spawn(move || {
                let mut buf = vec![0u8; MAX_DATAGRAM];
                while !thread_stop.load(Ordering::Acquire) {
                    match endpoint.recv_from(&mut buf) {
                        Ok(Some((len, from))) => handler(&buf[..len], from),
                        Ok(None) => {}
                        Err(e) => {
                            warn!("Receive on {} failed: {}", local_addr, e);
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }
                trace!("Reader on {} stopped", local_addr);
            })?;

        debug!("Channel {} -> {} open", local_addr, sender.remote());
        Ok(Channel {
            sender,
            local_addr,
            stop,
            reader: Some(reader),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote(&self) -> SocketAddr {
        self.sender.remote()
    }

    /// A handle for sending from other threads
    pub fn sender(&self) -> SegmentSender {
        self.sender.clone()
    }

    pub fn send(&self, segment: &[u8]) -> Result<(), ChannelError> {
        self.sender.send(segment)
    }

    /// True while the reader thread is alive
    pub fn is_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop and join the reader, then release the socket
    ///
    /// Idempotent.
    pub fn teardown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Reader thread on {} panicked", self.local_addr);
            }
        }
        self.sender.close();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{unbounded, RecvTimeoutError};
    use std::time::Duration;

    fn endpoint() -> UdpEndpoint {
        UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap()
    }

    fn collecting(
        local: UdpEndpoint,
        remote: SocketAddr,
    ) -> (Channel, crossbeam::channel::Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        let channel = Channel::open(local, remote, None, move |data, _| {
            let _ = tx.send(data.to_vec());
        })
        .unwrap();
        (channel, rx)
    }

    #[test]
    fn test_datagrams_reach_handler() {
        let a = endpoint();
        let b = endpoint();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());

        let (sender, _) = collecting(a, b_addr);
        let (receiver, rx) = collecting(b, a_addr);
        assert!(receiver.is_running());

        sender.send(b"first").unwrap();
        sender.sender().send(b"second").unwrap();

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), b"first");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), b"second");
    }

    #[test]
    fn test_handler_can_reply() {
        let a = endpoint();
        let b = endpoint();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());

        let echo_sender = SegmentSender::new(&b, a_addr, None).unwrap();
        let reply = echo_sender.clone();
        let _echo = Channel::spawn(b, echo_sender, move |data, _| reply.send_lossy(data)).unwrap();

        let (client, rx) = collecting(a, b_addr);
        client.send(b"ping").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"ping");
    }

    #[test]
    fn test_teardown_stops_reader_and_sender() {
        let a = endpoint();
        let peer = endpoint();
        let (mut channel, rx) = collecting(a, peer.local_addr().unwrap());
        let sender = channel.sender();

        channel.teardown();
        assert!(!channel.is_running());
        assert!(sender.is_closed());
        assert!(matches!(sender.send(b"late"), Err(ChannelError::Closed)));

        // The handler and its captured sender were dropped with the thread
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Disconnected)
        );

        // A second teardown is harmless
        channel.teardown();
    }

    #[test]
    fn test_teardown_releases_port() {
        let a = endpoint();
        let addr = a.local_addr().unwrap();
        let (mut channel, _rx) = collecting(a, "127.0.0.1:9".parse().unwrap());
        channel.teardown();

        let std_socket = std::net::UdpSocket::bind(addr);
        assert!(std_socket.is_ok());
    }

    #[test]
    fn test_lossy_channel_drops_everything() {
        let a = endpoint();
        let b = endpoint();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());

        let lossy = Impairment::lossy(1.0).with_seed(7);
        let sender = Channel::open(a, b_addr, Some(lossy), |_, _| {}).unwrap();
        let (_receiver, rx) = collecting(b, a_addr);

        for _ in 0..10 {
            sender.send(b"never").unwrap();
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_delayed_channel_delivers() {
        let a = endpoint();
        let b = endpoint();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());

        let delayed = Impairment::default().with_delay(20, 0).with_seed(7);
        let mut sender = Channel::open(a, b_addr, Some(delayed), |_, _| {}).unwrap();
        let (_receiver, rx) = collecting(b, a_addr);

        sender.send(b"slow").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"slow");
        sender.teardown();
    }
}
