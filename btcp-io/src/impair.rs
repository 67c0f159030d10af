//! Network impairment for testing
//!
//! An [`Impairment`] describes how the send path of a channel misbehaves:
//! dropped, duplicated, corrupted and delayed datagrams. Delayed datagrams are
//! held on a delay-line thread and released in deadline order, so jitter
//! reorders them.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::trace;

/// Fault probabilities and delays applied to outgoing datagrams
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Impairment {
    /// Probability of dropping a datagram
    pub loss: f64,
    /// Probability of sending a datagram twice
    pub duplicate: f64,
    /// Probability of flipping one bit
    pub corrupt: f64,
    /// Fixed delay in milliseconds
    pub delay_ms: u64,
    /// Random extra delay in milliseconds, uniformly up to this value
    pub jitter_ms: u64,
    /// RNG seed; random when unset
    pub seed: Option<u64>,
}

impl Impairment {
    /// Loss only
    pub fn lossy(loss: f64) -> Self {
        Impairment {
            loss,
            ..Default::default()
        }
    }

    pub fn with_duplicate(mut self, duplicate: f64) -> Self {
        self.duplicate = duplicate;
        self
    }

    pub fn with_corrupt(mut self, corrupt: f64) -> Self {
        self.corrupt = corrupt;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64, jitter_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// True when the impairment changes nothing
    pub fn is_noop(&self) -> bool {
        self.loss <= 0.0
            && self.duplicate <= 0.0
            && self.corrupt <= 0.0
            && self.delay_ms == 0
            && self.jitter_ms == 0
    }

    /// True when datagrams must pass through the delay line
    pub fn delays(&self) -> bool {
        self.delay_ms > 0 || self.jitter_ms > 0
    }
}

/// Applies an [`Impairment`] to individual datagrams
pub struct FaultInjector {
    impairment: Impairment,
    rng: StdRng,
}

impl FaultInjector {
    pub fn new(impairment: Impairment) -> Self {
        let rng = match impairment.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        FaultInjector { impairment, rng }
    }

    pub fn impairment(&self) -> &Impairment {
        &self.impairment
    }

    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen_bool(p.min(1.0))
    }

    /// Decide what happens to one datagram
    ///
    /// Returns the copies to deliver, each with its delay. An empty result
    /// means the datagram was lost.
    pub fn apply(&mut self, datagram: &[u8]) -> Vec<(Vec<u8>, Duration)> {
        if self.chance(self.impairment.loss) {
            trace!("Impairment: dropping {} bytes", datagram.len());
            return Vec::new();
        }

        let copies = if self.chance(self.impairment.duplicate) {
            2
        } else {
            1
        };

        let mut out = Vec::with_capacity(copies);
        for _ in 0..copies {
            let mut copy = datagram.to_vec();
            if !copy.is_empty() && self.chance(self.impairment.corrupt) {
                let bit = self.rng.gen_range(0..copy.len() * 8);
                copy[bit / 8] ^= 1 << (bit % 8);
                trace!("Impairment: flipped bit {}", bit);
            }
            out.push((copy, self.delay()));
        }
        out
    }

    fn delay(&mut self) -> Duration {
        let jitter = if self.impairment.jitter_ms > 0 {
            self.rng.gen_range(0..=self.impairment.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.impairment.delay_ms + jitter)
    }
}

struct Pending {
    release_at: Instant,
    order: u64,
    datagram: Vec<u8>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.release_at == other.release_at && self.order == other.order
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.release_at, self.order).cmp(&(other.release_at, other.order))
    }
}

/// Background thread that sends datagrams once their delay has elapsed
pub struct DelayLine {
    tx: Option<Sender<(Instant, Vec<u8>)>>,
    worker: Option<JoinHandle<()>>,
}

impl DelayLine {
    /// Start a delay line writing to `remote` through `socket`
    pub fn spawn(socket: Arc<UdpSocket>, remote: SocketAddr) -> std::io::Result<Self> {
        let (tx, rx) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("btcp-delay".into())
            .spawn(move || run_delay_line(rx, &socket, remote))?;
        Ok(DelayLine {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Schedule a datagram for release after `delay`
    pub fn schedule(&self, datagram: Vec<u8>, delay: Duration) {
        if let Some(tx) = &self.tx {
            // Only fails once the worker is gone
            let _ = tx.send((Instant::now() + delay, datagram));
        }
    }

    /// Stop the worker, discarding datagrams still in the line
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for DelayLine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_delay_line(rx: Receiver<(Instant, Vec<u8>)>, socket: &UdpSocket, remote: SocketAddr) {
    let mut pending: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
    let mut order = 0u64;

    loop {
        let next = match pending.peek() {
            Some(Reverse(head)) => {
                rx.recv_timeout(head.release_at.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match next {
            Ok((release_at, datagram)) => {
                order += 1;
                pending.push(Reverse(Pending {
                    release_at,
                    order,
                    datagram,
                }));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }

        let now = Instant::now();
        while pending
            .peek()
            .is_some_and(|Reverse(head)| head.release_at <= now)
        {
            if let Some(Reverse(due)) = pending.pop() {
                if let Err(e) = socket.send_to(&due.datagram, remote) {
                    trace!("Delayed send failed: {}", e);
                }
            }
        }
    }
}
