//! Helpers shared by the integration tests

use btcp::io::UdpEndpoint;
use btcp::{ClientSocket, Impairment, Result, ServerSocket, SocketConfig};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};

/// Deterministic pseudo-random bytes
pub fn random_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// A client and server on ephemeral loopback ports, pointed at each other
pub fn loopback_pair(
    config: SocketConfig,
    client_faults: Option<Impairment>,
    server_faults: Option<Impairment>,
) -> Result<(ClientSocket, ServerSocket)> {
    let any_port = SocketAddr::from(([127, 0, 0, 1], 0));
    let client_endpoint = UdpEndpoint::bind(any_port)?;
    let server_endpoint = UdpEndpoint::bind(any_port)?;
    let client_addr = client_endpoint.local_addr()?;
    let server_addr = server_endpoint.local_addr()?;

    let server = ServerSocket::with_endpoint(config, server_endpoint, client_addr, server_faults)?;
    let client = ClientSocket::with_endpoint(config, client_endpoint, server_addr, client_faults)?;
    Ok((client, server))
}

/// Accept on a background thread and collect the whole stream
///
/// The thread hands the socket back so the caller can inspect and close it.
pub fn receive_all(server: ServerSocket) -> JoinHandle<(Vec<u8>, ServerSocket)> {
    thread::spawn(move || {
        let mut received = Vec::new();
        if server.accept().is_ok() {
            for chunk in server.incoming() {
                received.extend_from_slice(&chunk);
            }
        }
        (received, server)
    })
}
