//! bTCP Client - reliable file sender
//!
//! Reads a file (or stdin) and streams it to a bTCP server over UDP.

use btcp::io::UdpEndpoint;
use btcp::ClientSocket;
use btcp_cli::{display_client_stats, format_bytes, init_tracing, Config, FaultArgs};
use clap::Parser;
use std::fs;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "btcp-client")]
#[command(about = "bTCP reliable file sender", long_about = None)]
struct Args {
    /// File to send, '-' for stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Advertised window in segments
    #[arg(short, long)]
    window: Option<u8>,

    /// Retransmission timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Handshake, teardown and retransmission attempts
    #[arg(long)]
    attempts: Option<u32>,

    /// Local bind address
    #[arg(long)]
    local: Option<SocketAddr>,

    /// Server address
    #[arg(long)]
    remote: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    faults: FaultArgs,

    /// Verbose output (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn read_input(path: &Path) -> io::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
        Ok(data)
    } else {
        fs::read(path)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::load(args.config.as_deref())?
        .client
        .unwrap_or_default();
    if let Some(input) = args.input {
        config.input = Some(input);
    }
    if let Some(window) = args.window {
        config.window = window;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(attempts) = args.attempts {
        config.max_attempts = attempts;
    }
    if let Some(local) = args.local {
        config.local = local;
    }
    if let Some(remote) = args.remote {
        config.remote = remote;
    }
    config.impairment = args.faults.apply(config.impairment);

    let Some(input) = config.input.as_deref() else {
        anyhow::bail!("No input given; use --input or set client.input in the config file");
    };
    let data = read_input(input)?;
    tracing::info!("Sending {} from {}", format_bytes(data.len() as u64), input.display());

    let endpoint = UdpEndpoint::bind(config.local)?;
    let mut client = ClientSocket::with_endpoint(
        config.socket_config(),
        endpoint,
        config.remote,
        Some(config.impairment.clone()),
    )?;

    let start = Instant::now();
    client.connect()?;
    let acked = client.send(&data)?;
    client.disconnect();
    let elapsed = start.elapsed();

    display_client_stats(&client.stats(), elapsed);
    client.close();

    if acked < data.len() {
        anyhow::bail!(
            "Transfer incomplete: {} of {} bytes acknowledged",
            acked,
            data.len()
        );
    }
    tracing::info!("Transfer complete");
    Ok(())
}
