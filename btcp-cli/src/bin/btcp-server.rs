//! bTCP Server - reliable file receiver
//!
//! Accepts one bTCP connection and writes everything received to a file (or
//! stdout) until the client disconnects.

use btcp::io::UdpEndpoint;
use btcp::ServerSocket;
use btcp_cli::{display_server_stats, format_bytes, init_tracing, Config, FaultArgs};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "btcp-server")]
#[command(about = "bTCP reliable file receiver", long_about = None)]
struct Args {
    /// Output file, '-' for stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Advertised window in segments
    #[arg(short, long)]
    window: Option<u8>,

    /// Timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Local bind address
    #[arg(long)]
    local: Option<SocketAddr>,

    /// Client address
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

fn open_output(path: &Path) -> io::Result<Box<dyn Write>> {
    if path == Path::new("-") {
        Ok(Box::new(io::stdout().lock()))
    } else {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::load(args.config.as_deref())?
        .server
        .unwrap_or_default();
    if let Some(output) = args.output {
        config.output = Some(output);
    }
    if let Some(window) = args.window {
        config.window = window;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(local) = args.local {
        config.local = local;
    }
    if let Some(remote) = args.remote {
        config.remote = remote;
    }
    config.impairment = args.faults.apply(config.impairment);

    let Some(output) = config.output.as_deref() else {
        anyhow::bail!("No output given; use --output or set server.output in the config file");
    };
    let mut writer = open_output(output)?;

    let endpoint = UdpEndpoint::bind(config.local)?;
    let mut server = ServerSocket::with_endpoint(
        config.socket_config(),
        endpoint,
        config.remote,
        Some(config.impairment.clone()),
    )?;

    tracing::info!("Listening on {}", server.local_addr());
    server.accept()?;

    let start = Instant::now();
    let mut total = 0u64;
    for chunk in server.incoming() {
        writer.write_all(&chunk)?;
        total += chunk.len() as u64;
    }
    writer.flush()?;
    let elapsed = start.elapsed();

    tracing::info!("Received {} into {}", format_bytes(total), output.display());
    display_server_stats(&server.stats(), elapsed);
    server.close();
    Ok(())
}
