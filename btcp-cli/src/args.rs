//! Command line pieces shared by the client and server binaries

use btcp::Impairment;
use clap::Args;
use tracing_subscriber::EnvFilter;

/// Fault injection flags
#[derive(Args, Debug, Clone, Default)]
pub struct FaultArgs {
    /// Probability of dropping an outgoing segment
    #[arg(long)]
    pub loss: Option<f64>,

    /// Probability of duplicating an outgoing segment
    #[arg(long)]
    pub duplicate: Option<f64>,

    /// Probability of flipping one bit of an outgoing segment
    #[arg(long)]
    pub corrupt: Option<f64>,

    /// Fixed delay in milliseconds
    #[arg(long)]
    pub delay: Option<u64>,

    /// Random extra delay in milliseconds; reorders segments
    #[arg(long)]
    pub jitter: Option<u64>,

    /// Seed for reproducible faults
    #[arg(long)]
    pub seed: Option<u64>,
}

impl FaultArgs {
    /// Override the fields of `base` given on the command line
    pub fn apply(&self, mut base: Impairment) -> Impairment {
        if let Some(loss) = self.loss {
            base.loss = loss;
        }
        if let Some(duplicate) = self.duplicate {
            base.duplicate = duplicate;
        }
        if let Some(corrupt) = self.corrupt {
            base.corrupt = corrupt;
        }
        if let Some(delay) = self.delay {
            base.delay_ms = delay;
        }
        if let Some(jitter) = self.jitter {
            base.jitter_ms = jitter;
        }
        if self.seed.is_some() {
            base.seed = self.seed;
        }
        base
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins over the `-v` count.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
