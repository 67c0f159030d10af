//! Statistics display and formatting

use btcp::{ClientStats, ServerStats};
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a byte count moved in `elapsed` as bits per second
pub fn format_throughput(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "N/A".to_string();
    }
    let bps = (bytes as f64 * 8.0 / secs) as u64;

    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;

    if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{}ms", millis);
    }

    let secs = duration.as_secs();
    let minutes = secs / 60;
    let seconds = secs % 60;

    if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Display client transfer statistics
pub fn display_client_stats(stats: &ClientStats, elapsed: Duration) {
    let retransmits = stats.timeout_retransmits + stats.fast_retransmits;
    eprintln!("\n┌───────────────────────────────────────────┐");
    eprintln!("│ CLIENT STATISTICS                         │");
    eprintln!("├───────────────────────────────────────────┤");
    eprintln!("│ Elapsed:      {:<28}│", format_duration(elapsed));
    eprintln!("│ Acknowledged: {:<28}│", format_bytes(stats.bytes_acked));
    eprintln!(
        "│ Throughput:   {:<28}│",
        format_throughput(stats.bytes_acked, elapsed)
    );
    eprintln!("│ Segments:     {:<28}│", stats.segments_sent);
    eprintln!(
        "│ Resent:       {:<28}│",
        format!(
            "{} ({} timeout, {} fast)",
            retransmits, stats.timeout_retransmits, stats.fast_retransmits
        )
    );
    eprintln!("│ Dup ACKs:     {:<28}│", stats.duplicate_acks);
    eprintln!("│ Dropped:      {:<28}│", stats.dropped);
    eprintln!("└───────────────────────────────────────────┘");
}

/// Display server transfer statistics
pub fn display_server_stats(stats: &ServerStats, elapsed: Duration) {
    eprintln!("\n┌───────────────────────────────────────────┐");
    eprintln!("│ SERVER STATISTICS                         │");
    eprintln!("├───────────────────────────────────────────┤");
    eprintln!("│ Elapsed:      {:<28}│", format_duration(elapsed));
    eprintln!("│ Delivered:    {:<28}│", format_bytes(stats.bytes_delivered));
    eprintln!(
        "│ Throughput:   {:<28}│",
        format_throughput(stats.bytes_delivered, elapsed)
    );
    eprintln!("│ Accepted:     {:<28}│", stats.segments_accepted);
    eprintln!("│ Dup ACKs:     {:<28}│", stats.duplicate_acks_sent);
    eprintln!("│ Corrupt:      {:<28}│", stats.corrupt_dropped);
    eprintln!("└───────────────────────────────────────────┘");
}
