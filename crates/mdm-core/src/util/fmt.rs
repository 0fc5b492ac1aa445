//! Human-readable formatting for sizes, rates, and durations.

/// Format byte counts with SI prefixes.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000_000 {
        format!("{:.2} TB", bytes as f64 / 1_000_000_000_000.0)
    } else if bytes >= 1_000_000_000 {
        format!("{:.2} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a transfer rate in bytes per second (the `speed` field of progress
/// events uses this shape).
pub fn format_throughput(bps: f64) -> String {
    if bps >= 1_000_000_000.0 {
        format!("{:.1} GB/s", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.1} MB/s", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.1} KB/s", bps / 1_000.0)
    } else {
        format!("{:.0} B/s", bps)
    }
}

/// Compact duration, e.g. "5s", "2m30s", "1h15m".
pub fn format_duration_compact(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1_500), "1.5 KB");
        assert_eq!(format_bytes(10_485_760), "10.5 MB");
        assert_eq!(format_bytes(2_340_000_000), "2.34 GB");
    }

    #[test]
    fn throughput() {
        assert_eq!(format_throughput(800.0), "800 B/s");
        assert_eq!(format_throughput(2_400_000.0), "2.4 MB/s");
    }

    #[test]
    fn durations() {
        use std::time::Duration;
        assert_eq!(format_duration_compact(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration_compact(Duration::from_secs(150)), "2m30s");
        assert_eq!(format_duration_compact(Duration::from_secs(4500)), "1h15m");
    }
}
