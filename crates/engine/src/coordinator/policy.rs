//! Backup poll policy

use std::time::Duration;

/// Whether a backup-timer firing should refetch the snapshot.
///
/// Refetch when the stream is down, or when the last successful fetch is
/// at least two intervals old (or never happened).
pub fn should_refresh(
    stream_connected: bool,
    since_last_fetch: Option<Duration>,
    interval: Duration,
) -> bool {
    if !stream_connected {
        return true;
    }
    match since_last_fetch {
        Some(age) => age >= interval.saturating_mul(2),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(60);

    #[test]
    fn test_healthy_stream_suppresses_poll() {
        assert!(!should_refresh(true, Some(Duration::from_secs(10)), INTERVAL));
        assert!(!should_refresh(true, Some(Duration::from_secs(119)), INTERVAL));
    }

    #[test]
    fn test_stale_or_disconnected_polls() {
        assert!(should_refresh(true, Some(Duration::from_secs(120)), INTERVAL));
        assert!(should_refresh(true, None, INTERVAL));
        assert!(should_refresh(false, Some(Duration::from_secs(1)), INTERVAL));
    }
}
