//! Wall-clock helpers.
//!
//! All timestamps and expiry deadlines in this crate are expressed in
//! nanoseconds since the Unix epoch. An expiry of zero means "never".

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    nanos_since_epoch(SystemTime::now())
}

/// Converts an absolute [`SystemTime`] into epoch nanoseconds.
pub fn nanos_since_epoch(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Absolute expiry deadline, `ttl_secs` from now.
pub fn deadline_nanos(ttl_secs: i64) -> i64 {
    nanos_since_epoch(SystemTime::now() + Duration::from_secs(ttl_secs.max(0) as u64))
}

/// Whole seconds remaining until `expiry_ns`, if it is still in the future.
pub fn seconds_until(expiry_ns: i64) -> Option<i64> {
    let remaining = expiry_ns - now_nanos();
    if remaining <= 0 {
        return None;
    }
    Some(remaining / 1_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_is_in_the_future() {
        let deadline = deadline_nanos(60);
        assert!(deadline > now_nanos());
        let secs = seconds_until(deadline).expect("deadline should be ahead");
        assert!((58..=60).contains(&secs));
    }

    #[test]
    fn test_seconds_until_past_deadline() {
        assert_eq!(seconds_until(now_nanos() - 1), None);
        assert_eq!(seconds_until(1), None);
    }
}
