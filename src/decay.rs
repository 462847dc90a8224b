//! Time-based freshness/decay model (spec §3 "Freshness", §4.7).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default time-to-live for neighbor, route and link-stat entries before
/// they are considered fully decayed (spec §4.7).
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Entries older than this many hours are hidden from display entirely,
/// regardless of their computed freshness (spec §4.7).
pub const GLOBAL_STALE_TTL_HOURS: u64 = 1;

/// Linear freshness in `0.0..=1.0`: `1.0` at `last_seen`, decaying linearly
/// to `0.0` at `last_seen + ttl`. An entry observed in the future relative
/// to `now` (clock skew) is pinned to `1.0` rather than extrapolated past 1
/// (spec §4.7).
pub fn freshness(last_seen: SystemTime, now: SystemTime, ttl: Duration) -> f64 {
    match now.duration_since(last_seen) {
        Err(_) => 1.0, // last_seen is in the future: clock skew, treat as fresh
        Ok(age) => {
            if ttl.is_zero() {
                return if age.is_zero() { 1.0 } else { 0.0 };
            }
            let ratio = age.as_secs_f64() / ttl.as_secs_f64();
            (1.0 - ratio).clamp(0.0, 1.0)
        }
    }
}

/// `freshness` scaled to a `u8` in `0..=255`, for compact display/encoding.
pub fn decay255(last_seen: SystemTime, now: SystemTime, ttl: Duration) -> u8 {
    (freshness(last_seen, now, ttl) * 255.0).round() as u8
}

/// Human-readable freshness bucket for UI display (spec §4.7).
pub fn display_string(last_seen: SystemTime, now: SystemTime, ttl: Duration) -> &'static str {
    if is_globally_stale(last_seen, now) {
        return "stale";
    }
    let f = freshness(last_seen, now, ttl);
    if f >= 0.75 {
        "fresh"
    } else if f >= 0.25 {
        "aging"
    } else if f > 0.0 {
        "decayed"
    } else {
        "expired"
    }
}

/// True once `last_seen` is older than `GLOBAL_STALE_TTL_HOURS`, regardless
/// of the entry's own TTL (spec §4.7 display-hiding threshold).
pub fn is_globally_stale(last_seen: SystemTime, now: SystemTime) -> bool {
    match now.duration_since(last_seen) {
        Err(_) => false,
        Ok(age) => age > Duration::from_secs(GLOBAL_STALE_TTL_HOURS * 3600),
    }
}

/// Sanitize a persisted epoch-seconds timestamp against "distant past"
/// sentinel values and nonsensical (zero or negative-looking) entries,
/// substituting `now` so a corrupted snapshot never produces an
/// artificially immortal or instantly-expired entry (spec §4.8).
pub fn sanitize_timestamp(epoch_secs: u64, now: SystemTime) -> SystemTime {
    /// Timestamps at or before this are treated as sentinel/corrupt values
    /// (roughly year 2000), not real observations.
    const MIN_PLAUSIBLE_EPOCH_SECS: u64 = 946_684_800;
    if epoch_secs <= MIN_PLAUSIBLE_EPOCH_SECS {
        return now;
    }
    UNIX_EPOCH + Duration::from_secs(epoch_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_decays_linearly_at_seed_scenario_checkpoints() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let ttl = Duration::from_secs(900);
        assert_eq!(freshness(t0, t0, ttl), 1.0);
        let half = freshness(t0, t0 + Duration::from_secs(450), ttl);
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(freshness(t0, t0 + Duration::from_secs(900), ttl), 0.0);
    }

    #[test]
    fn future_last_seen_is_pinned_to_fresh() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1000);
        let future = t0 + Duration::from_secs(10);
        assert_eq!(freshness(future, t0, Duration::from_secs(900)), 1.0);
    }

    #[test]
    fn decay255_maps_onto_full_byte_range() {
        let t0 = UNIX_EPOCH;
        let ttl = Duration::from_secs(100);
        assert_eq!(decay255(t0, t0, ttl), 255);
        assert_eq!(decay255(t0, t0 + Duration::from_secs(100), ttl), 0);
    }

    #[test]
    fn globally_stale_entries_display_as_stale_regardless_of_ttl() {
        let t0 = UNIX_EPOCH;
        let now = t0 + Duration::from_secs(25 * 3600);
        assert_eq!(display_string(t0, now, Duration::from_secs(60)), "stale");
    }

    #[test]
    fn sanitize_timestamp_replaces_sentinel_values() {
        let now = UNIX_EPOCH + Duration::from_secs(2_000_000_000);
        assert_eq!(sanitize_timestamp(0, now), now);
        assert_eq!(sanitize_timestamp(1, now), now);
        let real = sanitize_timestamp(1_900_000_000, now);
        assert_eq!(real, UNIX_EPOCH + Duration::from_secs(1_900_000_000));
    }
}
