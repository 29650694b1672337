//! SER timestamp encoding.
//!
//! SER stores timestamps as "VB ticks": 100-nanosecond intervals since
//! midnight, January 1 of year 1 in the proleptic Gregorian calendar. The
//! epoch is historical baggage of the format; all conversions are confined to
//! this module so the rest of the crate works in Unix time.

use chrono::Local;
use std::time::{SystemTime, UNIX_EPOCH};

/// VB ticks at the Unix epoch (1970-01-01T00:00:00Z).
pub const VB_TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

/// VB ticks per second.
pub const VB_TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert nanoseconds since the Unix epoch to VB ticks.
pub fn vb_ticks_from_unix_ns(ns: i64) -> i64 {
    ns / 100 + VB_TICKS_AT_UNIX_EPOCH
}

/// Convert VB ticks back to nanoseconds since the Unix epoch.
///
/// Ticks are coarser than nanoseconds, so the sub-100 ns remainder of the
/// original value is lost.
pub fn vb_ticks_to_unix_ns(ticks: i64) -> i64 {
    (ticks - VB_TICKS_AT_UNIX_EPOCH) * 100
}

/// Local-time UTC offset in seconds.
pub fn utc_offset_seconds() -> i64 {
    Local::now().offset().local_minus_utc() as i64
}

/// Current time as a `(utc, local)` pair of VB ticks.
///
/// The local stamp is the UTC stamp shifted by the given offset, matching how
/// the header's `DateTime` and `DateTime_UTC` fields relate.
pub fn now_ticks(utc_offset_s: i64) -> (i64, i64) {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let utc = vb_ticks_from_unix_ns(since_epoch.as_nanos() as i64);
    let local = utc + utc_offset_s * VB_TICKS_PER_SECOND;
    (utc, local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch_maps_to_epoch_constant() {
        assert_eq!(vb_ticks_from_unix_ns(0), VB_TICKS_AT_UNIX_EPOCH);
        assert_eq!(vb_ticks_to_unix_ns(VB_TICKS_AT_UNIX_EPOCH), 0);
    }

    #[test]
    fn test_roundtrip_drops_sub_tick_remainder() {
        for ns in [0i64, 99, 100, 101, 1_234_567_891_234_567_890] {
            let roundtrip = vb_ticks_to_unix_ns(vb_ticks_from_unix_ns(ns));
            assert_eq!(roundtrip, ns - ns % 100);
        }
    }

    #[test]
    fn test_one_second_is_ten_million_ticks() {
        let t0 = vb_ticks_from_unix_ns(0);
        let t1 = vb_ticks_from_unix_ns(1_000_000_000);
        assert_eq!(t1 - t0, VB_TICKS_PER_SECOND);
    }

    #[test]
    fn test_local_offset_applied_to_pair() {
        let (utc, local) = now_ticks(3600);
        assert_eq!(local - utc, 3600 * VB_TICKS_PER_SECOND);
        assert!(utc > VB_TICKS_AT_UNIX_EPOCH);
    }
}
