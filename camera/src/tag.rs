//! Frame integrity markers.
//!
//! The sensor FPGA overwrites a handful of pixels in every raw frame: a sync
//! word in the first two bytes and the last two bytes, and a 16-bit rolling
//! frame index in bytes 2..4. The markers let the pipeline detect torn USB
//! transfers without checksumming six megabytes per frame.

/// Magic marker expected at both ends of a raw frame (little-endian).
pub const SYNC_WORD: u16 = 0x7e5a;

/// Smallest buffer that can carry both markers and the index.
pub const MIN_TAGGED_LEN: usize = 6;

/// Parsed per-frame markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTag {
    /// Rolling hardware frame index.
    pub index: u16,
    /// True if both sync words matched.
    pub sync_valid: bool,
}

/// Stamp sync words and a frame index into a raw buffer.
///
/// Used by synthetic devices; real hardware stamps frames on its own.
pub fn stamp(buf: &mut [u8], index: u16) {
    assert!(buf.len() >= MIN_TAGGED_LEN, "buffer too small to tag");
    buf[0..2].copy_from_slice(&SYNC_WORD.to_le_bytes());
    buf[2..4].copy_from_slice(&index.to_le_bytes());
    let len = buf.len();
    buf[len - 2..].copy_from_slice(&SYNC_WORD.to_le_bytes());
}

/// Parse the markers from a raw frame.
pub fn validate(buf: &[u8]) -> FrameTag {
    if buf.len() < MIN_TAGGED_LEN {
        return FrameTag {
            index: 0,
            sync_valid: false,
        };
    }
    let leading = u16::from_le_bytes([buf[0], buf[1]]);
    let trailing = u16::from_le_bytes([buf[buf.len() - 2], buf[buf.len() - 1]]);
    FrameTag {
        index: u16::from_le_bytes([buf[2], buf[3]]),
        sync_valid: leading == SYNC_WORD && trailing == SYNC_WORD,
    }
}

/// Whether a frame index is a plausible successor of the previous one.
///
/// The hardware counter sometimes advances by 2 even at low frame rates, so
/// both +1 and +2 (with wraparound) are accepted.
pub fn index_step_ok(previous: u16, current: u16) -> bool {
    current == previous.wrapping_add(1) || current == previous.wrapping_add(2)
}
