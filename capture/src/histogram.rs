//! Pixel histogram and derived statistics.
//!
//! Shared by the AGC (control law inputs) and the preview (log-scale
//! histogram display).

/// Number of histogram bins for 8-bit data.
pub const BINS: usize = 256;

/// Full-frame 256-bin histogram.
pub fn histogram(pixels: &[u8]) -> [u32; BINS] {
    let mut hist = [0u32; BINS];
    for &px in pixels {
        hist[px as usize] += 1;
    }
    hist
}

/// Smallest pixel value `v` such that at least `fraction` of all pixels have
/// values `<= v`. Returns 0 for an empty histogram.
pub fn percentile_value(hist: &[u32; BINS], fraction: f64) -> u8 {
    let total: u64 = hist.iter().map(|&c| c as u64).sum();
    if total == 0 {
        return 0;
    }
    let threshold = (fraction * total as f64).ceil() as u64;
    let mut cumulative = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        cumulative += count as u64;
        if cumulative >= threshold {
            return value as u8;
        }
    }
    (BINS - 1) as u8
}

/// Largest pixel value with a non-zero count; 0 for an empty histogram.
pub fn max_pixel_value(hist: &[u32; BINS]) -> u8 {
    hist.iter()
        .rposition(|&count| count > 0)
        .unwrap_or(0) as u8
}

/// Bin heights for a log-y histogram plot, normalized to 0.0..=1.0.
///
/// The scale maxes out at `log10(total)`, i.e. a bin containing every pixel
/// reaches 1.0, matching the preview's fixed-scale plot.
pub fn log_normalized(hist: &[u32; BINS]) -> [f32; BINS] {
    let total: u64 = hist.iter().map(|&c| c as u64).sum();
    let mut heights = [0f32; BINS];
    if total == 0 {
        return heights;
    }
    let max_log = (total as f64).log10().max(1.0);
    for (height, &count) in heights.iter_mut().zip(hist.iter()) {
        if count > 0 {
            *height = ((count as f64).log10() / max_log).max(0.0) as f32;
        }
    }
    heights
}
