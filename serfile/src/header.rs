//! Fixed 178-byte SER header codec.
//!
//! All multi-byte fields are little-endian. Field order and sizes follow the
//! v3 format document; offsets are fixed so the frame count can be patched in
//! place at offset 38 while a recording is in progress.

use crate::{SerError, SerResult};

/// Historical file tag carried by every SER file.
pub const FILE_ID: &[u8; 14] = b"LUCAM-RECORDER";

/// Total header length in bytes.
pub const HEADER_LEN: usize = 178;

/// Byte offset of the `FrameCount` field within the header.
pub const FRAME_COUNT_OFFSET: usize = 38;

const OBSERVER_OFFSET: usize = 42;
const INSTRUMENT_OFFSET: usize = 82;
const TELESCOPE_OFFSET: usize = 122;
const DATETIME_OFFSET: usize = 162;
const DATETIME_UTC_OFFSET: usize = 170;
const METADATA_FIELD_LEN: usize = 40;

/// How color information is encoded in the frame data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ColorId {
    /// Single monochrome plane.
    Mono = 0,
    /// Bayer mosaic, RGGB pattern.
    BayerRggb = 8,
    /// Bayer mosaic, GRBG pattern.
    BayerGrbg = 9,
    /// Bayer mosaic, GBRG pattern.
    BayerGbrg = 10,
    /// Bayer mosaic, BGGR pattern.
    BayerBggr = 11,
    /// CMY mosaic, CYYM pattern.
    BayerCyym = 16,
    /// CMY mosaic, YCMY pattern.
    BayerYcmy = 17,
    /// CMY mosaic, YMCY pattern.
    BayerYmcy = 18,
    /// CMY mosaic, MYYC pattern.
    BayerMyyc = 19,
    /// Three interleaved planes, R-G-B order.
    Rgb = 100,
    /// Three interleaved planes, B-G-R order.
    Bgr = 101,
}

impl ColorId {
    /// Number of color planes per pixel.
    pub fn planes(self) -> usize {
        match self {
            ColorId::Rgb | ColorId::Bgr => 3,
            _ => 1,
        }
    }
}

impl TryFrom<i32> for ColorId {
    type Error = SerError;

    fn try_from(value: i32) -> SerResult<Self> {
        Ok(match value {
            0 => ColorId::Mono,
            8 => ColorId::BayerRggb,
            9 => ColorId::BayerGrbg,
            10 => ColorId::BayerGbrg,
            11 => ColorId::BayerBggr,
            16 => ColorId::BayerCyym,
            17 => ColorId::BayerYcmy,
            18 => ColorId::BayerYmcy,
            19 => ColorId::BayerMyyc,
            100 => ColorId::Rgb,
            101 => ColorId::Bgr,
            other => return Err(SerError::UnknownColorId(other)),
        })
    }
}

/// Size of one frame body in bytes for the given geometry and depth.
pub fn bytes_per_frame(width: i32, height: i32, pixel_depth: i32, color_id: ColorId) -> usize {
    let bytes_per_plane = ((pixel_depth - 1) / 8 + 1) as usize;
    width as usize * height as usize * bytes_per_plane * color_id.planes()
}

/// Decoded SER header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerHeader {
    /// Unused legacy field, zero in practice.
    pub lu_id: i32,
    /// Color encoding of the frame data.
    pub color_id: ColorId,
    /// True if 16-bit samples are little-endian.
    pub little_endian: bool,
    /// Image width in pixels.
    pub width: i32,
    /// Image height in pixels.
    pub height: i32,
    /// Bits per pixel per color plane, 1..=16.
    pub pixel_depth: i32,
    /// Number of frame bodies in the file.
    pub frame_count: i32,
    /// Observer name, at most 40 ASCII characters.
    pub observer: String,
    /// Camera name, at most 40 ASCII characters.
    pub instrument: String,
    /// Telescope name, at most 40 ASCII characters.
    pub telescope: String,
    /// Recording start, local time, in VB ticks.
    pub date_time: i64,
    /// Recording start, UTC, in VB ticks.
    pub date_time_utc: i64,
}

impl SerHeader {
    /// Size of one frame body described by this header.
    pub fn bytes_per_frame(&self) -> usize {
        bytes_per_frame(self.width, self.height, self.pixel_depth, self.color_id)
    }

    /// Serialize into the fixed 178-byte layout.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..14].copy_from_slice(FILE_ID);
        buf[14..18].copy_from_slice(&self.lu_id.to_le_bytes());
        buf[18..22].copy_from_slice(&(self.color_id as i32).to_le_bytes());
        buf[22..26].copy_from_slice(&(self.little_endian as i32).to_le_bytes());
        buf[26..30].copy_from_slice(&self.width.to_le_bytes());
        buf[30..34].copy_from_slice(&self.height.to_le_bytes());
        buf[34..38].copy_from_slice(&self.pixel_depth.to_le_bytes());
        buf[38..42].copy_from_slice(&self.frame_count.to_le_bytes());
        encode_metadata_field(&mut buf[OBSERVER_OFFSET..], &self.observer);
        encode_metadata_field(&mut buf[INSTRUMENT_OFFSET..], &self.instrument);
        encode_metadata_field(&mut buf[TELESCOPE_OFFSET..], &self.telescope);
        buf[DATETIME_OFFSET..DATETIME_OFFSET + 8].copy_from_slice(&self.date_time.to_le_bytes());
        buf[DATETIME_UTC_OFFSET..DATETIME_UTC_OFFSET + 8]
            .copy_from_slice(&self.date_time_utc.to_le_bytes());
        buf
    }

    /// Parse and validate a 178-byte header.
    pub fn parse(buf: &[u8; HEADER_LEN]) -> SerResult<Self> {
        if &buf[0..14] != FILE_ID {
            return Err(SerError::BadFileTag);
        }

        let color_id = ColorId::try_from(read_i32(buf, 18))?;
        let pixel_depth = read_i32(buf, 34);
        if !(1..=16).contains(&pixel_depth) {
            return Err(SerError::BadPixelDepth(pixel_depth));
        }
        let width = read_i32(buf, 26);
        let height = read_i32(buf, 30);
        if width <= 0 || height <= 0 {
            return Err(SerError::BadDimensions { width, height });
        }

        Ok(SerHeader {
            lu_id: read_i32(buf, 14),
            color_id,
            little_endian: read_i32(buf, 22) != 0,
            width,
            height,
            pixel_depth,
            frame_count: read_i32(buf, FRAME_COUNT_OFFSET),
            observer: decode_metadata_field(&buf[OBSERVER_OFFSET..INSTRUMENT_OFFSET]),
            instrument: decode_metadata_field(&buf[INSTRUMENT_OFFSET..TELESCOPE_OFFSET]),
            telescope: decode_metadata_field(&buf[TELESCOPE_OFFSET..DATETIME_OFFSET]),
            date_time: read_i64(buf, DATETIME_OFFSET),
            date_time_utc: read_i64(buf, DATETIME_UTC_OFFSET),
        })
    }
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn read_i64(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

// Fixed 40-byte ASCII field, unused bytes zero-filled. Longer strings are
// truncated; non-ASCII bytes are replaced so a header can always be written.
fn encode_metadata_field(buf: &mut [u8], value: &str) {
    let field = &mut buf[..METADATA_FIELD_LEN];
    field.fill(0);
    for (dst, ch) in field.iter_mut().zip(value.chars()) {
        *dst = if ch.is_ascii() { ch as u8 } else { b'?' };
    }
}

fn decode_metadata_field(buf: &[u8]) -> String {
    buf[..METADATA_FIELD_LEN]
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}
