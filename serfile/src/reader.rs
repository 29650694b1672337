//! SER reader for validation and post-capture inspection.

use crate::header::{SerHeader, HEADER_LEN};
use crate::{SerError, SerResult};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Read-only view of a SER recording.
pub struct SerReader {
    file: File,
    header: SerHeader,
    bytes_per_frame: usize,
    has_trailer: bool,
}

impl SerReader {
    /// Open and validate a recording.
    ///
    /// The file length must equal `178 + frames * bytes_per_frame`, optionally
    /// plus `8 * frames` when a timestamp trailer is present; anything else is
    /// a truncated or corrupt container.
    pub fn open<P: AsRef<Path>>(path: P) -> SerResult<Self> {
        let mut file = File::open(path).map_err(|e| SerError::io("open", e))?;

        let mut buf = [0u8; HEADER_LEN];
        file.read_exact(&mut buf)
            .map_err(|e| SerError::io("read", e))?;
        let header = SerHeader::parse(&buf)?;

        let bytes_per_frame = header.bytes_per_frame();
        let frames = header.frame_count as u64;
        let body_end = HEADER_LEN as u64 + frames * bytes_per_frame as u64;
        let with_trailer = body_end + 8 * frames;

        let actual = file
            .metadata()
            .map_err(|e| SerError::io("fstat", e))?
            .len();
        let has_trailer = if actual == body_end {
            false
        } else if actual == with_trailer && frames > 0 {
            true
        } else {
            return Err(SerError::LengthMismatch {
                expected: body_end,
                actual,
            });
        };

        Ok(Self {
            file,
            header,
            bytes_per_frame,
            has_trailer,
        })
    }

    /// The parsed header.
    pub fn header(&self) -> &SerHeader {
        &self.header
    }

    /// Whether the recording carries a timestamp trailer.
    pub fn has_trailer(&self) -> bool {
        self.has_trailer
    }

    /// Read frame body `index` (zero-based).
    pub fn read_frame(&mut self, index: usize) -> SerResult<Vec<u8>> {
        if index >= self.header.frame_count as usize {
            return Err(SerError::FrameOutOfRange(index));
        }

        let offset = HEADER_LEN as u64 + index as u64 * self.bytes_per_frame as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| SerError::io("lseek", e))?;

        let mut frame = vec![0u8; self.bytes_per_frame];
        self.file
            .read_exact(&mut frame)
            .map_err(|e| SerError::io("read", e))?;
        Ok(frame)
    }

    /// Read the trailer timestamps, or `None` if the file has no trailer.
    pub fn read_trailer(&mut self) -> SerResult<Option<Vec<i64>>> {
        if !self.has_trailer {
            return Ok(None);
        }

        let frames = self.header.frame_count as usize;
        let offset = HEADER_LEN as u64 + frames as u64 * self.bytes_per_frame as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| SerError::io("lseek", e))?;

        let mut raw = vec![0u8; frames * 8];
        self.file
            .read_exact(&mut raw)
            .map_err(|e| SerError::io("read", e))?;

        Ok(Some(
            raw.chunks_exact(8)
                .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SerConfig, SerWriter};
    use tempfile::TempDir;

    #[test]
    fn test_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trunc.ser");

        let mut writer = SerWriter::create(
            &path,
            SerConfig {
                width: 4,
                height: 4,
                add_trailer: false,
                ..SerConfig::default()
            },
        )
        .unwrap();
        writer.add_frame(&[1u8; 16]).unwrap();
        writer.add_frame(&[2u8; 16]).unwrap();
        writer.close().unwrap();

        // Chop off half of the last frame body.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(178 + 16 + 8).unwrap();

        assert!(matches!(
            SerReader::open(&path),
            Err(SerError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_frame_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.ser");

        let mut writer = SerWriter::create(
            &path,
            SerConfig {
                width: 4,
                height: 4,
                add_trailer: false,
                ..SerConfig::default()
            },
        )
        .unwrap();
        writer.add_frame(&[1u8; 16]).unwrap();
        writer.close().unwrap();

        let mut reader = SerReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_frame(1),
            Err(SerError::FrameOutOfRange(1))
        ));
    }
}
