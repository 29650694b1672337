//! Streaming SER writer.
//!
//! The writer appends frame bodies sequentially while keeping the 178-byte
//! header memory-mapped. After every append the `FrameCount` field is patched
//! in place through the mapping, so a recording that is interrupted by a crash
//! or power loss still describes exactly the frames that made it to disk.

use crate::header::{ColorId, SerHeader, FRAME_COUNT_OFFSET, HEADER_LEN};
use crate::timestamp;
use crate::{SerError, SerResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Parameters for a new recording.
#[derive(Debug, Clone)]
pub struct SerConfig {
    /// Image width in pixels.
    pub width: i32,
    /// Image height in pixels.
    pub height: i32,
    /// Color encoding of the frame data.
    pub color_id: ColorId,
    /// Bits per pixel per color plane, 1..=16.
    pub pixel_depth: i32,
    /// Observer name for the header, truncated to 40 ASCII characters.
    pub observer: String,
    /// Camera name for the header.
    pub instrument: String,
    /// Telescope name for the header.
    pub telescope: String,
    /// Record a per-frame UTC timestamp trailer at close.
    pub add_trailer: bool,
}

impl Default for SerConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            color_id: ColorId::Mono,
            pixel_depth: 8,
            observer: String::new(),
            instrument: String::new(),
            telescope: String::new(),
            add_trailer: true,
        }
    }
}

/// Writer for one SER recording.
///
/// Not `Sync`: the file is only ever written from a single task.
pub struct SerWriter {
    path: PathBuf,
    file: File,
    header_map: MmapMut,
    bytes_per_frame: usize,
    frames_written: i32,
    frame_timestamps: Vec<i64>,
    utc_offset_s: i64,
    add_trailer: bool,
    closed: bool,
}

impl SerWriter {
    /// Create (or truncate) the file at `path` and write a default header.
    pub fn create<P: AsRef<Path>>(path: P, config: SerConfig) -> SerResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| SerError::io("open", e))?;

        // Extend to the header length so the mapping below is backed by real
        // file space, then position the cursor for the first frame body.
        file.set_len(HEADER_LEN as u64)
            .map_err(|e| SerError::io("ftruncate", e))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| SerError::io("lseek", e))?;

        let mut header_map = unsafe {
            MmapOptions::new()
                .len(HEADER_LEN)
                .map_mut(&file)
                .map_err(|e| SerError::io("mmap", e))?
        };

        let utc_offset_s = timestamp::utc_offset_seconds();
        let (utc, local) = timestamp::now_ticks(utc_offset_s);
        let header = SerHeader {
            lu_id: 0,
            color_id: config.color_id,
            little_endian: false,
            width: config.width,
            height: config.height,
            pixel_depth: config.pixel_depth,
            frame_count: 0,
            observer: config.observer,
            instrument: config.instrument,
            telescope: config.telescope,
            date_time: local,
            date_time_utc: utc,
        };
        let bytes_per_frame = header.bytes_per_frame();
        header_map.copy_from_slice(&header.encode());

        Ok(Self {
            path,
            file,
            header_map,
            bytes_per_frame,
            frames_written: 0,
            frame_timestamps: Vec::new(),
            utc_offset_s,
            add_trailer: config.add_trailer,
            closed: false,
        })
    }

    /// Path of the recording, for free-space probes and diagnostics.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of one frame body in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Number of frames appended so far.
    pub fn frame_count(&self) -> i32 {
        self.frames_written
    }

    /// Append one frame body and bump the mapped `FrameCount` in place.
    ///
    /// # Panics
    /// Panics if `data` is not exactly one frame body long; a caller handing
    /// over a mis-sized buffer is a programming defect, not an I/O condition.
    pub fn add_frame(&mut self, data: &[u8]) -> SerResult<()> {
        assert_eq!(
            data.len(),
            self.bytes_per_frame,
            "frame size does not match the recording geometry"
        );

        if self.add_trailer {
            let (utc, _local) = timestamp::now_ticks(self.utc_offset_s);
            self.frame_timestamps.push(utc);
        }

        self.file
            .write_all(data)
            .map_err(|e| SerError::io("write", e))?;

        self.frames_written += 1;
        self.header_map[FRAME_COUNT_OFFSET..FRAME_COUNT_OFFSET + 4]
            .copy_from_slice(&self.frames_written.to_le_bytes());
        Ok(())
    }

    /// Finish the recording.
    ///
    /// A recording with zero frames is unlinked rather than left as an empty
    /// shell. Otherwise the optional timestamp trailer is appended and the
    /// mapped header flushed.
    pub fn close(mut self) -> SerResult<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> SerResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.frames_written == 0 {
            info!(
                "Deleting {} since no frames were written to it.",
                self.path.display()
            );
            return std::fs::remove_file(&self.path).map_err(|e| SerError::io("unlink", e));
        }

        let mapped_count = i32::from_le_bytes(
            self.header_map[FRAME_COUNT_OFFSET..FRAME_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(
            mapped_count, self.frames_written,
            "mapped FrameCount does not match frames appended"
        );

        if self.add_trailer {
            let mut trailer = Vec::with_capacity(self.frame_timestamps.len() * 8);
            for ticks in &self.frame_timestamps {
                trailer.extend_from_slice(&ticks.to_le_bytes());
            }
            self.file
                .write_all(&trailer)
                .map_err(|e| SerError::io("write", e))?;
        }

        self.header_map
            .flush()
            .map_err(|e| SerError::io("msync", e))?;
        Ok(())
    }
}

impl Drop for SerWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close_inner() {
                error!("SER file close failed during drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SerReader;
    use tempfile::TempDir;

    fn test_config(width: i32, height: i32, add_trailer: bool) -> SerConfig {
        SerConfig {
            width,
            height,
            instrument: "TestCam".to_string(),
            add_trailer,
            ..SerConfig::default()
        }
    }

    #[test]
    fn test_write_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ser");

        let mut writer = SerWriter::create(&path, test_config(8, 4, true)).unwrap();
        assert_eq!(writer.bytes_per_frame(), 32);
        for i in 0..5u8 {
            writer.add_frame(&[i; 32]).unwrap();
        }
        writer.close().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 178 + 5 * 32 + 5 * 8);

        let mut reader = SerReader::open(&path).unwrap();
        assert_eq!(reader.header().frame_count, 5);
        assert_eq!(reader.header().instrument, "TestCam");
        assert_eq!(reader.read_frame(3).unwrap(), vec![3u8; 32]);
        let stamps = reader.read_trailer().unwrap().unwrap();
        assert_eq!(stamps.len(), 5);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_no_trailer_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ser");

        let mut writer = SerWriter::create(&path, test_config(4, 4, false)).unwrap();
        writer.add_frame(&[7u8; 16]).unwrap();
        writer.close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 178 + 16);
        let mut reader = SerReader::open(&path).unwrap();
        assert!(reader.read_trailer().unwrap().is_none());
    }

    #[test]
    fn test_empty_recording_is_unlinked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.ser");

        let writer = SerWriter::create(&path, test_config(8, 8, true)).unwrap();
        assert!(path.exists());
        writer.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_recording_unlinked_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.ser");

        let writer = SerWriter::create(&path, test_config(8, 8, true)).unwrap();
        drop(writer);
        assert!(!path.exists());
    }

    #[test]
    fn test_frame_count_patched_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ser");

        let mut writer = SerWriter::create(&path, test_config(2, 2, false)).unwrap();
        writer.add_frame(&[0u8; 4]).unwrap();
        writer.add_frame(&[0u8; 4]).unwrap();

        // The on-disk count reflects every append even before close.
        let bytes = std::fs::read(&path).unwrap();
        let count = i32::from_le_bytes(bytes[38..42].try_into().unwrap());
        assert_eq!(count, 2);
        writer.close().unwrap();
    }

    #[test]
    #[should_panic(expected = "frame size")]
    fn test_wrong_frame_size_panics() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ser");
        let mut writer = SerWriter::create(&path, test_config(8, 8, false)).unwrap();
        let _ = writer.add_frame(&[0u8; 3]);
    }
}
