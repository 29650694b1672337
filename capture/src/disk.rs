//! Disk writer: lossless FIFO consumer appending frames to a SER container.
//!
//! Writing is gated by the `disk_write_enabled` control so a recording can
//! be paused and resumed from the preview without tearing the file down. A
//! free-space probe runs every [`FREE_SPACE_CHECK_INTERVAL`] frames and
//! pauses writing before the filesystem fills. A failed append leaves a
//! corrupt container behind it, so it is fatal and escalates to shutdown.

use crate::runtime::Runtime;
use anyhow::{Context, Result};
use serfile::SerWriter;
use std::path::Path;
use tracing::{error, info, warn};

/// Writes are disabled once free space falls to this level.
pub const MIN_FREE_DISK_SPACE_BYTES: u64 = 100 * 1024 * 1024;

/// Frames between free-space probes, to amortize the statvfs cost.
pub const FREE_SPACE_CHECK_INTERVAL: u64 = 100;

/// Run the disk writer until the to-disk queue is closed and drained.
///
/// Consumes the writer; the SER file is closed (or unlinked, if empty) on
/// the way out, after the shutdown backlog has been flushed.
pub fn run(runtime: &Runtime, mut ser_file: Option<SerWriter>) -> Result<()> {
    info!("Disk thread running.");
    let mut processed: u64 = 0;

    while let Some(frame) = runtime.to_disk.pop_blocking() {
        if runtime.controls.disk_write_enabled() {
            if let Some(writer) = ser_file.as_mut() {
                if processed % FREE_SPACE_CHECK_INTERVAL == 0 {
                    check_free_space(runtime, writer.path());
                }

                let data = frame.data();
                if let Err(e) = writer.add_frame(&data.pixels) {
                    error!("Frame write failed; aborting capture: {e}");
                    drop(data);
                    drop(frame);
                    runtime.shutdown();
                    return Err(e).context("appending frame to SER file");
                }
            }
        }
        drop(frame);
        processed += 1;
    }

    if let Some(writer) = ser_file.take() {
        let frames = writer.frame_count();
        writer.close().context("closing SER file")?;
        info!("Recording closed with {frames} frames.");
    }
    info!("Disk thread ending.");
    Ok(())
}

fn check_free_space(runtime: &Runtime, path: &Path) {
    match free_space_bytes(path) {
        Ok(free) if free <= MIN_FREE_DISK_SPACE_BYTES => {
            warn!("Disk is nearly full! Disabled writes: frames going to bit bucket!");
            runtime.controls.set_disk_write_enabled(false);
        }
        Ok(_) => {}
        Err(e) => error!("Tried to check disk space with statvfs but the call failed: {e}"),
    }
}

/// Free bytes available to unprivileged users on the filesystem at `path`.
pub fn free_space_bytes(path: &Path) -> std::io::Result<u64> {
    use std::os::unix::ffi::OsStrExt;

    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stats) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(stats.f_bsize as u64 * stats.f_bavail as u64)
}
