//! Best-effort realtime scheduling for latency-sensitive threads.
//!
//! The producer and disk writer run under `SCHED_RR` when the process has
//! the privilege; without it the pipeline still works, it just drops more
//! frames under contention. Elevation failure is therefore a warning, never
//! an error.

use std::io;

/// Round-robin priority used for the producer and disk threads.
pub const CAPTURE_RT_PRIORITY: i32 = 10;

/// Promote the calling thread to `SCHED_RR` at the given priority.
pub fn promote_current_thread(priority: i32) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Promote the calling thread, logging instead of failing.
pub fn promote_current_thread_best_effort(name: &str) {
    match promote_current_thread(CAPTURE_RT_PRIORITY) {
        Ok(()) => tracing::info!("{name} thread promoted to SCHED_RR priority {CAPTURE_RT_PRIORITY}"),
        Err(e) => tracing::warn!("Could not set realtime priority for {name} thread: {e}"),
    }
}

/// Rename the calling thread (spawned workers are named via
/// `thread::Builder`; this covers the main thread). At most 15 bytes stick.
pub fn set_current_thread_name(name: &str) {
    let truncated: String = name.chars().take(15).collect();
    let Ok(cname) = std::ffi::CString::new(truncated) else {
        return;
    };
    let rc = unsafe { libc::pthread_setname_np(libc::pthread_self(), cname.as_ptr()) };
    if rc != 0 {
        tracing::warn!(
            "Failed to set thread name to '{name}': {}",
            io::Error::from_raw_os_error(rc)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_does_not_panic() {
        // Usually fails without CAP_SYS_NICE; either outcome is acceptable.
        promote_current_thread_best_effort("test");
    }
}
