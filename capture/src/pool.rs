//! Reference-counted frame buffer pool.
//!
//! Allocating ~6 MB pixel buffers per frame through the general allocator
//! would introduce enough jitter to drop frames at the target rate, so every
//! buffer is allocated once at startup and recycled. A slot cycles
//! producer → consumers → free list; the last handle to drop returns it to
//! the free list and wakes the producer. An exhausted pool is also the
//! pipeline's stall detector: it means a downstream consumer is too slow.
//!
//! Ownership encodes the single-writer window: [`FramePool::acquire`] hands
//! out an exclusive [`FrameMut`] which is the only type with mutable access
//! to the pixels; [`FrameMut::publish`] converts it into a shared, cloneable
//! [`FrameRef`] that is read-only for everyone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tracing::error;

/// Metadata captured alongside the pixel data at fill time.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    /// Monotonic sequence number assigned by the producer.
    pub seq: u64,
    /// Rolling frame index reported by the sensor hardware.
    pub hw_index: u16,
    /// Wall-clock time the frame was received.
    pub captured_at: SystemTime,
    /// False if the frame failed sync-word validation (still dispatched).
    pub sync_valid: bool,
}

impl Default for FrameMeta {
    fn default() -> Self {
        Self {
            seq: 0,
            hw_index: 0,
            captured_at: SystemTime::UNIX_EPOCH,
            sync_valid: false,
        }
    }
}

/// One frame's pixels and metadata.
#[derive(Debug)]
pub struct FrameData {
    /// Raw 8-bit pixel buffer. The allocation is stable for the lifetime of
    /// the pool; it is never reallocated or resized.
    pub pixels: Box<[u8]>,
    /// Fill-time metadata.
    pub meta: FrameMeta,
}

struct Slot {
    refs: AtomicU32,
    data: RwLock<FrameData>,
}

struct PoolShared {
    slots: Vec<Slot>,
    free: Mutex<VecDeque<usize>>,
    free_cv: Condvar,
    shutdown: AtomicBool,
    width: usize,
    height: usize,
}

impl PoolShared {
    fn release(&self, index: usize) {
        let slot = &self.slots[index];
        let previous = slot.refs.fetch_sub(1, Ordering::AcqRel);
        match previous {
            0 => {
                // Double release. The count has already wrapped; nothing can
                // be recovered from here.
                error!("frame released while its reference count was already zero");
                std::process::abort();
            }
            1 => {
                let mut free = self.free.lock().unwrap();
                free.push_back(index);
                drop(free);
                self.free_cv.notify_one();
            }
            _ => {}
        }
    }
}

/// Fixed-size pool of frame buffers. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    /// Allocate `capacity` buffers of `width * height` bytes.
    ///
    /// # Panics
    /// Panics if the frame geometry or capacity is zero; constructing the
    /// pool before the camera geometry is known is a programming defect.
    pub fn new(width: usize, height: usize, capacity: usize) -> Self {
        assert!(
            width > 0 && height > 0,
            "frame dimensions must be set before the pool is built"
        );
        assert!(capacity > 0, "pool capacity must be non-zero");

        let frame_len = width * height;
        let slots = (0..capacity)
            .map(|_| Slot {
                refs: AtomicU32::new(0),
                data: RwLock::new(FrameData {
                    pixels: vec![0u8; frame_len].into_boxed_slice(),
                    meta: FrameMeta::default(),
                }),
            })
            .collect();

        Self {
            shared: Arc::new(PoolShared {
                slots,
                free: Mutex::new((0..capacity).collect()),
                free_cv: Condvar::new(),
                shutdown: AtomicBool::new(false),
                width,
                height,
            }),
        }
    }

    /// Take a free frame, blocking while the pool is empty.
    ///
    /// Returns `None` once [`shutdown`](Self::shutdown) has been flagged.
    pub fn acquire(&self) -> Option<FrameMut> {
        let mut free = self.shared.free.lock().unwrap();
        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(index) = free.pop_front() {
                return Some(self.claim(index));
            }
            free = self.shared.free_cv.wait(free).unwrap();
        }
    }

    /// Take a free frame without blocking.
    pub fn try_acquire(&self) -> Option<FrameMut> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let index = self.shared.free.lock().unwrap().pop_front()?;
        Some(self.claim(index))
    }

    fn claim(&self, index: usize) -> FrameMut {
        let previous = self.shared.slots[index].refs.swap(1, Ordering::AcqRel);
        debug_assert_eq!(previous, 0, "slot on the free list had live references");
        FrameMut {
            shared: Some(Arc::clone(&self.shared)),
            index,
        }
    }

    /// Wake every waiter and make subsequent acquires fail.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.free_cv.notify_all();
    }

    /// Number of frames currently on the free list.
    pub fn free_len(&self) -> usize {
        self.shared.free.lock().unwrap().len()
    }

    /// Total number of frames owned by the pool.
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Frame width in pixels.
    pub fn width(&self) -> usize {
        self.shared.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> usize {
        self.shared.height
    }

    /// Size of one frame buffer in bytes.
    pub fn frame_len(&self) -> usize {
        self.shared.width * self.shared.height
    }
}

/// Exclusive handle over a freshly acquired frame.
///
/// This is the only type that can mutate pixel data. Dropping it without
/// publishing returns the slot to the free list, which is the producer's
/// path for camera timeouts.
pub struct FrameMut {
    shared: Option<Arc<PoolShared>>,
    index: usize,
}

impl FrameMut {
    /// Mutable access to pixels and metadata.
    pub fn data_mut(&mut self) -> RwLockWriteGuard<'_, FrameData> {
        let shared = self.shared.as_ref().expect("frame already published");
        shared.slots[self.index].data.write().unwrap()
    }

    /// Convert into a shared read-only reference. The count stays at 1.
    pub fn publish(mut self) -> FrameRef {
        let shared = self.shared.take().expect("frame published twice");
        FrameRef {
            shared,
            index: self.index,
        }
    }
}

impl Drop for FrameMut {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release(self.index);
        }
    }
}

/// Shared read-only reference to a pooled frame.
///
/// `clone` retains, `drop` releases; the handle that performs the final
/// release pushes the slot back onto the free list. The free-list mutex is
/// only ever taken after any queue lock has been dropped, which keeps the
/// lock order acyclic.
pub struct FrameRef {
    shared: Arc<PoolShared>,
    index: usize,
}

impl FrameRef {
    /// Read access to pixels and metadata.
    pub fn data(&self) -> RwLockReadGuard<'_, FrameData> {
        self.shared.slots[self.index].data.read().unwrap()
    }

    /// Current reference count; for diagnostics and tests.
    pub fn ref_count(&self) -> u32 {
        self.shared.slots[self.index].refs.load(Ordering::Acquire)
    }
}

impl Clone for FrameRef {
    fn clone(&self) -> Self {
        // Retain. We hold a reference, so the count is >= 1 and cannot race
        // down to zero underneath us.
        self.shared.slots[self.index].refs.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
            index: self.index,
        }
    }
}

impl Drop for FrameRef {
    fn drop(&mut self) {
        self.shared.release(self.index);
    }
}
