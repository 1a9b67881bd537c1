//! Reusable frame buffer pool
//!
//! Frames are keyed by resolution and pixel format. `allocate` hands out a
//! free frame of the same key when one exists and builds a new buffer
//! otherwise; `release` puts it back for the next caller.
//!
//! Releasing a frame moves it into the pool, so a frame cannot be released
//! twice. A frame that is dropped instead of released loses its buffer, but
//! the lease it carries gives its slot back to the pool.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use super::format::{PixelFormat, Resolution};
use super::frame::{plane_layout, ImageFrame};
use crate::error::{AppError, Result};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Frame pool configuration
#[derive(Debug, Clone)]
pub struct FramePoolConfig {
    /// Upper bound on buffers alive at once, free or handed out (0 = unlimited)
    pub max_buffers: usize,
    /// Free buffers kept per geometry; extra releases are dropped
    pub max_free_per_geometry: usize,
    /// Row alignment of every plane (power of two)
    pub stride_align: usize,
    /// Largest single buffer the pool will build, in bytes (0 = unlimited)
    pub max_frame_bytes: usize,
}

impl Default for FramePoolConfig {
    fn default() -> Self {
        Self {
            max_buffers: 16,
            max_free_per_geometry: 4,
            stride_align: 1,
            max_frame_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Pool bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers constructed over the pool's lifetime
    pub buffers_created: u64,
    /// Allocations satisfied from the free collection
    pub reuses: u64,
    /// Frames handed out and not yet released
    pub outstanding: usize,
    /// Frames sitting in the free collection
    pub free: usize,
    /// Allocations that failed (limit or memory)
    pub allocation_failures: u64,
    /// Free buffers dropped to make room or to respect the per-geometry cap
    pub evictions: u64,
    /// Handed-out frames dropped without being released
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    resolution: Resolution,
    format: PixelFormat,
}

#[derive(Default)]
struct PoolInner {
    free: HashMap<FrameKey, Vec<ImageFrame>>,
    /// Buffers counted against `max_buffers` (free + outstanding)
    live: usize,
    stats: PoolStats,
}

impl PoolInner {
    /// Drop one free buffer of a different geometry
    fn evict_other(&mut self, keep: FrameKey) -> bool {
        let victim = self
            .free
            .iter_mut()
            .find(|(key, frames)| **key != keep && !frames.is_empty())
            .and_then(|(_, frames)| frames.pop());

        match victim {
            Some(frame) => {
                debug!(
                    "Evicting free {} {} buffer #{}",
                    frame.resolution(),
                    frame.format(),
                    frame.buffer_id()
                );
                self.free.retain(|_, frames| !frames.is_empty());
                self.live -= 1;
                self.stats.free -= 1;
                self.stats.evictions += 1;
                true
            }
            None => false,
        }
    }
}

/// Claim on a pool slot held by a handed-out frame.
///
/// Dropping an armed lease gives the slot back; `release` disarms it first.
#[derive(Debug)]
pub(crate) struct PoolLease {
    pool: Weak<Mutex<PoolInner>>,
}

impl PoolLease {
    fn disarm(mut self) {
        self.pool = Weak::new();
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let mut inner = pool.lock();
        inner.live = inner.live.saturating_sub(1);
        inner.stats.outstanding = inner.stats.outstanding.saturating_sub(1);
        inner.stats.dropped += 1;
        debug!("Frame dropped without release, slot returned to pool");
    }
}

/// Thread-safe pool of decoded frame buffers
pub struct FramePool {
    id: u64,
    config: FramePoolConfig,
    next_buffer_id: AtomicU64,
    inner: Arc<Mutex<PoolInner>>,
}

impl FramePool {
    pub fn new(config: FramePoolConfig) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            next_buffer_id: AtomicU64::new(1),
            inner: Arc::new(Mutex::new(PoolInner::default())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &FramePoolConfig {
        &self.config
    }

    fn lease(&self) -> PoolLease {
        PoolLease {
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Get a frame for the given geometry.
    ///
    /// Failure is a per-frame condition: the caller drops the frame it was
    /// working on and carries on.
    pub fn allocate(&self, width: u32, height: u32, format: PixelFormat) -> Result<ImageFrame> {
        let resolution = Resolution::new(width, height);
        if !resolution.is_valid() || format.is_compressed() {
            return Err(AppError::InvalidGeometry { resolution, format });
        }
        let (_, bytes) = plane_layout(resolution, format, self.config.stride_align);
        let max_bytes = self.config.max_frame_bytes;
        if max_bytes > 0 && bytes > max_bytes {
            warn!(
                "Refusing {} {} buffer of {} bytes (limit {})",
                resolution, format, bytes, max_bytes
            );
            self.inner.lock().stats.allocation_failures += 1;
            return Err(AppError::InvalidGeometry { resolution, format });
        }
        let key = FrameKey { resolution, format };

        {
            let mut inner = self.inner.lock();
            if let Some(mut frame) = inner.free.get_mut(&key).and_then(Vec::pop) {
                inner.stats.free -= 1;
                inner.stats.outstanding += 1;
                inner.stats.reuses += 1;
                trace!("Reusing buffer #{} for {} {}", frame.buffer_id(), resolution, format);
                frame.attach_lease(self.lease());
                return Ok(frame);
            }

            let limit = self.config.max_buffers;
            if limit > 0 && inner.live >= limit && !inner.evict_other(key) {
                inner.stats.allocation_failures += 1;
                return Err(AppError::PoolExhausted {
                    outstanding: inner.stats.outstanding,
                    limit,
                });
            }

            // Reserve the slot so concurrent callers see the limit
            inner.live += 1;
            inner.stats.outstanding += 1;
        }

        let buffer_id = self.next_buffer_id.fetch_add(1, Ordering::Relaxed);
        match ImageFrame::allocate(self.id, buffer_id, resolution, format, self.config.stride_align)
        {
            Ok(mut frame) => {
                self.inner.lock().stats.buffers_created += 1;
                frame.attach_lease(self.lease());
                debug!(
                    "Created buffer #{} for {} {} ({} bytes)",
                    buffer_id,
                    resolution,
                    format,
                    frame.len()
                );
                Ok(frame)
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.live -= 1;
                inner.stats.outstanding -= 1;
                inner.stats.allocation_failures += 1;
                Err(e)
            }
        }
    }

    /// Return a frame to the pool.
    ///
    /// Precondition: `frame` was allocated by this pool. Frames from another
    /// pool are logged and dropped, which returns their slot to their own pool.
    pub fn release(&self, mut frame: ImageFrame) {
        if frame.pool_id() != self.id {
            warn!(
                "Dropping buffer #{} released to pool {} but owned by pool {}",
                frame.buffer_id(),
                self.id,
                frame.pool_id()
            );
            return;
        }
        // Disarm before locking so the lease never takes the pool lock
        match frame.take_lease() {
            Some(lease) => lease.disarm(),
            None => {
                warn!("Buffer #{} released without a lease, dropping", frame.buffer_id());
                return;
            }
        }

        let key = FrameKey {
            resolution: frame.resolution(),
            format: frame.format(),
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats.outstanding = inner.stats.outstanding.saturating_sub(1);

        let cap = self.config.max_free_per_geometry;
        let slot = inner.free.entry(key).or_default();
        if slot.len() >= cap {
            trace!(
                "Free list full for {} {}, dropping buffer #{}",
                key.resolution,
                key.format,
                frame.buffer_id()
            );
            inner.live -= 1;
            inner.stats.evictions += 1;
            return;
        }
        slot.push(frame);
        inner.stats.free += 1;
    }

    /// Wrap a frame so it is released when the guard goes out of scope
    pub fn scoped(&self, frame: ImageFrame) -> FrameGuard<'_> {
        FrameGuard {
            pool: self,
            frame: Some(frame),
        }
    }

    /// Drop every free buffer
    pub fn trim(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped: usize = inner.free.values().map(Vec::len).sum();
        inner.free.clear();
        inner.live -= dropped;
        inner.stats.free = 0;
        inner.stats.evictions += dropped as u64;
        if dropped > 0 {
            debug!("Trimmed {} free buffers", dropped);
        }
        dropped
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats.clone()
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(FramePoolConfig::default())
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        let outstanding = self.inner.lock().stats.outstanding;
        if outstanding > 0 {
            warn!(
                "Frame pool {} dropped with {} frames outstanding",
                self.id, outstanding
            );
        }
    }
}

/// Releases its frame back to the pool on drop unless taken with
/// [`FrameGuard::into_inner`].
pub struct FrameGuard<'a> {
    pool: &'a FramePool,
    frame: Option<ImageFrame>,
}

impl FrameGuard<'_> {
    /// Hand the frame on without releasing it
    pub fn into_inner(mut self) -> ImageFrame {
        // Only `into_inner` and `drop` take the frame
        self.frame.take().expect("frame guard already emptied")
    }
}

impl Deref for FrameGuard<'_> {
    type Target = ImageFrame;

    fn deref(&self) -> &ImageFrame {
        self.frame.as_ref().expect("frame guard already emptied")
    }
}

impl DerefMut for FrameGuard<'_> {
    fn deref_mut(&mut self) -> &mut ImageFrame {
        self.frame.as_mut().expect("frame guard already emptied")
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.release(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn pool(max_buffers: usize) -> FramePool {
        FramePool::new(FramePoolConfig {
            max_buffers,
            max_free_per_geometry: 4,
            stride_align: 16,
            ..Default::default()
        })
    }

    #[test]
    fn test_allocate_satisfies_invariants() {
        let pool = pool(0);
        for format in PixelFormat::decoded() {
            for (w, h) in [(640, 480), (1920, 1080), (33, 17), (1, 1)] {
                let frame = pool.allocate(w, h, *format).unwrap();
                assert_eq!(frame.width(), w);
                assert_eq!(frame.height(), h);
                assert_eq!(frame.format(), *format);
                assert!(frame.is_well_formed());
                pool.release(frame);
            }
        }
    }

    #[test]
    fn test_invalid_geometry() {
        let pool = pool(0);
        assert!(matches!(
            pool.allocate(0, 480, PixelFormat::Rgb24),
            Err(AppError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            pool.allocate(640, 480, PixelFormat::Mjpeg),
            Err(AppError::InvalidGeometry { .. })
        ));
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_release_enables_reuse() {
        let pool = pool(0);
        let frame = pool.allocate(640, 480, PixelFormat::Rgb24).unwrap();
        let id = frame.buffer_id();
        pool.release(frame);

        let frame = pool.allocate(640, 480, PixelFormat::Rgb24).unwrap();
        assert_eq!(frame.buffer_id(), id);

        let stats = pool.stats();
        assert_eq!(stats.buffers_created, 1);
        assert_eq!(stats.reuses, 1);
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.free, 0);
        pool.release(frame);
    }

    #[test]
    fn test_geometry_is_part_of_key() {
        let pool = pool(0);
        let frame = pool.allocate(640, 480, PixelFormat::Rgb24).unwrap();
        pool.release(frame);

        let other = pool.allocate(640, 480, PixelFormat::Yuv420p).unwrap();
        let bigger = pool.allocate(1280, 720, PixelFormat::Rgb24).unwrap();
        assert_eq!(pool.stats().buffers_created, 3);
        assert_eq!(pool.stats().free, 1);
        pool.release(other);
        pool.release(bigger);
    }

    #[test]
    fn test_outstanding_frame_not_handed_out_twice() {
        let pool = pool(0);
        let a = pool.allocate(64, 64, PixelFormat::Gray).unwrap();
        let b = pool.allocate(64, 64, PixelFormat::Gray).unwrap();
        assert_ne!(a.buffer_id(), b.buffer_id());
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn test_exhaustion_is_recoverable() {
        let pool = pool(2);
        let a = pool.allocate(64, 64, PixelFormat::Rgb24).unwrap();
        let b = pool.allocate(64, 64, PixelFormat::Rgb24).unwrap();
        let err = pool.allocate(64, 64, PixelFormat::Rgb24).unwrap_err();
        assert!(matches!(err, AppError::PoolExhausted { outstanding: 2, limit: 2 }));
        assert!(err.is_per_frame());
        assert_eq!(pool.stats().allocation_failures, 1);

        pool.release(a);
        let c = pool.allocate(64, 64, PixelFormat::Rgb24).unwrap();
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.stats().buffers_created, 2);
    }

    #[test]
    fn test_limit_evicts_other_geometry() {
        let pool = pool(1);
        let a = pool.allocate(64, 64, PixelFormat::Rgb24).unwrap();
        pool.release(a);

        let b = pool.allocate(128, 128, PixelFormat::Rgb24).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.free, 0);
        assert_eq!(stats.buffers_created, 2);
        pool.release(b);
    }

    #[test]
    fn test_free_list_cap() {
        let pool = FramePool::new(FramePoolConfig {
            max_buffers: 0,
            max_free_per_geometry: 1,
            stride_align: 1,
            ..Default::default()
        });
        let a = pool.allocate(8, 8, PixelFormat::Gray).unwrap();
        let b = pool.allocate(8, 8, PixelFormat::Gray).unwrap();
        pool.release(a);
        pool.release(b);
        let stats = pool.stats();
        assert_eq!(stats.free, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_foreign_frame_is_dropped() {
        let one = pool(0);
        let two = pool(0);
        let frame = one.allocate(8, 8, PixelFormat::Gray).unwrap();
        two.release(frame);
        assert_eq!(two.stats().free, 0);
        assert_eq!(two.stats().outstanding, 0);
        let stats = one.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_dropped_frames_return_their_slots() {
        let pool = FramePool::default();
        let limit = pool.config().max_buffers;
        for _ in 0..limit + 4 {
            let frame = pool.allocate(640, 480, PixelFormat::Rgb24).unwrap();
            drop(frame);
        }

        let frame = pool.allocate(640, 480, PixelFormat::Rgb24).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.dropped, limit as u64 + 4);
        assert_eq!(stats.allocation_failures, 0);
        pool.release(frame);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_dropped_frames_unblock_exhausted_pool() {
        let pool = pool(2);
        let a = pool.allocate(64, 64, PixelFormat::Rgb24).unwrap();
        let b = pool.allocate(64, 64, PixelFormat::Rgb24).unwrap();
        assert!(pool.allocate(64, 64, PixelFormat::Rgb24).is_err());

        drop(a);
        let c = pool.allocate(64, 64, PixelFormat::Rgb24).unwrap();
        pool.release(b);
        pool.release(c);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_released_frame_reused_after_drop_keeps_count() {
        let pool = pool(0);
        let frame = pool.allocate(8, 8, PixelFormat::Gray).unwrap();
        pool.release(frame);
        let frame = pool.allocate(8, 8, PixelFormat::Gray).unwrap();
        drop(frame);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 0);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let pool = FramePool::default();
        let err = pool.allocate(65535, 65535, PixelFormat::Rgb24).unwrap_err();
        assert!(matches!(err, AppError::InvalidGeometry { .. }));
        assert!(err.is_per_frame());
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.buffers_created, 0);
        assert_eq!(stats.allocation_failures, 1);

        let unlimited = FramePool::new(FramePoolConfig {
            max_frame_bytes: 0,
            ..Default::default()
        });
        let frame = unlimited.allocate(4096, 4096, PixelFormat::Gray).unwrap();
        unlimited.release(frame);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let pool = pool(0);
        {
            let mut guard = pool.scoped(pool.allocate(8, 8, PixelFormat::Gray).unwrap());
            guard.data_mut()[0] = 1;
            assert_eq!(pool.stats().outstanding, 1);
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 1);
    }

    #[test]
    fn test_guard_into_inner_keeps_frame() {
        let pool = pool(0);
        let guard = pool.scoped(pool.allocate(8, 8, PixelFormat::Gray).unwrap());
        let frame = guard.into_inner();
        assert_eq!(pool.stats().outstanding, 1);
        pool.release(frame);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_trim() {
        let pool = pool(0);
        let a = pool.allocate(8, 8, PixelFormat::Gray).unwrap();
        let b = pool.allocate(16, 16, PixelFormat::Gray).unwrap();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.trim(), 2);
        assert_eq!(pool.stats().free, 0);
        let c = pool.allocate(8, 8, PixelFormat::Gray).unwrap();
        assert_eq!(pool.stats().buffers_created, 3);
        pool.release(c);
    }

    #[test]
    fn test_concurrent_allocate_release() {
        let pool = Arc::new(pool(8));
        let live = Arc::new(Mutex::new(HashSet::new()));

        std::thread::scope(|s| {
            for t in 0..8 {
                let pool = pool.clone();
                let live = live.clone();
                s.spawn(move || {
                    for i in 0..200 {
                        let format = if (t + i) % 2 == 0 {
                            PixelFormat::Rgb24
                        } else {
                            PixelFormat::Yuv420p
                        };
                        let frame = match pool.allocate(32, 32, format) {
                            Ok(frame) => frame,
                            Err(AppError::PoolExhausted { .. }) => continue,
                            Err(e) => panic!("unexpected error: {}", e),
                        };
                        assert!(live.lock().insert(frame.buffer_id()), "buffer handed out twice");
                        std::thread::yield_now();
                        assert!(live.lock().remove(&frame.buffer_id()));
                        pool.release(frame);
                    }
                });
            }
        });

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert!(live.lock().is_empty());
    }
}
