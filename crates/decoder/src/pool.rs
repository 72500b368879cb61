//! Fence-gated surface pool.
//!
//! Slot metadata lives in a `Slab`; pixel buffers travel with the leased
//! `Surface` and come back on release, so buffers are reused rather than
//! freed per frame. A presented surface is only reusable after the
//! compositor signals its fence.
//!
//! The mutex guards slot bookkeeping only. The decode worker locks it
//! normally; the render thread uses the `try_*` variants and retries next
//! tick on contention.

use std::fmt;
use std::sync::{Mutex, MutexGuard, TryLockError};

use contracts::{DecodedFrame, FenceId, FenceProbe, Surface, SurfaceHandle};
use metrics::gauge;
use slab::Slab;
use tracing::{debug, trace};

use crate::PoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Leased,
    Retired(FenceId),
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    state: SlotState,
    /// Present while the slot is not leased
    buffer: Option<Vec<u8>>,
}

#[derive(Debug)]
struct PoolInner {
    slots: Slab<Slot>,
    free: Vec<usize>,
    retired: Vec<usize>,
    next_generation: u64,
}

/// Pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub allocated: usize,
    pub free: usize,
    pub leased: usize,
    pub retired: usize,
}

/// A release the render thread could not apply because the pool was busy
#[derive(Debug)]
pub struct Deferred {
    pub surface: Surface,
    pub fence: Option<FenceId>,
}

/// Slot-indexed surface arena
pub struct SurfacePool {
    inner: Mutex<PoolInner>,
    capacity: usize,
}

impl fmt::Debug for SurfacePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfacePool")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SurfacePool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(PoolInner {
                slots: Slab::with_capacity(capacity),
                free: Vec::with_capacity(capacity),
                retired: Vec::with_capacity(capacity),
                next_generation: 1,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        // Bookkeeping stays consistent across a panic in a caller.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, PoolInner>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lease a surface sized for `width x height` RGBA8
    pub fn acquire(&self, width: u32, height: u32) -> Result<Surface, PoolError> {
        let mut inner = self.lock();
        let generation = inner.next_generation;

        let slot = match inner.free.pop() {
            Some(slot) => slot,
            None if inner.slots.len() < self.capacity => inner.slots.insert(Slot {
                generation,
                state: SlotState::Free,
                buffer: Some(Vec::new()),
            }),
            None => {
                return Err(PoolError::Exhausted {
                    capacity: self.capacity,
                })
            }
        };
        inner.next_generation += 1;

        let entry = &mut inner.slots[slot];
        entry.generation = generation;
        entry.state = SlotState::Leased;
        let needed = Surface::rgba_len(width, height);
        let mut pixels = entry.buffer.take().unwrap_or_default();
        pixels.clear();
        // Drop oversized buffers left behind by an earlier, larger lease.
        if pixels.capacity() > needed.saturating_mul(2) {
            pixels.shrink_to(needed);
        }
        pixels.resize(needed, 0);

        trace!(slot, generation, width, height, "surface acquired");
        Ok(Surface {
            handle: SurfaceHandle { slot, generation },
            width,
            height,
            pixels,
        })
    }

    fn check_leased(inner: &PoolInner, handle: SurfaceHandle) -> Result<(), PoolError> {
        match inner.slots.get(handle.slot) {
            Some(slot) if slot.generation == handle.generation && slot.state == SlotState::Leased => Ok(()),
            _ => Err(PoolError::StaleHandle {
                slot: handle.slot,
                generation: handle.generation,
            }),
        }
    }

    fn release_locked(inner: &mut PoolInner, surface: Surface, fence: Option<FenceId>) -> Result<(), PoolError> {
        let handle = surface.handle;
        Self::check_leased(inner, handle)?;

        let entry = &mut inner.slots[handle.slot];
        entry.buffer = Some(surface.pixels);
        match fence {
            Some(fence) => {
                entry.state = SlotState::Retired(fence);
                inner.retired.push(handle.slot);
                trace!(slot = handle.slot, fence = fence.0, "surface retired");
            }
            None => {
                entry.state = SlotState::Free;
                inner.free.push(handle.slot);
                trace!(slot = handle.slot, "surface recycled");
            }
        }
        Ok(())
    }

    /// Return a surface that was never presented
    pub fn recycle(&self, surface: Surface) -> Result<(), PoolError> {
        Self::release_locked(&mut self.lock(), surface, None)
    }

    /// Return a presented surface; reusable once `fence` signals
    pub fn retire(&self, surface: Surface, fence: FenceId) -> Result<(), PoolError> {
        Self::release_locked(&mut self.lock(), surface, Some(fence))
    }

    /// Release a decoded frame, fence-gated if it was ever presented
    pub fn release_frame(&self, frame: DecodedFrame) -> Result<(), PoolError> {
        Self::release_locked(&mut self.lock(), frame.surface, frame.last_fence)
    }

    /// Non-blocking release for the render thread
    ///
    /// Hands the surface back as `Err(Deferred)` when the pool is busy.
    pub fn try_release(&self, surface: Surface, fence: Option<FenceId>) -> Result<Result<(), PoolError>, Deferred> {
        match self.try_lock() {
            Some(mut inner) => Ok(Self::release_locked(&mut inner, surface, fence)),
            None => Err(Deferred { surface, fence }),
        }
    }

    /// Move retired surfaces whose fence has signaled back to the free list
    ///
    /// Non-blocking; returns how many surfaces were reclaimed.
    pub fn reclaim<P: FenceProbe + ?Sized>(&self, probe: &P) -> usize {
        let Some(mut inner) = self.try_lock() else {
            return 0;
        };
        let inner = &mut *inner;

        let mut reclaimed = 0;
        let mut index = 0;
        while index < inner.retired.len() {
            let slot = inner.retired[index];
            let signaled = match inner.slots.get(slot).map(|s| s.state) {
                Some(SlotState::Retired(fence)) => probe.is_signaled(fence),
                _ => true,
            };
            if signaled {
                inner.retired.swap_remove(index);
                if let Some(entry) = inner.slots.get_mut(slot) {
                    entry.state = SlotState::Free;
                    inner.free.push(slot);
                    reclaimed += 1;
                }
            } else {
                index += 1;
            }
        }

        if reclaimed > 0 {
            debug!(reclaimed, free = inner.free.len(), "surfaces reclaimed");
        }
        gauge!("cloudar_surfaces_free").set(inner.free.len() as f64 + (self.capacity - inner.slots.len()) as f64);
        reclaimed
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        let mut stats = PoolStats {
            capacity: self.capacity,
            allocated: inner.slots.len(),
            ..Default::default()
        };
        for (_, slot) in inner.slots.iter() {
            match slot.state {
                SlotState::Free => stats.free += 1,
                SlotState::Leased => stats.leased += 1,
                SlotState::Retired(_) => stats.retired += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Fences(HashSet<FenceId>);

    impl FenceProbe for Fences {
        fn is_signaled(&self, fence: FenceId) -> bool {
            self.0.contains(&fence)
        }
    }

    #[test]
    fn test_exhaustion_and_recycle() {
        let pool = SurfacePool::new(2);
        let a = pool.acquire(2, 2).unwrap();
        let b = pool.acquire(2, 2).unwrap();
        assert_eq!(a.pixels.len(), 16);
        assert_eq!(pool.acquire(2, 2).unwrap_err(), PoolError::Exhausted { capacity: 2 });

        pool.recycle(a).unwrap();
        let c = pool.acquire(4, 4).unwrap();
        assert_eq!(c.pixels.len(), 64);
        assert_ne!(c.handle, b.handle);
        assert_eq!(pool.stats().allocated, 2);
    }

    #[test]
    fn test_retired_surface_waits_for_fence() {
        let pool = SurfacePool::new(1);
        let surface = pool.acquire(1, 1).unwrap();
        pool.retire(surface, FenceId(9)).unwrap();
        assert!(pool.acquire(1, 1).is_err());

        let mut fences = Fences::default();
        assert_eq!(pool.reclaim(&fences), 0);
        fences.0.insert(FenceId(9));
        assert_eq!(pool.reclaim(&fences), 1);
        assert!(pool.acquire(1, 1).is_ok());
    }

    #[test]
    fn test_stale_handle_rejected() {
        let pool = SurfacePool::new(2);
        let surface = pool.acquire(1, 1).unwrap();
        let forged = Surface {
            handle: surface.handle,
            width: 1,
            height: 1,
            pixels: vec![0; 4],
        };
        pool.recycle(surface).unwrap();
        assert!(matches!(pool.recycle(forged), Err(PoolError::StaleHandle { .. })));
    }

    #[test]
    fn test_buffer_reused_across_leases() {
        let pool = SurfacePool::new(1);
        let mut surface = pool.acquire(8, 8).unwrap();
        surface.pixels[0] = 77;
        let ptr = surface.pixels.as_ptr();
        pool.recycle(surface).unwrap();
        let again = pool.acquire(8, 8).unwrap();
        assert_eq!(again.pixels.as_ptr(), ptr);
        assert_eq!(again.pixels[0], 0);
    }

    #[test]
    fn test_try_release_defers_when_busy() {
        let pool = SurfacePool::new(1);
        let surface = pool.acquire(1, 1).unwrap();
        let guard = pool.lock();
        let deferred = pool.try_release(surface, None).unwrap_err();
        drop(guard);
        pool.try_release(deferred.surface, deferred.fence).unwrap().unwrap();
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn test_oversized_buffer_shrinks_on_smaller_lease() {
        let pool = SurfacePool::new(1);
        let big = pool.acquire(512, 512).unwrap();
        pool.recycle(big).unwrap();

        let small = pool.acquire(2, 2).unwrap();
        assert_eq!(small.pixels.len(), 16);
        assert!(small.pixels.capacity() < Surface::rgba_len(512, 512) / 2);
    }
}
