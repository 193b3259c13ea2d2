//! Region manager: a contiguous virtual range with a growing high-water mark.
//!
//! Two kinds of region exist: the kernel's process-wide singleton heap region
//! and one per user process, owned by that process's memory descriptor.
//! Neither zeroes memory on growth; callers must initialize what they write.

/// A contiguous virtual-memory range `[vm_start, vm_end)` plus a high-water
/// mark `top` that only ever grows.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    vm_start: u64,
    vm_end: u64,
    top: u64,
}

impl Region {
    /// Wraps a virtual range handed back by the paging layer. `top` starts
    /// at `vm_start`; a prologue carve-out is a regular `sbrk` call.
    pub const fn new(vm_start: u64, vm_end: u64) -> Self {
        Self {
            vm_start,
            vm_end,
            top: vm_start,
        }
    }

    #[inline]
    pub const fn vm_start(&self) -> u64 {
        self.vm_start
    }

    #[inline]
    pub const fn vm_end(&self) -> u64 {
        self.vm_end
    }

    #[inline]
    pub const fn top(&self) -> u64 {
        self.top
    }

    /// Whether `addr` lies strictly inside `(vm_start, vm_end)`, matching
    /// the open interval `sys_brk` tests an address against.
    #[inline]
    pub const fn contains_open(&self, addr: u64) -> bool {
        addr > self.vm_start && addr < self.vm_end
    }

    /// Extends `top` by `delta` bytes and returns the prior `top`.
    ///
    /// `delta > 0` grows the region, failing with `None` if growth would
    /// cross `vm_end`. `delta == 0` reads back the current `top`. `delta <
    /// 0` is a no-op that returns the current `top` unchanged — negative
    /// deltas are not implemented as a shrink (open question resolved in
    /// favor of the source's `if (increment > 0)` guard).
    pub fn sbrk(&mut self, delta: i64) -> Option<u64> {
        if delta <= 0 {
            return Some(self.top);
        }
        let prior = self.top;
        let new_top = prior.checked_add(delta as u64)?;
        if new_top > self.vm_end {
            return None;
        }
        self.top = new_top;
        Some(prior)
    }
}
