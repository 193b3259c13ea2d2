//! Kernel and user heap facade.
//!
//! Design summary:
//! - Contiguous heap region with variable-sized, best-fit-allocated blocks.
//! - One header per block (`block::BlockHeader`), an address-ordered
//!   doubly-linked list, and a separate free list.
//! - Block splitting on allocation, eager coalescing on free.
//! - The kernel heap is a process-wide singleton behind a spinlock; a user
//!   heap is owned by the requesting process's memory descriptor and has no
//!   lock of its own (manipulated only in that process's context, §5).
//!
//! Notes:
//! - Chunk size (on-disk/in-memory footprint) is `HEADER_SIZE + payload`.
//! - Payload pointer is always `header + HEADER_SIZE`.
//! - `sbrk` never zeroes memory; callers must initialize what they write.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use alloc::vec::Vec;

use crate::drivers::screen::Screen;
use crate::logging;
use crate::memory::region::Region;
use crate::memory::vmm;
use crate::process;
use crate::sync::spinlock::SpinLock;

pub mod block;

pub use block::HEADER_SIZE;

/// Global heap payload alignment: the rounding quantum (§4.2's `CEIL(size,16)`).
pub const HEAP_ALIGNMENT: u64 = block::ROUND_QUANTUM;

/// Byte count handed to `kheap_init` by the boot sequence.
const INITIAL_HEAP_SIZE: usize = 0x1000;

/// Fixed virtual base of a lazily created user heap, carried from the
/// original implementation's `0x40000000`.
pub const USER_HEAP_BASE: u64 = 0x4000_0000;
/// Default size of a lazily created user heap.
pub const USER_HEAP_INITIAL_SIZE: usize = 1 << 20;

/// Mutable kernel-heap state guarded by the global spinlock.
struct HeapState {
    region: Region,
}

/// Process-wide kernel heap singleton.
struct GlobalHeap {
    inner: SpinLock<Option<HeapState>>,
    debug_output: AtomicBool,
    serial_line_synced: AtomicBool,
}

impl GlobalHeap {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new(None),
            debug_output: AtomicBool::new(false),
            serial_line_synced: AtomicBool::new(false),
        }
    }
}

/// SAFETY: `inner` access is synchronized through `SpinLock`; the
/// `AtomicBool` fields are independently thread-safe.
unsafe impl Sync for GlobalHeap {}

static HEAP: GlobalHeap = GlobalHeap::new();

#[inline]
fn heap_logln(args: core::fmt::Arguments<'_>) {
    if !HEAP.debug_output.load(Ordering::Acquire) {
        return;
    }
    if !HEAP.serial_line_synced.swap(true, Ordering::AcqRel) {
        logging::logln_with_options("heap", format_args!(""), true, false);
    }
    logging::logln("heap", args);
}

fn with_heap<R>(f: impl FnOnce(&mut HeapState) -> R) -> R {
    let mut guard = HEAP.inner.lock();
    let state = guard.as_mut().expect("kheap_init must precede any heap operation");
    f(state)
}

/// Whether `set_debug_output` has turned on `"heap"`-target tracing.
pub fn debug_output_enabled() -> bool {
    HEAP.debug_output.load(Ordering::Acquire)
}

/// Enables or disables `"heap"`-target tracing, returning the previous value.
pub fn set_debug_output(enabled: bool) -> bool {
    HEAP.debug_output.swap(enabled, Ordering::AcqRel)
}

/// Initializes the kernel heap: obtains a region from the paging layer,
/// commits the prologue, and zeroes the three roots.
///
/// Panics if the paging layer cannot satisfy the initial region — per spec,
/// this is a boot-time invariant, not a recoverable condition.
pub fn kheap_init(initial_size: usize) {
    let area = vmm::create_vm_area(initial_size, vmm::VmAreaFlags::KERNEL_RW)
        .expect("paging layer could not satisfy the initial kernel heap region");
    let mut region = Region::new(area.start, area.end);
    region
        .sbrk(block::PROLOGUE_SIZE as i64)
        .expect("a freshly created region must fit its own prologue");

    // SAFETY: `area` is a freshly mapped, exclusively owned virtual range.
    unsafe {
        block::prologue_mut(region.vm_start()).zero();
    }

    let (vm_start, vm_end) = (region.vm_start(), region.vm_end());
    *HEAP.inner.lock() = Some(HeapState { region });
    HEAP.serial_line_synced.store(false, Ordering::Release);
    heap_logln(format_args!(
        "[heap] kheap_init base={:#x} end={:#x}",
        vm_start, vm_end
    ));
}

/// Convenience boot entry point: initializes the kernel heap at its default
/// size and sets the `"heap"` trace toggle.
pub fn init(debug_output: bool) {
    set_debug_output(debug_output);
    kheap_init(INITIAL_HEAP_SIZE);
}

/// Whether the kernel heap has been initialized.
pub fn is_initialized() -> bool {
    HEAP.inner.lock().is_some()
}

/// Extends the kernel heap's `top` by `delta` bytes; see `Region::sbrk`.
pub fn ksbrk(delta: i64) -> Option<u64> {
    with_heap(|state| state.region.sbrk(delta))
}

/// Extends the current process's user heap `top` by `delta` bytes.
///
/// The user heap must already exist (`sys_brk` is responsible for lazily
/// creating it); returns `None` if it does not.
pub fn usbrk(delta: i64) -> Option<u64> {
    let proc = process::current();
    let region = proc.memory.user_heap.as_mut()?;
    region.sbrk(delta)
}

/// Allocates `size` bytes on the kernel heap; see `kmalloc` semantics.
pub fn kmalloc(size: usize) -> *mut u8 {
    with_heap(|state| malloc_in(&mut state.region, size, "heap"))
}

/// Frees a pointer previously returned by `kmalloc`.
pub fn kfree(ptr: *mut u8) {
    with_heap(|state| free_in(&mut state.region, ptr, "heap"));
}

/// The composite `sys_brk` syscall core: lazily creates the calling
/// process's user heap, then dispatches to `free` (address inside the
/// heap) or `malloc` (otherwise, treating `addr` as a requested size).
///
/// Returns a null pointer on the free branch (always) or on allocation
/// failure; a fresh payload pointer on the allocate branch.
pub fn sys_brk(addr: u64) -> *mut u8 {
    let proc = process::current();
    if proc.memory.user_heap.is_none() {
        let area = vmm::create_vm_area_at(USER_HEAP_BASE, USER_HEAP_INITIAL_SIZE, vmm::VmAreaFlags::USER_RW)
            .expect("paging layer could not satisfy the lazily created user heap");
        let mut region = Region::new(area.start, area.end);
        region
            .sbrk(block::PROLOGUE_SIZE as i64)
            .expect("a freshly created region must fit its own prologue");
        // SAFETY: `area` is freshly mapped and exclusively owned by this process.
        unsafe {
            block::prologue_mut(region.vm_start()).zero();
        }
        proc.memory.user_heap = Some(region);
    }

    let region = proc.memory.user_heap.as_mut().expect("just created above");
    if region.contains_open(addr) {
        free_in(region, addr as *mut u8, "heap.user");
        core::ptr::null_mut()
    } else {
        malloc_in(region, addr as usize, "heap.user")
    }
}

/// Core `malloc(size)` algorithm (§4.3): best-fit search, split-or-keep on
/// hit, `sbrk`-backed growth on miss.
fn malloc_in(region: &mut Region, size: usize, target: &str) -> *mut u8 {
    if size == 0 {
        return core::ptr::null_mut();
    }

    let r = block::round_request(size);
    let c = r + block::HEADER_SIZE;
    let prologue_addr = region.vm_start();

    // SAFETY: `prologue_addr` is the live prologue of `region`.
    let prologue = unsafe { block::prologue_mut(prologue_addr) };

    // SAFETY: `prologue` describes a consistent free list.
    if let Some(b) = unsafe { block::best_fit(prologue, r) } {
        // SAFETY: `b` was just found on the free list, so it is a live block.
        unsafe { allocate_hit(prologue, b, r, c) };
        logging::logln(target, format_args!("malloc(hit) size={} r={} b={:#x}", size, r, b));
        return block::payload_of(b);
    }

    match region.sbrk(c as i64) {
        Some(n) => {
            // SAFETY: `n` is a freshly committed, exclusively owned region of
            // at least `c` bytes.
            unsafe {
                block::init_allocated(n, r);
                block::append_block(prologue, n);
            }
            logging::logln(target, format_args!("malloc(miss) size={} r={} n={:#x}", size, r, n));
            block::payload_of(n)
        }
        None => {
            logging::logln(target, format_args!("malloc(oom) size={} r={}", size, r));
            core::ptr::null_mut()
        }
    }
}

/// # Safety
/// `b` must be a live, free block header reachable from `prologue`'s free
/// list, with `payload_size(b) >= r`.
unsafe fn allocate_hit(prologue: &mut block::Prologue, b: u64, r: u64, c: u64) {
    unsafe {
        let original_chunk = block::payload_size_at(b) + block::HEADER_SIZE;
        let remainder = original_chunk - c;

        if remainder >= block::HEADER_SIZE + 8 {
            let s = b + c;
            let base_s_payload = remainder - block::HEADER_SIZE;
            let b_next = block::next_at(b);

            let (s_payload, s_next) = if b_next != 0 && block::is_free_at(b_next) {
                block::remove_from_free_list(prologue, b_next);
                let bn_payload = block::payload_size_at(b_next);
                let bn_next = block::next_at(b_next);
                if b_next == prologue.tail() {
                    prologue.set_tail(s);
                }
                (base_s_payload + block::HEADER_SIZE + bn_payload, bn_next)
            } else {
                if b == prologue.tail() {
                    prologue.set_tail(s);
                }
                (base_s_payload, b_next)
            };

            block::write_split_block(s, s_payload, s_next, b);
            if s_next != 0 {
                block::set_prev(s_next, s);
            }
            block::insert_free_head(prologue, s);
            block::set_next(b, s);

            block::remove_from_free_list(prologue, b);
            block::mark_allocated(b, r);
        } else {
            // No split: the leftover is too small to host its own header, so
            // `b` keeps its entire original span rather than shrinking to `r`.
            block::remove_from_free_list(prologue, b);
            block::mark_allocated(b, original_chunk - block::HEADER_SIZE);
        }
    }
}

/// Core `free(ptr)` algorithm (§4.4): locates the header, coalesces with
/// either or both neighbors as permitted, then (re)inserts into the free
/// list.
fn free_in(region: &mut Region, ptr: *mut u8, target: &str) {
    if ptr.is_null() {
        return;
    }

    let b = block::header_of(ptr as u64);
    let prologue_addr = region.vm_start();
    // SAFETY: `prologue_addr` is the live prologue of `region`; `b` was
    // derived from a pointer previously returned by a `malloc` on this
    // region.
    unsafe {
        let prologue = block::prologue_mut(prologue_addr);
        let p = block::prev_at(b);
        let q = block::next_at(b);
        let p_free = p != 0 && block::is_free_at(p);
        let q_free = q != 0 && block::is_free_at(q);

        if p_free && q_free {
            let new_payload = block::payload_size_at(p)
                + 2 * block::HEADER_SIZE
                + block::payload_size_at(b)
                + block::payload_size_at(q);
            let q_next = block::next_at(q);
            block::remove_from_free_list(prologue, q);
            block::set_payload_size(p, new_payload);
            block::set_next(p, q_next);
            if q_next != 0 {
                block::set_prev(q_next, p);
            }
            if q == prologue.tail() {
                prologue.set_tail(p);
            }
        } else if p_free {
            let new_payload = block::payload_size_at(p) + block::HEADER_SIZE + block::payload_size_at(b);
            block::set_payload_size(p, new_payload);
            block::set_next(p, q);
            if q != 0 {
                block::set_prev(q, p);
            }
            if b == prologue.tail() {
                prologue.set_tail(p);
            }
        } else if q_free {
            let new_payload = block::payload_size_at(b) + block::HEADER_SIZE + block::payload_size_at(q);
            let q_next = block::next_at(q);
            block::remove_from_free_list(prologue, q);
            block::mark_free(b);
            block::set_payload_size(b, new_payload);
            block::set_next(b, q_next);
            if q_next != 0 {
                block::set_prev(q_next, b);
            }
            if q == prologue.tail() {
                prologue.set_tail(b);
            }
            block::insert_free_head(prologue, b);
        } else {
            block::mark_free(b);
            block::insert_free_head(prologue, b);
        }
    }

    logging::logln(target, format_args!("free ptr={:#x}", ptr as u64));
}

/// Non-allocating diagnostic dump of the block list and free list.
///
/// Walks `head -> ... -> tail`, printing one line per block, then the
/// running totals, then the free-list chain. Matches §5's re-entrancy
/// requirement — only `core::fmt::Write` into `screen` is used.
pub fn dump(screen: &mut Screen, region: &Region) {
    let prologue_addr = region.vm_start();
    // SAFETY: `prologue_addr` is the live prologue of `region`.
    let prologue = unsafe { block::prologue_mut(prologue_addr) };

    let mut total_usable: u64 = 0;
    let mut total_overhead: u64 = 0;
    let mut cursor = prologue.head();
    while cursor != 0 {
        // SAFETY: `cursor` was reached by walking the live address list.
        unsafe {
            let size = block::payload_size_at(cursor);
            let free = block::is_free_at(cursor);
            let flag = if free { "F" } else { "A" };
            let _ = writeln!(
                screen,
                "[{}] {} ({}) from {:#x} to {:#x}",
                flag,
                size,
                if free { size + 1 } else { size },
                cursor,
                cursor + block::HEADER_SIZE + size
            );
            total_usable += size;
            total_overhead += block::HEADER_SIZE;
            cursor = block::next_at(cursor);
        }
    }
    let _ = writeln!(screen, "usable={} overhead={} total={}", total_usable, total_overhead, total_usable + total_overhead);

    let mut cursor = prologue.free_head();
    let _ = write!(screen, "free list:");
    while cursor != 0 {
        // SAFETY: `cursor` was reached by walking the live free list.
        unsafe {
            let _ = write!(screen, " {:#x}", cursor);
            cursor = block::next_at(cursor);
        }
    }
    let _ = writeln!(screen);
}

/// Runs kernel-heap self-tests and prints results to the screen. Uses the
/// kernel heap directly; re-initializes it first so results are
/// reproducible regardless of prior allocations.
pub fn run_self_test(screen: &mut Screen) {
    let mut failures = 0u32;
    heap_logln(format_args!("[heap-test] start"));
    kheap_init(INITIAL_HEAP_SIZE);

    let ptr1 = kmalloc(10);
    let ptr2 = kmalloc(32);
    if !ptr1.is_null() && !ptr2.is_null() && ptr1 != ptr2 {
        writeln!(screen, "  [ OK ] distinct allocations").unwrap();
    } else {
        failures += 1;
        writeln!(screen, "  [FAIL] distinct allocations").unwrap();
    }

    kfree(ptr1);
    kfree(ptr2);
    let merged = with_heap(|state| {
        let prologue = unsafe { block::prologue_mut(state.region.vm_start()) };
        prologue.head() == prologue.tail() && unsafe { block::is_free_at(prologue.head()) }
    });
    if merged {
        writeln!(screen, "  [ OK ] coalesce after frees").unwrap();
    } else {
        failures += 1;
        writeln!(screen, "  [FAIL] coalesce after frees").unwrap();
    }

    let mut values: Vec<u64> = Vec::with_capacity(16);
    for i in 0..16u64 {
        values.push(i);
    }
    if values.len() == 16 && values[0] == 0 && values[15] == 15 {
        writeln!(screen, "  [ OK ] rust alloc (Vec) on heap").unwrap();
    } else {
        failures += 1;
        writeln!(screen, "  [FAIL] rust alloc (Vec) on heap").unwrap();
    }
    drop(values);

    if failures == 0 {
        writeln!(screen, "Heap self-test complete (OK).").unwrap();
        heap_logln(format_args!("[heap-test] done (ok)"));
    } else {
        writeln!(screen, "Heap self-test complete ({} failures).", failures).unwrap();
        heap_logln(format_args!("[heap-test] done (failures={})", failures));
    }
}
