//! Virtual memory manager for x86_64 4-level paging with recursive mapping.
//!
//! Trimmed to the one primitive the heap subsystem needs: a virtual-address
//! range, eagerly backed by physical frames, handed out as a `VmArea`. The
//! full page-fault-driven demand-paging path this was built from is not
//! needed once nothing triggers page faults deliberately — the heap maps
//! its whole region up front at `create_vm_area` time instead.

use core::arch::asm;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::logging;
use crate::memory::pmm;

const PT_ENTRIES: usize = 512;
const SMALL_PAGE_SIZE: u64 = 4096;
const PAGE_MASK: u64 = !(SMALL_PAGE_SIZE - 1);

const PML4_TABLE_ADDR: u64 = 0xFFFF_FFFF_FFFF_F000;
const PDP_TABLE_BASE: u64 = 0xFFFF_FFFF_FFE0_0000;
const PD_TABLE_BASE: u64 = 0xFFFF_FFFF_C000_0000;
const PT_TABLE_BASE: u64 = 0xFFFF_FF80_0000_0000;

const ENTRY_PRESENT: u64 = 1 << 0;
const ENTRY_WRITABLE: u64 = 1 << 1;
const ENTRY_USER: u64 = 1 << 2;
const ENTRY_FRAME_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// Base of the kernel's bump window for `create_vm_area` — just past the
/// higher-half identity window `init` sets up.
const KERNEL_WINDOW_BASE: u64 = 0xFFFF_8000_0050_0000;

#[derive(Clone, Copy)]
#[repr(transparent)]
struct PageTableEntry(u64);

impl PageTableEntry {
    #[inline]
    fn present(self) -> bool {
        (self.0 & ENTRY_PRESENT) != 0
    }

    #[inline]
    fn set_present(&mut self, val: bool) {
        if val {
            self.0 |= ENTRY_PRESENT;
        } else {
            self.0 &= !ENTRY_PRESENT;
        }
    }

    #[inline]
    fn set_writable(&mut self, val: bool) {
        if val {
            self.0 |= ENTRY_WRITABLE;
        } else {
            self.0 &= !ENTRY_WRITABLE;
        }
    }

    #[inline]
    fn set_user(&mut self, val: bool) {
        if val {
            self.0 |= ENTRY_USER;
        } else {
            self.0 &= !ENTRY_USER;
        }
    }

    #[inline]
    fn frame(self) -> u64 {
        (self.0 & ENTRY_FRAME_MASK) >> 12
    }

    #[inline]
    fn set_frame(&mut self, pfn: u64) {
        self.0 = (self.0 & !ENTRY_FRAME_MASK) | ((pfn << 12) & ENTRY_FRAME_MASK);
    }

    #[inline]
    fn set_mapping(&mut self, pfn: u64, present: bool, writable: bool, user: bool) {
        self.set_frame(pfn);
        self.set_present(present);
        self.set_writable(writable);
        self.set_user(user);
    }

    #[inline]
    fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
struct PageTable {
    entries: [PageTableEntry; PT_ENTRIES],
}

impl PageTable {
    #[inline]
    fn zero(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.clear();
        }
    }
}

#[inline]
fn pml4_index(va: u64) -> usize {
    ((va >> 39) & 0x1FF) as usize
}

#[inline]
fn pdp_index(va: u64) -> usize {
    ((va >> 30) & 0x1FF) as usize
}

#[inline]
fn pd_index(va: u64) -> usize {
    ((va >> 21) & 0x1FF) as usize
}

#[inline]
fn pt_index(va: u64) -> usize {
    ((va >> 12) & 0x1FF) as usize
}

#[inline]
fn pdp_table_addr(va: u64) -> u64 {
    PDP_TABLE_BASE + ((va >> 27) & 0x0000_001F_F000)
}

#[inline]
fn pd_table_addr(va: u64) -> u64 {
    PD_TABLE_BASE + ((va >> 18) & 0x0000_3FFF_F000)
}

#[inline]
fn pt_table_addr(va: u64) -> u64 {
    PT_TABLE_BASE + ((va >> 9) & 0x0000_007F_FFFF_F000)
}

#[inline]
fn page_align_down(addr: u64) -> u64 {
    addr & PAGE_MASK
}

#[inline]
fn page_align_up(addr: u64) -> u64 {
    page_align_down(addr + SMALL_PAGE_SIZE - 1)
}

#[inline]
fn phys_to_pfn(addr: u64) -> u64 {
    addr / SMALL_PAGE_SIZE
}

unsafe fn write_cr3(val: u64) {
    unsafe {
        asm!("mov cr3, {}", in(reg) val, options(nostack, preserves_flags));
    }
}

unsafe fn invlpg(addr: u64) {
    unsafe {
        asm!("invlpg [{}]", in(reg) addr, options(nostack, preserves_flags));
    }
}

struct VmmState {
    pml4_physical: u64,
    debug_enabled: bool,
    next_kernel_window: u64,
}

struct GlobalVmm {
    inner: UnsafeCell<VmmState>,
    initialized: AtomicBool,
}

impl GlobalVmm {
    const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(VmmState {
                pml4_physical: 0,
                debug_enabled: false,
                next_kernel_window: KERNEL_WINDOW_BASE,
            }),
            initialized: AtomicBool::new(false),
        }
    }
}

unsafe impl Sync for GlobalVmm {}

static VMM: GlobalVmm = GlobalVmm::new();

#[inline]
fn with_vmm<R>(f: impl FnOnce(&mut VmmState) -> R) -> R {
    debug_assert!(VMM.initialized.load(Ordering::Acquire), "VMM not initialized");
    unsafe { f(&mut *VMM.inner.get()) }
}

#[inline]
fn alloc_frame_phys() -> u64 {
    pmm::with_pmm(|mgr| {
        mgr.alloc_frame()
            .expect("VMM: out of physical memory while allocating page frame")
            .physical_address()
    })
}

#[inline]
unsafe fn table_at(addr: u64) -> &'static mut PageTable {
    unsafe { &mut *(addr as *mut PageTable) }
}

#[inline]
unsafe fn zero_phys_page(addr: u64) {
    unsafe {
        core::ptr::write_bytes(addr as *mut u8, 0, SMALL_PAGE_SIZE as usize);
    }
}

fn debug_enabled() -> bool {
    with_vmm(|state| state.debug_enabled)
}

/// Enables or disables VMM debug output and returns the previous setting.
pub fn set_debug_output(enabled: bool) -> bool {
    with_vmm(|state| {
        let old = state.debug_enabled;
        state.debug_enabled = enabled;
        old
    })
}

fn debug_alloc(level: &str, idx: usize, pfn: u64) {
    if debug_enabled() {
        logging::logln(
            "vmm",
            format_args!("VMM: allocated PFN 0x{:x} for {} entry 0x{:x}", pfn, level, idx),
        );
    }
}

/// Initializes the virtual memory manager and switches CR3.
///
/// The new tables map:
/// - identity mapping for 0..4MB
/// - higher-half mapping for 0xFFFF_8000_0000_0000..+4MB
/// - recursive mapping at PML4[511]
pub fn init(debug_output: bool) {
    let pml4 = alloc_frame_phys();
    let pdp_higher = alloc_frame_phys();
    let pd_higher = alloc_frame_phys();
    let pt_higher_0 = alloc_frame_phys();
    let pt_higher_1 = alloc_frame_phys();
    let pdp_identity = alloc_frame_phys();
    let pd_identity = alloc_frame_phys();
    let pt_identity_0 = alloc_frame_phys();
    let pt_identity_1 = alloc_frame_phys();

    for addr in [
        pml4,
        pdp_higher,
        pd_higher,
        pt_higher_0,
        pt_higher_1,
        pdp_identity,
        pd_identity,
        pt_identity_0,
        pt_identity_1,
    ] {
        unsafe { zero_phys_page(addr) };
    }

    unsafe {
        let pml4_tbl = table_at(pml4);
        pml4_tbl.entries[0].set_mapping(phys_to_pfn(pdp_identity), true, true, false);
        pml4_tbl.entries[256].set_mapping(phys_to_pfn(pdp_higher), true, true, false);
        pml4_tbl.entries[511].set_mapping(phys_to_pfn(pml4), true, true, false);

        let pdp_identity_tbl = table_at(pdp_identity);
        pdp_identity_tbl.entries[0].set_mapping(phys_to_pfn(pd_identity), true, true, false);

        let pd_identity_tbl = table_at(pd_identity);
        pd_identity_tbl.entries[0].set_mapping(phys_to_pfn(pt_identity_0), true, true, false);
        pd_identity_tbl.entries[1].set_mapping(phys_to_pfn(pt_identity_1), true, true, false);

        let pt_identity_tbl_0 = table_at(pt_identity_0);
        for i in 0..PT_ENTRIES {
            pt_identity_tbl_0.entries[i].set_mapping(i as u64, true, true, false);
        }

        let pt_identity_tbl_1 = table_at(pt_identity_1);
        for i in 0..PT_ENTRIES {
            pt_identity_tbl_1
                .entries[i]
                .set_mapping((PT_ENTRIES + i) as u64, true, true, false);
        }

        let pdp_higher_tbl = table_at(pdp_higher);
        pdp_higher_tbl.entries[0].set_mapping(phys_to_pfn(pd_higher), true, true, false);

        let pd_higher_tbl = table_at(pd_higher);
        pd_higher_tbl.entries[0].set_mapping(phys_to_pfn(pt_higher_0), true, true, false);
        pd_higher_tbl.entries[1].set_mapping(phys_to_pfn(pt_higher_1), true, true, false);

        let pt_higher_tbl_0 = table_at(pt_higher_0);
        for i in 0..PT_ENTRIES {
            pt_higher_tbl_0.entries[i].set_mapping(i as u64, true, true, false);
        }

        let pt_higher_tbl_1 = table_at(pt_higher_1);
        for i in 0..PT_ENTRIES {
            pt_higher_tbl_1
                .entries[i]
                .set_mapping((PT_ENTRIES + i) as u64, true, true, false);
        }
    }

    unsafe {
        (*VMM.inner.get()).pml4_physical = pml4;
        (*VMM.inner.get()).debug_enabled = debug_output;
    }
    VMM.initialized.store(true, Ordering::Release);

    unsafe { write_cr3(pml4) };
}

#[inline]
unsafe fn ensure_tables_for(virtual_address: u64) {
    let pml4 = unsafe { table_at(PML4_TABLE_ADDR) };
    let pml4_idx = pml4_index(virtual_address);
    if !pml4.entries[pml4_idx].present() {
        let new_table_phys = alloc_frame_phys();
        pml4.entries[pml4_idx].set_mapping(phys_to_pfn(new_table_phys), true, true, false);
        unsafe { invlpg(pdp_table_addr(virtual_address)) };
        let new_pdp = unsafe { table_at(pdp_table_addr(virtual_address)) };
        new_pdp.zero();
        debug_alloc("PML4", pml4_idx, pml4.entries[pml4_idx].frame());
    }

    let pdp = unsafe { table_at(pdp_table_addr(virtual_address)) };
    let pdp_idx = pdp_index(virtual_address);
    if !pdp.entries[pdp_idx].present() {
        let new_table_phys = alloc_frame_phys();
        pdp.entries[pdp_idx].set_mapping(phys_to_pfn(new_table_phys), true, true, false);
        unsafe { invlpg(pd_table_addr(virtual_address)) };
        let new_pd = unsafe { table_at(pd_table_addr(virtual_address)) };
        new_pd.zero();
        debug_alloc("PDP", pdp_idx, pdp.entries[pdp_idx].frame());
    }

    let pd = unsafe { table_at(pd_table_addr(virtual_address)) };
    let pd_idx = pd_index(virtual_address);
    if !pd.entries[pd_idx].present() {
        let new_table_phys = alloc_frame_phys();
        pd.entries[pd_idx].set_mapping(phys_to_pfn(new_table_phys), true, true, false);
        unsafe { invlpg(pt_table_addr(virtual_address)) };
        let new_pt = unsafe { table_at(pt_table_addr(virtual_address)) };
        new_pt.zero();
        debug_alloc("PD", pd_idx, pd.entries[pd_idx].frame());
    }
}

/// Maps `virtual_address` to `physical_address` with present + writable (+
/// optionally user) flags.
pub fn map_virtual_to_physical(virtual_address: u64, physical_address: u64, user: bool) {
    let virtual_address = page_align_down(virtual_address);
    let physical_address = page_align_down(physical_address);

    unsafe {
        ensure_tables_for(virtual_address);
        let pt = table_at(pt_table_addr(virtual_address));
        let pt_idx = pt_index(virtual_address);
        pt.entries[pt_idx].set_mapping(phys_to_pfn(physical_address), true, true, user);
        invlpg(virtual_address);
        debug_alloc("PT", pt_idx, pt.entries[pt_idx].frame());
    }
}

/// Unmaps the given virtual address and invalidates the corresponding TLB entry.
pub fn unmap_virtual_address(virtual_address: u64) {
    let virtual_address = page_align_down(virtual_address);

    unsafe {
        let pt = table_at(pt_table_addr(virtual_address));
        let pt_idx = pt_index(virtual_address);
        if pt.entries[pt_idx].present() {
            pt.entries[pt_idx].clear();
            invlpg(virtual_address);
        }
    }
}

/// A contiguous virtual range handed back to a region owner, fully backed
/// by physical frames at creation time.
#[derive(Debug, Clone, Copy)]
pub struct VmArea {
    pub start: u64,
    pub end: u64,
}

/// Protection flags for a freshly created `VmArea`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmAreaFlags {
    user: bool,
}

impl VmAreaFlags {
    pub const KERNEL_RW: Self = Self { user: false };
    pub const USER_RW: Self = Self { user: true };
}

fn map_eagerly(start: u64, end: u64, flags: VmAreaFlags) {
    let mut va = start;
    while va < end {
        let frame = alloc_frame_phys();
        map_virtual_to_physical(va, frame, flags.user);
        va += SMALL_PAGE_SIZE;
    }
}

/// Creates a new virtual-memory area of at least `size` bytes out of the
/// kernel's bump window, eagerly mapped to fresh physical frames.
pub fn create_vm_area(size: usize, flags: VmAreaFlags) -> Option<VmArea> {
    let size = page_align_up(size as u64);
    let (start, end) = with_vmm(|state| {
        let start = state.next_kernel_window;
        let end = start.checked_add(size)?;
        state.next_kernel_window = end;
        Some((start, end))
    })?;

    map_eagerly(start, end, flags);
    Some(VmArea { start, end })
}

/// Creates a virtual-memory area of at least `size` bytes at a caller-fixed
/// base address (used for the lazily created user heap), eagerly mapped.
pub fn create_vm_area_at(base: u64, size: usize, flags: VmAreaFlags) -> Option<VmArea> {
    let start = page_align_down(base);
    let end = start.checked_add(page_align_up(size as u64))?;
    map_eagerly(start, end, flags);
    Some(VmArea { start, end })
}
