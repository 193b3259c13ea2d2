//! Block header, region prologue, and the two intrusive lists threading them.
//!
//! A block is `HEADER_SIZE` bytes of header immediately followed by its
//! payload. The address-ordered list runs `head -> ... -> tail` via `next`;
//! this crate keeps it doubly linked (a `prev` field) rather than the
//! linear predecessor scan of the allocator this was modeled on, which
//! carries a literal `FIXME: Sometimes enters infinite loop!` at the call
//! site — see design note (a) on the singly-linked alternative.
//!
//! *Invariant B1*: `payload_size() % ROUND_QUANTUM == 0 && payload_size() >=
//! MIN_PAYLOAD` for every reachable block.
//! *Invariant B2*: the address-ordered list is strictly increasing; `next`,
//! when non-null, is greater than the block's own address.
//! *Invariant B3*: no two adjacent blocks in the address-ordered list are
//! both free — every `free` coalesces eagerly.
//! *Invariant B4*: a block is on the free list iff its flag bit is set.
//! *Invariant B5*: `head` is the lowest-address block, `tail` the
//! highest-address one; neither is null once the region is non-empty.

use core::mem::size_of;

/// Minimum payload size: enough to hold the `next_free` link once freed.
pub const MIN_PAYLOAD: u64 = 8;

/// All requested sizes are rounded up to a multiple of this many bytes.
pub const ROUND_QUANTUM: u64 = 16;

const FREE_FLAG: u64 = 1;

/// In-band block header. Fixed size, machine-word aligned.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BlockHeader {
    /// Upper bits: payload size in bytes (always a multiple of
    /// `ROUND_QUANTUM`). Low bit: 1 = free, 0 = allocated.
    size_and_flag: u64,
    /// Address of the next block's header in the address-ordered list, or 0
    /// if this block is `tail`.
    next: u64,
    /// Address of the previous block's header in the address-ordered list,
    /// or 0 if this block is `head`.
    prev: u64,
    /// When free: address of the next block in the free list, or 0. When
    /// allocated: garbage, must not be read.
    next_free: u64,
}

/// Header size in bytes (`H` in the design notes).
pub const HEADER_SIZE: u64 = size_of::<BlockHeader>() as u64;

impl BlockHeader {
    #[inline]
    pub fn payload_size(&self) -> u64 {
        self.size_and_flag & !FREE_FLAG
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.size_and_flag & FREE_FLAG != 0
    }

    #[inline]
    pub fn next(&self) -> u64 {
        self.next
    }

    #[inline]
    pub fn prev(&self) -> u64 {
        self.prev
    }

    #[inline]
    pub fn next_free(&self) -> u64 {
        self.next_free
    }

    #[inline]
    fn set_payload_size(&mut self, size: u64) {
        debug_assert!(size % ROUND_QUANTUM == 0 && size >= MIN_PAYLOAD);
        let flag = self.size_and_flag & FREE_FLAG;
        self.size_and_flag = size | flag;
    }

    #[inline]
    fn set_free(&mut self, free: bool) {
        if free {
            self.size_and_flag |= FREE_FLAG;
        } else {
            self.size_and_flag &= !FREE_FLAG;
        }
    }

    #[inline]
    fn set_next(&mut self, addr: u64) {
        self.next = addr;
    }

    #[inline]
    fn set_prev(&mut self, addr: u64) {
        self.prev = addr;
    }

    #[inline]
    fn set_next_free(&mut self, addr: u64) {
        self.next_free = addr;
    }
}

/// The three roots stored at the base of a region: first `3 * size_of::<u64>()`
/// bytes, not itself a block.
#[repr(C)]
pub struct Prologue {
    head: u64,
    tail: u64,
    free_head: u64,
}

/// Size of the region prologue in bytes (`3 * W`).
pub const PROLOGUE_SIZE: u64 = size_of::<Prologue>() as u64;

impl Prologue {
    #[inline]
    pub fn head(&self) -> u64 {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    #[inline]
    pub fn free_head(&self) -> u64 {
        self.free_head
    }

    #[inline]
    pub fn set_head(&mut self, addr: u64) {
        self.head = addr;
    }

    #[inline]
    pub fn set_tail(&mut self, addr: u64) {
        self.tail = addr;
    }

    #[inline]
    pub fn set_free_head(&mut self, addr: u64) {
        self.free_head = addr;
    }

    #[inline]
    pub fn zero(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.free_head = 0;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == 0
    }
}

/// Rounds `size` up to the allocator's granularity, per §3's overhead rule.
#[inline]
pub fn round_request(size: usize) -> u64 {
    let size = size as u64;
    let rounded = size.div_ceil(ROUND_QUANTUM) * ROUND_QUANTUM;
    rounded.max(MIN_PAYLOAD)
}

/// # Safety
/// `addr` must be a live block header address within the region.
#[inline]
unsafe fn header(addr: u64) -> &'static BlockHeader {
    unsafe { &*(addr as *const BlockHeader) }
}

/// # Safety
/// `addr` must be a live block header address within the region.
#[inline]
unsafe fn header_mut(addr: u64) -> &'static mut BlockHeader {
    unsafe { &mut *(addr as *mut BlockHeader) }
}

/// # Safety
/// `addr` must point to a readable/writable `Prologue` at the region base.
#[inline]
pub unsafe fn prologue_mut(addr: u64) -> &'static mut Prologue {
    unsafe { &mut *(addr as *mut Prologue) }
}

/// Converts a header address to the payload address the caller sees.
#[inline]
pub fn payload_of(header_addr: u64) -> u64 {
    header_addr + HEADER_SIZE
}

/// Converts a caller-visible payload address back to its header address.
#[inline]
pub fn header_of(payload_addr: u64) -> u64 {
    payload_addr - HEADER_SIZE
}

/// Reads the payload size of the block at `addr`.
///
/// # Safety
/// `addr` must be a live block header address.
#[inline]
pub unsafe fn payload_size_at(addr: u64) -> u64 {
    unsafe { header(addr).payload_size() }
}

/// # Safety
/// `addr` must be a live block header address.
#[inline]
pub unsafe fn is_free_at(addr: u64) -> bool {
    unsafe { header(addr).is_free() }
}

/// # Safety
/// `addr` must be a live block header address.
#[inline]
pub unsafe fn next_at(addr: u64) -> u64 {
    unsafe { header(addr).next() }
}

/// # Safety
/// `addr` must be a live block header address.
#[inline]
pub unsafe fn prev_at(addr: u64) -> u64 {
    unsafe { header(addr).prev() }
}

/// Initializes a freshly `sbrk`-ed block as allocated, with no list links.
///
/// # Safety
/// `addr` must point to at least `HEADER_SIZE + payload_size` writable bytes.
pub unsafe fn init_allocated(addr: u64, payload_size: u64) {
    unsafe {
        let h = header_mut(addr);
        h.size_and_flag = payload_size;
        h.next = 0;
        h.prev = 0;
        h.next_free = 0;
    }
}

/// Appends a freshly created block `addr` to the tail of the address-ordered
/// list, updating `head`/`tail` in the prologue.
///
/// # Safety
/// `addr` must be an initialized, unlinked header; `prologue` must describe
/// the same region.
pub unsafe fn append_block(prologue: &mut Prologue, addr: u64) {
    unsafe {
        if prologue.head == 0 {
            prologue.head = addr;
        } else {
            let tail = header_mut(prologue.tail);
            tail.set_next(addr);
            header_mut(addr).set_prev(prologue.tail);
        }
        prologue.tail = addr;
    }
}

/// Inserts `addr` at the head of the free list (flag must already be set).
///
/// # Safety
/// `addr` must be a live, free block header.
pub unsafe fn insert_free_head(prologue: &mut Prologue, addr: u64) {
    unsafe {
        header_mut(addr).set_next_free(prologue.free_head);
        prologue.free_head = addr;
    }
}

/// Removes `addr` from the free list by linear scan from `free_head`.
///
/// # Safety
/// `addr` must currently be a member of the free list rooted at
/// `prologue.free_head`.
pub unsafe fn remove_from_free_list(prologue: &mut Prologue, addr: u64) {
    unsafe {
        if prologue.free_head == addr {
            prologue.free_head = header(addr).next_free();
            return;
        }

        let mut cursor = prologue.free_head;
        while cursor != 0 {
            let next_free = header(cursor).next_free();
            if next_free == addr {
                header_mut(cursor).set_next_free(header(addr).next_free());
                return;
            }
            cursor = next_free;
        }
    }
}

/// Best-fit search: the smallest free block with `payload_size >= request`.
/// Ties keep the first occurrence encountered walking `free_head`.
///
/// # Safety
/// `prologue` must describe a consistent free list.
pub unsafe fn best_fit(prologue: &Prologue, request: u64) -> Option<u64> {
    unsafe {
        let mut cursor = prologue.free_head;
        let mut best: Option<(u64, u64)> = None;

        while cursor != 0 {
            let size = header(cursor).payload_size();
            if size >= request {
                match best {
                    Some((_, best_size)) if best_size <= size => {}
                    _ => best = Some((cursor, size)),
                }
            }
            cursor = header(cursor).next_free();
        }

        best.map(|(addr, _)| addr)
    }
}

/// Marks `addr` allocated, shrinking its payload to `new_payload` in place.
///
/// # Safety
/// `addr` must be a live, free block header with `payload_size() >=
/// new_payload`.
pub unsafe fn mark_allocated(addr: u64, new_payload: u64) {
    unsafe {
        let h = header_mut(addr);
        h.set_payload_size(new_payload);
        h.set_free(false);
    }
}

/// Marks `addr` free in place, without touching list links.
///
/// # Safety
/// `addr` must be a live block header.
pub unsafe fn mark_free(addr: u64) {
    unsafe {
        header_mut(addr).set_free(true);
    }
}

/// Writes a new header at `addr` for a block carved out of a split,
/// inheriting list position from the block it replaces on the right.
///
/// # Safety
/// `addr` must point to `HEADER_SIZE` writable bytes not aliasing any live
/// block; `next`/`prev` must be consistent with the caller's intended
/// splice.
pub unsafe fn write_split_block(addr: u64, payload_size: u64, next: u64, prev: u64) {
    unsafe {
        let h = header_mut(addr);
        h.size_and_flag = payload_size | FREE_FLAG;
        h.next = next;
        h.prev = prev;
        h.next_free = 0;
    }
}

/// Splices `addr` into the address-ordered list in place of `old_next_of`'s
/// former right neighbor, fixing up the neighbor's `prev` pointer and, if
/// needed, `tail`.
///
/// # Safety
/// `addr`'s `next`/`prev` fields must already describe its final position.
pub unsafe fn relink_address_list(prologue: &mut Prologue, addr: u64) {
    unsafe {
        let next = header(addr).next();
        let prev = header(addr).prev();

        if next != 0 {
            header_mut(next).set_prev(addr);
        } else {
            prologue.tail = addr;
        }

        if prev != 0 {
            header_mut(prev).set_next(addr);
        } else {
            prologue.head = addr;
        }
    }
}

/// Removes `addr` from the address-ordered list entirely (used when a block
/// is absorbed by a neighbor during coalescing), fixing up `head`/`tail`.
///
/// # Safety
/// `addr` must currently be a linked member of the address-ordered list.
pub unsafe fn unlink_address_list(prologue: &mut Prologue, addr: u64) {
    unsafe {
        let next = header(addr).next();
        let prev = header(addr).prev();

        if next != 0 {
            header_mut(next).set_prev(prev);
        } else {
            prologue.tail = prev;
        }

        if prev != 0 {
            header_mut(prev).set_next(next);
        } else {
            prologue.head = next;
        }
    }
}

/// Sets the block's `next` pointer directly (used when absorbing a right
/// neighbor during a split or a coalesce).
///
/// # Safety
/// `addr` must be a live block header.
pub unsafe fn set_next(addr: u64, next: u64) {
    unsafe { header_mut(addr).set_next(next) };
}

/// Sets the block's `prev` pointer directly (used when a neighbor is
/// absorbed and the following block's predecessor changes).
///
/// # Safety
/// `addr` must be a live block header.
pub unsafe fn set_prev(addr: u64, prev: u64) {
    unsafe { header_mut(addr).set_prev(prev) };
}

/// Sets the block's `payload_size`, preserving its current flag bit.
///
/// # Safety
/// `addr` must be a live block header.
pub unsafe fn set_payload_size(addr: u64, size: u64) {
    unsafe { header_mut(addr).set_payload_size(size) };
}
