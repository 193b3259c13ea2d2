//! Minimal process descriptor: the heap subsystem's external collaborator.
//!
//! The scheduler and program loader are out of scope here; this module
//! exposes only what `memory::heap` needs from "the current process" — a
//! memory descriptor carrying the user heap's region (created lazily by
//! `sys_brk`) and a `brk` cursor. A single process is modeled as a global
//! singleton, matching the single-CPU, no-scheduler shape of this crate.

use core::fmt;

use crate::memory::region::Region;

/// Per-process memory state the heap subsystem reads and mutates.
#[derive(Debug, Clone, Copy)]
pub struct MemoryDescriptor {
    /// The process's user heap region, or `None` before its first `sys_brk`.
    pub user_heap: Option<Region>,
    /// Current `brk` cursor, mirroring `user_heap`'s `top` once created.
    pub brk: u64,
}

impl MemoryDescriptor {
    pub const fn new() -> Self {
        Self {
            user_heap: None,
            brk: 0,
        }
    }
}

/// A process descriptor, trimmed to the fields the heap subsystem needs.
#[derive(Debug, Clone, Copy)]
pub struct Process {
    pub pid: u64,
    pub memory: MemoryDescriptor,
}

impl Process {
    pub const fn new(pid: u64) -> Self {
        Self {
            pid,
            memory: MemoryDescriptor::new(),
        }
    }
}

/// Error space for operations that require a current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// No process is current — a programming error at the syscall boundary,
    /// not a recoverable condition for the core heap API.
    NoCurrentProcess,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCurrentProcess => f.write_str("no current process"),
        }
    }
}

static mut CURRENT: Option<Process> = None;

/// Installs `process` as the current process, replacing any prior one.
pub fn set_current(process: Process) {
    // SAFETY: single-CPU kernel; callers serialize against interrupts per §5.
    unsafe {
        CURRENT = Some(process);
    }
}

/// Returns the current process, panicking if none has been installed.
///
/// This is the core API's accessor: callers one layer up (the syscall
/// dispatch boundary) are expected to use `try_current` and turn absence
/// into a checked `Result` before ever reaching here.
pub fn current() -> &'static mut Process {
    // SAFETY: see `set_current`.
    unsafe {
        (*core::ptr::addr_of_mut!(CURRENT))
            .as_mut()
            .expect("no current process")
    }
}

/// Returns the current process, or `None` if none has been installed.
pub fn try_current() -> Option<&'static mut Process> {
    // SAFETY: see `set_current`.
    unsafe { (*core::ptr::addr_of_mut!(CURRENT)).as_mut() }
}
