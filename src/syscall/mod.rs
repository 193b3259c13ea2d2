//! Syscall table and dispatcher entry point.
//!
//! The low-level interrupt glue passes `(syscall_nr, arg0..arg3)` into
//! [`dispatch`]. Types/constants live in `types`, kernel dispatch logic in
//! `dispatch`, and user/raw wrappers in their dedicated submodules.

mod dispatch;
mod types;

pub mod abi;

/// Compatibility path: keep `syscall::arch::syscall_raw::*` stable for existing callers.
pub mod arch {
    pub mod syscall_raw {
        #[allow(unused_imports)]
        pub use super::super::abi::{syscall0, syscall1, syscall2};
    }
}

/// Safe user-space syscall wrappers.
#[allow(dead_code)]
pub mod user;

#[allow(unused_imports)]
pub use dispatch::dispatch;

#[allow(unused_imports)]
pub use types::{
    decode_result, user_alias_rip, user_alias_va_for_kernel, SysError, SyscallId,
    SYSCALL_ERR_INVALID_ARG, SYSCALL_ERR_UNSUPPORTED, SYSCALL_OK,
};

/// Lowest non-canonical/kernel-half virtual address. Buffers that run past
/// this are rejected before dispatch ever dereferences them.
const USER_SPACE_CEILING: u64 = 0x0000_8000_0000_0000;

/// Validates that `ptr..ptr+len` is non-null and falls entirely below the
/// kernel half of the address space, without overflowing.
///
/// This is a coarse range check, not a page-table walk: it rejects obviously
/// malicious or malformed arguments before a syscall implementation copies
/// from user memory. Actual mappedness is still enforced by the MMU at
/// access time.
pub(crate) fn is_valid_user_buffer(ptr: *const u8, len: usize) -> bool {
    if ptr.is_null() {
        return false;
    }
    let start = ptr as u64;
    let Some(end) = start.checked_add(len as u64) else {
        return false;
    };
    end <= USER_SPACE_CEILING
}
