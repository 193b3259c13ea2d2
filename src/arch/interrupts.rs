//! Interrupt flag control.
//!
//! This crate runs a single-CPU kernel with no scheduler or IRQ-driven
//! drivers, so the IDT/PIC apparatus isn't needed: what the rest of the
//! kernel actually uses is the IF-flag primitive that `SpinLock` relies on
//! to make a critical section atomic with respect to this CPU.

use core::arch::asm;

/// Masks external interrupts for the remainder of boot. There is no IDT to
/// install: nothing in this kernel handles an interrupt once taken.
pub fn init() {
    disable();
}

/// Enable interrupts globally.
pub fn enable() {
    unsafe {
        asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Disable interrupts globally.
pub fn disable() {
    unsafe {
        asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Returns whether interrupts are currently enabled (IF flag set).
#[inline]
pub fn are_enabled() -> bool {
    let rflags: u64;
    // SAFETY:
    // - Reading RFLAGS via pushfq/pop is safe and does not modify flags.
    // - `rflags` is a plain register output.
    unsafe {
        asm!(
            "pushfq",
            "pop {}",
            out(reg) rflags,
            options(nomem, preserves_flags)
        );
    }
    rflags & (1 << 9) != 0
}
