//! Panic handler for the kernel.

use core::panic::PanicInfo;
use core::fmt::Write;
use crate::drivers::screen::{Color, PanicScreenWriter};

/// Prints panic location and message to the VGA console, then halts.
///
/// Uses [`PanicScreenWriter`] rather than [`with_screen`](crate::drivers::screen::with_screen)
/// so a panic taken while the global screen lock is held doesn't deadlock.
pub fn handle(info: &PanicInfo) -> ! {
    let mut screen = PanicScreenWriter::new(Color::White, Color::Blue);
    screen.clear();

    write!(screen, "\n!!! KERNEL PANIC !!!\n").unwrap();

    if let Some(location) = info.location()
    {
        write!(screen, "Location: {}:{}", location.file(), location.line()).unwrap();
        write!(screen, "\n").unwrap();
    }

    if let Some(message) = info.message().as_str()
    {
        write!(screen, "Message: {}\n", message).unwrap();
    }

    loop
    {
        unsafe
        {
            core::arch::asm!("cli");
            core::arch::asm!("hlt");
        }
    }
}
