//! Region Manager Integration Tests
//!
//! `Region::sbrk` is pure address arithmetic over a `[vm_start, vm_end)`
//! range, so these tests construct `Region`s directly rather than going
//! through the paging layer.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use kaos_kernel::arch::interrupts;
use kaos_kernel::memory::region::Region;
use kaos_kernel::memory::{pmm, vmm};

/// Entry point for the region integration test kernel.
#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();

    pmm::init(false);
    interrupts::init();
    vmm::init(false);

    test_main();

    loop {
        core::hint::spin_loop();
    }
}

/// Panic handler for integration tests.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kaos_kernel::testing::test_panic_handler(info)
}

#[test_case]
fn test_region_new_starts_top_at_vm_start() {
    let region = Region::new(0x1000, 0x2000);
    assert!(region.vm_start() == 0x1000);
    assert!(region.vm_end() == 0x2000);
    assert!(region.top() == 0x1000);
}

#[test_case]
fn test_region_sbrk_grows_and_returns_prior_top() {
    let mut region = Region::new(0x1000, 0x2000);

    let prior = region.sbrk(0x100);
    assert!(prior == Some(0x1000), "sbrk should return the top before growth");
    assert!(region.top() == 0x1100, "top should advance by delta");

    let prior2 = region.sbrk(0x100);
    assert!(prior2 == Some(0x1100));
    assert!(region.top() == 0x1200);
}

#[test_case]
fn test_region_sbrk_fails_past_vm_end() {
    let mut region = Region::new(0x1000, 0x1100);

    let result = region.sbrk(0x200);
    assert!(result.is_none(), "growth past vm_end must fail");
    assert!(region.top() == 0x1000, "a failed sbrk must not move top");
}

#[test_case]
fn test_region_sbrk_exact_fit_then_next_fails() {
    let mut region = Region::new(0x1000, 0x1100);

    let prior = region.sbrk(0x100);
    assert!(prior == Some(0x1000));
    assert!(region.top() == 0x1100, "growth landing exactly on vm_end must succeed");

    let result = region.sbrk(1);
    assert!(result.is_none(), "any further growth once top == vm_end must fail");
}

#[test_case]
fn test_region_sbrk_zero_delta_reads_back_top_without_growing() {
    let mut region = Region::new(0x1000, 0x2000);
    region.sbrk(0x50).unwrap();

    let top = region.sbrk(0);
    assert!(top == Some(0x1050), "a zero delta should report the current top unchanged");
    assert!(region.top() == 0x1050);
}

#[test_case]
fn test_region_sbrk_negative_delta_is_a_no_op() {
    let mut region = Region::new(0x1000, 0x2000);
    region.sbrk(0x80).unwrap();

    let top = region.sbrk(-0x40);
    assert!(top == Some(0x1080), "a negative delta must not shrink the region");
    assert!(region.top() == 0x1080, "top must be unchanged by a negative delta");
}

#[test_case]
fn test_region_contains_open_excludes_endpoints() {
    let region = Region::new(0x1000, 0x2000);

    assert!(!region.contains_open(0x1000), "vm_start itself is not inside the open interval");
    assert!(!region.contains_open(0x2000), "vm_end itself is not inside the open interval");
    assert!(region.contains_open(0x1800), "an interior address is inside the open interval");
}
