//! Virtual Memory Manager integration tests.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use kaos_kernel::arch::interrupts;
use kaos_kernel::memory::{pmm, vmm};

/// Entry point for the VMM integration test kernel.
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

/// Contract: create_vm_area returns a page-aligned, correctly sized window.
#[test_case]
fn test_create_vm_area_returns_page_aligned_window() {
    let area = vmm::create_vm_area(0x3000, vmm::VmAreaFlags::KERNEL_RW)
        .expect("kernel vm area creation must succeed");

    assert!(area.start % 0x1000 == 0, "vm area start must be page-aligned");
    assert!(area.end % 0x1000 == 0, "vm area end must be page-aligned");
    assert!(
        area.end - area.start >= 0x3000,
        "vm area must cover at least the requested size"
    );
}

/// Contract: successive create_vm_area calls never overlap.
#[test_case]
fn test_create_vm_area_calls_do_not_overlap() {
    let first = vmm::create_vm_area(0x1000, vmm::VmAreaFlags::KERNEL_RW)
        .expect("first vm area creation must succeed");
    let second = vmm::create_vm_area(0x1000, vmm::VmAreaFlags::KERNEL_RW)
        .expect("second vm area creation must succeed");

    assert!(
        second.start >= first.end,
        "each new vm area must be carved from beyond all prior areas"
    );
}

/// Contract: every page in a freshly created vm area is readable and writable.
#[test_case]
fn test_create_vm_area_is_eagerly_backed() {
    let area = vmm::create_vm_area(0x2000, vmm::VmAreaFlags::KERNEL_RW)
        .expect("kernel vm area creation must succeed");

    let mut va = area.start;
    while va < area.end {
        unsafe {
            core::ptr::write_volatile(va as *mut u8, 0xAB);
            let read_back = core::ptr::read_volatile(va as *const u8);
            assert!(
                read_back == 0xAB,
                "every page of an eagerly mapped vm area must be writable and readable"
            );
        }
        va += 0x1000;
    }
}

/// Contract: create_vm_area_at maps the caller-chosen base address exactly.
#[test_case]
fn test_create_vm_area_at_uses_requested_base() {
    const BASE: u64 = 0x0000_7000_1000_0000;
    let area = vmm::create_vm_area_at(BASE, 0x1000, vmm::VmAreaFlags::USER_RW)
        .expect("fixed-base vm area creation must succeed");

    assert!(area.start == BASE, "vm area must start at the requested base");
    assert!(area.end == BASE + 0x1000, "vm area must cover exactly the requested size");

    unsafe {
        core::ptr::write_volatile(BASE as *mut u64, 0x1122_3344_5566_7788);
        assert!(
            core::ptr::read_volatile(BASE as *const u64) == 0x1122_3344_5566_7788,
            "fixed-base vm area must be backed by a real physical frame"
        );
    }
}

/// Contract: map_virtual_to_physical/unmap_virtual_address round-trip a single page.
#[test_case]
fn test_map_and_unmap_virtual_address_round_trip() {
    const VA: u64 = 0x0000_7000_2000_0000;
    let frame = pmm::alloc_pages_lowmem(0).expect("a free physical frame must be available");

    vmm::map_virtual_to_physical(VA, frame, false);

    unsafe {
        core::ptr::write_volatile(VA as *mut u64, 0x1122_3344_5566_7788);
        assert!(
            core::ptr::read_volatile(VA as *const u64) == 0x1122_3344_5566_7788,
            "freshly mapped page must be backed by the requested physical frame"
        );
    }

    vmm::unmap_virtual_address(VA);
}
