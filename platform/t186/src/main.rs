//! tegraboot for T186 boards.
//!
//! Started by MB2 at the image base with the MMU off. The entry stub from
//! `arch-aarch64` sets up the stack and clears BSS before `boot_main`.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

use arch_aarch64::linux::boot_linux;
use linked_list_allocator::LockedHeap;
use tegraboot_t186::BoardConfig;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(target_os = "none")]
unsafe extern "C" {
    static mut __heap_start: u8;
    static mut __heap_end: u8;
}

#[cfg(target_os = "none")]
fn init_heap() {
    // SAFETY: the linker script reserves the heap region; nothing else
    // touches it.
    unsafe {
        let start = core::ptr::addr_of_mut!(__heap_start);
        let end = core::ptr::addr_of_mut!(__heap_end);
        ALLOCATOR.lock().init(start, end as usize - start as usize);
    }
}

#[cfg_attr(target_os = "none", unsafe(no_mangle))]
pub extern "C" fn boot_main() -> ! {
    #[cfg(target_os = "none")]
    init_heap();
    // SAFETY: MB2 enters at EL1 and the vectors are linked in.
    unsafe { arch_aarch64::exceptions::install_vector_table() };

    let board = BoardConfig::t186();
    match tegraboot_t186::run(&board, None) {
        // SAFETY: the loader staged a kernel image and a patched DTB.
        Ok(entry) => unsafe { boot_linux(entry) },
        Err(e) => {
            log::error!("boot failed: {}", e);
            bootcore::panic::halt_loop()
        }
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    bootcore::panic::report(info);
    bootcore::panic::halt_loop()
}

// Host builds only check that the image links together.
#[cfg(not(target_os = "none"))]
fn main() {
    let _ = boot_main as extern "C" fn() -> !;
}
