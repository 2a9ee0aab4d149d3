//! Bootloader hand-off (component R): wires `bootloader_api`'s entry point
//! into [`crate::bootstrap::run`].

use bootloader_api::{entry_point, BootInfo};

entry_point!(kernel_main);

fn kernel_main(_boot_info: &'static mut BootInfo) -> ! {
    crate::bootstrap::run()
}
