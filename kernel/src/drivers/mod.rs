//! Device drivers: VGA console, PS/2 keyboard, and the legacy ATA disk
//! channels.

pub mod console;
pub mod keyboard;
pub mod partition;
pub mod storage;

/// Initialize all drivers. Called from `bootstrap::kernel_init` after the
/// scheduler and timer are up, since the keyboard and ATA drivers rely on
/// blocking primitives built on the scheduler.
pub fn init() {
    console::init();
    keyboard::init();
    storage::init();
}
