//! FPU/SIMD save-restore helpers shared by the arch layer.
//!
//! The kernel targets x86_64 only, so context switching itself
//! (`context_switch`/`load_context`) is called directly against
//! [`crate::arch::x86_64::context`] from [`crate::sched`] rather than
//! through a generic trait; this module just forwards the FPU helpers.

/// Initialize FPU/SIMD for the current CPU.
pub fn init_fpu() {
    crate::arch::x86_64::context::init_fpu();
}

/// Save FPU/SIMD state.
pub fn save_fpu_state(state: &mut [u8]) {
    unsafe {
        crate::arch::x86_64::context::save_fpu_state(
            &mut *(state.as_mut_ptr() as *mut crate::arch::x86_64::context::FpuState),
        );
    }
}

/// Restore FPU/SIMD state.
pub fn restore_fpu_state(state: &[u8]) {
    unsafe {
        crate::arch::x86_64::context::restore_fpu_state(
            &*(state.as_ptr() as *const crate::arch::x86_64::context::FpuState),
        );
    }
}
