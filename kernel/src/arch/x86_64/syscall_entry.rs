//! The `int 0x80` syscall trap entry (§4.H, §4.G).
//!
//! Pushes general-purpose registers in exactly the order
//! [`crate::arch::x86_64::usermode::TrapFrame`] expects, so the same frame
//! the scheduler builds for a brand-new task's first dispatch also
//! describes a syscall's resume state: `rax` holds the syscall number on
//! entry and the return value on the way back out, `rbx`/`rcx`/`rdx` hold
//! up to three arguments, and the exit path is a tail jump into
//! [`usermode::interrupt_exit_trampoline`] rather than a second
//! hand-written `iretq`.

use core::arch::naked_asm;

use super::usermode::TrapFrame;

/// Called with `rdi` pointing at the in-progress [`TrapFrame`]. Reads the
/// syscall number and arguments out of it, dispatches, and writes the
/// result back into `rax` for the trampoline to restore.
extern "C" fn dispatch_from_trap(frame: *mut TrapFrame) {
    let frame = unsafe { &mut *frame };
    let result = crate::syscall::dispatch(
        frame.rax as usize,
        frame.rbx as usize,
        frame.rcx as usize,
        frame.rdx as usize,
    );
    frame.rax = result as u64;
}

/// Raw `int 0x80` handler, registered directly by address (not through
/// `set_handler_fn`, since its calling convention is hand-rolled rather
/// than `extern "x86-interrupt"`).
///
/// Entered in ring 0 with the CPU-pushed `ss, rsp, rflags, cs, rip` already
/// on the kernel stack (this gate always traps from ring 3, so a stack
/// switch and those five words are guaranteed). Pushes the remaining
/// `TrapFrame` fields in reverse field order so the resulting layout is
/// byte-for-byte a `TrapFrame`, loads the kernel data selector for the
/// duration of the dispatch, and tail-jumps into the shared exit trampoline
/// instead of returning.
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_isr() -> ! {
    naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "mov ax, 0x10",
        "mov ds, ax",
        "mov es, ax",
        "call {dispatch}",
        "jmp {trampoline}",
        dispatch = sym dispatch_from_trap,
        trampoline = sym super::usermode::interrupt_exit_trampoline,
    );
}
