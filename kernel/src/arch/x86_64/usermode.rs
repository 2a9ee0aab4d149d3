//! User-mode entry and the shared interrupt-exit trampoline (§4.G, §4.N).
//!
//! A task destined for ring 3 gets a [`TrapFrame`] built at the top of its
//! PCB page instead of a normal kernel context frame. Its saved
//! `context.rsp` points directly at that frame and `context.rip` at
//! [`interrupt_exit_trampoline`], so the ordinary scheduler dispatch path
//! (`context_switch`/`load_context`) lands in the trampoline, which
//! restores every general-purpose register, loads user data-segment
//! selectors, and `iretq`s into ring 3 — no separate "enter user mode" call
//! is needed. A syscall or interrupt returning to user mode reuses the same
//! trampoline against a frame the trap entry stub (component H) builds at
//! this same top-of-PCB-page location.

use core::arch::naked_asm;

/// Top of the user stack; the first page is faulted in lazily on first
/// touch rather than pre-mapped (§4.G).
pub const USER_STACK_TOP: usize = 0x0000_7FFF_FFFF_F000;

/// General-purpose registers plus the hardware `iretq` frame (RIP, CS,
/// RFLAGS, RSP, SS, low to high address). First dispatch into a brand-new
/// user task ([`crate::sched::task::Task::create_user`]) and an ordinary
/// return from a trap both restore through this same layout, so `fork`
/// (§4.N) can build a child's resume state by copying and editing one of
/// these rather than needing a second frame shape.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// A fresh frame for a brand-new task's first dispatch into ring 3:
    /// every general-purpose register starts at zero, user code/data
    /// selectors at RPL 3 (0x33/0x2B), RFLAGS with IF set and the
    /// mandatory reserved bit 1 set, IOPL 0.
    pub fn new_entry(entry: u64, user_rsp: u64) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            rip: entry,
            cs: 0x33,
            rflags: 0x202,
            rsp: user_rsp,
            ss: 0x2B,
        }
    }
}

/// Entered with `rsp` pointing at a [`TrapFrame`] and `cr3` already switched
/// to the task's address space (by the scheduler's context switch, or
/// already active for an ordinary trap return). Restores every
/// general-purpose register, loads the user data segment into ds/es,
/// clears fs/gs, and `iretq`s — the frame's RIP/CS/RFLAGS/RSP/SS take it
/// from there. `rax` is restored last so the segment setup above can use
/// it as scratch without clobbering a syscall's return value.
#[unsafe(naked)]
pub unsafe extern "C" fn interrupt_exit_trampoline() -> ! {
    naked_asm!(
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "mov ax, 0x2b",
        "mov ds, ax",
        "mov es, ax",
        "xor eax, eax",
        "mov fs, ax",
        "mov gs, ax",
        "pop rax",
        "iretq",
    );
}
