//! `fork` (§4.N): deep-copy the calling task into a new, independent one.
//!
//! Grounded in the reference kernel's `sys_fork`/`copy_pcb` (`thread/fork.c`
//! in spirit, since this codebase's actual file is long gone): allocate a
//! PCB page, memcpy the parent's fields, assign a fresh PID, clone the
//! page-table root and user vaddr bitmap, then copy every page the bitmap
//! has set so parent and child observe identical memory at the moment of
//! the call but diverge immediately afterward (§9 "Fork" acceptance case).

use core::mem::size_of;

use crate::arch::x86_64::usermode::TrapFrame;
use crate::error::KernelResult;
use crate::mm::page_table::{KernelPoolFrames, PageMapper, PageTable};
use crate::mm::{PageFlags, VirtualAddress, PAGE_SIZE};
use crate::sched::task::{self, Pid, Task, TaskPtr, TaskState, MAX_OPEN_FILES};
use crate::sync::list::ListLink;

use super::address_space;

/// Duplicate the calling task. Returns the child's PID to the parent; the
/// child itself resumes later, at the same user-mode instruction, with its
/// copy of the trap frame's `rax` already zeroed.
pub fn fork_process() -> KernelResult<Pid> {
    let parent_ptr = crate::sched::current_task_ptr();
    let parent = unsafe { parent_ptr.as_ref() };

    let parent_root = parent
        .page_table_root
        .expect("fork called from a task with no page table");
    let parent_pool = parent
        .user_vaddr_pool
        .as_ref()
        .expect("fork called from a task with no user vaddr bitmap");

    let child_page = crate::mm::alloc_kernel_pages(1)?;
    let child_kernel_stack_top = child_page + PAGE_SIZE;

    // Clone the trap frame verbatim except the return-value register: the
    // child's `fork()` must observe 0 where the parent observes its PID.
    let parent_trap = unsafe { *parent.trap_frame_ptr() };
    let mut child_trap = parent_trap;
    child_trap.rax = 0;
    let child_trap_addr = child_kernel_stack_top - size_of::<TrapFrame>();
    unsafe {
        core::ptr::write(child_trap_addr as *mut TrapFrame, child_trap);
    }

    let child_root = address_space::new_page_table()?;

    let mut child_pool = task::alloc_user_vaddr_bitmap()?;
    child_pool.bits_mut().copy_from_slice(parent_pool.bits());

    // Walk the (now identically-set) bitmap: every page the parent has
    // gets its own fresh physical frame in the child, copied byte-for-byte.
    // Physical pool memory is identity-mapped in every address space's
    // shared kernel PML4 entry, so both the parent's source frame and the
    // child's destination frame are reachable by raw pointer without
    // switching `cr3` at all.
    let parent_l4 = parent_root as *mut PageTable;
    let parent_mapper = unsafe { PageMapper::new(parent_l4) };
    let child_l4 = child_root as *mut PageTable;
    let mut child_mapper = unsafe { PageMapper::new(child_l4) };
    let mut frames = KernelPoolFrames;

    for page_index in parent_pool.iter_allocated() {
        let vaddr = parent_pool.base() as u64 + page_index as u64 * PAGE_SIZE as u64;
        let parent_frame_addr = parent_mapper
            .translate(VirtualAddress::new(vaddr))
            .expect("vaddr bitmap bit set with no backing mapping")
            .as_u64();

        let child_frame_addr = crate::mm::alloc_user_pages(1)?;
        unsafe {
            core::ptr::copy_nonoverlapping(
                parent_frame_addr as *const u8,
                child_frame_addr as *mut u8,
                PAGE_SIZE,
            );
        }

        let frame_number = crate::mm::FrameNumber::new(child_frame_addr as u64 / PAGE_SIZE as u64);
        child_mapper
            .map_page(
                VirtualAddress::new(vaddr),
                frame_number,
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
                &mut frames,
            )
            .map_err(|_| crate::error::KernelError::OutOfMemory {
                requested: 1,
                available: 0,
            })?;
    }

    // The first three slots are the non-inode-backed stdio fds; only real
    // file descriptors beyond them reference an inode to refcount.
    let mut fd_table = [None; MAX_OPEN_FILES];
    for (idx, (slot, parent_slot)) in fd_table.iter_mut().zip(parent.fd_table.iter()).enumerate() {
        *slot = *parent_slot;
        if idx >= 3 {
            if let Some(global_fd) = parent_slot {
                let _ = crate::fs::dup_fd(*global_fd);
            }
        }
    }

    let child = Task {
        magic: task::TASK_MAGIC,
        pid: task::next_pid(),
        parent_pid: Some(parent.pid),
        name: parent.name,
        state: TaskState::Ready,
        priority: parent.priority,
        ticks: parent.priority as u32,
        ticks_elapsed: parent.priority as u32,
        fd_table,
        page_table_root: Some(child_root),
        user_vaddr_pool: Some(child_pool),
        cwd_inode: parent.cwd_inode,
        exit_code: None,
        queue_link: ListLink::new(),
        all_list_link: ListLink::new(),
        context: {
            let mut ctx = crate::arch::x86_64::context::X86_64Context::default();
            ctx.rip = crate::arch::x86_64::usermode::interrupt_exit_trampoline as usize as u64;
            ctx.rsp = child_trap_addr as u64;
            ctx.rflags = 0x002;
            ctx.cr3 = child_root;
            ctx
        },
        kernel_stack_top: child_kernel_stack_top,
    };

    let child_ptr_raw = child_page as *mut Task;
    unsafe {
        core::ptr::write(child_ptr_raw, child);
    }
    let child_ptr = TaskPtr::new(unsafe { core::ptr::NonNull::new_unchecked(child_ptr_raw) });
    let child_pid = unsafe { child_ptr.as_ref() }.pid;

    crate::sched::spawn(child_ptr);

    Ok(child_pid)
}
