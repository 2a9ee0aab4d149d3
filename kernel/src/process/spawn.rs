//! First-launch process creation (§4.G, §4.N): build a brand-new user task
//! from an ELF file and hand it to the scheduler.
//!
//! `fork_process`/`exec_current` together give an *already-running* user
//! task the classic two-step "duplicate, then replace image" sequence.
//! Getting a user task onto the ready list in the first place needs a third
//! primitive neither covers: nothing is executing in the target address
//! space yet to fork from or exec over. `spawn` is that primitive — used
//! once at boot for the shell, and by the shell itself to launch external
//! commands, since a ring-0 kernel task has no page table of its own to
//! fork from.
//!
//! Grounded in `fork.rs`'s own page-copy loop: a physical frame freshly
//! handed out by [`crate::mm::alloc_user_pages`] is reachable by raw
//! pointer immediately, since user-pool memory is identity-mapped into the
//! kernel half every page table shares, long before the new task's own
//! `cr3` is ever loaded.

use crate::elf;
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::{KernelPoolFrames, PageMapper, PageTable};
use crate::mm::{FrameNumber, PageFlags, VirtualAddress, PAGE_SIZE};
use crate::sched::task::{Pid, Task};

use super::address_space;

const MAX_ARGV: usize = 16;

/// Load the ELF at `path` into a freshly built user task and queue it on
/// the ready list, returning its new PID. `cwd_inode` is copied in
/// directly since there is no existing address space to fork it out of.
pub fn spawn(path: &str, argv: &[&str], parent_pid: Pid, cwd_inode: u32) -> KernelResult<Pid> {
    let data =
        crate::fs::read_file(path).map_err(|_| KernelError::NotFound { resource: "file" })?;
    let parsed = elf::parse_and_validate(&data).map_err(|_| KernelError::InvalidArgument {
        name: "path",
        value: "not a valid executable",
    })?;

    let root = address_space::new_page_table()?;
    let l4 = root as *mut PageTable;
    let mut mapper = unsafe { PageMapper::new(l4) };
    let mut frames = KernelPoolFrames;

    let task_ptr = Task::create_user(path, parent_pid, root, parsed.entry)?;
    let task = unsafe { task_ptr.as_mut() };
    task.cwd_inode = Some(cwd_inode);

    // Map and fill every PT_LOAD segment. Writes land on the physical
    // frame directly (see module docs) rather than through `segment.vaddr`,
    // since `root` is not the active `cr3` yet.
    for segment in parsed.load_segments() {
        let page_size = PAGE_SIZE as u64;
        let start_page = segment.vaddr & !(page_size - 1);
        let end = segment.vaddr + segment.memsz;
        let end_page = (end + page_size - 1) & !(page_size - 1);

        let mut vaddr = start_page;
        while vaddr < end_page {
            let frame_addr = crate::mm::alloc_user_pages(1)?;
            unsafe {
                core::ptr::write_bytes(frame_addr as *mut u8, 0, PAGE_SIZE);
            }

            let copy_start = vaddr.max(segment.vaddr);
            let copy_end = (vaddr + page_size).min(segment.vaddr + segment.filesz);
            if copy_end > copy_start {
                let copy_len = (copy_end - copy_start) as usize;
                let page_off = (copy_start - vaddr) as usize;
                let file_off = segment.offset + (copy_start - segment.vaddr);
                let src = &data[file_off as usize..file_off as usize + copy_len];
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        src.as_ptr(),
                        (frame_addr as *mut u8).add(page_off),
                        copy_len,
                    );
                }
            }

            let mut flags = PageFlags::PRESENT | PageFlags::USER;
            if segment.writable {
                flags = flags | PageFlags::WRITABLE;
            }
            let frame_number = FrameNumber::new(frame_addr as u64 / page_size);
            mapper
                .map_page(VirtualAddress::new(vaddr), frame_number, flags, &mut frames)
                .map_err(|_| KernelError::OutOfMemory {
                    requested: 1,
                    available: 0,
                })?;
            if let Some(pool) = task.user_vaddr_pool.as_mut() {
                let _ = pool.mark_addr(vaddr as usize);
            }
            vaddr += page_size;
        }
    }

    // argv onto the new stack: same layout `exec_current` builds, written
    // through the physical frame backing the stack's first page rather
    // than through the user virtual address.
    let stack_frame = crate::mm::alloc_user_pages(1)?;
    unsafe {
        core::ptr::write_bytes(stack_frame as *mut u8, 0, PAGE_SIZE);
    }
    let stack_page_vaddr =
        crate::arch::x86_64::usermode::USER_STACK_TOP as u64 - PAGE_SIZE as u64;
    let frame_number = FrameNumber::new(stack_frame as u64 / PAGE_SIZE as u64);
    mapper
        .map_page(
            VirtualAddress::new(stack_page_vaddr),
            frame_number,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
            &mut frames,
        )
        .map_err(|_| KernelError::OutOfMemory {
            requested: 1,
            available: 0,
        })?;
    if let Some(pool) = task.user_vaddr_pool.as_mut() {
        let _ = pool.mark_addr(stack_page_vaddr as usize);
    }

    let stack_top_off = PAGE_SIZE as u64;
    let mut sp_off = stack_top_off;
    let argc = argv.len().min(MAX_ARGV);
    let mut argv_ptrs = [0u64; MAX_ARGV];
    for (i, arg) in argv.iter().take(argc).enumerate() {
        let bytes = arg.as_bytes();
        sp_off -= (bytes.len() + 1) as u64;
        sp_off &= !0x7;
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                (stack_frame as *mut u8).add(sp_off as usize),
                bytes.len(),
            );
            *((stack_frame as *mut u8).add(sp_off as usize + bytes.len()) as *mut u8) = 0;
        }
        argv_ptrs[i] = stack_page_vaddr + sp_off;
    }
    sp_off &= !0xF;
    sp_off -= ((argc + 1) as u64) * 8;
    let argv_base_off = sp_off;
    for (i, ptr) in argv_ptrs.iter().take(argc).enumerate() {
        unsafe {
            *((stack_frame as *mut u8).add(argv_base_off as usize + i * 8) as *mut u64) = *ptr;
        }
    }
    unsafe {
        *((stack_frame as *mut u8).add(argv_base_off as usize + argc * 8) as *mut u64) = 0;
    }

    let new_sp = stack_page_vaddr + argv_base_off;
    let argv_base_vaddr = stack_page_vaddr + argv_base_off;

    let trap_frame_addr = task.trap_frame_ptr();
    unsafe {
        (*trap_frame_addr).rsp = new_sp;
        (*trap_frame_addr).rdi = argc as u64;
        (*trap_frame_addr).rsi = argv_base_vaddr;
    }

    let pid = task.pid;
    crate::sched::spawn(task_ptr);
    Ok(pid)
}
