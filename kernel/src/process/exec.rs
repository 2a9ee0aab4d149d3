//! `execv` (§4.N): replace the calling task's image with an ELF executable.
//!
//! Grounded in the reference kernel's `sys_execv` in spirit (the actual
//! donor file backing this is gone, per the module's history): parse and
//! validate the target file (`crate::elf`), map in any pages its `PT_LOAD`
//! segments need on the *current* page-table root, copy in their file
//! contents, rename the task, and overwrite the trap frame at the top of
//! its PCB so the next dispatch lands at the new entry point instead of
//! returning from the syscall that invoked us. Does not return on success.

use crate::arch::x86_64::usermode::{TrapFrame, USER_STACK_TOP};
use crate::elf;
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::{KernelPoolFrames, PageMapper, PageTable};
use crate::mm::{PageFlags, VirtualAddress, PAGE_SIZE};

/// Maximum `argv` entries marshalled onto the new image's stack.
const MAX_ARGV: usize = 16;

/// Replace the current task's image with the ELF at `path`. On error the
/// caller's image (and trap frame) are untouched and this returns
/// normally; on success it diverges into the new program and never
/// returns.
pub fn exec_current(path: &str, argv: &[&str]) -> KernelResult<!> {
    let data = crate::fs::read_file(path).map_err(|_| KernelError::NotFound { resource: "file" })?;
    let parsed = elf::parse_and_validate(&data).map_err(|_| KernelError::InvalidArgument {
        name: "path",
        value: "not a valid executable",
    })?;

    let current_ptr = crate::sched::current_task_ptr();
    let current = unsafe { current_ptr.as_mut() };
    let root = current
        .page_table_root
        .expect("execv called from a task with no page table");

    let l4 = root as *mut PageTable;
    let mut mapper = unsafe { PageMapper::new(l4) };
    let mut frames = KernelPoolFrames;

    for segment in parsed.load_segments() {
        let page_size = PAGE_SIZE as u64;
        let start_page = segment.vaddr & !(page_size - 1);
        let end = segment.vaddr + segment.memsz;
        let end_page = (end + page_size - 1) & !(page_size - 1);

        let mut vaddr = start_page;
        while vaddr < end_page {
            if mapper.translate(VirtualAddress::new(vaddr)).is_none() {
                let frame_addr = crate::mm::alloc_user_pages(1)?;
                unsafe {
                    core::ptr::write_bytes(frame_addr as *mut u8, 0, PAGE_SIZE);
                }
                let mut flags = PageFlags::PRESENT | PageFlags::USER;
                if segment.writable {
                    flags = flags | PageFlags::WRITABLE;
                }
                let frame_number =
                    crate::mm::FrameNumber::new(frame_addr as u64 / page_size);
                mapper
                    .map_page(VirtualAddress::new(vaddr), frame_number, flags, &mut frames)
                    .map_err(|_| KernelError::OutOfMemory {
                        requested: 1,
                        available: 0,
                    })?;
                if let Some(pool) = current.user_vaddr_pool.as_mut() {
                    let _ = pool.mark_addr(vaddr as usize);
                }
            }
            vaddr += page_size;
        }

        let file_bytes = &data[segment.offset as usize..(segment.offset + segment.filesz) as usize];
        unsafe {
            core::ptr::copy_nonoverlapping(
                file_bytes.as_ptr(),
                segment.vaddr as *mut u8,
                file_bytes.len(),
            );
        }
    }

    current.set_name(path);

    // Marshal argv onto the top of the user stack: a NUL-terminated byte
    // for each string followed by a pointer array, mirroring a typical
    // System V `_start` contract. The stack page itself is faulted in on
    // first touch (§4.G), so write through it directly.
    let argc = argv.len().min(MAX_ARGV);
    let mut sp = USER_STACK_TOP as u64;
    let mut argv_ptrs = [0u64; MAX_ARGV];
    for (i, arg) in argv.iter().take(argc).enumerate() {
        let bytes = arg.as_bytes();
        sp -= (bytes.len() + 1) as u64;
        sp &= !0x7; // keep 8-byte alignment for the pointer array below
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), sp as *mut u8, bytes.len());
            *((sp + bytes.len() as u64) as *mut u8) = 0;
        }
        argv_ptrs[i] = sp;
    }
    sp &= !0xF; // 16-byte align before the pointer array (SysV ABI)
    sp -= ((argc + 1) as u64) * 8;
    let argv_base = sp;
    for (i, ptr) in argv_ptrs.iter().take(argc).enumerate() {
        unsafe {
            *((argv_base + (i as u64) * 8) as *mut u64) = *ptr;
        }
    }
    unsafe {
        *((argv_base + (argc as u64) * 8) as *mut u64) = 0;
    }

    let trap_frame_addr = current.trap_frame_ptr();
    unsafe {
        core::ptr::write(
            trap_frame_addr,
            TrapFrame::new_entry(parsed.entry, sp),
        );
        (*trap_frame_addr).rdi = argc as u64;
        (*trap_frame_addr).rsi = argv_base;
    }

    current.context.rip =
        crate::arch::x86_64::usermode::interrupt_exit_trampoline as usize as u64;
    current.context.rsp = trap_frame_addr as u64;
    current.context.rflags = 0x002;

    unsafe {
        crate::arch::x86_64::context::load_context(&current.context as *const _);
    }
    unreachable!("load_context jumps into the new image and never returns")
}
