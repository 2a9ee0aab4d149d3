//! Syscall dispatch table (§4.H): a fixed 32-slot table of function
//! pointers indexed by the number the trap entry stub
//! ([`crate::arch::x86_64::syscall_entry`]) places in `rax`, with up to
//! three arguments taken from `rbx`/`rcx`/`rdx`.
//!
//! Replaces the donor's capability/IPC syscall surface
//! (`IpcSend`/`IpcCall`/`ThreadCreate`/...) wholesale: that table dispatched
//! into a `crate::ipc` module that does not exist in this tree and a
//! `syscall::process` submodule that was never written, so it could not
//! have compiled. The table below is the flat getpid/write/fork/.../execv
//! set the syscall contract actually calls for.

use crate::error::{to_syscall_return, FsError, KernelError, KernelResult};
use crate::sched::task::Pid;

pub const SYS_GETPID: usize = 0;
pub const SYS_WRITE: usize = 1;
pub const SYS_FORK: usize = 2;
pub const SYS_READ: usize = 3;
pub const SYS_PUTCHAR: usize = 4;
pub const SYS_CLEAR: usize = 5;
pub const SYS_GETCWD: usize = 6;
pub const SYS_OPEN: usize = 7;
pub const SYS_CLOSE: usize = 8;
pub const SYS_LSEEK: usize = 9;
pub const SYS_UNLINK: usize = 10;
pub const SYS_MKDIR: usize = 11;
pub const SYS_OPENDIR: usize = 12;
pub const SYS_CLOSEDIR: usize = 13;
pub const SYS_CHDIR: usize = 14;
pub const SYS_RMDIR: usize = 15;
pub const SYS_READDIR: usize = 16;
pub const SYS_REWINDDIR: usize = 17;
pub const SYS_STAT: usize = 18;
pub const SYS_PS: usize = 19;
pub const SYS_EXECV: usize = 20;

/// File descriptor 1 (stdout) is the only `write` destination wired up so
/// far; anything else falls through to the file system.
const STDOUT_FD: usize = 1;
const STDIN_FD: usize = 0;

/// Entry point called by [`crate::arch::x86_64::syscall_entry::syscall_isr`].
/// Returns the raw value to be restored into `rax`: non-negative on
/// success, `-1` (via [`to_syscall_return`]) on failure, matching the
/// propagation policy described in §7.
pub fn dispatch(nr: usize, arg1: usize, arg2: usize, arg3: usize) -> isize {
    let result = match nr {
        SYS_GETPID => sys_getpid(),
        SYS_WRITE => sys_write(arg1, arg2, arg3),
        SYS_FORK => sys_fork(),
        SYS_READ => sys_read(arg1, arg2, arg3),
        SYS_PUTCHAR => sys_putchar(arg1),
        SYS_CLEAR => sys_clear(),
        SYS_PS => sys_ps(arg1, arg2),
        SYS_EXECV => sys_execv(arg1, arg2),
        SYS_GETCWD => sys_getcwd(arg1, arg2),
        SYS_OPEN => sys_open(arg1, arg2),
        SYS_CLOSE => sys_close(arg1),
        SYS_LSEEK => sys_lseek(arg1, arg2, arg3),
        SYS_UNLINK => sys_unlink(arg1),
        SYS_MKDIR => sys_mkdir(arg1),
        SYS_OPENDIR => sys_opendir(arg1),
        SYS_CLOSEDIR => sys_closedir(arg1),
        SYS_CHDIR => sys_chdir(arg1),
        SYS_RMDIR => sys_rmdir(arg1),
        SYS_READDIR => sys_readdir(arg1, arg2),
        SYS_REWINDDIR => sys_rewinddir(arg1),
        SYS_STAT => sys_stat(arg1, arg2),
        _ => Err(KernelError::SyscallError(
            crate::error::SyscallError::InvalidSyscall { nr },
        )),
    };

    match result {
        Ok(value) => value as isize,
        Err(err) => to_syscall_return(err),
    }
}

fn sys_getpid() -> KernelResult<usize> {
    let current = crate::sched::current_task_ptr();
    let pid: Pid = unsafe { current.as_ref() }.pid;
    Ok(pid as usize)
}

/// `(fd, buf, count) -> bytes_written`; stdout goes to the console, every
/// other fd is looked up in the caller's local fd table and forwarded to
/// the file system.
fn sys_write(fd: usize, buf: usize, count: usize) -> KernelResult<usize> {
    if buf == 0 {
        return Err(KernelError::InvalidArgument {
            name: "buf",
            value: "null",
        });
    }
    if fd == STDOUT_FD {
        let bytes = unsafe { core::slice::from_raw_parts(buf as *const u8, count) };
        for &byte in bytes {
            crate::drivers::console::putchar(byte);
        }
        return Ok(count);
    }
    let global_fd = local_fd_to_global(fd)?;
    let bytes = unsafe { core::slice::from_raw_parts(buf as *const u8, count) };
    crate::fs::write(global_fd, bytes)
}

fn sys_fork() -> KernelResult<usize> {
    crate::process::fork_process().map(|pid| pid as usize)
}

/// `(fd, buf, count)`; stdin reads from the keyboard queue one decoded byte
/// per blocking `read_key_blocking` call, every other fd is forwarded to
/// the file system.
fn sys_read(fd: usize, buf: usize, count: usize) -> KernelResult<usize> {
    if buf == 0 || count == 0 {
        return Ok(0);
    }
    if fd == STDIN_FD {
        let out = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, count) };
        for slot in out.iter_mut() {
            *slot = unsafe { crate::drivers::keyboard::read_key_blocking() };
        }
        return Ok(count);
    }
    let global_fd = local_fd_to_global(fd)?;
    let out = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, count) };
    crate::fs::read(global_fd, out)
}

fn sys_putchar(ch: usize) -> KernelResult<usize> {
    crate::drivers::console::putchar(ch as u8);
    Ok(0)
}

fn sys_clear() -> KernelResult<usize> {
    crate::drivers::console::clear();
    Ok(0)
}

/// Writes up to `max` PIDs of live tasks into `buf` (a `u32` array),
/// returning the count written. The `ps` shell command (§4.O) formats the
/// rest by looking each PID back up, rather than this syscall marshalling
/// names/states across the boundary itself.
fn sys_ps(buf: usize, max: usize) -> KernelResult<usize> {
    if buf == 0 {
        return Err(KernelError::InvalidArgument {
            name: "buf",
            value: "null",
        });
    }
    let out = unsafe { core::slice::from_raw_parts_mut(buf as *mut u32, max) };
    let mut n = 0usize;
    crate::sched::for_each_task(|task| {
        if n < max {
            out[n] = task.pid;
            n += 1;
        }
    });
    Ok(n)
}

/// `execv(path, argv)`: replaces the caller's image in place. On success
/// this never returns to the caller at all (the trap frame it resumes into
/// belongs to the new image), so there is no "success" value to hand back
/// through `dispatch` — only the failure path reaches here.
fn sys_execv(path_ptr: usize, argv_ptr: usize) -> KernelResult<usize> {
    let path = unsafe { c_str_ref(path_ptr) };
    let argv = unsafe { c_str_array_ref(argv_ptr) };
    match crate::process::exec_current(path, &argv) {
        Ok(never) => match never {},
        Err(err) => Err(err),
    }
}

/// Resolve `local_fd`'s entry in the current task's fd table to the global
/// fd it names, without disturbing the table.
fn local_fd_to_global(local_fd: usize) -> KernelResult<u32> {
    let current = crate::sched::current_task_ptr();
    let task = unsafe { current.as_ref() };
    task.fd_table
        .get(local_fd)
        .and_then(|slot| *slot)
        .ok_or(KernelError::FsError(FsError::BadFileDescriptor))
}

/// Install `global_fd` at the first free local slot at or past 0-2 (those
/// three are reserved for stdin/stdout/stderr), returning that local fd.
fn alloc_local_fd(global_fd: u32) -> KernelResult<usize> {
    let current = crate::sched::current_task_ptr();
    let task = unsafe { current.as_mut() };
    for (idx, slot) in task.fd_table.iter_mut().enumerate().skip(3) {
        if slot.is_none() {
            *slot = Some(global_fd);
            return Ok(idx);
        }
    }
    Err(KernelError::FsError(FsError::TooManyOpenFiles))
}

fn current_cwd_inode() -> u32 {
    let current = crate::sched::current_task_ptr();
    unsafe { current.as_ref() }.cwd_inode.unwrap_or(0)
}

/// `(path_ptr, flags) -> local fd`.
fn sys_open(path_ptr: usize, flags: usize) -> KernelResult<usize> {
    let path = unsafe { c_str_ref(path_ptr) };
    let global_fd = crate::fs::open(path, flags as u32, current_cwd_inode())?;
    match alloc_local_fd(global_fd) {
        Ok(local_fd) => Ok(local_fd),
        Err(e) => {
            let _ = crate::fs::close(global_fd);
            Err(e)
        }
    }
}

fn sys_close(local_fd: usize) -> KernelResult<usize> {
    let global_fd = local_fd_to_global(local_fd)?;
    crate::fs::close(global_fd)?;
    let current = crate::sched::current_task_ptr();
    let task = unsafe { current.as_mut() };
    if let Some(slot) = task.fd_table.get_mut(local_fd) {
        *slot = None;
    }
    Ok(0)
}

/// `(fd, offset, whence) -> new_pos`; `offset` is passed through as a
/// two's-complement `isize` to allow seeking backward.
fn sys_lseek(local_fd: usize, offset: usize, whence: usize) -> KernelResult<usize> {
    let global_fd = local_fd_to_global(local_fd)?;
    let pos = crate::fs::lseek(global_fd, offset as isize, whence as u32)?;
    Ok(pos as usize)
}

fn sys_unlink(path_ptr: usize) -> KernelResult<usize> {
    let path = unsafe { c_str_ref(path_ptr) };
    crate::fs::unlink(path, current_cwd_inode())?;
    Ok(0)
}

fn sys_mkdir(path_ptr: usize) -> KernelResult<usize> {
    let path = unsafe { c_str_ref(path_ptr) };
    crate::fs::mkdir(path, current_cwd_inode())?;
    Ok(0)
}

fn sys_rmdir(path_ptr: usize) -> KernelResult<usize> {
    let path = unsafe { c_str_ref(path_ptr) };
    crate::fs::rmdir(path, current_cwd_inode())?;
    Ok(0)
}

fn sys_chdir(path_ptr: usize) -> KernelResult<usize> {
    let path = unsafe { c_str_ref(path_ptr) };
    let new_cwd = crate::fs::chdir(path, current_cwd_inode())?;
    let current = crate::sched::current_task_ptr();
    unsafe { current.as_mut() }.cwd_inode = Some(new_cwd);
    Ok(0)
}

/// `(buf, size) -> bytes_written`; writes the NUL-terminated cwd path into
/// `buf`, failing if it (including the terminator) doesn't fit in `size`.
fn sys_getcwd(buf_ptr: usize, size: usize) -> KernelResult<usize> {
    let cwd = crate::fs::getcwd(current_cwd_inode())?;
    let bytes = cwd.as_bytes();
    if bytes.len() + 1 > size {
        return Err(KernelError::InvalidArgument {
            name: "size",
            value: "too small",
        });
    }
    let out = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, size) };
    out[..bytes.len()].copy_from_slice(bytes);
    out[bytes.len()] = 0;
    Ok(bytes.len())
}

/// `(path_ptr, stat_ptr)`; writes `{ ino: u32, size: u32, file_type: u32 }`
/// into `stat_ptr`, matching [`crate::fs::Stat`]'s field order.
fn sys_stat(path_ptr: usize, stat_ptr: usize) -> KernelResult<usize> {
    let path = unsafe { c_str_ref(path_ptr) };
    let st = crate::fs::stat(path, current_cwd_inode())?;
    if stat_ptr == 0 {
        return Err(KernelError::InvalidArgument {
            name: "stat_ptr",
            value: "null",
        });
    }
    let out = stat_ptr as *mut u32;
    unsafe {
        *out = st.ino;
        *out.add(1) = st.size;
        *out.add(2) = st.file_type as u32;
    }
    Ok(0)
}

fn sys_opendir(path_ptr: usize) -> KernelResult<usize> {
    let path = unsafe { c_str_ref(path_ptr) };
    let handle = crate::fs::opendir(path, current_cwd_inode())?;
    Ok(handle as usize)
}

fn sys_closedir(handle: usize) -> KernelResult<usize> {
    crate::fs::closedir(handle as u32)?;
    Ok(0)
}

fn sys_rewinddir(handle: usize) -> KernelResult<usize> {
    crate::fs::rewinddir(handle as u32)?;
    Ok(0)
}

/// `(handle, dirent_ptr) -> 1` if an entry was written, `0` at end of
/// directory. Writes `{ inode_no: u32, file_type: u32, name: [u8; 16] }`.
fn sys_readdir(handle: usize, dirent_ptr: usize) -> KernelResult<usize> {
    match crate::fs::readdir(handle as u32)? {
        Some(entry) => {
            if dirent_ptr == 0 {
                return Err(KernelError::InvalidArgument {
                    name: "dirent_ptr",
                    value: "null",
                });
            }
            let out = dirent_ptr as *mut u8;
            unsafe {
                (out as *mut u32).write(entry.inode_no);
                (out.add(4) as *mut u32).write(entry.file_type as u32);
                let name = entry.name().as_bytes();
                let len = name.len().min(16);
                core::ptr::copy_nonoverlapping(name.as_ptr(), out.add(8), len);
                if len < 16 {
                    core::ptr::write_bytes(out.add(8 + len), 0, 16 - len);
                }
            }
            Ok(1)
        }
        None => Ok(0),
    }
}

/// Reads a NUL-terminated string out of user memory without copying. Safe
/// only because this kernel runs user and kernel code in the same address
/// space (no SMAP/SMEP posture yet); a hardened build would copy through a
/// bounded `copy_from_user` instead.
unsafe fn c_str_ref<'a>(ptr: usize) -> &'a str {
    let bytes = ptr as *const u8;
    let mut len = 0usize;
    while unsafe { *bytes.add(len) } != 0 {
        len += 1;
    }
    let slice = unsafe { core::slice::from_raw_parts(bytes, len) };
    core::str::from_utf8(slice).unwrap_or("")
}

/// Reads a NULL-terminated array of NUL-terminated string pointers (a
/// classic `argv`) out of user memory.
unsafe fn c_str_array_ref<'a>(ptr: usize) -> alloc::vec::Vec<&'a str> {
    let mut out = alloc::vec::Vec::new();
    if ptr == 0 {
        return out;
    }
    let entries = ptr as *const usize;
    let mut i = 0usize;
    loop {
        let entry = unsafe { *entries.add(i) };
        if entry == 0 {
            break;
        }
        out.push(unsafe { c_str_ref(entry) });
        i += 1;
    }
    out
}
