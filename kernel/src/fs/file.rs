//! Global open-file table and file operations (§3 Open-file entry, §4.M
//! File create/open/close/read/write/seek, Unlink, mkdir/rmdir, cwd/chdir,
//! stat).
//!
//! Grounded on `examples/original_source/filesys/file.c`'s global
//! `open_files` array: 32 slots, the first three reserved for
//! stdin/stdout/stderr (neither of which is inode-backed, so this kernel
//! never allocates them here), each remaining slot holding a byte offset,
//! the flags it was opened with, and a pointer to its inode. A task's own
//! fd table (`sched::task::Task::fd_table`) stores indices into this table,
//! not inodes directly, so [`crate::process::fork`] can clone file
//! descriptors by copying indices without touching this module at all.

use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{FsError, KernelError, KernelResult};

use super::dirent::{self, FileType};
use super::inode::{self, Inode};
use super::FsState;

pub const O_RDONLY: u32 = 0;
pub const O_WRONLY: u32 = 1;
pub const O_RDWR: u32 = 2;
pub const O_CREAT: u32 = 4;

pub const SEEK_SET: u32 = 1;
pub const SEEK_CUR: u32 = 2;
pub const SEEK_END: u32 = 3;

const MAX_OPEN_FILES: usize = 32;
const RESERVED_SLOTS: usize = 3;

#[derive(Clone, Copy)]
struct OpenFileEntry {
    pos: u32,
    flags: u32,
    inode_no: Option<u32>,
}

impl OpenFileEntry {
    const fn empty() -> Self {
        Self {
            pos: 0,
            flags: 0,
            inode_no: None,
        }
    }
}

static OPEN_FILES: Mutex<[OpenFileEntry; MAX_OPEN_FILES]> =
    Mutex::new([OpenFileEntry::empty(); MAX_OPEN_FILES]);

pub struct Stat {
    pub ino: u32,
    pub size: u32,
    pub file_type: FileType,
}

fn wants_write(flags: u32) -> bool {
    flags == O_WRONLY || flags == O_RDWR
}

fn start_inode(fs: &FsState, path: &str, cwd_inode: u32) -> u32 {
    if path.starts_with('/') {
        fs.sb.root_inode_no
    } else {
        cwd_inode
    }
}

/// Reserve the first free non-reserved slot and install it in one step, so
/// no other caller can observe a half-initialized entry.
fn install_new_slot(pos: u32, flags: u32, i_no: u32) -> KernelResult<u32> {
    let mut table = OPEN_FILES.lock();
    for (idx, slot) in table.iter_mut().enumerate().skip(RESERVED_SLOTS) {
        if slot.inode_no.is_none() {
            *slot = OpenFileEntry {
                pos,
                flags,
                inode_no: Some(i_no),
            };
            return Ok(idx as u32);
        }
    }
    Err(FsError::TooManyOpenFiles.into())
}

fn current_slot(global_fd: u32) -> KernelResult<(u32, u32, u32)> {
    let table = OPEN_FILES.lock();
    let slot = table
        .get(global_fd as usize)
        .ok_or(FsError::BadFileDescriptor)?;
    let i_no = slot.inode_no.ok_or(FsError::BadFileDescriptor)?;
    Ok((i_no, slot.pos, slot.flags))
}

fn set_slot_pos(global_fd: u32, pos: u32) -> KernelResult<()> {
    let mut table = OPEN_FILES.lock();
    let slot = table
        .get_mut(global_fd as usize)
        .ok_or(FsError::BadFileDescriptor)?;
    slot.pos = pos;
    Ok(())
}

/// Bump the inode open-count behind an already-installed global fd, used
/// when `fork` inherits a file descriptor into a new task's fd table
/// without going through `open` again.
pub fn dup_fd(global_fd: u32) -> KernelResult<()> {
    let (i_no, _pos, _flags) = current_slot(global_fd)?;
    super::with_fs(|fs| inode::open_inode(fs, i_no))
}

/// `open(path, flags, cwd_inode) -> global fd`. Creates the file first when
/// `O_CREAT` is set and it doesn't exist yet (File create); otherwise opens
/// the existing inode (File open), rejecting a second writer while one is
/// already attached.
pub fn open(path: &str, flags: u32, cwd_inode: u32) -> KernelResult<u32> {
    super::with_fs(|fs| {
        let start = start_inode(fs, path, cwd_inode);
        let record = dirent::search_path(fs, start, path)?;
        match record.found_inode {
            Some(i_no) => {
                if record.found_type == Some(FileType::Directory) && wants_write(flags) {
                    return Err(FsError::IsADirectory.into());
                }
                open_existing(fs, i_no, flags)
            }
            None => {
                if flags & O_CREAT == 0 {
                    return Err(FsError::NotFound.into());
                }
                create_new(fs, record.parent_inode, &record.name, flags)
            }
        }
    })
}

fn open_existing(fs: &mut FsState, i_no: u32, flags: u32) -> KernelResult<u32> {
    inode::open_inode(fs, i_no)?;
    let write_requested = wants_write(flags);
    if write_requested {
        let open = fs.open_inodes.get_mut(&i_no).expect("just opened above");
        if open.write_deny {
            inode::close_inode(fs, i_no)?;
            return Err(FsError::WriteDenied.into());
        }
        open.write_deny = true;
    }

    match install_new_slot(0, flags, i_no) {
        Ok(slot) => Ok(slot),
        Err(e) => {
            if write_requested {
                if let Some(open) = fs.open_inodes.get_mut(&i_no) {
                    open.write_deny = false;
                }
            }
            inode::close_inode(fs, i_no)?;
            Err(e)
        }
    }
}

fn create_new(fs: &mut FsState, parent_inode: u32, name: &str, flags: u32) -> KernelResult<u32> {
    let i_no = super::alloc_inode_bit(fs)?;
    let new_inode = Inode::empty(i_no);
    if let Err(e) = inode::sync_inode(fs, &new_inode) {
        let _ = super::free_inode_bit(fs, i_no);
        return Err(e);
    }
    fs.open_inodes.insert(
        i_no,
        inode::OpenInode {
            inode: new_inode,
            open_count: 1,
            write_deny: false,
        },
    );

    let entry = dirent::DirEntry::new(name, i_no, FileType::Regular);
    if let Err(e) = dirent::sync_dir_entry(fs, parent_inode, entry) {
        fs.open_inodes.remove(&i_no);
        let _ = super::free_inode_bit(fs, i_no);
        return Err(e);
    }

    match install_new_slot(0, flags, i_no) {
        Ok(slot) => Ok(slot),
        Err(e) => {
            fs.open_inodes.remove(&i_no);
            let _ = dirent::delete_dir_entry(fs, parent_inode, i_no);
            let _ = super::free_inode_bit(fs, i_no);
            Err(e)
        }
    }
}

pub fn close(global_fd: u32) -> KernelResult<()> {
    let (i_no, flags) = {
        let mut table = OPEN_FILES.lock();
        let slot = table
            .get_mut(global_fd as usize)
            .ok_or(FsError::BadFileDescriptor)?;
        let i_no = slot.inode_no.take().ok_or(FsError::BadFileDescriptor)?;
        (i_no, slot.flags)
    };
    super::with_fs(|fs| {
        if wants_write(flags) {
            if let Some(open) = fs.open_inodes.get_mut(&i_no) {
                open.write_deny = false;
            }
        }
        inode::close_inode(fs, i_no)
    })
}

fn read_bytes(fs: &FsState, inode: &Inode, offset: usize, out: &mut [u8]) -> KernelResult<()> {
    let slots = inode::block_slots(fs, inode)?;
    let mut remaining = out.len();
    let mut src_off = offset;
    let mut dst = 0usize;
    while remaining > 0 {
        let block_idx = src_off / super::BLOCK_SIZE;
        let in_block = src_off % super::BLOCK_SIZE;
        let blk = slots[block_idx];
        let mut buf = [0u8; super::BLOCK_SIZE];
        if blk != 0 {
            super::read_sector(fs, blk, &mut buf)?;
        }
        let take = (super::BLOCK_SIZE - in_block).min(remaining);
        out[dst..dst + take].copy_from_slice(&buf[in_block..in_block + take]);
        dst += take;
        src_off += take;
        remaining -= take;
    }
    Ok(())
}

fn write_bytes(fs: &mut FsState, inode: &mut Inode, offset: usize, data: &[u8]) -> KernelResult<()> {
    let mut remaining = data.len();
    let mut src = 0usize;
    let mut dst_off = offset;
    while remaining > 0 {
        let block_idx = dst_off / super::BLOCK_SIZE;
        if block_idx >= inode::MAX_BLOCKS {
            return Err(FsError::FileTooLarge.into());
        }
        let in_block = dst_off % super::BLOCK_SIZE;
        let take = (super::BLOCK_SIZE - in_block).min(remaining);

        let slots = inode::block_slots(fs, inode)?;
        let blk = if slots[block_idx] != 0 {
            slots[block_idx]
        } else {
            inode::append_block(fs, inode, block_idx)?
        };

        let mut buf = [0u8; super::BLOCK_SIZE];
        if in_block != 0 || take != super::BLOCK_SIZE {
            super::read_sector(fs, blk, &mut buf)?;
        }
        buf[in_block..in_block + take].copy_from_slice(&data[src..src + take]);
        super::write_sector(fs, blk, &buf)?;

        src += take;
        dst_off += take;
        remaining -= take;
    }
    Ok(())
}

/// `read(fd, buf) -> bytes_read`; capped at `i_size - fd_pos`, never reads
/// past what has actually been written.
pub fn read(global_fd: u32, buf: &mut [u8]) -> KernelResult<usize> {
    let (i_no, pos, _flags) = current_slot(global_fd)?;
    let n = super::with_fs(|fs| {
        let inode = inode::get_inode(fs, i_no)?;
        let avail = (inode.i_size as usize).saturating_sub(pos as usize);
        let count = buf.len().min(avail);
        if count == 0 {
            return Ok(0);
        }
        read_bytes(fs, &inode, pos as usize, &mut buf[..count])?;
        Ok(count)
    })?;
    set_slot_pos(global_fd, pos + n as u32)?;
    Ok(n)
}

/// `write(fd, buf) -> bytes_written`; extends the file one block at a time
/// past its current end, syncing the inode once the whole write lands.
pub fn write(global_fd: u32, buf: &[u8]) -> KernelResult<usize> {
    let (i_no, pos, _flags) = current_slot(global_fd)?;
    let n = super::with_fs(|fs| {
        let mut inode = inode::get_inode(fs, i_no)?;
        write_bytes(fs, &mut inode, pos as usize, buf)?;
        let end = pos as usize + buf.len();
        if end > inode.i_size as usize {
            inode.i_size = end as u32;
        }
        inode::sync_inode(fs, &inode)?;
        inode::put_inode(fs, inode);
        Ok(buf.len())
    })?;
    set_slot_pos(global_fd, pos + n as u32)?;
    Ok(n)
}

/// Seek within `[0, i_size - 1]` (§4.M Seek); an empty file only accepts a
/// seek back to `0`.
pub fn lseek(global_fd: u32, offset: isize, whence: u32) -> KernelResult<u32> {
    let (i_no, pos, _flags) = current_slot(global_fd)?;
    let size = super::with_fs(|fs| Ok(inode::get_inode(fs, i_no)?.i_size))?;

    let base: i64 = match whence {
        SEEK_SET => 0,
        SEEK_CUR => pos as i64,
        SEEK_END => size as i64,
        _ => {
            return Err(KernelError::InvalidArgument {
                name: "whence",
                value: "unknown",
            })
        }
    };
    let new_pos = base + offset as i64;
    let max_pos = if size == 0 { 0 } else { size as i64 - 1 };
    if new_pos < 0 || new_pos > max_pos {
        return Err(KernelError::InvalidArgument {
            name: "offset",
            value: "out of range",
        });
    }

    let new_pos = new_pos as u32;
    set_slot_pos(global_fd, new_pos)?;
    Ok(new_pos)
}

/// Refuses a directory or a still-open file (§4.M Unlink).
pub fn unlink(path: &str, cwd_inode: u32) -> KernelResult<()> {
    super::with_fs(|fs| {
        let start = start_inode(fs, path, cwd_inode);
        let record = dirent::search_path(fs, start, path)?;
        let i_no = record.found_inode.ok_or(FsError::NotFound)?;
        if record.found_type == Some(FileType::Directory) {
            return Err(FsError::IsADirectory.into());
        }
        if inode::is_open(fs, i_no) {
            return Err(FsError::FileInUse.into());
        }
        dirent::delete_dir_entry(fs, record.parent_inode, i_no)?;
        inode::release_inode(fs, i_no)
    })
}

/// Refuses if the path already exists or an intermediate component is
/// missing (§4.M mkdir).
pub fn mkdir(path: &str, cwd_inode: u32) -> KernelResult<()> {
    super::with_fs(|fs| {
        let start = start_inode(fs, path, cwd_inode);
        let record = dirent::search_path(fs, start, path)?;
        if record.found_inode.is_some() {
            return Err(FsError::AlreadyExists.into());
        }
        let parent = record.parent_inode;

        let i_no = super::alloc_inode_bit(fs)?;
        let block = super::alloc_block(fs)?;

        let mut data = [0u8; super::BLOCK_SIZE];
        let dot = dirent::DirEntry::new(".", i_no, FileType::Directory);
        let dotdot = dirent::DirEntry::new("..", parent, FileType::Directory);
        data[0..dirent::DIRENT_SIZE].copy_from_slice(&dot.to_bytes());
        data[dirent::DIRENT_SIZE..2 * dirent::DIRENT_SIZE].copy_from_slice(&dotdot.to_bytes());
        super::write_sector(fs, block, &data)?;

        let mut new_inode = Inode::empty(i_no);
        new_inode.i_size = 2 * dirent::DIRENT_SIZE as u32;
        new_inode.block_ptrs[0] = block;
        inode::sync_inode(fs, &new_inode)?;

        let entry = dirent::DirEntry::new(&record.name, i_no, FileType::Directory);
        if let Err(e) = dirent::sync_dir_entry(fs, parent, entry) {
            let _ = super::free_block(fs, block);
            let _ = super::free_inode_bit(fs, i_no);
            return Err(e);
        }
        Ok(())
    })
}

/// Refuses unless the directory holds exactly `.`/`..` (§4.M rmdir).
pub fn rmdir(path: &str, cwd_inode: u32) -> KernelResult<()> {
    super::with_fs(|fs| {
        let start = start_inode(fs, path, cwd_inode);
        let record = dirent::search_path(fs, start, path)?;
        let i_no = record.found_inode.ok_or(FsError::NotFound)?;
        if record.found_type != Some(FileType::Directory) {
            return Err(FsError::NotADirectory.into());
        }
        let entries = dirent::read_dir_entries(fs, i_no)?;
        if entries.len() != 2 {
            return Err(FsError::DirectoryNotEmpty.into());
        }
        dirent::delete_dir_entry(fs, record.parent_inode, i_no)?;
        inode::release_inode(fs, i_no)
    })
}

/// Resolves `path` to a directory inode without changing anything; the
/// caller (the `chdir` syscall) is responsible for storing the result into
/// the current task's `cwd_inode` field.
pub fn chdir(path: &str, cwd_inode: u32) -> KernelResult<u32> {
    super::with_fs(|fs| {
        let start = start_inode(fs, path, cwd_inode);
        let record = dirent::search_path(fs, start, path)?;
        let i_no = record.found_inode.ok_or(FsError::NotFound)?;
        if record.found_type != Some(FileType::Directory) {
            return Err(FsError::NotADirectory.into());
        }
        Ok(i_no)
    })
}

/// Walks up via each directory's `..` entry, looking up the child's own
/// filename in the parent's entries, until the root is reached (§4.M
/// getcwd).
pub fn getcwd(cwd_inode: u32) -> KernelResult<String> {
    super::with_fs(|fs| {
        let mut components: Vec<String> = Vec::new();
        let mut current = cwd_inode;
        while current != fs.sb.root_inode_no {
            let entries = dirent::read_dir_entries(fs, current)?;
            let parent = entries
                .iter()
                .find(|e| e.name() == "..")
                .map(|e| e.inode_no)
                .ok_or(FsError::NotFound)?;
            let parent_entries = dirent::read_dir_entries(fs, parent)?;
            let name = parent_entries
                .iter()
                .find(|e| e.inode_no == current && e.name() != "." && e.name() != "..")
                .map(|e| e.name().to_owned())
                .ok_or(FsError::NotFound)?;
            components.push(name);
            current = parent;
        }

        if components.is_empty() {
            return Ok(String::from("/"));
        }
        let mut out = String::new();
        for name in components.iter().rev() {
            out.push('/');
            out.push_str(name);
        }
        Ok(out)
    })
}

pub fn stat(path: &str, cwd_inode: u32) -> KernelResult<Stat> {
    super::with_fs(|fs| {
        let start = start_inode(fs, path, cwd_inode);
        let record = dirent::search_path(fs, start, path)?;
        let i_no = record.found_inode.ok_or(FsError::NotFound)?;
        let inode = inode::peek_inode(fs, i_no)?;
        Ok(Stat {
            ino: i_no,
            size: inode.i_size,
            file_type: record.found_type.unwrap_or(FileType::Unknown),
        })
    })
}
