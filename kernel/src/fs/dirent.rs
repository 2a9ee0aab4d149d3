//! Directory entries and path resolution (§3, §4.M).
//!
//! Grounded on `examples/original_source/filesys/dir.c`: a directory is an
//! ordinary file whose data is a sequence of fixed-size entries, searched
//! linearly; `.` and `..` occupy the first two slots of a directory's first
//! block. Path lookup (`dir_open_path` there) walks one component at a time
//! from the root, descending into each directory entry found.

use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{FsError, KernelResult};

use super::inode::{self, Inode};
use super::{FsState, BLOCK_SIZE};

pub const DIRENT_SIZE: usize = 16 + 4 + 4;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;
pub const NAME_MAX: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FileType {
    Unknown = 0,
    Regular = 1,
    Directory = 2,
}

impl FileType {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => FileType::Regular,
            2 => FileType::Directory,
            _ => FileType::Unknown,
        }
    }
}

#[derive(Clone, Copy)]
pub struct DirEntry {
    filename: [u8; NAME_MAX],
    pub inode_no: u32,
    pub file_type: FileType,
}

impl DirEntry {
    pub fn new(name: &str, inode_no: u32, file_type: FileType) -> Self {
        let mut filename = [0u8; NAME_MAX];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_MAX);
        filename[..len].copy_from_slice(&bytes[..len]);
        Self {
            filename,
            inode_no,
            file_type,
        }
    }

    pub fn name(&self) -> &str {
        let len = self.filename.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        core::str::from_utf8(&self.filename[..len]).unwrap_or("")
    }

    pub(crate) fn to_bytes(self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0u8; DIRENT_SIZE];
        buf[0..NAME_MAX].copy_from_slice(&self.filename);
        buf[NAME_MAX..NAME_MAX + 4].copy_from_slice(&self.inode_no.to_le_bytes());
        buf[NAME_MAX + 4..DIRENT_SIZE].copy_from_slice(&(self.file_type as u32).to_le_bytes());
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8]) -> Self {
        let mut filename = [0u8; NAME_MAX];
        filename.copy_from_slice(&buf[0..NAME_MAX]);
        let inode_no = u32::from_le_bytes(buf[NAME_MAX..NAME_MAX + 4].try_into().unwrap());
        let file_type =
            FileType::from_u32(u32::from_le_bytes(buf[NAME_MAX + 4..DIRENT_SIZE].try_into().unwrap()));
        Self {
            filename,
            inode_no,
            file_type,
        }
    }
}

/// Split a path on `/`, collapsing consecutive separators and ignoring a
/// leading separator; `.` components are dropped (dot-dot is left for the
/// caller, since its meaning depends on where the walk currently is).
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".").collect()
}

/// Read every live directory entry (skipping `UNKNOWN` holes) of `dir_ino`.
pub fn read_dir_entries(fs: &FsState, dir_ino: u32) -> KernelResult<Vec<DirEntry>> {
    let inode = inode::peek_inode(fs, dir_ino)?;
    let blocks = inode::block_slots(fs, &inode)?;
    let mut out = Vec::new();
    let mut remaining = inode.i_size as usize;
    'blocks: for &blk in blocks.iter() {
        if remaining == 0 {
            break;
        }
        if blk == 0 {
            continue;
        }
        let mut buf = [0u8; BLOCK_SIZE];
        super::read_sector(fs, blk, &mut buf)?;
        for slot in 0..ENTRIES_PER_BLOCK {
            if remaining == 0 {
                break 'blocks;
            }
            let off = slot * DIRENT_SIZE;
            let entry = DirEntry::from_bytes(&buf[off..off + DIRENT_SIZE]);
            if entry.file_type != FileType::Unknown {
                out.push(entry);
                remaining = remaining.saturating_sub(DIRENT_SIZE);
            }
        }
    }
    Ok(out)
}

/// The furthest point a path walk reached: which directory `name` was
/// searched in, and what (if anything) was found there. Lets callers like
/// `mkdir`/`create` distinguish "missing intermediate directory" (an error)
/// from "only the last component is missing" (the thing they're there to
/// fix).
pub struct PathSearchRecord {
    pub parent_inode: u32,
    pub name: String,
    pub found_inode: Option<u32>,
    pub found_type: Option<FileType>,
}

/// Resolve `path` starting from `start_inode` (root for an absolute path,
/// cwd for a relative one — the caller picks `start_inode` accordingly).
pub fn search_path(fs: &FsState, start_inode: u32, path: &str) -> KernelResult<PathSearchRecord> {
    let components = split_path(path);
    if components.is_empty() {
        return Ok(PathSearchRecord {
            parent_inode: start_inode,
            name: String::new(),
            found_inode: Some(start_inode),
            found_type: Some(FileType::Directory),
        });
    }

    let mut current = start_inode;
    let last = components.len() - 1;
    for (i, comp) in components.iter().enumerate() {
        if *comp == ".." {
            current = parent_of(fs, current)?;
            if i == last {
                return Ok(PathSearchRecord {
                    parent_inode: current,
                    name: "..".to_owned(),
                    found_inode: Some(current),
                    found_type: Some(FileType::Directory),
                });
            }
            continue;
        }

        let entries = read_dir_entries(fs, current)?;
        match entries.iter().find(|e| e.name() == *comp) {
            Some(e) if i == last => {
                return Ok(PathSearchRecord {
                    parent_inode: current,
                    name: (*comp).to_owned(),
                    found_inode: Some(e.inode_no),
                    found_type: Some(e.file_type),
                });
            }
            Some(e) => {
                if e.file_type != FileType::Directory {
                    return Err(FsError::NotADirectory.into());
                }
                current = e.inode_no;
            }
            None if i == last => {
                return Ok(PathSearchRecord {
                    parent_inode: current,
                    name: (*comp).to_owned(),
                    found_inode: None,
                    found_type: None,
                });
            }
            None => return Err(FsError::NotFound.into()),
        }
    }
    unreachable!("loop above always returns by the last component")
}

fn parent_of(fs: &FsState, dir_ino: u32) -> KernelResult<u32> {
    let entries = read_dir_entries(fs, dir_ino)?;
    entries
        .iter()
        .find(|e| e.name() == "..")
        .map(|e| e.inode_no)
        .ok_or_else(|| FsError::NotFound.into())
}

/// Append `entry` to `dir_ino`'s entries: reuse the first `UNKNOWN` hole in
/// an already-allocated block, or extend the directory with a fresh block.
pub fn sync_dir_entry(fs: &mut FsState, dir_ino: u32, entry: DirEntry) -> KernelResult<()> {
    let mut dir = inode::peek_inode(fs, dir_ino)?;
    let slots = inode::block_slots(fs, &dir)?;

    for (idx, &blk) in slots.iter().enumerate() {
        if blk == 0 {
            let new_blk = inode::append_block(fs, &mut dir, idx)?;
            let mut buf = [0u8; BLOCK_SIZE];
            buf[0..DIRENT_SIZE].copy_from_slice(&entry.to_bytes());
            super::write_sector(fs, new_blk, &buf)?;
            dir.i_size += DIRENT_SIZE as u32;
            inode::sync_inode(fs, &dir)?;
            inode::put_inode(fs, dir);
            return Ok(());
        }

        let mut buf = [0u8; BLOCK_SIZE];
        super::read_sector(fs, blk, &mut buf)?;
        for slot in 0..ENTRIES_PER_BLOCK {
            let off = slot * DIRENT_SIZE;
            let existing = DirEntry::from_bytes(&buf[off..off + DIRENT_SIZE]);
            if existing.file_type == FileType::Unknown {
                buf[off..off + DIRENT_SIZE].copy_from_slice(&entry.to_bytes());
                super::write_sector(fs, blk, &buf)?;
                dir.i_size += DIRENT_SIZE as u32;
                inode::sync_inode(fs, &dir)?;
                inode::put_inode(fs, dir);
                return Ok(());
            }
        }
    }

    Err(FsError::NoSpace.into())
}

/// Remove the entry naming inode `target_ino` from `dir_ino`. Frees the
/// containing block outright when it held only this one live entry and
/// isn't the directory's first block (which must keep `.`/`..`); otherwise
/// just zeroes the slot.
pub fn delete_dir_entry(fs: &mut FsState, dir_ino: u32, target_ino: u32) -> KernelResult<()> {
    let mut dir = inode::peek_inode(fs, dir_ino)?;
    let slots = inode::block_slots(fs, &dir)?;

    for (idx, &blk) in slots.iter().enumerate() {
        if blk == 0 {
            continue;
        }
        let mut buf = [0u8; BLOCK_SIZE];
        super::read_sector(fs, blk, &mut buf)?;

        let mut found_slot = None;
        let mut live_count = 0usize;
        for slot in 0..ENTRIES_PER_BLOCK {
            let off = slot * DIRENT_SIZE;
            let e = DirEntry::from_bytes(&buf[off..off + DIRENT_SIZE]);
            if e.file_type != FileType::Unknown {
                live_count += 1;
                if e.inode_no == target_ino {
                    found_slot = Some(slot);
                }
            }
        }

        let Some(slot) = found_slot else { continue };
        let off = slot * DIRENT_SIZE;
        buf[off..off + DIRENT_SIZE].copy_from_slice(&[0u8; DIRENT_SIZE]);

        if live_count == 1 && idx != 0 {
            super::free_block(fs, blk)?;
            dir.block_ptrs_clear_slot(idx, fs)?;
        } else {
            super::write_sector(fs, blk, &buf)?;
        }

        dir.i_size = dir.i_size.saturating_sub(DIRENT_SIZE as u32);
        inode::sync_inode(fs, &dir)?;
        inode::put_inode(fs, dir);
        return Ok(());
    }

    Err(FsError::NotFound.into())
}

/// Small helper kept off `Inode` itself (which stays a plain data carrier):
/// clears a direct or indirect slot after its block has been freed.
trait ClearSlot {
    fn block_ptrs_clear_slot(&mut self, idx: usize, fs: &FsState) -> KernelResult<()>;
}

impl ClearSlot for Inode {
    fn block_ptrs_clear_slot(&mut self, idx: usize, fs: &FsState) -> KernelResult<()> {
        if idx < inode::DIRECT_BLOCKS {
            self.block_ptrs[idx] = 0;
        } else if self.block_ptrs[12] != 0 {
            let mut buf = [0u8; BLOCK_SIZE];
            super::read_sector(fs, self.block_ptrs[12], &mut buf)?;
            let off = (idx - inode::DIRECT_BLOCKS) * 4;
            buf[off..off + 4].copy_from_slice(&0u32.to_le_bytes());
            super::write_sector(fs, self.block_ptrs[12], &buf)?;
        }
        Ok(())
    }
}
