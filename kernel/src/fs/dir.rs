//! Directory handles (§4.M Directory read): a small fixed table of open
//! directories, each tracking a `dir_pos` byte offset into its inode's
//! entries, separate from the file table since directories are iterated by
//! entry rather than read/written by byte range.

use spin::Mutex;

use crate::error::{FsError, KernelResult};

use super::dirent::{self, DirEntry, FileType};
use super::inode;

const MAX_DIR_HANDLES: usize = 16;

#[derive(Clone, Copy)]
struct DirHandle {
    inode_no: Option<u32>,
    pos: usize,
}

impl DirHandle {
    const fn empty() -> Self {
        Self {
            inode_no: None,
            pos: 0,
        }
    }
}

static DIR_HANDLES: Mutex<[DirHandle; MAX_DIR_HANDLES]> =
    Mutex::new([DirHandle::empty(); MAX_DIR_HANDLES]);

/// Resolve `path` to a directory and open it, returning a handle index.
pub fn opendir(path: &str, cwd_inode: u32) -> KernelResult<u32> {
    super::with_fs(|fs| {
        let start = if path.starts_with('/') {
            fs.sb.root_inode_no
        } else {
            cwd_inode
        };
        let record = dirent::search_path(fs, start, path)?;
        let i_no = record.found_inode.ok_or(FsError::NotFound)?;
        if record.found_type != Some(FileType::Directory) {
            return Err(FsError::NotADirectory.into());
        }
        inode::open_inode(fs, i_no)?;

        let mut table = DIR_HANDLES.lock();
        for (idx, slot) in table.iter_mut().enumerate() {
            if slot.inode_no.is_none() {
                *slot = DirHandle {
                    inode_no: Some(i_no),
                    pos: 0,
                };
                return Ok(idx as u32);
            }
        }
        drop(table);
        inode::close_inode(fs, i_no)?;
        Err(FsError::TooManyOpenFiles.into())
    })
}

pub fn closedir(handle: u32) -> KernelResult<()> {
    let i_no = {
        let mut table = DIR_HANDLES.lock();
        let slot = table
            .get_mut(handle as usize)
            .ok_or(FsError::BadFileDescriptor)?;
        slot.inode_no.take().ok_or(FsError::BadFileDescriptor)?
    };
    super::with_fs(|fs| inode::close_inode(fs, i_no))
}

/// Advance `handle` by one entry, skipping `UNKNOWN` holes, returning `None`
/// once `dir_pos` reaches the directory's `i_size`.
pub fn readdir(handle: u32) -> KernelResult<Option<DirEntry>> {
    let (i_no, pos) = {
        let table = DIR_HANDLES.lock();
        let slot = table
            .get(handle as usize)
            .ok_or(FsError::BadFileDescriptor)?;
        let i_no = slot.inode_no.ok_or(FsError::BadFileDescriptor)?;
        (i_no, slot.pos)
    };

    super::with_fs(|fs| {
        let entries = dirent::read_dir_entries(fs, i_no)?;
        let entry = entries.get(pos).copied();
        if entry.is_some() {
            let mut table = DIR_HANDLES.lock();
            if let Some(slot) = table.get_mut(handle as usize) {
                slot.pos += 1;
            }
        }
        Ok(entry)
    })
}

pub fn rewinddir(handle: u32) -> KernelResult<()> {
    let mut table = DIR_HANDLES.lock();
    let slot = table
        .get_mut(handle as usize)
        .ok_or(FsError::BadFileDescriptor)?;
    slot.pos = 0;
    Ok(())
}
