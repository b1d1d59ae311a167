//! The path-level operations handed to the callback adapter, one per
//! filesystem primitive.

use log::info;

use crate::error::{FsError, Result};
use crate::utils::time_util::TimeSpec;

use super::{filekind::FileKind, inode::Inode, volume::Volume, NAME_LEN};

/// Attribute snapshot of one file or directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub ino: u32,
    pub kind: FileKind,
    pub mode: u32,
    pub links: u32,
    pub size: u64,
    /// Data blocks allocated to the inode.
    pub blocks: u64,
    pub mtime: TimeSpec,
}

/// Aggregate volume statistics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VolumeStats {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub used_dirs: u32,
    pub name_max: u32,
}

impl Volume {
    /// Attributes of the file or directory at `path`.
    pub fn getattr(&self, path: &str) -> Result<FileStat> {
        let ino = self.resolve(path)?;
        let inode = self.find_inode(ino)?;
        Ok(self.stat_of(ino, &inode))
    }

    pub(crate) fn stat_of(&self, ino: u32, inode: &Inode) -> FileStat {
        FileStat {
            ino,
            kind: FileKind::from(inode),
            mode: inode.mode,
            links: inode.links,
            size: inode.size,
            blocks: inode.block_count(),
            mtime: inode.mtime,
        }
    }

    /// Names in the directory at `path`: `.`, `..`, then the bound entries
    /// in slot order. The dot entries are synthesized, never stored.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let ino = self.resolve(path)?;
        let inode = self.find_inode(ino)?;
        if !inode.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(self.dir_entries(&inode)?.into_iter().map(|(name, _)| name));
        Ok(names)
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<u32> {
        info!("mkdir {path} mode {mode:o}");
        let (parent, name) = self.resolve_parent(path)?;
        self.create_node_in(parent, name, libc::S_IFDIR | (mode & 0o7777))
    }

    pub fn create(&mut self, path: &str, mode: u32) -> Result<u32> {
        info!("create {path} mode {mode:o}");
        let (parent, name) = self.resolve_parent(path)?;
        self.create_node_in(parent, name, libc::S_IFREG | (mode & 0o7777))
    }

    /// Allocate an inode with `mode` and bind it as `name` under `parent`.
    pub(crate) fn create_node_in(&mut self, parent: u32, name: &str, mode: u32) -> Result<u32> {
        if name.is_empty() || name.len() >= NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let mut parent_inode = self.find_inode(parent)?;
        if !parent_inode.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if self.dir_lookup(&parent_inode, name).is_ok() {
            return Err(FsError::Exists);
        }
        let ino = self.allocate_inode(mode)?;
        let mut inode = self.find_inode(ino)?;
        if inode.is_dir() {
            // the synthesized "." counts; add_entry contributes the second
            inode.links = 1;
        }
        self.add_entry(parent, &mut parent_inode, ino, &mut inode, name)?;
        Ok(ino)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        info!("rmdir {path}");
        let (parent, name) = self.resolve_parent(path)?;
        self.remove_node_in(parent, name, true)
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        info!("unlink {path}");
        let (parent, name) = self.resolve_parent(path)?;
        self.remove_node_in(parent, name, false)
    }

    /// Unbind `name` from `parent`; `directory` selects rmdir or unlink
    /// semantics. The inode is released once its last link is gone.
    pub(crate) fn remove_node_in(&mut self, parent: u32, name: &str, directory: bool) -> Result<()> {
        let mut parent_inode = self.find_inode(parent)?;
        let ino = self.dir_lookup(&parent_inode, name)?;
        let mut inode = self.find_inode(ino)?;
        if directory {
            if !inode.is_dir() {
                return Err(FsError::NotDirectory);
            }
            if !self.dir_is_empty(&inode) {
                return Err(FsError::NotEmpty);
            }
        } else if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        self.remove_entry(parent, &mut parent_inode, ino, &mut inode)?;
        if directory || inode.links == 0 {
            self.release_inode(ino)?;
        }
        Ok(())
    }

    /// Set the modification timestamp of the file or directory at `path`.
    pub fn set_mtime(&mut self, path: &str, mtime: TimeSpec) -> Result<()> {
        let ino = self.resolve(path)?;
        let mut inode = self.find_inode(ino)?;
        inode.mtime = mtime;
        self.save_inode(ino, &inode)
    }

    /// Truncate the file at `path` to `new_size` bytes.
    pub fn set_size(&mut self, path: &str, new_size: u64) -> Result<()> {
        info!("truncate {path} to {new_size} bytes");
        let ino = self.resolve(path)?;
        let mut inode = self.find_inode(ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        self.truncate(ino, &mut inode, new_size)
    }

    /// Read from the file at `path` into `buf`, returning the bytes read.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let ino = self.resolve(path)?;
        let inode = self.find_inode(ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        self.read_data(&inode, offset, buf)
    }

    /// Write `data` to the file at `path`, returning the bytes written.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let ino = self.resolve(path)?;
        let mut inode = self.find_inode(ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        self.write_data(ino, &mut inode, offset, data)
    }

    pub fn statvfs(&self) -> VolumeStats {
        let sb = self.superblock();
        VolumeStats {
            block_size: sb.block_size,
            total_blocks: sb.data_block_count as u64,
            free_blocks: sb.free_blocks as u64,
            total_inodes: sb.inode_count as u64,
            free_inodes: sb.free_inodes as u64,
            used_dirs: sb.used_dirs,
            name_max: NAME_LEN as u32 - 1,
        }
    }

    /// Verify the free-space bookkeeping: the superblock counters must
    /// equal the bitmap zero counts, every block owned by a live inode
    /// must be marked exactly once, and owned plus free must cover the
    /// whole data region.
    pub fn check_consistency(&self) -> Result<()> {
        let sb = self.superblock();
        if sb.free_inodes != self.bitmaps().free_inode_bits() {
            return Err(FsError::Inconsistent(format!(
                "superblock says {} free inodes, bitmap says {}",
                sb.free_inodes,
                self.bitmaps().free_inode_bits()
            )));
        }
        if sb.free_blocks != self.bitmaps().free_block_bits() {
            return Err(FsError::Inconsistent(format!(
                "superblock says {} free blocks, bitmap says {}",
                sb.free_blocks,
                self.bitmaps().free_block_bits()
            )));
        }

        let mut owned = vec![false; sb.data_block_count as usize];
        for ino in 0..sb.inode_count {
            if !self.bitmaps().inode_in_use(ino) {
                continue;
            }
            let inode = self.find_inode(ino)?;
            for extent in inode.used_extents() {
                for block in extent.start..extent.start + extent.count {
                    if owned[block as usize] {
                        return Err(FsError::Inconsistent(format!(
                            "block {block} owned by overlapping extents"
                        )));
                    }
                    if !self.bitmaps().block_in_use(block) {
                        return Err(FsError::Inconsistent(format!(
                            "block {block} owned by inode {ino} but free in the bitmap"
                        )));
                    }
                    owned[block as usize] = true;
                }
            }
        }
        let owned_count = owned.iter().filter(|&&b| b).count() as u32;
        if owned_count + sb.free_blocks != sb.data_block_count {
            return Err(FsError::Inconsistent(format!(
                "{owned_count} owned + {} free != {} data blocks",
                sb.free_blocks, sb.data_block_count
            )));
        }
        Ok(())
    }
}
