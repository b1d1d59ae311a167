//! Directory entries and the directory manager.

use bincode::{Decode, Encode};
use log::debug;

use crate::error::{FsError, Result};
use crate::utils::traits::DiskRecord;

use super::{
    inode::Inode,
    volume::{ExtentPurpose, Volume},
    DENTRY_FREE, DENTRY_SIZE, NAME_LEN,
};

/// A fixed-size name-to-inode binding packed into a directory's data
/// blocks. A slot whose inode number is the free sentinel is open for
/// reuse; slots are scanned in order and never compacted.
#[derive(Encode, Decode, Debug, Clone)]
pub struct DirEntry {
    pub ino: u32,
    name: [u8; NAME_LEN],
}

impl DirEntry {
    /// The empty slot marker.
    pub fn free() -> Self {
        DirEntry {
            ino: DENTRY_FREE,
            name: [0; NAME_LEN],
        }
    }

    /// A bound entry; `NameTooLong` when `name` cannot fit with its NUL
    /// terminator.
    pub fn new(ino: u32, name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() >= NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let mut field = [0u8; NAME_LEN];
        field[..bytes.len()].copy_from_slice(bytes);
        Ok(DirEntry { ino, name: field })
    }

    pub fn is_free(&self) -> bool {
        self.ino == DENTRY_FREE
    }

    /// The name up to its NUL terminator.
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

impl DiskRecord for DirEntry {}

/// The directory manager: entry slots live in the directory's own data
/// blocks, which are ordinary inode-owned extents.
impl Volume {
    pub(crate) fn read_dentry(&self, block: u32, slot: u32) -> Result<DirEntry> {
        let offset = (slot * DENTRY_SIZE) as usize;
        DirEntry::from_bytes(&self.data_block(block)[offset..offset + DENTRY_SIZE as usize])
    }

    pub(crate) fn write_dentry(&mut self, block: u32, slot: u32, entry: &DirEntry) -> Result<()> {
        let offset = (slot * DENTRY_SIZE) as usize;
        entry.to_bytes(&mut self.data_block_mut(block)[offset..offset + DENTRY_SIZE as usize])?;
        Ok(())
    }

    /// Preset every entry slot in `count` blocks from `start` to the free
    /// sentinel. Called for every new or extended directory region.
    pub(crate) fn init_dentry_region(&mut self, start: u32, count: u32) -> Result<()> {
        let free = DirEntry::free();
        for block in start..start + count {
            for slot in 0..self.superblock().dentries_per_block() {
                self.write_dentry(block, slot, &free)?;
            }
        }
        Ok(())
    }

    /// Every (block, slot) pair of `dir_inode`, in extent order.
    fn dentry_slots<'a>(&'a self, dir_inode: &'a Inode) -> impl Iterator<Item = (u32, u32)> + 'a {
        let per_block = self.superblock().dentries_per_block();
        dir_inode
            .used_extents()
            .iter()
            .flat_map(|extent| extent.start..extent.start + extent.count)
            .flat_map(move |block| (0..per_block).map(move |slot| (block, slot)))
    }

    /// Find `name` in `dir_inode` and return the bound inode number.
    pub fn dir_lookup(&self, dir_inode: &Inode, name: &str) -> Result<u32> {
        for (block, slot) in self.dentry_slots(dir_inode) {
            let entry = self.read_dentry(block, slot)?;
            if !entry.is_free() && entry.name() == name {
                return Ok(entry.ino);
            }
        }
        Err(FsError::NotFound)
    }

    fn find_free_slot(&self, dir_inode: &Inode) -> Result<Option<(u32, u32)>> {
        for (block, slot) in self.dentry_slots(dir_inode) {
            if self.read_dentry(block, slot)?.is_free() {
                return Ok(Some((block, slot)));
            }
        }
        Ok(None)
    }

    /// Make sure `dir_inode` has at least one free entry slot, growing the
    /// directory by one block-sized extent when it has no extents or every
    /// slot across them is occupied.
    pub fn ensure_entry_space(&mut self, ino: u32, dir_inode: &mut Inode) -> Result<()> {
        if dir_inode.last_extent >= 0 && self.find_free_slot(dir_inode)?.is_some() {
            return Ok(());
        }
        self.grow_extents(ino, dir_inode, 1, ExtentPurpose::Directory)?;
        self.save_inode(ino, dir_inode)?;
        debug!("directory {ino} grew an entry block");
        Ok(())
    }

    /// Bind `name` to `child` in directory `dir`. The entry is a link to
    /// the child, so the child's link count rises by one. Both records are
    /// written back.
    pub fn add_entry(
        &mut self,
        dir: u32,
        dir_inode: &mut Inode,
        child: u32,
        child_inode: &mut Inode,
        name: &str,
    ) -> Result<()> {
        let entry = DirEntry::new(child, name)?;
        self.ensure_entry_space(dir, dir_inode)?;
        let Some((block, slot)) = self.find_free_slot(dir_inode)? else {
            return Err(FsError::Inconsistent(format!(
                "directory {dir} has no free entry slot after ensure_entry_space"
            )));
        };
        self.write_dentry(block, slot, &entry)?;

        dir_inode.entry_count += 1;
        dir_inode.update_mtime();
        child_inode.links += 1;
        self.superblock_mut().used_dirs += 1;
        self.save_inode(dir, dir_inode)?;
        self.save_inode(child, child_inode)?;
        debug!("directory {dir}: added entry {name:?} -> inode {child}");
        Ok(())
    }

    /// Remove the entry binding `child` from directory `dir`; `NotFound`
    /// when no entry binds it.
    pub fn remove_entry(
        &mut self,
        dir: u32,
        dir_inode: &mut Inode,
        child: u32,
        child_inode: &mut Inode,
    ) -> Result<()> {
        let mut found = None;
        for (block, slot) in self.dentry_slots(dir_inode) {
            let entry = self.read_dentry(block, slot)?;
            if !entry.is_free() && entry.ino == child {
                found = Some((block, slot));
                break;
            }
        }
        let Some((block, slot)) = found else {
            return Err(FsError::NotFound);
        };
        self.write_dentry(block, slot, &DirEntry::free())?;

        dir_inode.entry_count -= 1;
        dir_inode.update_mtime();
        child_inode.links = child_inode.links.saturating_sub(1);
        self.superblock_mut().used_dirs -= 1;
        self.save_inode(dir, dir_inode)?;
        self.save_inode(child, child_inode)?;
        debug!("directory {dir}: removed entry for inode {child}");
        Ok(())
    }

    /// Directory removal precondition.
    pub fn dir_is_empty(&self, dir_inode: &Inode) -> bool {
        dir_inode.entry_count == 0
    }

    /// The bound `(name, inode)` pairs of `dir_inode`, in slot order.
    pub fn dir_entries(&self, dir_inode: &Inode) -> Result<Vec<(String, u32)>> {
        let mut entries = Vec::with_capacity(dir_inode.entry_count as usize);
        for (block, slot) in self.dentry_slots(dir_inode) {
            let entry = self.read_dentry(block, slot)?;
            if !entry.is_free() {
                entries.push((entry.name().to_string(), entry.ino));
            }
        }
        Ok(entries)
    }
}
