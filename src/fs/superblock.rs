use bincode::{Decode, Encode};

use crate::utils::{
    time_util::{self, TimeSpec},
    traits::DiskRecord,
};

use super::{DENTRY_SIZE, INODE_SLOT_SIZE};

/// The volume's root metadata record, stored in block 0.
///
/// Layout fields (region starts and lengths) are chosen by the formatting
/// tool and never recomputed at runtime. The free counters are adjusted
/// exclusively by the bitmap `mark` operation so they cannot drift from the
/// bitmap contents.
#[derive(Encode, Decode, Debug, Clone, Default, PartialEq)]
pub struct SuperBlock {
    /// Must equal [FS_MAGIC](super::FS_MAGIC) on a formatted volume.
    pub magic: u64,
    /// Volume size in bytes.
    pub size: u64,
    /// Block size in bytes; a power of two.
    pub block_size: u32,
    /// First block of the inode bitmap.
    pub inode_bitmap_start: u32,
    pub inode_bitmap_blocks: u32,
    /// First block of the block bitmap.
    pub block_bitmap_start: u32,
    pub block_bitmap_blocks: u32,
    /// First block of the inode table.
    pub inode_table_start: u32,
    pub inode_table_blocks: u32,
    /// First block of the data region; extent block numbers are relative
    /// to it.
    pub first_data_block: u32,
    /// Number of blocks in the data region.
    pub data_block_count: u32,
    pub inode_count: u32,
    pub free_inodes: u32,
    pub free_blocks: u32,
    /// Volume-wide count of bound directory entries (the root counts as
    /// one).
    pub used_dirs: u32,
    /// uid/gid recorded at format time; reported for every file.
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub created_at: TimeSpec,
    pub modified_at: Option<TimeSpec>,
}

impl SuperBlock {
    pub fn update_modified_at(&mut self) {
        self.modified_at = Some(time_util::now());
    }

    /// Byte offset of metadata block `block`.
    #[inline]
    pub fn block_offset(&self, block: u32) -> u64 {
        block as u64 * self.block_size as u64
    }

    /// Byte offset of data-region block `index`.
    #[inline]
    pub fn data_block_offset(&self, index: u32) -> u64 {
        (self.first_data_block as u64 + index as u64) * self.block_size as u64
    }

    /// Byte offset of inode slot `ino` in the inode table.
    #[inline]
    pub fn inode_offset(&self, ino: u32) -> u64 {
        self.block_offset(self.inode_table_start) + ino as u64 * INODE_SLOT_SIZE as u64
    }

    /// Directory-entry slots per data block.
    #[inline]
    pub fn dentries_per_block(&self) -> u32 {
        self.block_size / DENTRY_SIZE
    }
}

impl DiskRecord for SuperBlock {}
