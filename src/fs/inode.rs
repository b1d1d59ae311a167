use bincode::{Decode, Encode};

use crate::utils::{
    time_util::{self, TimeSpec},
    traits::DiskRecord,
};

use super::EXTENTS_PER_INODE;

/// A contiguous run of data blocks owned by one inode. `start` is relative
/// to the first data block.
#[derive(Encode, Decode, Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Extent {
    pub start: u32,
    pub count: u32,
}

/// Fixed-size metadata record describing one file or directory.
///
/// Extents within one inode never overlap, and slots above `last_extent`
/// carry no meaning. The encoded record must fit the
/// [INODE_SLOT_SIZE](super::INODE_SLOT_SIZE) bytes reserved per slot in the
/// inode table.
#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct Inode {
    /// File type and permission bits (`S_IFREG`/`S_IFDIR` plus mode).
    pub mode: u32,
    /// Reference count of directory entries binding this inode.
    pub links: u32,
    /// Logical size in bytes.
    pub size: u64,
    /// Last modification time.
    pub mtime: TimeSpec,
    /// Direct extents; no indirection exists in this design.
    pub extents: [Extent; EXTENTS_PER_INODE],
    /// Index of the highest occupied extent slot, -1 while the inode owns
    /// no blocks.
    pub last_extent: i32,
    /// Occupied directory-entry slots, for directories.
    pub entry_count: u32,
}

impl Default for Inode {
    fn default() -> Self {
        Inode {
            mode: 0,
            links: 0,
            size: 0,
            mtime: TimeSpec::default(),
            extents: [Extent::default(); EXTENTS_PER_INODE],
            last_extent: -1,
            entry_count: 0,
        }
    }
}

impl Inode {
    /// A fresh record for a newly allocated inode.
    pub fn new(mode: u32) -> Self {
        Inode {
            mode,
            mtime: time_util::now(),
            ..Inode::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_regular_file(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }

    pub fn update_mtime(&mut self) {
        self.mtime = time_util::now();
    }

    /// The occupied extent slots, in order.
    pub fn used_extents(&self) -> &[Extent] {
        &self.extents[..(self.last_extent + 1) as usize]
    }

    /// Total data blocks currently allocated to this inode.
    pub fn block_count(&self) -> u64 {
        self.used_extents().iter().map(|e| e.count as u64).sum()
    }
}

impl DiskRecord for Inode {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::INODE_SLOT_SIZE;

    #[test]
    fn test_fresh_inode_owns_nothing() {
        let inode = Inode::new(libc::S_IFREG | 0o644);
        assert!(inode.is_regular_file());
        assert!(!inode.is_dir());
        assert_eq!(inode.last_extent, -1);
        assert!(inode.used_extents().is_empty());
        assert_eq!(inode.block_count(), 0);
        assert_eq!(inode.links, 0);
    }

    #[test]
    fn test_record_fits_inode_slot() {
        let mut inode = Inode::new(libc::S_IFDIR | 0o755);
        inode.extents = [Extent { start: u32::MAX, count: u32::MAX }; EXTENTS_PER_INODE];
        inode.last_extent = EXTENTS_PER_INODE as i32 - 1;

        let mut buf = [0u8; INODE_SLOT_SIZE as usize];
        let written = inode.to_bytes(&mut buf).unwrap();
        assert!(written <= INODE_SLOT_SIZE as usize);
        assert_eq!(Inode::from_bytes(&buf).unwrap(), inode);
    }

    #[test]
    fn test_block_count_sums_used_extents() {
        let mut inode = Inode::new(libc::S_IFREG | 0o644);
        inode.extents[0] = Extent { start: 0, count: 3 };
        inode.extents[1] = Extent { start: 7, count: 2 };
        // a stale slot beyond last_extent must not count
        inode.extents[2] = Extent { start: 20, count: 9 };
        inode.last_extent = 1;
        assert_eq!(inode.block_count(), 5);
        assert_eq!(inode.used_extents().len(), 2);
    }
}
