//! The in-memory view of a mounted volume image.

use std::{fs::OpenOptions, path::Path};

use log::debug;
use memmap2::MmapMut;

use crate::error::{FsError, Result};
use crate::utils::{time_util, traits::DiskRecord};

use super::{
    bitmap::{BitmapKind, Bitmaps},
    inode::{Extent, Inode},
    superblock::SuperBlock,
    EXTENTS_PER_INODE, FS_MAGIC, INODE_SLOT_SIZE,
};

/// What a newly placed extent region will hold. Directory regions get every
/// entry slot preset to the free sentinel before use.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExtentPurpose {
    Data,
    Directory,
}

/// One mounted volume: the superblock and bitmaps cached in memory, plus
/// the memory-mapped image everything else is read from and written to at
/// offsets computed from the superblock's recorded layout.
///
/// The mapping is the single shared mutable resource; access is strictly
/// single-writer for the lifetime of the mount.
pub struct Volume {
    superblock: SuperBlock,
    bitmaps: Bitmaps,
    image: MmapMut,
}

impl Volume {
    /// Open a formatted image file, something like a block device image
    /// under `/dev` or a regular file produced by `mkfs`.
    pub fn open<P>(image_path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(image_path.as_ref())?;

        // Safety: the file is open read-write; the mapping lives and dies
        // with this Volume.
        let image = unsafe { MmapMut::map_mut(&file)? };

        let superblock = SuperBlock::read_record(&mut &image[..])?;
        if superblock.magic != FS_MAGIC {
            return Err(FsError::Corrupt(format!(
                "bad magic {:#x}, image is not a formatted volume",
                superblock.magic
            )));
        }
        if (superblock.size as usize) > image.len() {
            return Err(FsError::Corrupt(format!(
                "superblock claims {} bytes but the image holds {}",
                superblock.size,
                image.len()
            )));
        }

        let ibm_start = superblock.block_offset(superblock.inode_bitmap_start) as usize;
        let ibm_len = (superblock.inode_bitmap_blocks * superblock.block_size) as usize;
        let dbm_start = superblock.block_offset(superblock.block_bitmap_start) as usize;
        let dbm_len = (superblock.block_bitmap_blocks * superblock.block_size) as usize;
        let bitmaps = Bitmaps::new(
            &image[ibm_start..ibm_start + ibm_len],
            &image[dbm_start..dbm_start + dbm_len],
            superblock.inode_count,
            superblock.data_block_count,
        );

        debug!(
            "opened volume: {} blocks of {} bytes, {} inodes",
            superblock.data_block_count, superblock.block_size, superblock.inode_count
        );
        Ok(Volume {
            superblock,
            bitmaps,
            image,
        })
    }

    /// Write the cached superblock and bitmaps back to the image and sync
    /// the mapping.
    pub fn flush_metadata(&mut self) -> Result<()> {
        let ibm_start = self.superblock.block_offset(self.superblock.inode_bitmap_start) as usize;
        let inode_raw = self.bitmaps.inode_raw();
        self.image[ibm_start..ibm_start + inode_raw.len()].copy_from_slice(inode_raw);

        let dbm_start = self.superblock.block_offset(self.superblock.block_bitmap_start) as usize;
        let block_raw = self.bitmaps.block_raw();
        self.image[dbm_start..dbm_start + block_raw.len()].copy_from_slice(block_raw);

        let block_size = self.superblock.block_size as usize;
        let superblock = self.superblock.clone();
        superblock.write_record(&mut &mut self.image[..block_size])?;

        self.image.flush()?;
        Ok(())
    }

    #[inline]
    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    #[inline]
    pub(crate) fn superblock_mut(&mut self) -> &mut SuperBlock {
        &mut self.superblock
    }

    #[inline]
    pub(crate) fn bitmaps(&self) -> &Bitmaps {
        &self.bitmaps
    }
}

/// Inode table access.
impl Volume {
    /// Load inode `ino`; `NotFound` when its bitmap bit is clear.
    pub fn find_inode(&self, ino: u32) -> Result<Inode> {
        if ino >= self.superblock.inode_count || !self.bitmaps.inode_in_use(ino) {
            return Err(FsError::NotFound);
        }
        self.read_inode_slot(ino)
    }

    fn read_inode_slot(&self, ino: u32) -> Result<Inode> {
        let offset = self.superblock.inode_offset(ino) as usize;
        Inode::from_bytes(&self.image[offset..offset + INODE_SLOT_SIZE as usize])
    }

    /// Write `inode` back to its slot in the inode table.
    pub fn save_inode(&mut self, ino: u32, inode: &Inode) -> Result<()> {
        let offset = self.superblock.inode_offset(ino) as usize;
        inode.to_bytes(&mut self.image[offset..offset + INODE_SLOT_SIZE as usize])?;
        Ok(())
    }
}

/// Inode and extent allocation.
impl Volume {
    /// Reserve a free inode number and zero-initialize its record with
    /// `mode`.
    pub fn allocate_inode(&mut self, mode: u32) -> Result<u32> {
        let ino = self.bitmaps.find_free_inode(&self.superblock)?;
        self.bitmaps
            .mark(&mut self.superblock, BitmapKind::Inode, ino, 1, true)?;
        self.save_inode(ino, &Inode::new(mode))?;
        debug!("allocated inode {ino} with mode {mode:o}");
        Ok(ino)
    }

    /// Release `ino`: give every occupied extent's blocks back, reset the
    /// record's metadata, clear the bitmap bit.
    pub fn release_inode(&mut self, ino: u32) -> Result<()> {
        if !self.bitmaps.inode_in_use(ino) {
            return Err(FsError::Inconsistent(format!(
                "releasing inode {ino} whose bitmap bit is already clear"
            )));
        }
        let inode = self.read_inode_slot(ino)?;
        for extent in inode.used_extents() {
            self.bitmaps.mark(
                &mut self.superblock,
                BitmapKind::Block,
                extent.start,
                extent.count,
                false,
            )?;
        }
        let mut reset = Inode::default();
        reset.mtime = time_util::now();
        self.save_inode(ino, &reset)?;
        self.bitmaps
            .mark(&mut self.superblock, BitmapKind::Inode, ino, 1, false)?;
        debug!("released inode {ino}");
        Ok(())
    }

    /// Place `count` newly requested blocks on `inode` and mark them used.
    ///
    /// If the inode owns nothing yet the run occupies slot 0. Otherwise the
    /// last extent is extended in place whenever the `count` blocks
    /// immediately after it are still free (the attachable case); failing
    /// that, the next slot is opened at the first free run, and the call
    /// fails with `OutOfExtents` once all slots are taken.
    ///
    /// The placement decision happens before any bit is flipped, so a
    /// failed call never leaves a marked block without a recorded extent.
    /// Returns the first block of the placed run; the caller persists
    /// `inode`.
    pub fn grow_extents(
        &mut self,
        ino: u32,
        inode: &mut Inode,
        count: u32,
        purpose: ExtentPurpose,
    ) -> Result<u32> {
        let placed = if inode.last_extent < 0 {
            let start = self.bitmaps.find_free_run(count)?;
            self.bitmaps
                .mark(&mut self.superblock, BitmapKind::Block, start, count, true)?;
            inode.extents[0] = Extent { start, count };
            inode.last_extent = 0;
            debug!("inode {ino}: first extent at block {start}, {count} blocks");
            start
        } else {
            let slot = inode.last_extent as usize;
            let last = inode.extents[slot];
            let after = last.start + last.count;
            if self.bitmaps.run_is_free(after, count) {
                self.bitmaps
                    .mark(&mut self.superblock, BitmapKind::Block, after, count, true)?;
                inode.extents[slot].count += count;
                debug!("inode {ino}: extended extent {slot} by {count} blocks");
                after
            } else {
                let slot = slot + 1;
                if slot == EXTENTS_PER_INODE {
                    return Err(FsError::OutOfExtents);
                }
                let start = self.bitmaps.find_free_run(count)?;
                self.bitmaps
                    .mark(&mut self.superblock, BitmapKind::Block, start, count, true)?;
                inode.extents[slot] = Extent { start, count };
                inode.last_extent = slot as i32;
                debug!("inode {ino}: new extent {slot} at block {start}, {count} blocks");
                start
            }
        };
        inode.update_mtime();
        if purpose == ExtentPurpose::Directory {
            // directory growth is allocation-driven, so the size moves here
            inode.size += count as u64 * self.superblock.block_size as u64;
            self.init_dentry_region(placed, count)?;
        }
        Ok(placed)
    }

    /// Give `count` blocks starting at `start` back to the bitmap.
    pub(crate) fn release_blocks(&mut self, start: u32, count: u32) -> Result<()> {
        self.bitmaps
            .mark(&mut self.superblock, BitmapKind::Block, start, count, false)
    }
}

/// Data region access.
impl Volume {
    /// View of one data-region block.
    pub(crate) fn data_block(&self, block: u32) -> &[u8] {
        let offset = self.superblock.data_block_offset(block) as usize;
        &self.image[offset..offset + self.superblock.block_size as usize]
    }

    pub(crate) fn data_block_mut(&mut self, block: u32) -> &mut [u8] {
        let offset = self.superblock.data_block_offset(block) as usize;
        &mut self.image[offset..offset + self.superblock.block_size as usize]
    }

    /// View of the whole byte range of `extent`; its blocks are contiguous
    /// in the image.
    pub(crate) fn extent_bytes(&self, extent: &Extent) -> &[u8] {
        let offset = self.superblock.data_block_offset(extent.start) as usize;
        let len = extent.count as usize * self.superblock.block_size as usize;
        &self.image[offset..offset + len]
    }

    pub(crate) fn extent_bytes_mut(&mut self, extent: &Extent) -> &mut [u8] {
        let offset = self.superblock.data_block_offset(extent.start) as usize;
        let len = extent.count as usize * self.superblock.block_size as usize;
        &mut self.image[offset..offset + len]
    }

    /// Zero `count` whole blocks starting at data block `start`.
    pub(crate) fn zero_blocks(&mut self, start: u32, count: u32) {
        self.extent_bytes_mut(&Extent { start, count }).fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ROOT_INODE;
    use crate::mkfs::mkfs;
    use std::path::Path;

    fn fresh_volume(path: &str, size: u64, inodes: u32, block_size: u32) -> Volume {
        let path = Path::new(path);
        if path.exists() {
            std::fs::remove_file(path).expect("removing stale test image failed");
        }
        mkfs(path, size, inodes, block_size).expect("formatting test image failed");
        Volume::open(path).expect("opening test image failed")
    }

    #[test]
    fn test_open_rejects_unformatted_image() {
        let path = Path::new("/tmp/extentfs_test_unformatted.img");
        std::fs::write(path, vec![0u8; 1 << 16]).unwrap();
        assert!(matches!(Volume::open(path), Err(FsError::Corrupt(_))));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_root_inode_exists_after_format() {
        let volume = fresh_volume("/tmp/extentfs_test_root.img", 1 << 22, 64, 4096);
        let root = volume.find_inode(ROOT_INODE).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.links, 2);
        assert_eq!(root.entry_count, 0);
        assert!(matches!(volume.find_inode(1), Err(FsError::NotFound)));
        std::fs::remove_file("/tmp/extentfs_test_root.img").unwrap();
    }

    #[test]
    fn test_allocate_and_release_inode() {
        let mut volume = fresh_volume("/tmp/extentfs_test_alloc_ino.img", 1 << 22, 64, 4096);
        let free_before = volume.superblock().free_inodes;

        let ino = volume.allocate_inode(libc::S_IFREG | 0o644).unwrap();
        assert_eq!(volume.superblock().free_inodes, free_before - 1);
        let inode = volume.find_inode(ino).unwrap();
        assert!(inode.is_regular_file());
        assert_eq!(inode.size, 0);

        volume.release_inode(ino).unwrap();
        assert_eq!(volume.superblock().free_inodes, free_before);
        assert!(matches!(volume.find_inode(ino), Err(FsError::NotFound)));
        // a second release reports the stale bookkeeping
        assert!(matches!(
            volume.release_inode(ino),
            Err(FsError::Inconsistent(_))
        ));
        std::fs::remove_file("/tmp/extentfs_test_alloc_ino.img").unwrap();
    }

    #[test]
    fn test_grow_extents_attaches_to_last_extent() {
        let mut volume = fresh_volume("/tmp/extentfs_test_grow.img", 1 << 22, 64, 4096);
        let ino = volume.allocate_inode(libc::S_IFREG | 0o644).unwrap();
        let mut inode = volume.find_inode(ino).unwrap();

        let first = volume
            .grow_extents(ino, &mut inode, 2, ExtentPurpose::Data)
            .unwrap();
        assert_eq!(inode.last_extent, 0);
        assert_eq!(inode.extents[0], Extent { start: first, count: 2 });

        // nothing was allocated in between, so this run lands right after
        // the previous one and the extent widens in place
        let second = volume
            .grow_extents(ino, &mut inode, 3, ExtentPurpose::Data)
            .unwrap();
        assert_eq!(second, first + 2);
        assert_eq!(inode.last_extent, 0);
        assert_eq!(inode.extents[0], Extent { start: first, count: 5 });
        assert_eq!(inode.block_count(), 5);
        std::fs::remove_file("/tmp/extentfs_test_grow.img").unwrap();
    }

    #[test]
    fn test_grow_extents_opens_new_slot_when_blocked() {
        let mut volume = fresh_volume("/tmp/extentfs_test_grow2.img", 1 << 22, 64, 4096);
        let ino_a = volume.allocate_inode(libc::S_IFREG | 0o644).unwrap();
        let ino_b = volume.allocate_inode(libc::S_IFREG | 0o644).unwrap();
        let mut inode_a = volume.find_inode(ino_a).unwrap();
        let mut inode_b = volume.find_inode(ino_b).unwrap();

        volume
            .grow_extents(ino_a, &mut inode_a, 1, ExtentPurpose::Data)
            .unwrap();
        // b takes the block right after a's extent, blocking the attach
        volume
            .grow_extents(ino_b, &mut inode_b, 1, ExtentPurpose::Data)
            .unwrap();
        volume
            .grow_extents(ino_a, &mut inode_a, 1, ExtentPurpose::Data)
            .unwrap();
        assert_eq!(inode_a.last_extent, 1);
        assert_eq!(inode_a.block_count(), 2);
        std::fs::remove_file("/tmp/extentfs_test_grow2.img").unwrap();
    }

    #[test]
    fn test_grow_extents_runs_out_of_slots() {
        let mut volume = fresh_volume("/tmp/extentfs_test_slots.img", 1 << 22, 64, 4096);
        let ino = volume.allocate_inode(libc::S_IFREG | 0o644).unwrap();
        let blocker = volume.allocate_inode(libc::S_IFREG | 0o644).unwrap();
        let mut inode = volume.find_inode(ino).unwrap();
        let mut blocker_inode = volume.find_inode(blocker).unwrap();

        // alternate allocations so every growth needs a fresh slot
        for _ in 0..EXTENTS_PER_INODE {
            volume
                .grow_extents(ino, &mut inode, 1, ExtentPurpose::Data)
                .unwrap();
            volume
                .grow_extents(blocker, &mut blocker_inode, 1, ExtentPurpose::Data)
                .unwrap();
        }
        assert_eq!(inode.last_extent as usize, EXTENTS_PER_INODE - 1);
        assert!(matches!(
            volume.grow_extents(ino, &mut inode, 1, ExtentPurpose::Data),
            Err(FsError::OutOfExtents)
        ));
        std::fs::remove_file("/tmp/extentfs_test_slots.img").unwrap();
    }

    #[test]
    fn test_metadata_survives_reopen() {
        let path = "/tmp/extentfs_test_reopen.img";
        let mut volume = fresh_volume(path, 1 << 22, 64, 4096);
        let ino = volume.allocate_inode(libc::S_IFREG | 0o600).unwrap();
        let mut inode = volume.find_inode(ino).unwrap();
        volume
            .grow_extents(ino, &mut inode, 2, ExtentPurpose::Data)
            .unwrap();
        volume.save_inode(ino, &inode).unwrap();
        let free_blocks = volume.superblock().free_blocks;
        volume.flush_metadata().unwrap();
        drop(volume);

        let reopened = Volume::open(path).unwrap();
        assert_eq!(reopened.superblock().free_blocks, free_blocks);
        let inode = reopened.find_inode(ino).unwrap();
        assert_eq!(inode.block_count(), 2);
        std::fs::remove_file(path).unwrap();
    }
}
