//! The volume formatting tool.
//!
//! Lays out an empty image: block 0 holds the superblock, then the inode
//! bitmap, the block bitmap, the inode table, and the data region. All
//! region starts and lengths are recorded in the superblock and never
//! recomputed afterwards. The root directory inode is created here; its
//! entry blocks are allocated lazily on the first binding.

use std::{fs::OpenOptions, path::Path};

use anyhow::anyhow;
use byte_unit::Byte;
use log::info;
use memmap2::MmapMut;

use crate::fs::{Inode, SuperBlock, FS_MAGIC, INODE_SLOT_SIZE, ROOT_INODE};
use crate::utils::{fs_size_calculator, time_util, traits::DiskRecord};

/// Format `image_file_path` into a new volume.
/// # Params
/// - `image_file_path`: path of the image file to create
/// - `size`: volume size in bytes
/// - `inode_count`: number of inode slots to lay out
/// - `block_size`: block size in bytes, a power of two in `512..=65536`
pub fn mkfs<P>(image_file_path: P, size: u64, inode_count: u32, block_size: u32) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    if !block_size.is_power_of_two() || !(512..=65536).contains(&block_size) {
        return Err(anyhow!(
            "block size must be a power of two in 512..=65536, got {block_size}"
        ));
    }
    if inode_count == 0 {
        return Err(anyhow!("a volume needs at least one inode"));
    }

    let total_blocks = size / block_size as u64;
    let inode_bitmap_blocks = fs_size_calculator::bitmap_blocks(inode_count as u64, block_size);
    let inode_table_blocks = fs_size_calculator::inode_table_blocks(inode_count as u64, block_size);
    let fixed_metadata = 1 + inode_bitmap_blocks + inode_table_blocks;
    if total_blocks <= fixed_metadata + 1 {
        return Err(anyhow!(
            "{} is too small: {} blocks of {} are needed for metadata alone",
            Byte::from_bytes(size as u128).get_appropriate_unit(true),
            fixed_metadata + 1,
            Byte::from_bytes(block_size as u128).get_appropriate_unit(false),
        ));
    }
    let remaining = total_blocks - fixed_metadata;
    let block_bitmap_blocks = fs_size_calculator::block_bitmap_blocks(remaining, block_size);
    if remaining <= block_bitmap_blocks {
        return Err(anyhow!("no data blocks remain after the block bitmap"));
    }
    let data_block_count = remaining - block_bitmap_blocks;

    let superblock = SuperBlock {
        magic: FS_MAGIC,
        size,
        block_size,
        inode_bitmap_start: 1,
        inode_bitmap_blocks: inode_bitmap_blocks as u32,
        block_bitmap_start: (1 + inode_bitmap_blocks) as u32,
        block_bitmap_blocks: block_bitmap_blocks as u32,
        inode_table_start: (1 + inode_bitmap_blocks + block_bitmap_blocks) as u32,
        inode_table_blocks: inode_table_blocks as u32,
        first_data_block: (1 + inode_bitmap_blocks + block_bitmap_blocks + inode_table_blocks)
            as u32,
        data_block_count: data_block_count as u32,
        inode_count,
        // the root directory claims one inode and one entry in the
        // volume-wide counter
        free_inodes: inode_count - 1,
        free_blocks: data_block_count as u32,
        used_dirs: 1,
        uid: users::get_effective_uid(),
        gid: users::get_effective_gid(),
        created_at: time_util::now(),
        modified_at: None,
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(image_file_path)?;
    // set_len zeroes the whole region, bitmaps and records included
    file.set_len(size)?;

    // Safety: the freshly created file is open read-write.
    let mut image = unsafe { MmapMut::map_mut(&file)? };

    superblock.to_bytes(&mut image[..block_size as usize])?;

    let mut root = Inode::new(libc::S_IFDIR | 0o777);
    root.links = 2;
    let root_offset = superblock.inode_offset(ROOT_INODE) as usize;
    root.to_bytes(&mut image[root_offset..root_offset + INODE_SLOT_SIZE as usize])?;

    // inode bitmap bit 0: the root is allocated
    image[superblock.block_offset(superblock.inode_bitmap_start) as usize] |= 1;

    image.flush()?;
    info!(
        "formatted {}: {} data blocks of {}, {} inodes",
        Byte::from_bytes(size as u128).get_appropriate_unit(true),
        data_block_count,
        Byte::from_bytes(block_size as u128).get_appropriate_unit(false),
        inode_count
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileKind, Volume};
    use std::path::PathBuf;
    use std::str::FromStr;

    #[test]
    fn test_mkfs_layout() {
        let tmp_file = PathBuf::from_str("/tmp/extentfs_test_mkfs.img").unwrap();
        if tmp_file.exists() {
            std::fs::remove_file(&tmp_file).unwrap();
        }
        let size = 1 << 22;
        mkfs(&tmp_file, size, 64, 4096).unwrap();

        let volume = Volume::open(&tmp_file).unwrap();
        let sb = volume.superblock();
        assert_eq!(sb.magic, FS_MAGIC);
        assert_eq!(sb.size, size);
        assert_eq!(sb.inode_bitmap_start, 1);
        assert_eq!(sb.block_bitmap_start, 2);
        assert_eq!(sb.inode_table_start, 3);
        // 64 inodes of 256 bytes fill four 4096-byte table blocks
        assert_eq!(sb.first_data_block, 7);
        assert_eq!(sb.data_block_count, 1024 - 7);
        assert_eq!(sb.free_blocks, sb.data_block_count);
        assert_eq!(sb.free_inodes, 63);
        assert_eq!(sb.used_dirs, 1);

        // the root inode is in place
        let root = volume.find_inode(ROOT_INODE).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.links, 2);
        assert_eq!(root.size, 0);
        assert_eq!(FileKind::from(&root), FileKind::Directory);
        volume.check_consistency().unwrap();

        std::fs::remove_file(&tmp_file).unwrap();
    }

    #[test]
    fn test_mkfs_sixteen_inode_volume() {
        let tmp_file = PathBuf::from_str("/tmp/extentfs_test_mkfs16.img").unwrap();
        if tmp_file.exists() {
            std::fs::remove_file(&tmp_file).unwrap();
        }
        mkfs(&tmp_file, 1 << 20, 16, 4096).unwrap();

        let volume = Volume::open(&tmp_file).unwrap();
        let sb = volume.superblock();
        assert_eq!(sb.inode_count, 16);
        assert_eq!(sb.free_inodes, 15);
        // superblock + two bitmap blocks + one table block
        assert_eq!(sb.first_data_block, 4);
        std::fs::remove_file(&tmp_file).unwrap();
    }

    #[test]
    fn test_mkfs_rejects_bad_geometry() {
        let tmp_file = PathBuf::from_str("/tmp/extentfs_test_mkfs_bad.img").unwrap();
        if tmp_file.exists() {
            std::fs::remove_file(&tmp_file).unwrap();
        }
        // not a power of two
        assert!(mkfs(&tmp_file, 1 << 20, 16, 1000).is_err());
        // too small to hold the metadata
        assert!(mkfs(&tmp_file, 2 * 4096, 16, 4096).is_err());
        assert!(!tmp_file.exists());
    }

    #[test]
    fn test_mkfs_refuses_to_overwrite() {
        let tmp_file = PathBuf::from_str("/tmp/extentfs_test_mkfs_exists.img").unwrap();
        if tmp_file.exists() {
            std::fs::remove_file(&tmp_file).unwrap();
        }
        mkfs(&tmp_file, 1 << 20, 16, 4096).unwrap();
        // the image file already exists
        assert!(mkfs(&tmp_file, 1 << 20, 16, 4096).is_err());
        std::fs::remove_file(&tmp_file).unwrap();
    }
}
