//! The allocation bitmaps and the free-space bookkeeping built on them.

use bitvec::prelude::*;

use crate::error::{FsError, Result};

use super::superblock::SuperBlock;

/// Which bitmap a request addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BitmapKind {
    Inode,
    Block,
}

/// The volume's two allocation bitmaps, loaded from the image at mount time
/// and flushed back on unmount. Bit *i* set means unit *i* is allocated.
///
/// The superblock free counters are adjusted only by [mark](Bitmaps::mark),
/// so between operations they always equal the zero-bit counts.
#[derive(Debug, Default)]
pub struct Bitmaps {
    inode_bits: BitVec<u8, Lsb0>,
    block_bits: BitVec<u8, Lsb0>,
    /// Lowest data block that may be free; no block below it ever is.
    first_free_block: usize,
}

impl Bitmaps {
    /// Build from the raw bitmap regions, truncated to the exact unit
    /// counts so zero-counting is exact.
    pub fn new(inode_raw: &[u8], block_raw: &[u8], inode_count: u32, block_count: u32) -> Self {
        let mut inode_bits = BitVec::<u8, Lsb0>::from_slice(inode_raw);
        inode_bits.truncate(inode_count as usize);
        let mut block_bits = BitVec::<u8, Lsb0>::from_slice(block_raw);
        block_bits.truncate(block_count as usize);
        let first_free_block = block_bits.first_zero().unwrap_or(block_bits.len());
        Bitmaps {
            inode_bits,
            block_bits,
            first_free_block,
        }
    }

    /// Raw bytes of the inode bitmap, for flushing back to the image.
    pub fn inode_raw(&self) -> &[u8] {
        self.inode_bits.as_raw_slice()
    }

    /// Raw bytes of the block bitmap, for flushing back to the image.
    pub fn block_raw(&self) -> &[u8] {
        self.block_bits.as_raw_slice()
    }

    pub fn inode_in_use(&self, ino: u32) -> bool {
        self.inode_bits
            .get(ino as usize)
            .as_deref()
            .copied()
            .unwrap_or(false)
    }

    pub fn block_in_use(&self, block: u32) -> bool {
        self.block_bits
            .get(block as usize)
            .as_deref()
            .copied()
            .unwrap_or(false)
    }

    pub fn free_inode_bits(&self) -> u32 {
        self.inode_bits.count_zeros() as u32
    }

    pub fn free_block_bits(&self) -> u32 {
        self.block_bits.count_zeros() as u32
    }

    /// Index of the first unset inode bit. Bails out early when the free
    /// counter already says none are left.
    pub fn find_free_inode(&self, sb: &SuperBlock) -> Result<u32> {
        if sb.free_inodes == 0 {
            return Err(FsError::NoSpace);
        }
        self.inode_bits
            .first_zero()
            .map(|i| i as u32)
            .ok_or(FsError::NoSpace)
    }

    /// First run of `run_length` contiguous unset block bits, scanning
    /// forward from the first-free hint; the run counter resets on every
    /// set bit. Only a full-length run is acceptable: callers chase smaller
    /// runs themselves when space is fragmented.
    pub fn find_free_run(&self, run_length: u32) -> Result<u32> {
        if run_length == 0 {
            return Err(FsError::Inconsistent("zero-length block run requested".into()));
        }
        let mut run_start = self.first_free_block;
        let mut run_len = 0u32;
        for index in self.first_free_block..self.block_bits.len() {
            if self.block_bits[index] {
                run_start = index + 1;
                run_len = 0;
            } else {
                run_len += 1;
                if run_len == run_length {
                    return Ok(run_start as u32);
                }
            }
        }
        Err(FsError::NoSpace)
    }

    /// Whether the `count` blocks starting at `start` are all inside the
    /// data region and free. This is the attachable probe for extent
    /// growth.
    pub fn run_is_free(&self, start: u32, count: u32) -> bool {
        let (start, end) = (start as usize, start as usize + count as usize);
        end <= self.block_bits.len() && self.block_bits[start..end].not_any()
    }

    /// Flip `count` bits starting at `start` to `used` and move the
    /// corresponding superblock free counter by `count`.
    ///
    /// A bit already in the requested state means the caller skipped its
    /// check and the bookkeeping can no longer be trusted; nothing is
    /// flipped in that case.
    pub fn mark(
        &mut self,
        sb: &mut SuperBlock,
        kind: BitmapKind,
        start: u32,
        count: u32,
        used: bool,
    ) -> Result<()> {
        let bits = match kind {
            BitmapKind::Inode => &mut self.inode_bits,
            BitmapKind::Block => &mut self.block_bits,
        };
        let (start, end) = (start as usize, start as usize + count as usize);
        if end > bits.len() {
            return Err(FsError::Inconsistent(format!(
                "{kind:?} bitmap range {start}..{end} exceeds {} units",
                bits.len()
            )));
        }
        // verify the whole range before flipping anything
        for index in start..end {
            if bits[index] == used {
                return Err(FsError::Inconsistent(format!(
                    "{kind:?} bit {index} already {}",
                    if used { "set" } else { "clear" }
                )));
            }
        }
        bits[start..end].fill(used);

        match kind {
            BitmapKind::Inode => {
                if used {
                    sb.free_inodes -= count;
                } else {
                    sb.free_inodes += count;
                }
            }
            BitmapKind::Block => {
                if used {
                    sb.free_blocks -= count;
                    if (start..end).contains(&self.first_free_block) {
                        self.first_free_block = self.block_bits[end..]
                            .first_zero()
                            .map(|i| i + end)
                            .unwrap_or(self.block_bits.len());
                    }
                } else {
                    sb.free_blocks += count;
                    self.first_free_block = self.first_free_block.min(start);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_bitmaps(inodes: u32, blocks: u32) -> (Bitmaps, SuperBlock) {
        let sb = SuperBlock {
            inode_count: inodes,
            free_inodes: inodes,
            data_block_count: blocks,
            free_blocks: blocks,
            ..SuperBlock::default()
        };
        let inode_raw = vec![0u8; inodes.div_ceil(8) as usize];
        let block_raw = vec![0u8; blocks.div_ceil(8) as usize];
        (Bitmaps::new(&inode_raw, &block_raw, inodes, blocks), sb)
    }

    #[test]
    fn test_find_free_inode() {
        let (mut bitmaps, mut sb) = empty_bitmaps(16, 32);
        assert_eq!(bitmaps.find_free_inode(&sb).unwrap(), 0);

        bitmaps.mark(&mut sb, BitmapKind::Inode, 0, 1, true).unwrap();
        assert_eq!(bitmaps.find_free_inode(&sb).unwrap(), 1);
        assert_eq!(sb.free_inodes, 15);
        assert_eq!(bitmaps.free_inode_bits(), 15);
    }

    #[test]
    fn test_no_free_inodes() {
        let (mut bitmaps, mut sb) = empty_bitmaps(4, 8);
        bitmaps.mark(&mut sb, BitmapKind::Inode, 0, 4, true).unwrap();
        assert!(matches!(bitmaps.find_free_inode(&sb), Err(FsError::NoSpace)));
    }

    #[test]
    fn test_run_counter_resets_on_set_bit() {
        let (mut bitmaps, mut sb) = empty_bitmaps(4, 16);
        // blocks 3 and 9 used: the first run of 6 free blocks starts at 10
        bitmaps.mark(&mut sb, BitmapKind::Block, 3, 1, true).unwrap();
        bitmaps.mark(&mut sb, BitmapKind::Block, 9, 1, true).unwrap();
        assert_eq!(bitmaps.find_free_run(3).unwrap(), 0);
        assert_eq!(bitmaps.find_free_run(5).unwrap(), 4);
        assert_eq!(bitmaps.find_free_run(6).unwrap(), 10);
        // no full-length run of 7 exists, and partial runs are not returned
        assert!(matches!(bitmaps.find_free_run(7), Err(FsError::NoSpace)));
    }

    #[test]
    fn test_mark_rejects_bit_already_in_state() {
        let (mut bitmaps, mut sb) = empty_bitmaps(4, 16);
        bitmaps.mark(&mut sb, BitmapKind::Block, 2, 2, true).unwrap();
        // overlapping re-mark must fail without flipping anything
        assert!(matches!(
            bitmaps.mark(&mut sb, BitmapKind::Block, 1, 3, true),
            Err(FsError::Inconsistent(_))
        ));
        assert!(!bitmaps.block_in_use(1));
        assert_eq!(sb.free_blocks, 14);
        assert_eq!(bitmaps.free_block_bits(), 14);

        assert!(matches!(
            bitmaps.mark(&mut sb, BitmapKind::Block, 4, 1, false),
            Err(FsError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_first_free_hint_tracks_releases() {
        let (mut bitmaps, mut sb) = empty_bitmaps(4, 16);
        bitmaps.mark(&mut sb, BitmapKind::Block, 0, 8, true).unwrap();
        assert_eq!(bitmaps.find_free_run(1).unwrap(), 8);

        bitmaps.mark(&mut sb, BitmapKind::Block, 2, 3, false).unwrap();
        assert_eq!(bitmaps.find_free_run(3).unwrap(), 2);
        assert_eq!(bitmaps.find_free_run(4).unwrap(), 8);
    }

    #[test]
    fn test_run_is_free() {
        let (mut bitmaps, mut sb) = empty_bitmaps(4, 16);
        bitmaps.mark(&mut sb, BitmapKind::Block, 5, 1, true).unwrap();
        assert!(bitmaps.run_is_free(0, 5));
        assert!(!bitmaps.run_is_free(4, 2));
        assert!(bitmaps.run_is_free(6, 10));
        // past the end of the data region
        assert!(!bitmaps.run_is_free(6, 11));
    }
}
