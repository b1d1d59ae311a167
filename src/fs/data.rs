//! The file data engine: read, write, and truncate over an inode's extent
//! list.

use log::debug;
use smallvec::SmallVec;

use crate::error::{FsError, Result};

use super::{
    inode::{Extent, Inode},
    volume::{ExtentPurpose, Volume},
};

/// Where a byte offset falls within an inode's allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtentPos {
    /// Index into the occupied extent slots.
    pub extent: usize,
    /// Byte offset within that extent.
    pub offset: u64,
}

impl Volume {
    /// Find the extent containing byte `offset` of `inode`, walking the
    /// occupied extents in order and subtracting each one's byte length.
    pub fn locate(&self, inode: &Inode, offset: u64) -> Result<ExtentPos> {
        let block_size = self.superblock().block_size as u64;
        let mut remaining = offset;
        for (index, extent) in inode.used_extents().iter().enumerate() {
            let extent_bytes = extent.count as u64 * block_size;
            if remaining < extent_bytes {
                return Ok(ExtentPos {
                    extent: index,
                    offset: remaining,
                });
            }
            remaining -= extent_bytes;
        }
        Err(FsError::Inconsistent(format!(
            "offset {offset} beyond the inode's allocation"
        )))
    }

    /// Read bytes at `offset` into `buf`, copying across extent
    /// boundaries. Reading at or past the logical size reads nothing; the
    /// length is clamped to the logical size, so bytes past end-of-file
    /// are never exposed.
    pub fn read_data(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= inode.size {
            return Ok(0);
        }
        let to_read = buf.len().min((inode.size - offset) as usize);
        let block_size = self.superblock().block_size as u64;
        let ExtentPos {
            mut extent,
            offset: mut in_extent,
        } = self.locate(inode, offset)?;

        let mut done = 0;
        while done < to_read {
            let extents = inode.used_extents();
            let Some(&current) = extents.get(extent) else {
                return Err(FsError::Inconsistent(
                    "allocation exhausted mid-read".into(),
                ));
            };
            let extent_bytes = current.count as u64 * block_size;
            let chunk = ((extent_bytes - in_extent) as usize).min(to_read - done);
            let from = in_extent as usize;
            buf[done..done + chunk]
                .copy_from_slice(&self.extent_bytes(&current)[from..from + chunk]);
            done += chunk;
            extent += 1;
            in_extent = 0;
        }
        Ok(to_read)
    }

    /// Write `data` at byte `offset`, first growing the file through
    /// [truncate](Volume::truncate) when the write extends past the current
    /// size (which zero-fills any gap), then copying across extent
    /// boundaries.
    pub fn write_data(
        &mut self,
        ino: u32,
        inode: &mut Inode,
        offset: u64,
        data: &[u8],
    ) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset + data.len() as u64;
        if end > inode.size {
            self.truncate(ino, inode, end)?;
        }
        let block_size = self.superblock().block_size as u64;
        let ExtentPos {
            mut extent,
            offset: mut in_extent,
        } = self.locate(inode, offset)?;

        let mut done = 0;
        while done < data.len() {
            let extents = inode.used_extents();
            let Some(&current) = extents.get(extent) else {
                return Err(FsError::Inconsistent(
                    "allocation exhausted mid-write".into(),
                ));
            };
            let extent_bytes = current.count as u64 * block_size;
            let chunk = ((extent_bytes - in_extent) as usize).min(data.len() - done);
            let from = in_extent as usize;
            self.extent_bytes_mut(&current)[from..from + chunk]
                .copy_from_slice(&data[done..done + chunk]);
            done += chunk;
            extent += 1;
            in_extent = 0;
        }

        inode.update_mtime();
        self.save_inode(ino, inode)?;
        Ok(data.len())
    }

    /// Change the logical size of `ino`.
    ///
    /// Growth allocates exactly the blocks needed and zero-fills the new
    /// range; shrinking releases trailing blocks, cutting the boundary
    /// extent's count in place. Equal size is a no-op. A growth that fails
    /// mid-allocation releases every block this call placed and leaves the
    /// record untouched, so the committed size never moves on failure.
    pub fn truncate(&mut self, ino: u32, inode: &mut Inode, new_size: u64) -> Result<()> {
        if new_size == inode.size {
            return Ok(());
        }
        if new_size > inode.size {
            self.grow(ino, inode, new_size)
        } else {
            self.shrink(ino, inode, new_size)
        }
    }

    fn grow(&mut self, ino: u32, inode: &mut Inode, new_size: u64) -> Result<()> {
        let block_size = self.superblock().block_size as u64;
        let snapshot_extents = inode.extents;
        let snapshot_last = inode.last_extent;

        // the unused tail of the current last block must read back as
        // zeros whether or not the growth crosses a block boundary
        let tail = inode.size % block_size;
        if tail != 0 {
            let last = inode.extents[inode.last_extent as usize];
            let last_block = last.start + last.count - 1;
            self.extent_bytes_mut(&Extent {
                start: last_block,
                count: 1,
            })[tail as usize..]
                .fill(0);
        }

        let needed = new_size.div_ceil(block_size).saturating_sub(inode.block_count());
        let mut placed: SmallVec<[Extent; 4]> = SmallVec::new();
        if let Err(e) = self.grow_blocks(ino, inode, needed, &mut placed) {
            // roll back: nothing of this call survives
            for extent in placed {
                self.release_blocks(extent.start, extent.count)?;
            }
            inode.extents = snapshot_extents;
            inode.last_extent = snapshot_last;
            debug!("truncate of inode {ino} to {new_size} failed, rolled back");
            return Err(e);
        }

        inode.size = new_size;
        inode.update_mtime();
        self.save_inode(ino, inode)
    }

    /// Allocate `needed` blocks onto `inode`, zero-filled, preferring one
    /// large run but falling back to smaller runs when free space is
    /// fragmented. Every placed run is recorded in `placed` for rollback.
    fn grow_blocks(
        &mut self,
        ino: u32,
        inode: &mut Inode,
        mut needed: u64,
        placed: &mut SmallVec<[Extent; 4]>,
    ) -> Result<()> {
        while needed > 0 {
            let mut chunk = needed.min(u32::MAX as u64) as u32;
            let start = loop {
                match self.grow_extents(ino, inode, chunk, ExtentPurpose::Data) {
                    Ok(start) => break start,
                    // no run of this length: halve the request and retry
                    Err(FsError::NoSpace) if chunk > 1 => chunk = chunk.div_ceil(2),
                    Err(e) => return Err(e),
                }
            };
            self.zero_blocks(start, chunk);
            placed.push(Extent {
                start,
                count: chunk,
            });
            needed -= chunk as u64;
        }
        Ok(())
    }

    fn shrink(&mut self, ino: u32, inode: &mut Inode, new_size: u64) -> Result<()> {
        let block_size = self.superblock().block_size as u64;
        let keep = new_size.div_ceil(block_size);
        let mut to_free = inode.block_count().saturating_sub(keep);

        // walk the extents backward, dropping whole extents until the
        // boundary falls inside one
        while to_free > 0 {
            let slot = inode.last_extent as usize;
            let extent = inode.extents[slot];
            if extent.count as u64 <= to_free {
                self.release_blocks(extent.start, extent.count)?;
                to_free -= extent.count as u64;
                inode.extents[slot] = Extent::default();
                inode.last_extent -= 1;
            } else {
                let freed = to_free as u32;
                self.release_blocks(extent.start + extent.count - freed, freed)?;
                inode.extents[slot].count -= freed;
                to_free = 0;
            }
        }

        inode.size = new_size;
        inode.update_mtime();
        self.save_inode(ino, inode)
    }
}
