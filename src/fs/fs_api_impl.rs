//! The FUSE callback adapter: maps kernel requests onto the engine
//! operations.
//!
//! FUSE numbers its root inode 1 while the engine's root is 0, so every
//! inode number is shifted by one at this boundary.

use std::time::Duration;

use fuser::{FileAttr, Filesystem, TimeOrNow};
use log::{info, warn};

use crate::utils::time_util::{self, TimeSpec};

use super::{filekind::FileKind, inode::Inode, volume::Volume};

const TTL: Duration = Duration::new(0, 0);

#[inline]
fn engine_ino(fuse_ino: u64) -> u32 {
    (fuse_ino - 1) as u32
}

impl Volume {
    fn attr_of(&self, ino: u32, inode: &Inode) -> FileAttr {
        let sb = self.superblock();
        FileAttr {
            ino: ino as u64 + 1,
            size: inode.size,
            // reported in 512-byte sectors
            blocks: inode.block_count() * (sb.block_size as u64 / 512),
            atime: inode.mtime.into(),
            mtime: inode.mtime.into(),
            ctime: inode.mtime.into(),
            crtime: std::time::UNIX_EPOCH,
            kind: FileKind::from(inode).into(),
            perm: (inode.mode & 0o7777) as u16,
            nlink: inode.links,
            uid: sb.uid,
            gid: sb.gid,
            rdev: 0,
            blksize: sb.block_size,
            flags: 0,
        }
    }
}

impl Filesystem for Volume {
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        self.superblock_mut().update_modified_at();
        Ok(())
    }

    // unmount: persist the cached superblock and bitmaps
    fn destroy(&mut self) {
        if let Err(e) = self.flush_metadata() {
            warn!("flushing metadata on unmount failed: {e}");
        }
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let stats = self.statvfs();
        reply.statfs(
            stats.total_blocks,
            stats.free_blocks,
            stats.free_blocks,
            stats.total_inodes - stats.free_inodes,
            stats.free_inodes,
            stats.block_size,
            stats.name_max,
            stats.block_size,
        )
    }

    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Ok(parent_inode) = self.find_inode(engine_ino(parent)) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dir_lookup(&parent_inode, name) {
            Ok(ino) => {
                let Ok(inode) = self.find_inode(ino) else {
                    reply.error(libc::EIO);
                    return;
                };
                reply.entry(&TTL, &self.attr_of(ino, &inode), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
        info!("getattr() called with inode number {ino}");
        let ino = engine_ino(ino);
        match self.find_inode(ino) {
            Ok(inode) => reply.attr(&TTL, &self.attr_of(ino, &inode)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        info!("setattr() called with inode number {ino}, size {size:?}, mtime {mtime:?}, fh {fh:?}");
        let ino = engine_ino(ino);
        let Ok(mut inode) = self.find_inode(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if let Some(size) = size {
            if inode.is_dir() {
                reply.error(libc::EISDIR);
                return;
            }
            if let Err(e) = self.truncate(ino, &mut inode, size) {
                reply.error(e.errno());
                return;
            }
        }

        if let Some(mtime) = mtime {
            inode.mtime = match mtime {
                TimeOrNow::SpecificTime(time) => TimeSpec::from(time),
                TimeOrNow::Now => time_util::now(),
            };
            if let Err(e) = self.save_inode(ino, &inode) {
                reply.error(e.errno());
                return;
            }
        }

        reply.attr(&TTL, &self.attr_of(ino, &inode));
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        info!("readdir() called with inode number {ino}");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let ino = engine_ino(ino);
        let Ok(dir_inode) = self.find_inode(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if !dir_inode.is_dir() {
            reply.error(libc::ENOTDIR);
            return;
        }
        let Ok(bound) = self.dir_entries(&dir_inode) else {
            reply.error(libc::EIO);
            return;
        };

        // the dot entries are synthesized; ".." reports the directory
        // itself since parents are not recorded on disk
        let mut entries = vec![
            (ino, FileKind::Directory, ".".to_string()),
            (ino, FileKind::Directory, "..".to_string()),
        ];
        for (name, child) in bound {
            let Ok(child_inode) = self.find_inode(child) else {
                reply.error(libc::EIO);
                return;
            };
            entries.push((child, FileKind::from(&child_inode), name));
        }

        for (index, (child, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            let buffer_full = reply.add(child as u64 + 1, index as i64 + 1, kind.into(), name);
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mkdir() called with parent inode number {parent} and name {name:?}");
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.create_node_in(engine_ino(parent), name, libc::S_IFDIR | (mode & 0o7777)) {
            Ok(ino) => {
                let Ok(inode) = self.find_inode(ino) else {
                    reply.error(libc::EIO);
                    return;
                };
                reply.entry(&TTL, &self.attr_of(ino, &inode), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("rmdir() called with parent inode number {parent} and name {name:?}");
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.remove_node_in(engine_ino(parent), name, true) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        info!("create() called with parent inode number {parent} and name {name:?}");
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.create_node_in(engine_ino(parent), name, libc::S_IFREG | (mode & 0o7777)) {
            Ok(ino) => {
                let Ok(inode) = self.find_inode(ino) else {
                    reply.error(libc::EIO);
                    return;
                };
                reply.created(&TTL, &self.attr_of(ino, &inode), 0, 0, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("unlink() called with parent inode number {parent} and name {name:?}");
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.remove_node_in(engine_ino(parent), name, false) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        info!(
            "read() called with inode number {ino}, fh {fh}, offset {offset}, size {size}, \
             flags {flags}, lock_owner {lock_owner:?}"
        );
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let Ok(inode) = self.find_inode(engine_ino(ino)) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match self.read_data(&inode, offset as u64, &mut buf) {
            Ok(read) => reply.data(&buf[..read]),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        info!(
            "write() called with inode number {ino}, fh {fh}, offset {offset}, {} bytes, \
             write_flags {write_flags}, flags {flags}, lock_owner {lock_owner:?}",
            data.len()
        );
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let ino = engine_ino(ino);
        let Ok(mut inode) = self.find_inode(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.write_data(ino, &mut inode, offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }
}
