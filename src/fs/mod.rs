//! The extent-based filesystem engine.
pub mod bitmap;
pub mod filekind;
pub mod inode;
pub mod superblock;
pub mod volume;
mod data;
mod dir;
mod fs_api_impl;
mod ops;
mod path;

pub use bitmap::*;
pub use data::*;
pub use dir::*;
pub use filekind::*;
pub use inode::*;
pub use ops::*;
pub use superblock::*;
pub use volume::*;

/// Magic number identifying a formatted volume ("EXTFSv01").
pub const FS_MAGIC: u64 = 0x4558544653763031;
/// Inode number of the root directory.
pub const ROOT_INODE: u32 = 0;
/// Bytes reserved per inode record in the inode table.
pub const INODE_SLOT_SIZE: u32 = 256;
/// Direct extent slots per inode; there is no indirection.
pub const EXTENTS_PER_INODE: usize = 12;
/// Bytes per directory entry record.
pub const DENTRY_SIZE: u32 = 256;
/// Directory-entry name field length, including the NUL terminator.
pub const NAME_LEN: usize = 252;
/// Inode number marking a free directory-entry slot.
pub const DENTRY_FREE: u32 = u32::MAX;
/// Maximum path length accepted by the resolver.
pub const PATH_MAX: usize = 4096;
/// Block size of newly formatted volumes unless overridden.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
