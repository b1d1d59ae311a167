//! Error taxonomy of the filesystem engine.
//!
//! Every variant maps to exactly one POSIX errno via [FsError::errno], which
//! is what the FUSE adapter hands back to the kernel. Detection is always
//! synchronous; nothing is retried internally.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    /// A path component or directory entry does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// A path prefix component is not a directory.
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    /// Directory removal attempted while entries are still bound.
    #[error("directory not empty")]
    NotEmpty,
    #[error("file exists")]
    Exists,
    /// No free inode, or no contiguous block run of the requested length.
    #[error("no space left on volume")]
    NoSpace,
    /// Every direct extent slot of the inode is occupied.
    #[error("extent list exhausted")]
    OutOfExtents,
    #[error("file name too long")]
    NameTooLong,
    #[error("path too long")]
    PathTooLong,
    /// An on-disk record failed to decode, or the volume is not ours.
    #[error("corrupt metadata: {0}")]
    Corrupt(String),
    /// Bookkeeping state contradicts itself, e.g. a bitmap bit already in
    /// the requested state. Fatal to the operation, not to the mount.
    #[error("internal inconsistency: {0}")]
    Inconsistent(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// The errno reported at the FUSE boundary.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::Exists => libc::EEXIST,
            FsError::NoSpace | FsError::OutOfExtents => libc::ENOSPC,
            FsError::NameTooLong | FsError::PathTooLong => libc::ENAMETOOLONG,
            FsError::Corrupt(_) | FsError::Inconsistent(_) | FsError::Io(_) => libc::EIO,
        }
    }
}

impl From<bincode::error::EncodeError> for FsError {
    fn from(e: bincode::error::EncodeError) -> Self {
        FsError::Corrupt(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for FsError {
    fn from(e: bincode::error::DecodeError) -> Self {
        FsError::Corrupt(e.to_string())
    }
}
