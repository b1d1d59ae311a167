use super::inode::Inode;

/// File type of an inode, derived from its mode bits.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    #[default]
    RegularFile,
    Directory,
}

impl From<&Inode> for FileKind {
    fn from(inode: &Inode) -> Self {
        if inode.is_dir() {
            FileKind::Directory
        } else {
            FileKind::RegularFile
        }
    }
}

/// Conversion for the FUSE reply types.
impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
        }
    }
}
