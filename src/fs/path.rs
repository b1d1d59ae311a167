//! Path resolution: walking slash-separated paths from the root inode.

use crate::error::{FsError, Result};

use super::{volume::Volume, NAME_LEN, PATH_MAX, ROOT_INODE};

impl Volume {
    /// Resolve an absolute path to its inode number. `/` is the root
    /// inode itself; every intermediate component must resolve to a
    /// directory.
    pub fn resolve(&self, path: &str) -> Result<u32> {
        check_path(path)?;
        let mut current = ROOT_INODE;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.resolve_component(current, component)?;
        }
        Ok(current)
    }

    /// Resolve everything but the final component, for operations that
    /// must mutate the parent. Returns the parent's inode number and the
    /// final component, which itself need not exist.
    pub fn resolve_parent<'p>(&self, path: &'p str) -> Result<(u32, &'p str)> {
        check_path(path)?;
        let mut components = path.split('/').filter(|c| !c.is_empty());
        let Some(mut last) = components.next() else {
            // the root has no parent to mutate
            return Err(FsError::NotFound);
        };
        let mut parent = ROOT_INODE;
        for component in components {
            parent = self.resolve_component(parent, last)?;
            last = component;
        }
        if last.len() >= NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let parent_inode = self.find_inode(parent)?;
        if !parent_inode.is_dir() {
            return Err(FsError::NotDirectory);
        }
        Ok((parent, last))
    }

    fn resolve_component(&self, dir: u32, name: &str) -> Result<u32> {
        if name.len() >= NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let dir_inode = self.find_inode(dir)?;
        if !dir_inode.is_dir() {
            return Err(FsError::NotDirectory);
        }
        self.dir_lookup(&dir_inode, name)
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.len() >= PATH_MAX {
        return Err(FsError::PathTooLong);
    }
    // all paths handed to the engine are absolute within the volume
    if !path.starts_with('/') {
        return Err(FsError::NotDirectory);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::mkfs;
    use std::path::Path;

    fn fresh_volume(path: &str) -> Volume {
        let path = Path::new(path);
        if path.exists() {
            std::fs::remove_file(path).expect("removing stale test image failed");
        }
        mkfs(path, 1 << 22, 64, 4096).expect("formatting test image failed");
        Volume::open(path).expect("opening test image failed")
    }

    #[test]
    fn test_resolve_root() {
        let volume = fresh_volume("/tmp/extentfs_test_resolve_root.img");
        assert_eq!(volume.resolve("/").unwrap(), ROOT_INODE);
        assert!(matches!(volume.resolve_parent("/"), Err(FsError::NotFound)));
        assert!(matches!(
            volume.resolve("relative"),
            Err(FsError::NotDirectory)
        ));
        std::fs::remove_file("/tmp/extentfs_test_resolve_root.img").unwrap();
    }

    #[test]
    fn test_resolve_nested_path() {
        let path = "/tmp/extentfs_test_resolve_nested.img";
        let mut volume = fresh_volume(path);
        let d = volume.mkdir("/d", 0o755).unwrap();
        let f = volume.create("/d/f", 0o644).unwrap();

        assert_eq!(volume.resolve("/d").unwrap(), d);
        assert_eq!(volume.resolve("/d/f").unwrap(), f);
        // repeated separators collapse
        assert_eq!(volume.resolve("//d///f").unwrap(), f);

        let (parent, name) = volume.resolve_parent("/d/f").unwrap();
        assert_eq!(parent, d);
        assert_eq!(name, "f");
        // the final component of a parent resolution may be absent
        let (parent, name) = volume.resolve_parent("/d/new").unwrap();
        assert_eq!(parent, d);
        assert_eq!(name, "new");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_resolve_errors() {
        let path = "/tmp/extentfs_test_resolve_err.img";
        let mut volume = fresh_volume(path);
        volume.mkdir("/d", 0o755).unwrap();
        volume.create("/d/f", 0o644).unwrap();

        assert!(matches!(volume.resolve("/missing"), Err(FsError::NotFound)));
        assert!(matches!(
            volume.resolve("/d/missing"),
            Err(FsError::NotFound)
        ));
        // a file in prefix position is not a directory
        assert!(matches!(
            volume.resolve("/d/f/x"),
            Err(FsError::NotDirectory)
        ));
        assert!(matches!(
            volume.resolve_parent("/d/f/x"),
            Err(FsError::NotDirectory)
        ));

        let long_name = format!("/{}", "n".repeat(NAME_LEN));
        assert!(matches!(
            volume.resolve(&long_name),
            Err(FsError::NameTooLong)
        ));
        let long_path = format!("/{}", "p/".repeat(PATH_MAX / 2));
        assert!(matches!(
            volume.resolve(&long_path),
            Err(FsError::PathTooLong)
        ));
        std::fs::remove_file(path).unwrap();
    }
}
