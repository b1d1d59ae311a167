//! Register the filesystem with FUSE and mount it.

use fuser::MountOption;
use std::path::Path;

use crate::fs::Volume;

/// Mount the volume at `image_path` on `mountpoint`. Blocks until the
/// filesystem is unmounted.
pub fn mount<P>(image_path: P, mountpoint: P) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let volume = Volume::open(image_path)?;

    let opts = vec![
        MountOption::FSName("extentfs".to_string()),
        MountOption::DefaultPermissions,
    ];

    Ok(fuser::mount2(volume, mountpoint, &opts)?)
}
