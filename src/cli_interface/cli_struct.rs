use clap::Parser;

use crate::fs::DEFAULT_BLOCK_SIZE;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum ExtentFsCli {
    /// format an image file into a new volume
    Mkfs(MkfsArgs),
    /// mount a formatted volume through FUSE
    Mount(MountArgs),
}

/// make a new volume subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "format an image file into a new volume")]
pub struct MkfsArgs {
    /// the path of the volume image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the size of the volume in bytes
    #[clap(short, long)]
    pub size: u64,
    /// the inode count of the volume
    #[clap(short, long)]
    pub inode_count: u32,
    /// the block size of the volume, a power of two
    #[clap(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u32,
}

/// mount a volume subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "mount a volume")]
pub struct MountArgs {
    /// the path of the volume image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the mount point of the volume
    #[clap(short, long)]
    pub mount_point: String,
}
