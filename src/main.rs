use clap::Parser;
use extentfs::cli_interface::ExtentFsCli;

/// A CLI to format a new volume image, or to register it with FUSE and
/// mount it.
///
/// Mounting blocks the program until the filesystem is unmounted.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    match ExtentFsCli::parse() {
        ExtentFsCli::Mkfs(args) => {
            extentfs::mkfs::mkfs(
                args.image_file_path,
                args.size,
                args.inode_count,
                args.block_size,
            )?;
        }
        ExtentFsCli::Mount(args) => {
            extentfs::mount::mount(args.image_file_path, args.mount_point)?;
        }
    }
    Ok(())
}
