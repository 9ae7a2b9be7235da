//! Physical tree operations.

use std::future::Future;
use std::io;
use std::ops::AddAssign;
use std::path::Path;
use std::pin::Pin;

use lodge_core::DIR_PERMISSIONS;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Totals of one copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Directories created
    pub dirs: u64,
    /// Files copied
    pub files: u64,
    /// Bytes copied
    pub bytes: u64,
}

impl AddAssign for CopyStats {
    fn add_assign(&mut self, other: Self) {
        self.dirs += other.dirs;
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

/// Creates one directory with the service's permission bits.
///
/// Fails if it exists or its parent does not.
pub async fn create_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(DIR_PERMISSIONS);
    builder.create(path).await
}

/// Creates a directory and any missing ancestors.
pub async fn create_dir_all(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_PERMISSIONS);
    builder.create(path).await
}

/// Copies exactly `size` bytes from `src` into a new file at `dst`.
///
/// `dst` must not exist. A source shorter than `size` is an error.
pub async fn copy_file(src: &Path, dst: &Path, size: u64) -> io::Result<u64> {
    let reader = File::open(src).await?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
        .await?;

    let copied = tokio::io::copy(&mut reader.take(size), &mut writer).await?;
    if copied < size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("source shrank during copy: {} of {} bytes", copied, size),
        ));
    }

    writer.flush().await?;
    Ok(copied)
}

/// Recursively copies the directory `src` to `dst`, which must not exist.
///
/// Sub-directories are copied before files. Each file transfers the size
/// reported when its directory was listed.
pub fn copy_dir<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> Pin<Box<dyn Future<Output = io::Result<CopyStats>> + Send + 'a>> {
    Box::pin(async move {
        let mut dirs = Vec::new();
        let mut files = Vec::new();

        let mut entries = fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            // Links are not followed; they may point above the data root.
            let meta = fs::symlink_metadata(entry.path()).await?;
            if meta.file_type().is_symlink() {
                debug!(path = %entry.path().display(), "Skipping symbolic link");
            } else if meta.is_dir() {
                dirs.push(entry.file_name());
            } else {
                files.push((entry.file_name(), meta.len()));
            }
        }

        create_dir(dst).await?;
        let mut stats = CopyStats {
            dirs: 1,
            ..Default::default()
        };

        for name in dirs {
            stats += copy_dir(&src.join(&name), &dst.join(&name)).await?;
        }
        for (name, size) in files {
            stats.bytes += copy_file(&src.join(&name), &dst.join(&name), size).await?;
            stats.files += 1;
        }

        Ok(stats)
    })
}

/// Removes a file, or a directory with everything below it.
pub async fn remove(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}
