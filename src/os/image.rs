use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use fs2::FileExt;
use tracing::info;

use super::{Credentials, DiskPath, OperatingSystem};
use crate::error::{Error, Result};

/// Extension of the host directory, next to the image, that mirrors the
/// image root: `raspios.img` exchanges files through `raspios.shared`.
pub const EXCHANGE_DIRECTORY: &str = "shared";

/// Disk growth appends at most this many zero bytes per write.
pub const DISK_GROWTH_CHUNK: u64 = 200 * 1024 * 1024;

/// A disk image file bound to an operating system and the credentials
/// currently valid inside it.
#[derive(Debug, Clone)]
pub struct OperatingSystemImage {
    os: Arc<OperatingSystem>,
    path: PathBuf,
    /// Replaced by patches that change the login user or password.
    pub credentials: Credentials,
}

impl OperatingSystemImage {
    pub fn new(os: Arc<OperatingSystem>, path: impl Into<PathBuf>) -> Self {
        let credentials = os.default_credentials.clone();
        Self {
            os,
            path: path.into(),
            credentials,
        }
    }

    pub fn os(&self) -> &OperatingSystem {
        &self.os
    }

    pub fn shared_os(&self) -> Arc<OperatingSystem> {
        Arc::clone(&self.os)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// `<image dir>/<image stem>.shared`
    pub fn exchange_directory(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}.{}", stem, EXCHANGE_DIRECTORY))
    }

    /// Host location of `disk_path` inside the exchange directory.
    pub fn host_path(&self, disk_path: &DiskPath) -> PathBuf {
        disk_path.under(&self.exchange_directory())
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Grow the image file to `requested` bytes by appending zeros.
    ///
    /// Equal size is a no-op, a smaller size is rejected.
    pub fn increase_disk_space(&self, requested: u64) -> Result<()> {
        let current = self.size()?;
        if requested < current {
            return Err(Error::UnsupportedShrink {
                path: self.path.clone(),
                current,
                requested,
            });
        }
        if requested == current {
            info!("{} already has {} bytes", self.file_name(), current);
            return Ok(());
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let mut remaining = requested - current;
        while remaining > 0 {
            let chunk = remaining.min(DISK_GROWTH_CHUNK);
            io::copy(&mut io::repeat(0).take(chunk), &mut file)?;
            remaining -= chunk;
            info!(
                "{}: {} of {} bytes added",
                self.file_name(),
                requested - current - remaining,
                requested - current
            );
        }
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Exclusive lock held while patches are applied to this image.
    pub fn lock(&self) -> anyhow::Result<ImageLock> {
        let mut lock_name = self.path.as_os_str().to_owned();
        lock_name.push(".lock");
        let lock_path = PathBuf::from(lock_name);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

        if file.try_lock_exclusive().is_err() {
            anyhow::bail!(
                "{} is being customized by another process (lock: {})",
                self.path.display(),
                lock_path.display()
            );
        }

        Ok(ImageLock {
            _file: file,
            path: lock_path,
        })
    }
}

/// Released when dropped.
#[derive(Debug)]
pub struct ImageLock {
    _file: File,
    path: PathBuf,
}

impl ImageLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn image_in(dir: &TempDir, len: u64) -> OperatingSystemImage {
        let path = dir.path().join("raspios.img");
        let file = File::create(&path).unwrap();
        file.set_len(len).unwrap();
        let os = OperatingSystem::new("test", "Test OS", Credentials::new("pi", "raspberry"));
        OperatingSystemImage::new(Arc::new(os), path)
    }

    #[test]
    fn test_exchange_directory_and_host_path() {
        let dir = TempDir::new().unwrap();
        let image = image_in(&dir, 0);
        assert_eq!(image.exchange_directory(), dir.path().join("raspios.shared"));
        assert_eq!(
            image.host_path(&DiskPath::new("/etc/hostname")),
            dir.path().join("raspios.shared/etc/hostname")
        );
        assert_eq!(image.credentials, Credentials::new("pi", "raspberry"));
    }

    #[test]
    fn test_exchange_directory_belongs_to_one_image() {
        let dir = TempDir::new().unwrap();
        let os = Arc::new(OperatingSystem::new("test", "Test OS", Credentials::empty()));
        let first = OperatingSystemImage::new(Arc::clone(&os), dir.path().join("first.img"));
        let second = OperatingSystemImage::new(os, dir.path().join("second.img"));
        assert_ne!(first.exchange_directory(), second.exchange_directory());
        assert_ne!(first.exchange_directory(), dir.path().join("shared"));
    }

    #[test]
    fn test_increase_disk_space_appends_zeros() {
        let dir = TempDir::new().unwrap();
        let image = image_in(&dir, 10);
        fs::write(image.path(), b"0123456789").unwrap();

        image.increase_disk_space(4096).unwrap();

        let bytes = fs::read(image.path()).unwrap();
        assert_eq!(bytes.len(), 4096);
        assert_eq!(&bytes[..10], b"0123456789");
        assert!(bytes[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_shrinking_is_rejected() {
        let dir = TempDir::new().unwrap();
        let image = image_in(&dir, 2048);
        let err = image.increase_disk_space(1024).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedShrink { current: 2048, requested: 1024, .. }
        ));
        assert_eq!(image.size().unwrap(), 2048);
        image.increase_disk_space(2048).unwrap();
    }

    #[test]
    fn test_second_lock_fails() {
        let dir = TempDir::new().unwrap();
        let image = image_in(&dir, 0);
        let lock = image.lock().unwrap();
        assert!(lock.path().ends_with("raspios.img.lock"));
        assert!(image.lock().is_err());
        drop(lock);
        assert!(image.lock().is_ok());
    }
}
