//! File operations run on the host through the exchange directory.
//!
//! Image files an operation needs are copied out into the exchange
//! directory first; every file an operation places there is copied back in
//! afterwards.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::error::Error;
use crate::os::{DiskPath, OperatingSystemImage};

type Editor = Arc<dyn Fn(&Path) -> Result<()> + Send + Sync>;

/// One host side file operation.
#[derive(Clone)]
pub enum FileOperation {
    /// Copies a host file or directory to `target` inside the image.
    Put {
        source: PathBuf,
        target: DiskPath,
        overwrite: bool,
    },
    /// Copies an image file or directory to the host.
    Fetch {
        source: DiskPath,
        target: PathBuf,
        overwrite: bool,
    },
    /// Changes an existing image file in place.
    Edit {
        file: DiskPath,
        description: String,
        edit: Editor,
    },
    /// Writes (or appends to) an image file.
    Write {
        file: DiskPath,
        content: String,
        append: bool,
    },
}

impl FileOperation {
    pub fn put(source: impl Into<PathBuf>, target: impl Into<DiskPath>) -> Self {
        Self::Put {
            source: source.into(),
            target: target.into(),
            overwrite: true,
        }
    }

    pub fn fetch(source: impl Into<DiskPath>, target: impl Into<PathBuf>) -> Self {
        Self::Fetch {
            source: source.into(),
            target: target.into(),
            overwrite: false,
        }
    }

    pub fn edit<F>(file: impl Into<DiskPath>, description: &str, edit: F) -> Self
    where
        F: Fn(&Path) -> Result<()> + Send + Sync + 'static,
    {
        Self::Edit {
            file: file.into(),
            description: description.to_string(),
            edit: Arc::new(edit),
        }
    }

    pub fn write(file: impl Into<DiskPath>, content: &str) -> Self {
        Self::Write {
            file: file.into(),
            content: content.to_string(),
            append: false,
        }
    }

    pub fn append_line(file: impl Into<DiskPath>, line: &str) -> Self {
        Self::Write {
            file: file.into(),
            content: format!("{}\n", line),
            append: true,
        }
    }

    /// Image file that must be copied out before this operation runs.
    pub fn required_from_image(&self) -> Option<&DiskPath> {
        match self {
            Self::Fetch { source, .. } => Some(source),
            Self::Edit { file, .. } => Some(file),
            Self::Write {
                file, append: true, ..
            } => Some(file),
            Self::Put { .. } | Self::Write { .. } => None,
        }
    }

    /// Runs the operation. Returns the image path to copy back in, if any.
    pub fn run(&self, image: &OperatingSystemImage) -> Result<Option<DiskPath>> {
        match self {
            Self::Put {
                source,
                target,
                overwrite,
            } => {
                if !source.exists() {
                    return Err(Error::MissingSource(source.clone()).into());
                }
                let host = image.host_path(target);
                if host.exists() && !overwrite {
                    return Err(Error::DestinationExists(PathBuf::from(target.as_path())).into());
                }
                copy_tree(source, &host)?;
                Ok(Some(target.clone()))
            }
            Self::Fetch {
                source,
                target,
                overwrite,
            } => {
                let host = image.host_path(source);
                if !host.exists() {
                    return Err(Error::MissingSource(PathBuf::from(source.as_path())).into());
                }
                if target.exists() && !overwrite {
                    return Err(Error::DestinationExists(target.clone()).into());
                }
                copy_tree(&host, target)?;
                Ok(None)
            }
            Self::Edit {
                file,
                description,
                edit,
            } => {
                let host = image.host_path(file);
                if !host.exists() {
                    return Err(Error::MissingSource(PathBuf::from(file.as_path())).into());
                }
                edit(&host).with_context(|| format!("{} ({})", description, file))?;
                Ok(Some(file.clone()))
            }
            Self::Write {
                file,
                content,
                append,
            } => {
                let host = image.host_path(file);
                if let Some(parent) = host.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(*append)
                    .truncate(!*append)
                    .open(&host)
                    .with_context(|| format!("Failed to open {}", host.display()))?;
                out.write_all(content.as_bytes())?;
                Ok(Some(file.clone()))
            }
        }
    }
}

impl fmt::Debug for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put { source, target, .. } => {
                write!(f, "Put({} -> {})", source.display(), target)
            }
            Self::Fetch { source, target, .. } => {
                write!(f, "Fetch({} -> {})", source, target.display())
            }
            Self::Edit {
                file, description, ..
            } => write!(f, "Edit({}: {})", file, description),
            Self::Write { file, append, .. } => {
                write!(f, "Write({}{})", file, if *append { ", append" } else { "" })
            }
        }
    }
}

/// Copies a file, or a directory tree, to `dst`.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Host files below the exchange directory, as image paths.
pub fn exchanged_files(image: &OperatingSystemImage) -> Vec<DiskPath> {
    let root = image.exchange_directory();
    WalkDir::new(&root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(&root)
                .ok()
                .map(DiskPath::new)
        })
        .collect()
}
