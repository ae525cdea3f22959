use std::fmt;
use std::path::{Component, Path, PathBuf};

/// An absolute path inside a disk image, e.g. `/etc/hostname`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiskPath(PathBuf);

impl DiskPath {
    /// Creates a disk path; relative input is anchored at `/`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let mut normalized = PathBuf::from("/");
        for component in path.as_ref().components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        Self(normalized)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// The path without its leading `/`.
    pub fn relative(&self) -> &Path {
        self.0.strip_prefix("/").unwrap_or(&self.0)
    }

    pub fn join(&self, child: impl AsRef<Path>) -> Self {
        Self::new(self.0.join(child.as_ref().strip_prefix("/").unwrap_or(child.as_ref())))
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(Self::new)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    /// Maps this path below a host directory that mirrors the image root.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(self.relative())
    }
}

impl fmt::Display for DiskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for DiskPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
