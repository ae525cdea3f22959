use std::path::PathBuf;

use crate::os::{DiskPath, OperatingSystemImage};
use crate::patch::{FileOperation, Patch, PhasedPatch};

/// Copies host files or directories into the image.
#[derive(Debug, Clone)]
pub struct CopyFilesPatch {
    files: Vec<(PathBuf, DiskPath)>,
}

impl CopyFilesPatch {
    pub fn new(files: Vec<(PathBuf, DiskPath)>) -> Self {
        Self { files }
    }
}

impl Patch for CopyFilesPatch {
    fn name(&self) -> String {
        match self.files.as_slice() {
            [(_, target)] => format!("Copy File to {}", target),
            files => format!("Copy {} Files", files.len()),
        }
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        self.files
            .iter()
            .fold(PhasedPatch::builder(&self.name()), |builder, (source, target)| {
                builder.file_operation(FileOperation::put(source, target.clone()))
            })
            .build()
    }
}

/// Appends text to image files, creating them if needed.
#[derive(Debug, Clone)]
pub struct AppendToFilesPatch {
    appends: Vec<(String, DiskPath)>,
}

impl AppendToFilesPatch {
    pub fn new(appends: Vec<(String, DiskPath)>) -> Self {
        Self { appends }
    }
}

impl Patch for AppendToFilesPatch {
    fn name(&self) -> String {
        let targets: Vec<String> = self.appends.iter().map(|(_, file)| file.to_string()).collect();
        format!("Append to {}", targets.join(", "))
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        let mut builder = PhasedPatch::builder(&self.name());
        for (text, file) in &self.appends {
            for line in text.trim_end().lines() {
                builder = builder.file_operation(FileOperation::append_line(file.clone(), line));
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{Credentials, OperatingSystem};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_copy_files_puts_every_file() {
        let temp = TempDir::new().unwrap();
        let image = OperatingSystemImage::new(
            Arc::new(OperatingSystem::new("test", "Test OS", Credentials::new("pi", "raspberry"))),
            temp.path().join("raspios.img"),
        );
        let sample = temp.path().join("sample.txt");
        fs::write(&sample, "sample").unwrap();

        let patch = CopyFilesPatch::new(vec![
            (sample.clone(), DiskPath::new("/etc/sample.txt")),
            (sample, DiskPath::new("/boot/sample.txt")),
        ]);
        assert_eq!(patch.name(), "Copy 2 Files");
        let phased = patch.phased(&image);
        assert_eq!(phased.file_operations().len(), 2);

        for operation in phased.file_operations() {
            operation.run(&image).unwrap();
        }
        assert_eq!(
            fs::read_to_string(image.host_path(&DiskPath::new("/boot/sample.txt"))).unwrap(),
            "sample"
        );
    }

    #[test]
    fn test_append_splits_lines() {
        let patch = AppendToFilesPatch::new(vec![(
            "line 1\nline 2\n".to_string(),
            DiskPath::new("/etc/motd"),
        )]);
        let phased = patch.phased(&crate::patches::testing::image());
        assert_eq!(patch.name(), "Append to /etc/motd");
        assert_eq!(phased.file_operations().len(), 2);
        assert!(phased
            .file_operations()
            .iter()
            .all(|op| op.required_from_image() == Some(&DiskPath::new("/etc/motd"))));
    }
}
