use crate::os::OperatingSystemImage;
use crate::patch::{Patch, PhasedPatch};

/// Grows the image file. Shrinking is rejected when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePatch {
    pub size: u64,
}

impl ResizePatch {
    pub fn new(size: u64) -> Self {
        Self { size }
    }
}

impl Patch for ResizePatch {
    fn name(&self) -> String {
        format!("Increase Disk Space to {}", format_size(self.size))
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        let size = self.size;
        PhasedPatch::builder(&self.name())
            .prepare_disk(&format!("resize to {} bytes", size), move |image| {
                image.increase_disk_space(size)?;
                Ok(())
            })
            .build()
    }
}

const UNITS: &[(&str, u64)] = &[
    ("TiB", 1 << 40),
    ("GiB", 1 << 30),
    ("MiB", 1 << 20),
    ("KiB", 1 << 10),
];

/// Parses sizes like `4GiB`, `512 MiB`, `2G` or a plain byte count.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: u64 = number.parse().ok()?;
    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        _ => return None,
    };
    number.checked_mul(factor)
}

pub fn format_size(bytes: u64) -> String {
    for (unit, factor) in UNITS {
        if bytes >= *factor && bytes % factor == 0 {
            return format!("{} {}", bytes / factor, unit);
        }
    }
    format!("{} B", bytes)
}
