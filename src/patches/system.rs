use uuid::Uuid;

use crate::libguestfs::VirtCustomization;
use crate::os::{DiskPath, OperatingSystemImage};
use crate::patch::{Patch, PhasedPatch};

/// Sets the hostname, optionally made unique with a short random suffix.
#[derive(Debug, Clone)]
pub struct HostnamePatch {
    hostname: String,
}

impl HostnamePatch {
    pub fn new(name: &str, random_suffix: bool) -> Self {
        let hostname = if random_suffix {
            format!("{}--{}", name, random_suffix_text())
        } else {
            name.to_string()
        };
        Self { hostname }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

fn random_suffix_text() -> String {
    Uuid::new_v4().simple().to_string()[..4].to_string()
}

impl Patch for HostnamePatch {
    fn name(&self) -> String {
        format!("Set Hostname to {}", self.hostname)
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::Hostname(self.hostname.clone()))
            .customize_disk(VirtCustomization::AppendLine {
                file: DiskPath::new("/etc/hosts"),
                line: format!("127.0.1.1\t{}", self.hostname),
            })
            .build()
    }
}

/// Sets the system time zone, e.g. `Europe/Berlin`.
#[derive(Debug, Clone)]
pub struct TimeZonePatch {
    zone: String,
}

impl TimeZonePatch {
    pub fn new(zone: &str) -> Self {
        Self {
            zone: zone.to_string(),
        }
    }
}

impl Patch for TimeZonePatch {
    fn name(&self) -> String {
        format!("Change Time Zone to {}", self.zone)
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::Timezone(self.zone.clone()))
            .build()
    }
}

const APT_RETRIES_CONF: &str = "/etc/apt/apt.conf.d/80-retries";

/// Small system adjustments; currently how often APT retries a download.
#[derive(Debug, Clone)]
pub struct TweaksPatch {
    apt_retries: u32,
}

impl TweaksPatch {
    pub fn new(apt_retries: u32) -> Self {
        Self { apt_retries }
    }
}

impl Patch for TweaksPatch {
    fn name(&self) -> String {
        format!("Set APT Retries to {}", self.apt_retries)
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::Write {
                file: DiskPath::new(APT_RETRIES_CONF),
                content: format!("APT::Acquire::Retries \"{}\";\n", self.apt_retries),
            })
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patches::testing::image;
    use regex::Regex;

    #[test]
    fn test_hostname_with_random_suffix() {
        let patch = HostnamePatch::new("test-machine", true);
        let suffixed = Regex::new(r"^test-machine--[0-9a-f]{4}$").unwrap();
        assert!(suffixed.is_match(patch.hostname()), "{}", patch.hostname());

        let phased = patch.phased(&image());
        match &phased.virt_customizations()[0] {
            VirtCustomization::Hostname(name) => assert_eq!(name, patch.hostname()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!phased.needs_boot());
    }

    #[test]
    fn test_hostname_without_suffix() {
        let phased = HostnamePatch::new("pi", false).phased(&image());
        assert_eq!(
            phased.virt_customizations()[1],
            VirtCustomization::AppendLine {
                file: DiskPath::new("/etc/hosts"),
                line: "127.0.1.1\tpi".into(),
            }
        );
    }

    #[test]
    fn test_time_zone() {
        let phased = TimeZonePatch::new("Europe/Berlin").phased(&image());
        assert_eq!(phased.name(), "Change Time Zone to Europe/Berlin");
        assert_eq!(
            phased.virt_customizations(),
            &[VirtCustomization::Timezone("Europe/Berlin".into())]
        );
    }

    #[test]
    fn test_apt_retries() {
        let phased = TweaksPatch::new(10).phased(&image());
        assert_eq!(phased.name(), "Set APT Retries to 10");
        assert_eq!(
            phased.virt_customizations(),
            &[VirtCustomization::Write {
                file: DiskPath::new("/etc/apt/apt.conf.d/80-retries"),
                content: "APT::Acquire::Retries \"10\";\n".into(),
            }]
        );
    }
}
