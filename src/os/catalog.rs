//! Supported distributions, built once on first use.

use std::sync::{Arc, LazyLock};

use super::{Credentials, OperatingSystem};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

static CATALOG: LazyLock<Vec<Arc<OperatingSystem>>> = LazyLock::new(|| {
    let pi = || Credentials::new("pi", "raspberry");
    vec![
        OperatingSystem::new("raspberry-pi-os-lite", "Raspberry Pi OS Lite", pi())
            .download_url("https://downloads.raspberrypi.org/raspios_lite_armhf_latest")
            .approximate_image_size(1900 * MIB),
        OperatingSystem::new("raspberry-pi-os", "Raspberry Pi OS", pi())
            .download_url("https://downloads.raspberrypi.org/raspios_armhf_latest")
            .approximate_image_size(4 * GIB),
        OperatingSystem::new("hypriot-os", "Hypriot OS", Credentials::new("pirate", "hypriot"))
            .download_url("https://github.com/hypriot/image-builder-rpi/releases/download/v1.12.3/hypriotos-rpi-v1.12.3.img.zip")
            .approximate_image_size(1300 * MIB),
        OperatingSystem::new("dietpi", "DietPi", Credentials::new("root", "dietpi"))
            .download_url("https://dietpi.com/downloads/images/DietPi_RPi-ARMv6-Bullseye.7z")
            .approximate_image_size(900 * MIB),
        OperatingSystem::new("tiny-core", "Tiny Core Linux", Credentials::new("tc", "piCore"))
            .download_url("http://tinycorelinux.net/12.x/armv6/releases/RPi/piCore-12.0.zip")
            .approximate_image_size(100 * MIB),
        OperatingSystem::new("arch-linux-arm", "Arch Linux ARM", Credentials::new("alarm", "alarm"))
            .download_url("http://os.archlinuxarm.org/os/ArchLinuxARM-rpi-latest.tar.gz")
            .approximate_image_size(2 * GIB),
        OperatingSystem::new("ubuntu-server", "Ubuntu Server", Credentials::new("ubuntu", "ubuntu"))
            .download_url("https://cdimage.ubuntu.com/releases/20.04/release/ubuntu-20.04.2-preinstalled-server-armhf+raspi.img.xz")
            .approximate_image_size(3 * GIB),
        OperatingSystem::new("webthings-gateway", "WebThings Gateway", pi())
            .download_url("https://github.com/WebThingsIO/gateway/releases/download/1.0.0/gateway-1.0.0.img.zip")
            .approximate_image_size(3700 * MIB),
        OperatingSystem::new("balena-os", "balenaOS", Credentials::empty())
            .approximate_image_size(600 * MIB),
        OperatingSystem::new("risc-os", "RISC OS", Credentials::empty())
            .download_url("https://www.riscosopen.org/zipfiles/platform/raspberry-pi/RISCOSPi.5.28.zip")
            .approximate_image_size(2 * GIB),
    ]
    .into_iter()
    .map(Arc::new)
    .collect()
});

pub fn all() -> &'static [Arc<OperatingSystem>] {
    &CATALOG
}

/// Looks up a distribution by technical or full name, ignoring case.
pub fn find(name: &str) -> Option<Arc<OperatingSystem>> {
    let wanted = name.trim();
    CATALOG
        .iter()
        .find(|os| os.name.eq_ignore_ascii_case(wanted) || os.full_name.eq_ignore_ascii_case(wanted))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_find_by_name_and_full_name() {
        let os = find("raspberry-pi-os-lite").unwrap();
        assert_eq!(os.default_credentials, Credentials::new("pi", "raspberry"));
        assert!(Arc::ptr_eq(&os, &find("Raspberry Pi OS Lite").unwrap()));
        assert_eq!(find("DIETPI").unwrap().default_credentials.username, "root");
        assert!(find("windows").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = all().iter().map(|os| os.name.as_str()).collect();
        assert_eq!(names.len(), all().len());
    }

    #[test]
    fn test_images_without_login() {
        assert!(find("risc-os").unwrap().default_credentials.is_empty());
    }
}
