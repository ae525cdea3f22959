use crate::libguestfs::VirtCustomization;
use crate::os::{DiskPath, OperatingSystemImage};
use crate::patch::{FileOperation, Patch, PhasedPatch};

/// Raspberry Pi OS moves this file to `/etc/wpa_supplicant` on boot.
const WPA_SUPPLICANT: &str = "/boot/wpa_supplicant.conf";
const CRONTAB: &str = "/etc/crontab";

/// Installs a `wpa_supplicant.conf` with the given content.
#[derive(Debug, Clone)]
pub struct WpaSupplicantPatch {
    content: String,
}

impl WpaSupplicantPatch {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }
}

impl Patch for WpaSupplicantPatch {
    fn name(&self) -> String {
        "Copy wpa_supplicant.conf".to_string()
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        let mut content = self.content.trim().to_string();
        content.push('\n');
        PhasedPatch::builder(&self.name())
            .file_operation(FileOperation::write(WPA_SUPPLICANT, &content))
            .build()
    }
}

/// Adds a cron job that reconnects the wifi when none of `hosts` is
/// reachable on port 443.
#[derive(Debug, Clone)]
pub struct WifiAutoReconnectPatch {
    hosts: Vec<String>,
}

impl Default for WifiAutoReconnectPatch {
    fn default() -> Self {
        Self::new(vec!["google.com".to_string(), "amazon.com".to_string()])
    }
}

impl WifiAutoReconnectPatch {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }

    /// The crontab line; runs every five minutes as root.
    pub fn cron_line(&self) -> String {
        let reachable = format!(
            "({})",
            self.hosts
                .iter()
                .map(|host| format!("nc -4z -w5 {} 443 1>/dev/null 2>&1", host))
                .collect::<Vec<_>>()
                .join(" || ")
        );
        let check = [
            "printf 'Periodic internet connection check ... '",
            reachable.as_str(),
            "echo 'ok.'",
        ]
        .join(" && ");
        let reconnect = [
            "printf 'failed. Trying to re-connect ... '",
            "sudo /sbin/ip --force link set wlan0 down",
            "sudo /sbin/ip link set wlan0 up",
            "/bin/sleep 10",
            reachable.as_str(),
            "echo 'internet connection re-established.'",
        ]
        .join(" && ");
        format!("*/5 * * * *      root     {} || {} || echo 'failed.'", check, reconnect)
    }
}

impl Patch for WifiAutoReconnectPatch {
    fn name(&self) -> String {
        "Enable Wifi Auto-Reconnect".to_string()
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::AppendLine {
                file: DiskPath::new(CRONTAB),
                line: self.cron_line(),
            })
            .boot()
            .build()
    }
}

/// Turns off the power saving of `wlan0` on every boot; it makes the
/// Raspberry Pi's wifi drop connections.
#[derive(Debug, Clone, Default)]
pub struct WifiPowerSaveModePatch;

impl WifiPowerSaveModePatch {
    pub fn cron_line() -> &'static str {
        "@reboot          root     /sbin/iw dev wlan0 set power_save off"
    }
}

impl Patch for WifiPowerSaveModePatch {
    fn name(&self) -> String {
        "Disable Wifi Power-Save Mode".to_string()
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::AppendLine {
                file: DiskPath::new(CRONTAB),
                line: Self::cron_line().to_string(),
            })
            .build()
    }
}
