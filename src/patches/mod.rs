//! Concrete patches.
//!
//! Each patch only describes operations; nothing touches the image until the
//! resulting [`PhasedPatch`](crate::patch::PhasedPatch) is applied.

mod bluetooth;
mod disk;
mod files;
mod samba;
mod scripts;
mod ssh;
mod system;
mod usb;
mod users;
mod wifi;

pub use bluetooth::BluetoothPersonalAreaNetworkPatch;
pub use disk::{format_size, parse_size, ResizePatch};
pub use files::{AppendToFilesPatch, CopyFilesPatch};
pub use samba::{RootShare, SambaPatch};
pub use scripts::{FirstBootPatch, ShellScript, ShellScriptPatch};
pub use ssh::{SshAuthorizationPatch, SshEnablementPatch, SshPortPatch};
pub use system::{HostnamePatch, TimeZonePatch, TweaksPatch};
pub use usb::{GadgetKind, UsbGadgetPatch};
pub use users::{PasswordPatch, UsernamePatch};
pub use wifi::{WifiAutoReconnectPatch, WifiPowerSaveModePatch, WpaSupplicantPatch};

/// Adds `line` unless `text` already has a line equal to it.
pub(crate) fn ensure_line(text: &str, line: &str) -> String {
    if text.lines().any(|existing| existing.trim() == line) {
        return text.to_string();
    }
    let mut patched = text.to_string();
    if !patched.is_empty() && !patched.ends_with('\n') {
        patched.push('\n');
    }
    patched.push_str(line);
    patched.push('\n');
    patched
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_line() {
        assert_eq!(ensure_line("", "dtoverlay=dwc2"), "dtoverlay=dwc2\n");
        assert_eq!(ensure_line("a", "b"), "a\nb\n");
        assert_eq!(ensure_line("a\nb\n", "b"), "a\nb\n");
    }
}
