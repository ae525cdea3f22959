//! Customization config files.
//!
//! A TOML file names the operating system and the customizations to apply;
//! [`load_customization`] validates it and turns it into an ordered list of
//! patches before anything touches the image.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::emulator::EmulatorBuilder;
use crate::error::Error;
use crate::os::{catalog, DiskPath, OperatingSystem, OperatingSystemImage};
use crate::patch::{CompositePatch, Patch};
use crate::patches::{
    parse_size, AppendToFilesPatch, BluetoothPersonalAreaNetworkPatch, CopyFilesPatch, FirstBootPatch, GadgetKind, HostnamePatch,
    PasswordPatch, ResizePatch, RootShare, SambaPatch, ShellScript, ShellScriptPatch,
    SshAuthorizationPatch, SshEnablementPatch, SshPortPatch, TimeZonePatch, UsbGadgetPatch,
    TweaksPatch, UsernamePatch, WifiAutoReconnectPatch, WifiPowerSaveModePatch, WpaSupplicantPatch,
};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// `$XDG_CONFIG_HOME/img-customizer/config.toml`, if there is a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("img-customizer").join(CONFIG_FILE_NAME))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct CustomizationToml {
    name: Option<String>,
    os: Option<String>,
    image: Option<PathBuf>,
    #[serde(default)]
    trace: bool,
    size: Option<String>,
    timezone: Option<String>,
    hostname: Option<HostnameToml>,
    default_user: Option<DefaultUserToml>,
    ssh: Option<SshToml>,
    wifi: Option<WifiToml>,
    samba: Option<SambaToml>,
    #[serde(default)]
    usb_gadgets: Vec<UsbGadgetToml>,
    bluetooth_pan: Option<BluetoothPanToml>,
    tweaks: Option<TweaksToml>,
    #[serde(default)]
    files: Vec<FileToml>,
    #[serde(default)]
    setup: Vec<SetupToml>,
    #[serde(default)]
    first_boot: Vec<FirstBootToml>,
    emulator: Option<EmulatorToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct HostnameToml {
    name: String,
    #[serde(default = "enabled")]
    random_suffix: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct DefaultUserToml {
    username: Option<String>,
    new_username: Option<String>,
    new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct SshToml {
    enabled: Option<bool>,
    port: Option<u16>,
    #[serde(default)]
    authorized_keys: Vec<String>,
    #[serde(default)]
    authorized_key_files: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct WifiToml {
    wpa_supplicant: Option<String>,
    #[serde(default)]
    auto_reconnect: bool,
    /// `false` disables power saving of the wifi adapter.
    power_save_mode: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct SambaToml {
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    home_share: bool,
    #[serde(default)]
    root_share: RootShare,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct UsbGadgetToml {
    kind: GadgetKind,
    #[serde(default)]
    host_as_default_gateway: bool,
    device_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct BluetoothPanToml {
    device_address: Option<String>,
    dhcp_start: Option<String>,
    dhcp_end: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct TweaksToml {
    apt_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct FileToml {
    source: Option<PathBuf>,
    append: Option<String>,
    target: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct SetupToml {
    name: String,
    commands: Option<Vec<String>>,
    script: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct FirstBootToml {
    name: String,
    script: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct EmulatorToml {
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

fn enabled() -> bool {
    true
}

/// A validated customization.
pub struct Customization {
    pub name: String,
    pub os: Arc<OperatingSystem>,
    /// Image path from the config, relative paths resolved against its directory.
    pub image: Option<PathBuf>,
    pub trace: bool,
    pub emulator: EmulatorBuilder,
    /// In application order.
    pub patches: Vec<Box<dyn Patch>>,
}

impl fmt::Debug for Customization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Customization")
            .field("name", &self.name)
            .field("os", &self.os.name)
            .field("image", &self.image)
            .field("patches", &self.patches.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

pub fn load_customization(config_path: &Path) -> Result<Customization> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("reading config '{}'", config_path.display()))?;
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let default_name = config_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "customization".to_string());
    parse_customization(&text, base_dir, &default_name)
        .with_context(|| format!("invalid config '{}'", config_path.display()))
}

/// Parses config text. Relative paths are resolved against `base_dir`.
pub fn parse_customization(text: &str, base_dir: &Path, default_name: &str) -> Result<Customization> {
    let parsed: CustomizationToml = toml::from_str(text).context("parsing TOML")?;

    let os_name = parsed
        .os
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::Config("missing 'os'".to_string()))?;
    let os = catalog::find(os_name).ok_or_else(|| {
        let known: Vec<&str> = catalog::all().iter().map(|os| os.name.as_str()).collect();
        Error::Config(format!(
            "'{}' is not supported; expected one of: {}",
            os_name,
            known.join(", ")
        ))
    })?;

    let emulator = match &parsed.emulator {
        Some(emulator) => EmulatorBuilder::custom(&emulator.program, &emulator.args),
        None => EmulatorBuilder::docker_pi(),
    };
    let patches = build_patches(&parsed, &os, base_dir)?;

    Ok(Customization {
        name: parsed.name.clone().unwrap_or_else(|| default_name.to_string()),
        image: parsed.image.as_ref().map(|image| base_dir.join(image)),
        trace: parsed.trace,
        os,
        emulator,
        patches,
    })
}

fn build_patches(
    config: &CustomizationToml,
    os: &OperatingSystem,
    base_dir: &Path,
) -> Result<Vec<Box<dyn Patch>>> {
    let mut patches: Vec<Box<dyn Patch>> = Vec::new();

    if let Some(size) = &config.size {
        let bytes = parse_size(size)
            .ok_or_else(|| Error::Config(format!("'{}' is not a valid size", size)))?;
        patches.push(Box::new(ResizePatch::new(bytes)));
    }

    if let Some(hostname) = &config.hostname {
        patches.push(Box::new(HostnamePatch::new(&hostname.name, hostname.random_suffix)));
    }

    if let Some(zone) = &config.timezone {
        patches.push(Box::new(TimeZonePatch::new(zone)));
    }

    if let Some(wifi) = &config.wifi {
        if let Some(wpa_supplicant) = &wifi.wpa_supplicant {
            patches.push(Box::new(WpaSupplicantPatch::new(wpa_supplicant)));
        }
        if wifi.auto_reconnect {
            patches.push(Box::new(WifiAutoReconnectPatch::default()));
        }
        if wifi.power_save_mode == Some(false) {
            patches.push(Box::new(WifiPowerSaveModePatch));
        }
    }

    let default_user = config.default_user.as_ref();
    let current_username = default_user
        .and_then(|user| user.username.clone())
        .unwrap_or_else(|| os.default_credentials.username.clone());
    let new_username = default_user.and_then(|user| user.new_username.clone());
    let new_password = default_user.and_then(|user| user.new_password.clone());
    if let Some(new) = &new_username {
        patches.push(Box::new(UsernamePatch::new(&current_username, new)));
    }
    if let Some(password) = &new_password {
        let user = new_username.as_deref().unwrap_or(&current_username);
        patches.push(Box::new(PasswordPatch::new(user, password)));
    }

    if let Some(ssh) = &config.ssh {
        if ssh.enabled.unwrap_or(true) {
            patches.push(Box::new(SshEnablementPatch));
        }
        if let Some(port) = ssh.port {
            patches.push(Box::new(SshPortPatch::new(port)));
        }
        let mut keys = Vec::new();
        for file in &ssh.authorized_key_files {
            let path = base_dir.join(file);
            let key = fs::read_to_string(&path)
                .with_context(|| format!("reading SSH key file '{}'", path.display()))?;
            if key.trim().starts_with("ssh-") {
                keys.push(key.trim().to_string());
            }
        }
        keys.extend(ssh.authorized_keys.iter().map(|key| key.trim().to_string()));
        if !keys.is_empty() {
            let user = match &new_username {
                Some(user) => user.clone(),
                None if !os.default_credentials.is_empty() => os.default_credentials.username.clone(),
                None => "root".to_string(),
            };
            patches.push(Box::new(SshAuthorizationPatch::new(&user, keys)));
        }
    }

    if let Some(samba) = &config.samba {
        let password = samba
            .password
            .clone()
            .or_else(|| new_password.clone())
            .ok_or_else(|| Error::Config("samba requires a password".to_string()))?;
        let username = samba
            .username
            .clone()
            .or_else(|| new_username.clone())
            .unwrap_or_else(|| current_username.clone());
        patches.push(Box::new(SambaPatch::new(
            &username,
            &password,
            samba.home_share,
            samba.root_share,
        )));
    }

    for gadget in &config.usb_gadgets {
        let mut patch =
            UsbGadgetPatch::new(gadget.kind).host_as_default_gateway(gadget.host_as_default_gateway);
        if let Some(address) = &gadget.device_address {
            patch.device_address = address.clone();
        }
        patches.push(Box::new(patch));
    }

    if let Some(pan) = &config.bluetooth_pan {
        let mut patch = BluetoothPersonalAreaNetworkPatch::default();
        if let Some(address) = &pan.device_address {
            patch.device_address = address.clone();
        }
        if let Some(start) = &pan.dhcp_start {
            patch.dhcp_start = start.clone();
        }
        if let Some(end) = &pan.dhcp_end {
            patch.dhcp_end = end.clone();
        }
        patches.push(Box::new(patch));
    }

    if let Some(retries) = config.tweaks.as_ref().and_then(|tweaks| tweaks.apt_retries) {
        patches.push(Box::new(TweaksPatch::new(retries)));
    }

    for file in &config.files {
        let target = DiskPath::new(&file.target);
        if file.source.is_none() && file.append.is_none() {
            return Err(Error::Config(format!(
                "file '{}' needs 'source' or 'append'",
                target
            ))
            .into());
        }
        if let Some(source) = &file.source {
            let source = base_dir.join(source);
            if !source.exists() {
                return Err(Error::Config(format!("'{}' does not exist", source.display())).into());
            }
            patches.push(Box::new(CopyFilesPatch::new(vec![(source, target.clone())])));
        }
        if let Some(append) = &file.append {
            patches.push(Box::new(AppendToFilesPatch::new(vec![(append.clone(), target)])));
        }
    }

    for setup in &config.setup {
        let patch = match (&setup.commands, &setup.script) {
            (Some(commands), None) => ShellScriptPatch::new(&setup.name, commands.clone())?,
            (None, Some(script)) => ShellScriptPatch::setup(&setup.name, script)?,
            _ => {
                return Err(Error::Config(format!(
                    "setup '{}' needs exactly one of 'commands' or 'script'",
                    setup.name
                ))
                .into())
            }
        };
        patches.push(Box::new(patch));
    }

    if !config.first_boot.is_empty() {
        let scripts = config
            .first_boot
            .iter()
            .map(|script| ShellScript::new(&script.name, &script.script))
            .collect();
        patches.push(Box::new(FirstBootPatch::new(scripts)));
    }

    Ok(patches)
}

/// Keeps non-booting patches in order and merges every booting patch into
/// one composite after them, so the image boots once. Patches that defer to
/// the image's first real start come last, so the verification boot does
/// not run their scripts.
pub fn compose_boots(patches: Vec<Box<dyn Patch>>, image: &OperatingSystemImage) -> Vec<Box<dyn Patch>> {
    let (deferred, patches): (Vec<_>, Vec<_>) = patches
        .into_iter()
        .partition(|patch| patch.defers_to_first_boot());
    let (booting, mut composed): (Vec<_>, Vec<_>) = patches
        .into_iter()
        .partition(|patch| patch.phased(image).needs_boot());
    match booting.len() {
        0 => {}
        1 => composed.extend(booting),
        _ => composed.push(Box::new(CompositePatch::new(booting))),
    }
    composed.extend(deferred);
    composed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(text: &str) -> Result<Customization> {
        parse_customization(text, Path::new("/configs"), "sample")
    }

    fn names(customization: &Customization) -> Vec<String> {
        customization.patches.iter().map(|p| p.name()).collect()
    }

    fn config_error(err: &anyhow::Error) -> Option<String> {
        match err.downcast_ref::<Error>() {
            Some(Error::Config(message)) => Some(message.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_full_config() {
        let customization = parse(
            r#"
            name = "my-pi"
            os = "Raspberry Pi OS Lite"
            image = "raspios.img"
            size = "4GiB"
            timezone = "Europe/Berlin"
            hostname = { name = "pi", random-suffix = false }
            default-user = { new-username = "john", new-password = "secret" }
            ssh = { port = 1234, authorized-keys = ["ssh-ed25519 AAAA"] }
            wifi = { wpa-supplicant = "network={}", auto-reconnect = true, power-save-mode = false }
            samba = { home-share = true, root-share = "read-write" }
            usb-gadgets = [{ kind = "ethernet", host-as-default-gateway = true }]
            bluetooth-pan = { device-address = "10.10.20.1/29" }
            tweaks = { apt-retries = 10 }
            setup = [{ name = "update", commands = ["sudo apt-get update"] }]
            first-boot = [{ name = "finish", script = "echo done" }]
            "#,
        )
        .unwrap();

        assert_eq!(customization.name, "my-pi");
        assert_eq!(customization.os.name, "raspberry-pi-os-lite");
        assert_eq!(customization.image, Some(PathBuf::from("/configs/raspios.img")));
        assert_eq!(
            names(&customization),
            vec![
                "Increase Disk Space to 4 GiB",
                "Set Hostname to pi",
                "Change Time Zone to Europe/Berlin",
                "Copy wpa_supplicant.conf",
                "Enable Wifi Auto-Reconnect",
                "Disable Wifi Power-Save Mode",
                "Change Username pi to john",
                "Change Password of john",
                "Enable SSH",
                "Change SSH Port to 1234",
                "Add 1 SSH Key(s) for john",
                "Configure CIFS/SMB/Samba",
                "Configure USB Ethernet Gadget at 10.55.0.1/29",
                "Configure Bluetooth PAN at 10.10.20.1/29",
                "Set APT Retries to 10",
                "Run update",
                "Add First Boot Script(s): finish",
            ]
        );
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = parse("os = \"dietpi\"\ncolour = \"blue\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("colour"));
    }

    #[test]
    fn test_os_is_required_and_known() {
        let missing = parse("name = \"x\"\n").unwrap_err();
        assert_eq!(config_error(&missing).as_deref(), Some("missing 'os'"));

        let unknown = parse("os = \"windows\"\n").unwrap_err();
        assert!(config_error(&unknown).unwrap().starts_with("'windows' is not supported"));
    }

    #[test]
    fn test_invalid_values() {
        let size = parse("os = \"dietpi\"\nsize = \"huge\"\n").unwrap_err();
        assert_eq!(config_error(&size).as_deref(), Some("'huge' is not a valid size"));

        let samba = parse("os = \"dietpi\"\nsamba = { home-share = true }\n").unwrap_err();
        assert_eq!(config_error(&samba).as_deref(), Some("samba requires a password"));

        let setup =
            parse("os = \"dietpi\"\nsetup = [{ name = \"noop\", commands = [\"\"] }]\n").unwrap_err();
        assert!(matches!(setup.downcast_ref::<Error>(), Some(Error::EmptyScript(_))));
    }

    #[test]
    fn test_file_sources_resolve_against_config_dir() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("motd"), "hello").unwrap();
        fs::write(
            temp.path().join("pi.toml"),
            "os = \"dietpi\"\nfiles = [{ source = \"motd\", target = \"/etc/motd\" }]\n",
        )
        .unwrap();
        let customization = load_customization(&temp.path().join("pi.toml")).unwrap();
        assert_eq!(customization.name, "pi");
        assert_eq!(names(&customization), vec!["Copy File to /etc/motd"]);

        fs::write(
            temp.path().join("bad.toml"),
            "os = \"dietpi\"\nfiles = [{ source = \"nope\", target = \"/etc/motd\" }]\n",
        )
        .unwrap();
        let err = load_customization(&temp.path().join("bad.toml")).unwrap_err();
        assert!(config_error(&err).unwrap().ends_with("nope' does not exist"));
    }

    #[test]
    fn test_booting_patches_share_one_boot() {
        let customization = parse(
            r#"
            os = "raspberry-pi-os-lite"
            timezone = "UTC"
            wifi = { auto-reconnect = true }
            setup = [{ name = "a", commands = ["ls"] }, { name = "b", commands = ["ls"] }]
            "#,
        )
        .unwrap();
        let image = OperatingSystemImage::new(Arc::clone(&customization.os), "/tmp/raspios.img");
        let composed = compose_boots(customization.patches, &image);
        let names: Vec<String> = composed.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["Change Time Zone to UTC", "Enable Wifi Auto-Reconnect + Run a + Run b"]
        );
        assert_eq!(composed[1].phased(&image).boot_programs().len(), 2);
    }

    #[test]
    fn test_first_boot_scripts_follow_the_verification_boot() {
        let customization = parse(
            r#"
            os = "raspberry-pi-os-lite"
            default-user = { new-password = "secret" }
            samba = { home-share = true }
            first-boot = [{ name = "finish", script = "echo done" }]
            timezone = "UTC"
            "#,
        )
        .unwrap();
        let image = OperatingSystemImage::new(Arc::clone(&customization.os), "/tmp/raspios.img");
        let composed = compose_boots(customization.patches, &image);
        let order: Vec<(String, bool)> = composed
            .iter()
            .map(|p| (p.name(), p.phased(&image).needs_boot()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Change Time Zone to UTC".to_string(), false),
                ("Change Password of pi".to_string(), false),
                ("Configure CIFS/SMB/Samba".to_string(), true),
                ("Add First Boot Script(s): finish".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("img-customizer/config.toml"));
        }
    }
}
