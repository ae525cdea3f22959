use std::fs;

use serde::Deserialize;

use super::ensure_line;
use crate::libguestfs::VirtCustomization;
use crate::os::{DiskPath, OperatingSystemImage};
use crate::patch::{FileOperation, Patch, PhasedPatch};

const CONFIG_TXT: &str = "/boot/config.txt";
const CMDLINE_TXT: &str = "/boot/cmdline.txt";
const USB0_DNSMASQ: &str = "/etc/dnsmasq.d/usb0";
const USB0_NETWORK: &str = "/etc/network/interfaces.d/usb0";
const DHCP_SCRIPT: &str = "/usr/local/sbin/usb0-dhcp-script";

/// What the device offers to the USB host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GadgetKind {
    Ethernet,
    Serial,
}

impl GadgetKind {
    fn module(self) -> &'static str {
        match self {
            GadgetKind::Ethernet => "g_ether",
            GadgetKind::Serial => "g_serial",
        }
    }
}

/// Turns the USB OTG port into an ethernet or serial gadget.
#[derive(Debug, Clone)]
pub struct UsbGadgetPatch {
    pub kind: GadgetKind,
    /// Address of the device on `usb0`, with prefix length.
    pub device_address: String,
    pub dhcp_start: String,
    pub dhcp_end: String,
    /// Route through the attached host, e.g. to share its internet access.
    pub host_as_default_gateway: bool,
}

impl UsbGadgetPatch {
    pub fn new(kind: GadgetKind) -> Self {
        Self {
            kind,
            device_address: "10.55.0.1/29".to_string(),
            dhcp_start: "10.55.0.2".to_string(),
            dhcp_end: "10.55.0.6".to_string(),
            host_as_default_gateway: false,
        }
    }

    pub fn host_as_default_gateway(mut self, enabled: bool) -> Self {
        self.host_as_default_gateway = enabled;
        self
    }

    fn dnsmasq_config(&self) -> String {
        let mut config = format!(
            "dhcp-authoritative\n\
             dhcp-rapid-commit\n\
             no-ping\n\
             interface=usb0\n\
             dhcp-range={},{},1h\n\
             dhcp-option=3\n",
            self.dhcp_start, self.dhcp_end
        );
        if self.host_as_default_gateway {
            config.push_str(&format!("dhcp-script={}\n", DHCP_SCRIPT));
        }
        config.push_str("leasefile-ro\n");
        config
    }

    fn network_config(&self) -> String {
        format!(
            "auto usb0\n\
             allow-hotplug usb0\n\
             iface usb0 inet static\n  address {}\n",
            self.device_address
        )
    }
}

const DHCP_SCRIPT_CONTENT: &str = r#"#!/bin/bash
op="${1:-op}"
ip="${3:-ip}"
if [[ $op == "add" ]] || [[ $op == "old" ]]; then
    route add default gw $ip usb0
fi
"#;

impl Patch for UsbGadgetPatch {
    fn name(&self) -> String {
        match self.kind {
            GadgetKind::Ethernet => format!("Configure USB Ethernet Gadget at {}", self.device_address),
            GadgetKind::Serial => "Configure USB Serial Gadget".to_string(),
        }
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        let module = self.kind.module();
        let mut builder = PhasedPatch::builder(&self.name())
            .file_operation(FileOperation::edit(CONFIG_TXT, "enable dwc2 overlay", |path| {
                let text = fs::read_to_string(path)?;
                fs::write(path, ensure_line(&text, "dtoverlay=dwc2"))?;
                Ok(())
            }))
            .file_operation(FileOperation::edit(
                CMDLINE_TXT,
                &format!("load dwc2 and {}", module),
                move |path| {
                    let text = fs::read_to_string(path)?;
                    fs::write(path, add_modules_load(&text, &["dwc2", module]))?;
                    Ok(())
                },
            ));

        match self.kind {
            GadgetKind::Ethernet => {
                builder = builder
                    .customize_disk(VirtCustomization::FirstBootInstall(vec!["dnsmasq".to_string()]))
                    .customize_disk(VirtCustomization::Mkdir(DiskPath::new("/etc/dnsmasq.d")))
                    .customize_disk(VirtCustomization::Write {
                        file: DiskPath::new(USB0_DNSMASQ),
                        content: self.dnsmasq_config(),
                    })
                    .customize_disk(VirtCustomization::Mkdir(DiskPath::new("/etc/network/interfaces.d")))
                    .customize_disk(VirtCustomization::Write {
                        file: DiskPath::new(USB0_NETWORK),
                        content: self.network_config(),
                    });
                if self.host_as_default_gateway {
                    builder = builder
                        .customize_disk(VirtCustomization::Write {
                            file: DiskPath::new(DHCP_SCRIPT),
                            content: DHCP_SCRIPT_CONTENT.to_string(),
                        })
                        .customize_disk(VirtCustomization::Chmod {
                            mode: "0755".to_string(),
                            file: DiskPath::new(DHCP_SCRIPT),
                        });
                }
            }
            GadgetKind::Serial => {
                builder = builder.customize_disk(VirtCustomization::Link {
                    target: DiskPath::new("/lib/systemd/system/getty@.service"),
                    link: DiskPath::new("/etc/systemd/system/getty.target.wants/getty@ttyGS0.service"),
                });
            }
        }
        builder.build()
    }
}

/// Adds `modules` to the `modules-load=` option of a kernel command line,
/// inserting the option after `rootwait` if it is missing.
pub fn add_modules_load(cmdline: &str, modules: &[&str]) -> String {
    let mut tokens: Vec<String> = cmdline.split_whitespace().map(str::to_string).collect();
    match tokens.iter().position(|t| t.starts_with("modules-load=")) {
        Some(index) => {
            let mut loaded: Vec<String> = tokens[index]["modules-load=".len()..]
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            for module in modules {
                if !loaded.iter().any(|m| m == module) {
                    loaded.push(module.to_string());
                }
            }
            tokens[index] = format!("modules-load={}", loaded.join(","));
        }
        None => {
            let option = format!("modules-load={}", modules.join(","));
            let at = tokens
                .iter()
                .position(|t| t == "rootwait")
                .map_or(tokens.len(), |i| i + 1);
            tokens.insert(at, option);
        }
    }
    let mut line = tokens.join(" ");
    line.push('\n');
    line
}
