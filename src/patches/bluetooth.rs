use crate::libguestfs::VirtCustomization;
use crate::os::{DiskPath, OperatingSystemImage};
use crate::patch::{Patch, PhasedPatch};

const BLUETOOTH_MAIN_CONF: &str = "/etc/bluetooth/main.conf";
const BLUETOOTH_SERVICE_D: &str = "/etc/systemd/system/bluetooth.service.d";
const DISABLE_SAP_CONF: &str = "/etc/systemd/system/bluetooth.service.d/01-disable-sap-plugin.conf";
const BT_PAN: &str = "/usr/local/sbin/bt-pan";
const BT_PAN_SCRIPT: &str = "/usr/local/sbin/bt-pan.service.sh";
const BT_PAN_SERVICE: &str = "/etc/systemd/system/bt-pan.service";
const BT_AGENT: &str = "/usr/local/sbin/blueagent5";
const BT_AGENT_SERVICE: &str = "/etc/systemd/system/bt-agent.service";
const PAN0_DNSMASQ: &str = "/etc/dnsmasq.d/pan0";

const BT_PAN_URL: &str = "https://github.com/mk-fg/fgtk/raw/master/bt-pan";
const BT_AGENT_URL: &str =
    "https://github.com/opustecnica/public/raw/master/raspberrypi/PAN/blueagent5.py";

const DISABLE_SAP_CONTENT: &str = "[Service]
ExecStart=
ExecStart=/usr/lib/bluetooth/bluetoothd --noplugin=sap
";

/// Offers a Bluetooth Personal Area Network on a `pan0` bridge and hands
/// out addresses to paired devices.
///
/// The SIM access profile is disabled, the adapter stays discoverable and
/// pairable, and `bt-pan` plus an auto-accepting agent run as services.
/// Packages and helper scripts are installed on first boot.
#[derive(Debug, Clone)]
pub struct BluetoothPersonalAreaNetworkPatch {
    /// Address of the device on `pan0`, with prefix length.
    pub device_address: String,
    pub dhcp_start: String,
    pub dhcp_end: String,
}

impl Default for BluetoothPersonalAreaNetworkPatch {
    fn default() -> Self {
        Self {
            device_address: "10.10.10.17/29".to_string(),
            dhcp_start: "10.10.10.18".to_string(),
            dhcp_end: "10.10.10.22".to_string(),
        }
    }
}

impl BluetoothPersonalAreaNetworkPatch {
    fn pan_script(&self) -> String {
        format!(
            "#!/bin/sh\n\
             modprobe bnep\n\
             hciconfig hci0 lm master,accept\n\
             brctl addbr pan0\n\
             brctl setfd pan0 0\n\
             brctl stp pan0 off\n\
             ip addr add {} dev pan0\n\
             ip link set pan0 up\n\
             exec {} --debug server pan0\n",
            self.device_address, BT_PAN
        )
    }

    fn dnsmasq_config(&self) -> String {
        format!(
            "dhcp-authoritative\n\
             dhcp-rapid-commit\n\
             no-ping\n\
             interface=pan0\n\
             dhcp-range={},{},1h\n\
             dhcp-option=3\n",
            self.dhcp_start, self.dhcp_end
        )
    }
}

fn service_unit(description: &str, after: &str, exec: &str) -> String {
    let mut unit = String::from("[Unit]\n");
    if !description.is_empty() {
        unit.push_str(&format!("Description={}\n", description));
    }
    unit.push_str(&format!("After={}\n", after));
    if after == "bluetooth.service" {
        unit.push_str("PartOf=bluetooth.service\n");
    } else {
        unit.push_str(&format!("Requires={}\n", after));
    }
    unit.push_str(&format!(
        "\n[Service]\nExecStart={}\n\n[Install]\nWantedBy=bluetooth.target\n",
        exec
    ));
    unit
}

fn download(url: &str, target: &str, service: &str) -> String {
    format!(
        "wget -O {target} {url} && chmod 755 {target} && systemctl enable {service}",
        target = target,
        url = url,
        service = service
    )
}

impl Patch for BluetoothPersonalAreaNetworkPatch {
    fn name(&self) -> String {
        format!("Configure Bluetooth PAN at {}", self.device_address)
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        let write = |file: &str, content: String| VirtCustomization::Write {
            file: DiskPath::new(file),
            content,
        };
        let chmod = |mode: &str, file: &str| VirtCustomization::Chmod {
            mode: mode.to_string(),
            file: DiskPath::new(file),
        };

        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::Mkdir(DiskPath::new(BLUETOOTH_SERVICE_D)))
            .customize_disk(write(DISABLE_SAP_CONF, DISABLE_SAP_CONTENT.to_string()))
            .customize_disk(chmod("0644", DISABLE_SAP_CONF))
            .customize_disk(VirtCustomization::FirstBootInstall(
                ["bridge-utils", "bluez", "python-dbus", "python-gobject"]
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            ))
            .customize_disk(VirtCustomization::FirstBootCommand(format!(
                "sed -i '/DiscoverableTimeout/s/^.*$/DiscoverableTimeout = 0/' {}",
                BLUETOOTH_MAIN_CONF
            )))
            .customize_disk(VirtCustomization::FirstBootCommand(format!(
                "sed -i '/PairableTimeout/s/^.*$/PairableTimeout = 0/' {}",
                BLUETOOTH_MAIN_CONF
            )))
            .customize_disk(write(BT_PAN_SCRIPT, self.pan_script()))
            .customize_disk(chmod("0755", BT_PAN_SCRIPT))
            .customize_disk(write(
                BT_PAN_SERVICE,
                service_unit("", "bluetooth.service", BT_PAN_SCRIPT),
            ))
            .customize_disk(chmod("0644", BT_PAN_SERVICE))
            .customize_disk(VirtCustomization::FirstBootCommand(download(
                BT_PAN_URL, BT_PAN, "bt-pan",
            )))
            .customize_disk(write(
                BT_AGENT_SERVICE,
                service_unit("Bluetooth Agent", "bt-pan.service", BT_AGENT),
            ))
            .customize_disk(chmod("0644", BT_AGENT_SERVICE))
            .customize_disk(VirtCustomization::FirstBootCommand(download(
                BT_AGENT_URL,
                BT_AGENT,
                "bt-agent",
            )))
            .customize_disk(VirtCustomization::FirstBootInstall(vec!["dnsmasq".to_string()]))
            .customize_disk(VirtCustomization::Mkdir(DiskPath::new("/etc/dnsmasq.d")))
            .customize_disk(write(PAN0_DNSMASQ, self.dnsmasq_config()))
            .customize_disk(VirtCustomization::FirstBootCommand(
                "systemctl restart dnsmasq".to_string(),
            ))
            .build()
    }
}
