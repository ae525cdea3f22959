use serde::Deserialize;

use crate::libguestfs::VirtCustomization;
use crate::os::{DiskPath, OperatingSystemImage};
use crate::patch::{Patch, PhasedPatch};

const SAMBA_CONF: &str = "/etc/samba/smb.conf";

/// Whether and how `/` is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootShare {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

/// Installs Samba on first boot and lets `username` authenticate with
/// `password`.
#[derive(Debug, Clone)]
pub struct SambaPatch {
    username: String,
    password: String,
    home_share: bool,
    root_share: RootShare,
}

impl SambaPatch {
    pub fn new(username: &str, password: &str, home_share: bool, root_share: RootShare) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            home_share,
            root_share,
        }
    }

    pub fn config(&self) -> String {
        let mut config = String::from(
            "[global]\n\
             workgroup = smb\n\
             security = user\n\
             map to guest = never\n\n",
        );
        if self.home_share {
            config.push_str(&format!(
                "[home]\n\
                 comment = Home of {user}\n\
                 path = /home/{user}\n\
                 writeable=Yes\n\
                 create mask=0744\n\
                 directory mask=0744\n\
                 public=no\n\
                 guest ok=no\n\n",
                user = self.username
            ));
        }
        match self.root_share {
            RootShare::None => {}
            RootShare::ReadOnly => config.push_str(
                "[/]\n\
                 path = /\n\
                 writeable=No\n\
                 public=no\n\
                 guest ok=no\n",
            ),
            RootShare::ReadWrite => config.push_str(
                "[/]\n\
                 path = /\n\
                 writeable=Yes\n\
                 create mask=0740\n\
                 directory mask=0740\n\
                 public=no\n\
                 guest ok=no\n",
            ),
        }
        config
    }
}

impl Patch for SambaPatch {
    fn name(&self) -> String {
        "Configure CIFS/SMB/Samba".to_string()
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        let password = shell_quote(&self.password);
        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::Mkdir(DiskPath::new("/etc/samba")))
            .customize_disk(VirtCustomization::Write {
                file: DiskPath::new(SAMBA_CONF),
                content: self.config(),
            })
            .customize_disk(VirtCustomization::FirstBootInstall(vec!["samba".to_string()]))
            .customize_disk(VirtCustomization::FirstBootCommand(format!(
                "(echo {pw}; echo {pw}) | smbpasswd -s -a {user}",
                pw = password,
                user = shell_quote(&self.username)
            )))
            .boot()
            .build()
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
