use crate::libguestfs::{GuestfishCommand, VirtCustomization};
use crate::os::{DiskPath, OperatingSystemImage};
use crate::patch::{Patch, PhasedPatch};

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";

/// Enables the SSH server through the `/boot/ssh` marker file.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshEnablementPatch;

impl Patch for SshEnablementPatch {
    fn name(&self) -> String {
        "Enable SSH".to_string()
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        PhasedPatch::builder(&self.name())
            .disk_operation(GuestfishCommand::Touch(DiskPath::new("/boot/ssh")))
            .build()
    }
}

/// Moves the SSH server to another port.
#[derive(Debug, Clone, Copy)]
pub struct SshPortPatch {
    port: u16,
}

impl SshPortPatch {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Patch for SshPortPatch {
    fn name(&self) -> String {
        format!("Change SSH Port to {}", self.port)
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::Edit {
                file: DiskPath::new(SSHD_CONFIG),
                expression: format!("s/^#?Port\\s.*$/Port {}/", self.port),
            })
            .build()
    }
}

/// Authorizes public keys for a user.
#[derive(Debug, Clone)]
pub struct SshAuthorizationPatch {
    username: String,
    keys: Vec<String>,
}

impl SshAuthorizationPatch {
    pub fn new(username: &str, keys: Vec<String>) -> Self {
        Self {
            username: username.to_string(),
            keys,
        }
    }
}

impl Patch for SshAuthorizationPatch {
    fn name(&self) -> String {
        format!("Add {} SSH Key(s) for {}", self.keys.len(), self.username)
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        self.keys
            .iter()
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .fold(PhasedPatch::builder(&self.name()), |builder, key| {
                builder.customize_disk(VirtCustomization::SshInject {
                    user: self.username.clone(),
                    key: key.to_string(),
                })
            })
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patches::testing::image;

    #[test]
    fn test_ssh_enablement_touches_marker() {
        let phased = SshEnablementPatch.phased(&image());
        assert_eq!(
            phased.disk_operations(),
            &[GuestfishCommand::Touch(DiskPath::new("/boot/ssh"))]
        );
    }

    #[test]
    fn test_ssh_port_edits_config() {
        let phased = SshPortPatch::new(1234).phased(&image());
        let args = phased.virt_customizations()[0].to_args(&|p: &std::path::Path| p.display().to_string());
        assert_eq!(args[0], "--edit");
        assert_eq!(args[1], "/etc/ssh/sshd_config:s/^#?Port\\s.*$/Port 1234/");
    }

    #[test]
    fn test_ssh_authorization_injects_each_key() {
        let patch = SshAuthorizationPatch::new(
            "john",
            vec!["ssh-ed25519 AAAA one".into(), "  ".into(), "ssh-rsa BBBB two\n".into()],
        );
        let phased = patch.phased(&image());
        assert_eq!(
            phased.virt_customizations(),
            &[
                VirtCustomization::SshInject {
                    user: "john".into(),
                    key: "ssh-ed25519 AAAA one".into(),
                },
                VirtCustomization::SshInject {
                    user: "john".into(),
                    key: "ssh-rsa BBBB two".into(),
                },
            ]
        );
    }
}
