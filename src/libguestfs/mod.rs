//! libguestfs collaborators: `virt-customize` and `guestfish`.
//!
//! Patches describe disk changes as [`VirtCustomization`] and
//! [`GuestfishCommand`] values. A [`DiskTool`] runs a batch of them against
//! an image; [`LibguestfsTool`] does so with the real binaries, either from
//! the host or from a container.

mod guestfish;
mod virt_customize;

pub use guestfish::GuestfishCommand;
pub use virt_customize::{PasswordSelector, VirtCustomization};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::os::OperatingSystemImage;

pub const LIBGUESTFS_IMAGE: &str = "bkahlert/libguestfs:latest";
const CONTAINER_SHARED: &str = "/shared";
const CONTAINER_DISK: &str = "/images/disk.img";

/// Partitions of a Raspberry Pi style image and where they are mounted.
const MOUNTS: &[(&str, &str)] = &[("/dev/sda2", "/"), ("/dev/sda1", "/boot")];

/// Applies disk level operations to an image.
pub trait DiskTool {
    fn virt_customize(
        &self,
        image: &OperatingSystemImage,
        customizations: &[VirtCustomization],
    ) -> Result<()>;

    fn guestfish(&self, image: &OperatingSystemImage, commands: &[GuestfishCommand]) -> Result<()>;
}

/// Where the libguestfs binaries run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    Native,
    Docker { image: String },
}

#[derive(Debug, Clone)]
pub struct LibguestfsTool {
    runtime: Runtime,
    trace: bool,
}

impl Default for LibguestfsTool {
    fn default() -> Self {
        Self::native()
    }
}

impl LibguestfsTool {
    pub fn native() -> Self {
        Self {
            runtime: Runtime::Native,
            trace: false,
        }
    }

    pub fn docker() -> Self {
        Self {
            runtime: Runtime::Docker {
                image: LIBGUESTFS_IMAGE.to_string(),
            },
            trace: false,
        }
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Host path as seen by the tool.
    fn map_path(&self, image: &OperatingSystemImage, path: &Path) -> String {
        match self.runtime {
            Runtime::Native => path.display().to_string(),
            Runtime::Docker { .. } => {
                if path == image.path() {
                    return CONTAINER_DISK.to_string();
                }
                match path.strip_prefix(image.exchange_directory()) {
                    Ok(relative) => Path::new(CONTAINER_SHARED)
                        .join(relative)
                        .display()
                        .to_string(),
                    Err(_) => path.display().to_string(),
                }
            }
        }
    }

    fn base_command(&self, image: &OperatingSystemImage, program: &str) -> Command {
        match &self.runtime {
            Runtime::Native => {
                let mut cmd = Command::new(program);
                if self.trace {
                    cmd.env("LIBGUESTFS_TRACE", "1").env("LIBGUESTFS_DEBUG", "1");
                }
                cmd
            }
            Runtime::Docker { image: container } => {
                let exchange = image.exchange_directory();
                let mut cmd = Command::new("docker");
                cmd.args(["run", "--rm", "-i", "-w", CONTAINER_SHARED]);
                cmd.args(["-v", &format!("{}:{}", absolute(&exchange).display(), CONTAINER_SHARED)]);
                cmd.args(["-v", &format!("{}:{}", absolute(image.path()).display(), CONTAINER_DISK)]);
                if self.trace {
                    cmd.args(["--env", "LIBGUESTFS_TRACE=1", "--env", "LIBGUESTFS_DEBUG=1"]);
                }
                cmd.args([container.as_str(), program]);
                cmd
            }
        }
    }

    pub fn virt_customize_command(
        &self,
        image: &OperatingSystemImage,
        customizations: &[VirtCustomization],
    ) -> Command {
        let mut cmd = self.base_command(image, "virt-customize");
        cmd.args(["--add", &self.map_path(image, image.path())]);
        if self.trace {
            cmd.args(["--verbose", "-x"]);
        }
        let host = |path: &Path| self.map_path(image, path);
        for customization in customizations {
            cmd.args(customization.to_args(&host));
        }
        cmd
    }

    pub fn guestfish_command(&self, image: &OperatingSystemImage) -> Command {
        let mut cmd = self.base_command(image, "guestfish");
        cmd.args(["--rw", "--add", &self.map_path(image, image.path())]);
        for (device, mount_point) in MOUNTS {
            cmd.args(["--mount", &format!("{}:{}", device, mount_point)]);
        }
        if self.trace {
            cmd.arg("-x");
        }
        cmd
    }

    /// The script fed to guestfish on stdin.
    pub fn guestfish_script(
        &self,
        image: &OperatingSystemImage,
        commands: &[GuestfishCommand],
    ) -> String {
        let host = |path: &Path| self.map_path(image, path);
        let mut lines: Vec<String> = commands.iter().flat_map(|c| c.to_script(&host)).collect();
        lines.extend(GuestfishCommand::UmountAll.to_script(&host));
        lines.extend(GuestfishCommand::Exit.to_script(&host));
        let mut script = lines.join("\n");
        script.push('\n');
        script
    }
}

impl DiskTool for LibguestfsTool {
    fn virt_customize(
        &self,
        image: &OperatingSystemImage,
        customizations: &[VirtCustomization],
    ) -> Result<()> {
        if customizations.is_empty() {
            return Ok(());
        }
        info!("virt-customize: {} operation(s) on {}", customizations.len(), image.file_name());
        let cmd = self.virt_customize_command(image, customizations);
        run(cmd, None)
    }

    fn guestfish(&self, image: &OperatingSystemImage, commands: &[GuestfishCommand]) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        info!("guestfish: {} command(s) on {}", commands.len(), image.file_name());
        let script = self.guestfish_script(image, commands);
        debug!("guestfish script:\n{}", script);
        let cmd = self.guestfish_command(image);
        run(cmd, Some(script))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn run(mut cmd: Command, stdin: Option<String>) -> Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;
    if let Some(script) = stdin {
        let mut pipe = child.stdin.take().context("Failed to open stdin")?;
        pipe.write_all(script.as_bytes())
            .with_context(|| format!("Failed to write script to {}", program))?;
    }
    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed to wait for {}", program))?;
    check_output(&program, &output)
}

fn check_output(program: &str, output: &Output) -> Result<()> {
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!("{}: {}", program, line);
    }
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
    bail!(
        "{} failed ({}):\n{}",
        program,
        output.status,
        tail.into_iter().rev().collect::<Vec<_>>().join("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{Credentials, DiskPath, OperatingSystem};
    use std::sync::Arc;

    fn image() -> OperatingSystemImage {
        let os = OperatingSystem::new("test", "Test OS", Credentials::new("pi", "raspberry"));
        OperatingSystemImage::new(Arc::new(os), "/images/raspios.img")
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_native_virt_customize_command() {
        let cmd = LibguestfsTool::native().virt_customize_command(
            &image(),
            &[
                VirtCustomization::Hostname("pi".into()),
                VirtCustomization::Touch(DiskPath::new("/boot/ssh")),
            ],
        );
        assert_eq!(cmd.get_program(), "virt-customize");
        assert_eq!(
            args(&cmd),
            vec!["--add", "/images/raspios.img", "--hostname", "pi", "--touch", "/boot/ssh"]
        );
    }

    #[test]
    fn test_docker_paths_are_mapped() {
        let image = image();
        let tool = LibguestfsTool::docker();
        let script = tool.guestfish_script(
            &image,
            &[GuestfishCommand::CopyIn {
                local: image.host_path(&DiskPath::new("/etc/hostname")),
                remote_dir: DiskPath::new("/etc"),
            }],
        );
        assert_eq!(
            script,
            "-mkdir-p /etc\ncopy-in /shared/etc/hostname /etc\numount-all\nexit\n"
        );

        let cmd = tool.guestfish_command(&image);
        assert_eq!(cmd.get_program(), "docker");
        let args = args(&cmd);
        assert!(args.contains(&"/images/raspios.img:/images/disk.img".to_string()));
        assert!(args.contains(&"/images/raspios.shared:/shared".to_string()));
        assert!(args.ends_with(&[
            "--mount".to_string(),
            "/dev/sda1:/boot".to_string()
        ]));
    }

    #[test]
    fn test_empty_batches_do_not_run() {
        let tool = LibguestfsTool {
            runtime: Runtime::Docker {
                image: "does-not-exist".into(),
            },
            trace: false,
        };
        assert!(tool.virt_customize(&image(), &[]).is_ok());
        assert!(tool.guestfish(&image(), &[]).is_ok());
    }
}
