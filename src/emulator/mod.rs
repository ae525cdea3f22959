//! Emulator command construction and the boot driver.
//!
//! The default emulator is the dockerpi container, which boots a Raspberry
//! Pi image mounted at `/sdcard/filesystem.img` and exposes its serial
//! console on stdio. Any other program can be used as long as it speaks the
//! console on stdin/stdout.

mod boot;

pub use boot::{boot, drive, ConsoleEvent};

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

use crate::os::OperatingSystemImage;
use crate::program::{Program, Timing};

pub const DOCKER_PI_IMAGE: &str = "lukechilds/dockerpi:vm";
pub const DOCKER_PI_MOUNT: &str = "/sdcard/filesystem.img";
/// Placeholder in custom emulator arguments, replaced by the image path.
pub const IMAGE_PLACEHOLDER: &str = "{image}";

#[derive(Debug, Clone)]
enum Kind {
    DockerPi,
    Custom { program: String, args: Vec<String> },
}

/// Builder for emulator commands.
#[derive(Debug, Clone)]
pub struct EmulatorBuilder {
    kind: Kind,
    container_name: Option<String>,
}

impl Default for EmulatorBuilder {
    fn default() -> Self {
        Self::docker_pi()
    }
}

impl EmulatorBuilder {
    pub fn docker_pi() -> Self {
        Self {
            kind: Kind::DockerPi,
            container_name: None,
        }
    }

    pub fn custom(program: &str, args: &[String]) -> Self {
        Self {
            kind: Kind::Custom {
                program: program.to_string(),
                args: args.to_vec(),
            },
            container_name: None,
        }
    }

    pub fn container_name(mut self, name: &str) -> Self {
        self.container_name = Some(name.to_string());
        self
    }

    /// The executable that is started.
    pub fn program(&self) -> &str {
        match &self.kind {
            Kind::DockerPi => "docker",
            Kind::Custom { program, .. } => program,
        }
    }

    pub fn build(&self, image: &Path) -> Command {
        let image = absolute(image);
        match &self.kind {
            Kind::DockerPi => {
                let mut cmd = Command::new("docker");
                cmd.args(["run", "--rm", "-i"]);
                if let Some(name) = &self.container_name {
                    cmd.args(["--name", name]);
                }
                cmd.args([
                    "-v",
                    &format!("{}:{}", image.display(), DOCKER_PI_MOUNT),
                    DOCKER_PI_IMAGE,
                ]);
                cmd
            }
            Kind::Custom { program, args } => {
                let mut cmd = Command::new(program);
                let image = image.display().to_string();
                cmd.args(args.iter().map(|arg| arg.replace(IMAGE_PLACEHOLDER, &image)));
                cmd
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Boots an image and runs programs on its console.
pub trait BootDriver {
    fn boot(&self, image: &OperatingSystemImage, programs: Vec<Program>) -> anyhow::Result<()>;
}

/// Boot driver backed by an emulator subprocess.
#[derive(Debug, Clone)]
pub struct Emulator {
    pub command: EmulatorBuilder,
    /// Prepend the login program for the image's current credentials.
    pub auto_login: bool,
    /// Append the shutdown program.
    pub auto_shutdown: bool,
    pub timing: Timing,
    /// Quiet time after which a prompt without newline is treated as a line.
    pub idle_flush: Duration,
}

impl Default for Emulator {
    fn default() -> Self {
        Self {
            command: EmulatorBuilder::default(),
            auto_login: true,
            auto_shutdown: true,
            timing: Timing::default(),
            idle_flush: Duration::from_millis(250),
        }
    }
}

impl Emulator {
    pub fn new(command: EmulatorBuilder) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    pub fn run(
        &self,
        image: &OperatingSystemImage,
        programs: Vec<Program>,
    ) -> anyhow::Result<ExitStatus> {
        boot(image, programs, self)
    }
}

impl BootDriver for Emulator {
    fn boot(&self, image: &OperatingSystemImage, programs: Vec<Program>) -> anyhow::Result<()> {
        let status = self.run(image, programs)?;
        tracing::info!("{} exited with {}", image.file_name(), status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_docker_pi_command() {
        let cmd = EmulatorBuilder::docker_pi()
            .container_name("raspios-boot")
            .build(Path::new("/images/raspios.img"));
        assert_eq!(cmd.get_program(), "docker");
        assert_eq!(
            args(&cmd),
            vec![
                "run",
                "--rm",
                "-i",
                "--name",
                "raspios-boot",
                "-v",
                "/images/raspios.img:/sdcard/filesystem.img",
                "lukechilds/dockerpi:vm",
            ]
        );
    }

    #[test]
    fn test_custom_command_substitutes_image() {
        let cmd = EmulatorBuilder::custom(
            "qemu-system-arm",
            &["-drive".to_string(), "file={image},format=raw".to_string()],
        )
        .build(Path::new("/images/raspios.img"));
        assert_eq!(cmd.get_program(), "qemu-system-arm");
        assert_eq!(args(&cmd), vec!["-drive", "file=/images/raspios.img,format=raw"]);
    }
}
