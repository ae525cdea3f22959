//! Host tool checks.
//!
//! Run before any patch so a missing `guestfish` fails fast instead of
//! halfway through a customization.

use anyhow::{bail, Result};

use crate::libguestfs::Runtime;

/// Tools needed when libguestfs runs on the host. Each tuple is
/// (command_name, package_name).
pub const NATIVE_TOOLS: &[(&str, &str)] = &[
    ("virt-customize", "libguestfs-tools"),
    ("guestfish", "libguestfs-tools"),
];

/// Tools needed when libguestfs and the emulator run in containers.
pub const DOCKER_TOOLS: &[(&str, &str)] = &[("docker", "docker.io")];

pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Checks that every tool is on `PATH`; the error lists all missing ones.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }
    Ok(())
}

/// Tools for a customization using `runtime` for libguestfs and an
/// emulator started through `emulator_program`.
pub fn check_host_tools(runtime: &Runtime, emulator_program: &str) -> Result<()> {
    let mut tools: Vec<(&str, &str)> = match runtime {
        Runtime::Native => NATIVE_TOOLS.to_vec(),
        Runtime::Docker { .. } => DOCKER_TOOLS.to_vec(),
    };
    if !tools.iter().any(|(tool, _)| *tool == emulator_program) {
        tools.push((emulator_program, emulator_program));
    }
    check_required_tools(&tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_missing_tools_are_listed() {
        let err = check_required_tools(&[
            ("sh", "dash"),
            ("nonexistent_command_xyz", "fake-package"),
            ("nonexistent_command_abc", "other-package"),
        ])
        .unwrap_err()
        .to_string();
        assert!(err.contains("nonexistent_command_xyz (install: fake-package)"));
        assert!(err.contains("nonexistent_command_abc (install: other-package)"));
        assert!(!err.contains("dash"));
    }

    #[test]
    fn test_emulator_program_is_checked() {
        let err = check_host_tools(
            &Runtime::Docker {
                image: "img".into(),
            },
            "qemu-system-nonexistent",
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("qemu-system-nonexistent"));
    }
}
