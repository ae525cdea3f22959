//! Runs phased patches against an image.
//!
//! Execution is best effort: a failing operation is logged and collected,
//! and the remaining operations still run.

use std::fs;
use std::mem;

use anyhow::Context;
use time::OffsetDateTime;
use tracing::{error, info};

use super::{Patch, PhasedPatch};
use crate::emulator::BootDriver;
use crate::libguestfs::{DiskTool, GuestfishCommand};
use crate::os::{DiskPath, OperatingSystemImage};

/// Result of applying one patch.
#[derive(Debug)]
pub struct PatchOutcome {
    pub name: String,
    pub errors: Vec<anyhow::Error>,
    pub started: OffsetDateTime,
    pub finished: OffsetDateTime,
}

impl PatchOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

impl PhasedPatch {
    /// Applies all phases in order and returns every error that occurred.
    pub fn apply(
        mut self,
        image: &mut OperatingSystemImage,
        disk: &dyn DiskTool,
        boot: &dyn BootDriver,
    ) -> Vec<anyhow::Error> {
        let name = self.name.clone();
        let mut errors = Vec::new();
        info!("Applying {} to {}", name, image.file_name());

        let preparations = mem::take(&mut self.disk_preparations);
        if preparations.is_empty() {
            info!("{}: no disk preparations", name);
        }
        for preparation in preparations {
            let description = preparation.description().to_string();
            info!("{}: {}", name, description);
            if let Err(e) = preparation.run(image) {
                collect(&mut errors, e.context(description));
            }
        }

        if self.virt_customizations.is_empty() {
            info!("{}: no virt-customize operations", name);
        } else if let Err(e) = disk.virt_customize(image, &self.virt_customizations) {
            collect(&mut errors, e);
        }

        if self.disk_operations.is_empty() {
            info!("{}: no guestfish operations", name);
        } else if let Err(e) = disk.guestfish(image, &self.disk_operations) {
            collect(&mut errors, e);
        }

        if self.file_operations.is_empty() {
            info!("{}: no file operations", name);
        } else {
            errors.extend(self.run_file_operations(image, disk));
        }

        let updates = mem::take(&mut self.image_updates);
        if !errors.is_empty() && !updates.is_empty() {
            info!("{}: skipping {} image update(s) after errors", name, updates.len());
        } else {
            for update in updates {
                let description = update.description().to_string();
                info!("{}: {}", name, description);
                if let Err(e) = update.run(image) {
                    collect(&mut errors, e.context(description));
                }
            }
        }

        if self.needs_boot() {
            let programs = mem::take(&mut self.boot_programs);
            info!("{}: booting with {} program(s)", name, programs.len());
            if let Err(e) = boot.boot(image, programs) {
                collect(&mut errors, e.context(format!("Booting {} failed", image.file_name())));
            }
        } else {
            info!("{}: no boot", name);
        }

        errors
    }

    fn run_file_operations(
        &self,
        image: &OperatingSystemImage,
        disk: &dyn DiskTool,
    ) -> Vec<anyhow::Error> {
        let mut errors = Vec::new();
        let exchange = image.exchange_directory();
        let reset = || -> anyhow::Result<()> {
            if exchange.exists() {
                fs::remove_dir_all(&exchange)?;
            }
            fs::create_dir_all(&exchange)?;
            Ok(())
        };
        if let Err(e) = reset() {
            collect(
                &mut errors,
                e.context(format!("Failed to prepare {}", exchange.display())),
            );
            return errors;
        }

        let mut required: Vec<&DiskPath> = Vec::new();
        for path in self.file_operations.iter().filter_map(|op| op.required_from_image()) {
            if !required.contains(&path) {
                required.push(path);
            }
        }
        let copy_out: Vec<GuestfishCommand> = required
            .into_iter()
            .map(|remote| GuestfishCommand::CopyOut {
                remote: remote.clone(),
                local_dir: image.host_path(&parent_of(remote)),
            })
            .collect();
        if !copy_out.is_empty() {
            if let Err(e) = disk.guestfish(image, &copy_out) {
                collect(&mut errors, e.context("Copying files out of the image failed"));
            }
        }

        let mut changed: Vec<DiskPath> = Vec::new();
        for operation in &self.file_operations {
            match operation.run(image) {
                Ok(Some(path)) if !changed.contains(&path) => changed.push(path),
                Ok(_) => {}
                Err(e) => collect(&mut errors, e.context(format!("{:?}", operation))),
            }
        }

        let copy_in: Vec<GuestfishCommand> = changed
            .iter()
            .map(|path| GuestfishCommand::CopyIn {
                local: image.host_path(path),
                remote_dir: parent_of(path),
            })
            .collect();
        if !copy_in.is_empty() {
            if let Err(e) = disk.guestfish(image, &copy_in) {
                collect(&mut errors, e.context("Copying files into the image failed"));
            }
        }
        errors
    }
}

fn parent_of(path: &DiskPath) -> DiskPath {
    path.parent().unwrap_or_else(|| DiskPath::new("/"))
}

fn collect(errors: &mut Vec<anyhow::Error>, e: anyhow::Error) {
    error!("{:#}", e);
    errors.push(e);
}

/// Applies `patches` one after another while holding the image lock.
///
/// Each patch is phased against the image as left by the previous one, so a
/// changed password is the one the next boot logs in with.
pub fn apply_each(
    image: &mut OperatingSystemImage,
    patches: &[Box<dyn Patch>],
    disk: &dyn DiskTool,
    boot: &dyn BootDriver,
) -> anyhow::Result<Vec<PatchOutcome>> {
    let _lock = image
        .lock()
        .with_context(|| format!("Failed to lock {}", image.path().display()))?;

    let mut outcomes = Vec::new();
    for (index, patch) in patches.iter().enumerate() {
        let phased = patch.phased(image);
        if phased.is_empty() {
            info!("Skipping {}: nothing to do", patch.name());
            continue;
        }
        info!(
            "[{}/{}] {} ({} operation(s))",
            index + 1,
            patches.len(),
            phased.name(),
            phased.operation_count()
        );
        let name = phased.name().to_string();
        let started = OffsetDateTime::now_utc();
        let errors = phased.apply(image, disk, boot);
        outcomes.push(PatchOutcome {
            name,
            errors,
            started,
            finished: OffsetDateTime::now_utc(),
        });
    }
    Ok(outcomes)
}

/// Applies `patches` and returns all errors of all patches.
pub fn apply_patches(
    image: &mut OperatingSystemImage,
    patches: &[Box<dyn Patch>],
    disk: &dyn DiskTool,
    boot: &dyn BootDriver,
) -> Vec<anyhow::Error> {
    match apply_each(image, patches, disk, boot) {
        Ok(outcomes) => outcomes.into_iter().flat_map(|o| o.errors).collect(),
        Err(e) => vec![e],
    }
}
