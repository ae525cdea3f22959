//! Patches and their phased execution.
//!
//! A [`Patch`] turns an image into a [`PhasedPatch`]: ordered operations in
//! fixed phases. Phases always run in this order:
//!
//! 1. disk preparations (host side, e.g. growing the image file)
//! 2. virt-customize operations
//! 3. guestfish disk operations
//! 4. file operations through the exchange directory
//! 5. image updates, only if every earlier phase succeeded
//! 6. an optional boot running console programs
//!
//! Within a phase, operations keep their registration order.
//! [`CompositePatch`] merges several patches phase by phase so that they
//! share one boot.

mod composite;
mod executor;
pub mod file_ops;

pub use composite::CompositePatch;
pub use executor::{apply_each, apply_patches, PatchOutcome};
pub use file_ops::FileOperation;

use std::fmt;

use crate::libguestfs::{GuestfishCommand, VirtCustomization};
use crate::os::OperatingSystemImage;
use crate::program::Program;

/// A change to an image, described as phased operations.
pub trait Patch {
    fn name(&self) -> String;

    /// Operations applying this patch to `image` in its current state.
    fn phased(&self, image: &OperatingSystemImage) -> PhasedPatch;

    /// Whether this patch only stages work for the first real start of the
    /// image. Such patches are applied after any verification boot.
    fn defers_to_first_boot(&self) -> bool {
        false
    }
}

impl<P: Patch + ?Sized> Patch for Box<P> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn phased(&self, image: &OperatingSystemImage) -> PhasedPatch {
        (**self).phased(image)
    }

    fn defers_to_first_boot(&self) -> bool {
        (**self).defers_to_first_boot()
    }
}

type Preparation = Box<dyn FnOnce(&mut OperatingSystemImage) -> anyhow::Result<()> + Send>;

/// A host side step on the image file or its in-memory state, such as
/// growing the file or recording new credentials.
pub struct DiskPreparation {
    description: String,
    run: Preparation,
}

impl DiskPreparation {
    pub fn new<F>(description: &str, run: F) -> Self
    where
        F: FnOnce(&mut OperatingSystemImage) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            description: description.to_string(),
            run: Box::new(run),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn run(self, image: &mut OperatingSystemImage) -> anyhow::Result<()> {
        (self.run)(image)
    }
}

impl fmt::Debug for DiskPreparation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiskPreparation({:?})", self.description)
    }
}

/// Operations of one or more patches, grouped by phase.
#[derive(Debug)]
pub struct PhasedPatch {
    name: String,
    disk_preparations: Vec<DiskPreparation>,
    virt_customizations: Vec<VirtCustomization>,
    disk_operations: Vec<GuestfishCommand>,
    file_operations: Vec<FileOperation>,
    image_updates: Vec<DiskPreparation>,
    os_boot: bool,
    boot_programs: Vec<Program>,
}

impl PhasedPatch {
    pub fn builder(name: &str) -> PhasedPatchBuilder {
        PhasedPatchBuilder {
            patch: Self::empty(name),
        }
    }

    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            disk_preparations: Vec::new(),
            virt_customizations: Vec::new(),
            disk_operations: Vec::new(),
            file_operations: Vec::new(),
            image_updates: Vec::new(),
            os_boot: false,
            boot_programs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn disk_preparations(&self) -> &[DiskPreparation] {
        &self.disk_preparations
    }

    pub fn virt_customizations(&self) -> &[VirtCustomization] {
        &self.virt_customizations
    }

    pub fn disk_operations(&self) -> &[GuestfishCommand] {
        &self.disk_operations
    }

    pub fn file_operations(&self) -> &[FileOperation] {
        &self.file_operations
    }

    pub fn image_updates(&self) -> &[DiskPreparation] {
        &self.image_updates
    }

    pub fn os_boot(&self) -> bool {
        self.os_boot
    }

    pub fn boot_programs(&self) -> &[Program] {
        &self.boot_programs
    }

    /// Whether booting is needed to apply this patch.
    pub fn needs_boot(&self) -> bool {
        self.os_boot || !self.boot_programs.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.disk_preparations.len()
            + self.virt_customizations.len()
            + self.disk_operations.len()
            + self.file_operations.len()
            + self.image_updates.len()
            + self.boot_programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operation_count() == 0 && !self.os_boot
    }

    #[cfg(test)]
    pub(crate) fn into_preparations(self) -> Vec<DiskPreparation> {
        self.disk_preparations
    }

    #[cfg(test)]
    pub(crate) fn into_image_updates(self) -> Vec<DiskPreparation> {
        self.image_updates
    }

    /// Appends each phase of `other` to the same phase of `self`.
    pub fn merge(mut self, other: PhasedPatch) -> PhasedPatch {
        self.name = match (self.name.is_empty(), other.name.is_empty()) {
            (true, _) => other.name,
            (false, true) => self.name,
            (false, false) => format!("{} + {}", self.name, other.name),
        };
        self.disk_preparations.extend(other.disk_preparations);
        self.virt_customizations.extend(other.virt_customizations);
        self.disk_operations.extend(other.disk_operations);
        self.file_operations.extend(other.file_operations);
        self.image_updates.extend(other.image_updates);
        self.os_boot |= other.os_boot;
        self.boot_programs.extend(other.boot_programs);
        self
    }
}

/// Builds a [`PhasedPatch`]. Every call appends to exactly one phase.
pub struct PhasedPatchBuilder {
    patch: PhasedPatch,
}

impl PhasedPatchBuilder {
    pub fn prepare_disk<F>(mut self, description: &str, run: F) -> Self
    where
        F: FnOnce(&mut OperatingSystemImage) -> anyhow::Result<()> + Send + 'static,
    {
        self.patch
            .disk_preparations
            .push(DiskPreparation::new(description, run));
        self
    }

    pub fn customize_disk(mut self, customization: VirtCustomization) -> Self {
        self.patch.virt_customizations.push(customization);
        self
    }

    pub fn disk_operation(mut self, command: GuestfishCommand) -> Self {
        self.patch.disk_operations.push(command);
        self
    }

    pub fn file_operation(mut self, operation: FileOperation) -> Self {
        self.patch.file_operations.push(operation);
        self
    }

    /// Changes the image's in-memory state once the disk phases succeeded,
    /// e.g. to log in with credentials the patch has just set.
    pub fn update_image<F>(mut self, description: &str, run: F) -> Self
    where
        F: FnOnce(&mut OperatingSystemImage) -> anyhow::Result<()> + Send + 'static,
    {
        self.patch
            .image_updates
            .push(DiskPreparation::new(description, run));
        self
    }

    /// Boot the image even without programs, e.g. to let first-boot scripts run.
    pub fn boot(mut self) -> Self {
        self.patch.os_boot = true;
        self
    }

    pub fn boot_program(mut self, program: Program) -> Self {
        self.patch.boot_programs.push(program);
        self
    }

    pub fn build(self) -> PhasedPatch {
        self.patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::DiskPath;

    #[test]
    fn test_builder_appends_to_one_phase() {
        let patch = PhasedPatch::builder("ssh")
            .disk_operation(GuestfishCommand::Touch(DiskPath::new("/boot/ssh")))
            .customize_disk(VirtCustomization::Hostname("pi".into()))
            .disk_operation(GuestfishCommand::Mkdir(DiskPath::new("/root/.ssh")))
            .build();

        assert_eq!(patch.name(), "ssh");
        assert_eq!(
            patch.disk_operations(),
            &[
                GuestfishCommand::Touch(DiskPath::new("/boot/ssh")),
                GuestfishCommand::Mkdir(DiskPath::new("/root/.ssh")),
            ]
        );
        assert_eq!(patch.virt_customizations().len(), 1);
        assert!(patch.file_operations().is_empty());
        assert!(!patch.needs_boot());
        assert_eq!(patch.operation_count(), 3);
    }

    #[test]
    fn test_empty_patch() {
        assert!(PhasedPatch::empty("noop").is_empty());
        assert!(!PhasedPatch::builder("boot").boot().build().is_empty());
    }
}
