//! Customizes disk images of single-board computer operating systems.
//!
//! An image is changed by [patches](patch::Patch). Each patch describes its
//! work as phased operations: host side disk preparation, `virt-customize`
//! and `guestfish` batches, file operations through an exchange directory,
//! updates of the image's in-memory state once those succeeded, and finally
//! an optional boot in an emulator whose console is driven by
//! [programs](program::Program), small state machines that log in, run
//! commands and shut the machine down.
//!
//! # Architecture
//!
//! ```text
//! config ──> patches ──> patch::apply_each
//!                             │
//!                             ├── libguestfs (virt-customize, guestfish)
//!                             ├── patch::file_ops (exchange directory)
//!                             └── emulator::boot
//!                                     │
//!                                     ├── console (OperatingSystemProcess)
//!                                     ├── program (login, scripts, shutdown)
//!                                     └── watchdog
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use img_customizer::emulator::Emulator;
//! use img_customizer::libguestfs::LibguestfsTool;
//! use img_customizer::os::{catalog, OperatingSystemImage};
//! use img_customizer::patch::{apply_patches, Patch};
//! use img_customizer::patches::{SshEnablementPatch, TimeZonePatch};
//!
//! let os = catalog::find("raspberry-pi-os-lite").unwrap();
//! let mut image = OperatingSystemImage::new(os, "raspios.img");
//! let patches: Vec<Box<dyn Patch>> = vec![
//!     Box::new(SshEnablementPatch),
//!     Box::new(TimeZonePatch::new("Europe/Berlin")),
//! ];
//! let errors = apply_patches(&mut image, &patches, &LibguestfsTool::native(), &Emulator::default());
//! ```

pub mod config;
pub mod console;
pub mod emulator;
pub mod error;
pub mod libguestfs;
pub mod logging;
pub mod os;
pub mod patch;
pub mod patches;
pub mod preflight;
pub mod program;
pub mod report;
pub mod watchdog;

pub use error::Error;
pub use os::{Credentials, OperatingSystem, OperatingSystemImage};
pub use patch::{Patch, PhasedPatch};
