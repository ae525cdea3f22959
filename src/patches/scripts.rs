use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::error::{Error, Result};
use crate::libguestfs::VirtCustomization;
use crate::os::OperatingSystemImage;
use crate::patch::{Patch, PhasedPatch};
use crate::program::Program;

/// Host directory, inside the exchange directory, holding first-boot scripts.
const FIRST_BOOT_DIRECTORY: &str = ".firstboot";

/// A named shell script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellScript {
    pub name: String,
    pub content: String,
}

impl ShellScript {
    pub fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    /// Script file content: shebang, a banner echo, then the commands.
    pub fn render(&self) -> String {
        format!(
            "#!/bin/sh\necho '{}'\n{}\n",
            self.name.replace('\'', ""),
            self.content.trim()
        )
    }

    fn file_name(&self, index: usize) -> String {
        let slug: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("{:02}-{}.sh", index, slug.trim_matches('-'))
    }
}

/// Runs scripts once, in order, when the customized image first boots.
#[derive(Debug, Clone)]
pub struct FirstBootPatch {
    scripts: Vec<ShellScript>,
}

impl FirstBootPatch {
    pub fn new(scripts: Vec<ShellScript>) -> Self {
        Self { scripts }
    }
}

impl Patch for FirstBootPatch {
    fn name(&self) -> String {
        let names: Vec<&str> = self.scripts.iter().map(|s| s.name.as_str()).collect();
        format!("Add First Boot Script(s): {}", names.join(", "))
    }

    fn phased(&self, image: &OperatingSystemImage) -> PhasedPatch {
        let directory = image.exchange_directory().join(FIRST_BOOT_DIRECTORY);
        let files: Vec<(PathBuf, String)> = self
            .scripts
            .iter()
            .enumerate()
            .map(|(index, script)| (directory.join(script.file_name(index)), script.render()))
            .collect();

        let mut builder = PhasedPatch::builder(&self.name());
        for (path, _) in &files {
            builder = builder.customize_disk(VirtCustomization::FirstBoot(path.clone()));
        }
        builder
            .prepare_disk("write first boot scripts", move |_| {
                fs::create_dir_all(&directory)
                    .with_context(|| format!("Failed to create {}", directory.display()))?;
                for (path, content) in files {
                    fs::write(&path, content)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                }
                Ok(())
            })
            .build()
    }

    fn defers_to_first_boot(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Source {
    Commands(Vec<String>),
    /// Labelled blocks, one program each.
    Setup(String),
}

/// Boots the image and runs commands at the shell prompt.
#[derive(Debug, Clone)]
pub struct ShellScriptPatch {
    name: String,
    source: Source,
}

impl ShellScriptPatch {
    pub fn new(name: &str, commands: Vec<String>) -> Result<Self> {
        if commands.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::EmptyScript(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            source: Source::Commands(commands),
        })
    }

    /// A setup script whose `: label` lines start a new program.
    pub fn setup(name: &str, text: &str) -> Result<Self> {
        let has_command = text
            .lines()
            .map(str::trim)
            .any(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(':'));
        if !has_command {
            return Err(Error::EmptyScript(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            source: Source::Setup(text.to_string()),
        })
    }
}

impl Patch for ShellScriptPatch {
    fn name(&self) -> String {
        format!("Run {}", self.name)
    }

    fn phased(&self, image: &OperatingSystemImage) -> PhasedPatch {
        let ready = image.os().ready_pattern.clone();
        let programs = match &self.source {
            Source::Commands(commands) => vec![Program::from_script(&self.name, ready, commands)],
            Source::Setup(text) => Program::from_setup_script(&self.name, ready, text),
        };
        programs
            .into_iter()
            .fold(PhasedPatch::builder(&self.name()), |builder, program| {
                builder.boot_program(program)
            })
            .build()
    }
}
