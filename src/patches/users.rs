use std::fs;

use anyhow::bail;
use regex::Regex;

use crate::libguestfs::{PasswordSelector, VirtCustomization};
use crate::os::{Credentials, DiskPath, OperatingSystemImage};
use crate::patch::{FileOperation, Patch, PhasedPatch};

/// Files that reference a user by name.
const ACCOUNT_FILES: &[&str] = &[
    "/etc/passwd",
    "/etc/group",
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/subuid",
    "/etc/subgid",
];

/// Renames a user account, including its sudo rights.
#[derive(Debug, Clone)]
pub struct UsernamePatch {
    old: String,
    new: String,
}

impl UsernamePatch {
    pub fn new(old: &str, new: &str) -> Self {
        Self {
            old: old.to_string(),
            new: new.to_string(),
        }
    }
}

impl Patch for UsernamePatch {
    fn name(&self) -> String {
        format!("Change Username {} to {}", self.old, self.new)
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        let mut builder = PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::AppendLine {
                file: DiskPath::new("/etc/sudoers.d/privacy"),
                line: "Defaults        lecture = never".to_string(),
            })
            .customize_disk(VirtCustomization::AppendLine {
                file: DiskPath::new("/etc/sudoers"),
                line: format!("{} ALL=(ALL) NOPASSWD:ALL", self.new),
            });

        for file in ACCOUNT_FILES {
            let old = self.old.clone();
            let new = self.new.clone();
            builder = builder.file_operation(FileOperation::edit(
                *file,
                &format!("rename {} to {}", self.old, self.new),
                move |path| {
                    let text = fs::read_to_string(path)?;
                    fs::write(path, rename_user(&text, &old, &new)?)?;
                    if still_references(&fs::read_to_string(path)?, &old, &new)? {
                        bail!("{} still references {} after renaming it", path.display(), old);
                    }
                    Ok(())
                },
            ));
        }

        let new = self.new.clone();
        builder
            .update_image("update login username", move |image| {
                image.credentials = Credentials::new(new, image.credentials.password.clone());
                Ok(())
            })
            .build()
    }
}

fn user_pattern(user: &str) -> anyhow::Result<Regex> {
    Ok(Regex::new(&format!(r"\b{}\b", regex::escape(user)))?)
}

/// Replaces whole-word occurrences of `old` with `new`.
pub fn rename_user(text: &str, old: &str, new: &str) -> anyhow::Result<String> {
    Ok(user_pattern(old)?.replace_all(text, regex::NoExpand(new)).into_owned())
}

/// Whether `text` still names `old` as a word of its own. Undecidable when
/// `new` itself contains `old` as a word, so that case counts as renamed.
fn still_references(text: &str, old: &str, new: &str) -> anyhow::Result<bool> {
    let pattern = user_pattern(old)?;
    Ok(!pattern.is_match(new) && pattern.is_match(text))
}

/// Sets the password of a user account.
#[derive(Debug, Clone)]
pub struct PasswordPatch {
    username: String,
    password: String,
}

impl PasswordPatch {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl Patch for PasswordPatch {
    fn name(&self) -> String {
        format!("Change Password of {}", self.username)
    }

    fn phased(&self, _image: &OperatingSystemImage) -> PhasedPatch {
        let username = self.username.clone();
        let password = self.password.clone();
        PhasedPatch::builder(&self.name())
            .customize_disk(VirtCustomization::Password {
                user: self.username.clone(),
                password: PasswordSelector::Plain(self.password.clone()),
            })
            .update_image("update login password", move |image| {
                image.credentials = Credentials::new(username, password);
                Ok(())
            })
            .build()
    }
}
