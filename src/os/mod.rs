//! Operating system descriptors and disk images.
//!
//! An [`OperatingSystem`] is static knowledge about a distribution: how its
//! console prompts look, which credentials it ships with and how to shut it
//! down. An [`OperatingSystemImage`] binds one of them to an image file.

pub mod catalog;
mod disk_path;
mod image;
mod pattern;

pub use disk_path::DiskPath;
pub use image::{ImageLock, OperatingSystemImage, DISK_GROWTH_CHUNK, EXCHANGE_DIRECTORY};
pub use pattern::{strip_ansi, Pattern};

use std::fmt;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::program::{self, Program, Timing};

pub const DEFAULT_SHUTDOWN_COMMAND: &str = "sudo shutdown -h now";

// `regex` has no look-around; the `Last login:` banner is rejected in
// `OperatingSystem::is_login_prompt` instead.
static DEFAULT_LOGIN_PATTERN: LazyLock<Pattern> = LazyLock::new(|| {
    Pattern::case_insensitive(r"(?P<host>[\w-]+)\s+login:.*").expect("valid login pattern")
});
static DEFAULT_PASSWORD_PATTERN: LazyLock<Pattern> = LazyLock::new(|| {
    Pattern::case_insensitive(r"Password:\s*").expect("valid password pattern")
});
static DEFAULT_READY_PATTERN: LazyLock<Pattern> = LazyLock::new(|| {
    Pattern::case_insensitive(r"(?P<user>[\w-]+)@(?P<host>[\w-]+):(?P<path>[^#$]+?)[#$]\s*")
        .expect("valid ready pattern")
});
static DEFAULT_DEAD_END_PATTERN: LazyLock<Pattern> = LazyLock::new(|| {
    Pattern::case_insensitive(r".*in emergency mode.*").expect("valid dead-end pattern")
});

/// Username and password used to log in to a user session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// A distribution that can be customized. Never mutated once built.
#[derive(Debug, Clone)]
pub struct OperatingSystem {
    /// Technical name, used as the catalog key.
    pub name: String,
    pub full_name: String,
    pub download_url: Option<String>,
    /// Approximate size of the unpacked image in bytes.
    pub approximate_image_size: u64,
    pub default_credentials: Credentials,
    pub login_pattern: Pattern,
    pub password_pattern: Pattern,
    pub ready_pattern: Pattern,
    pub dead_end_pattern: Option<Pattern>,
    pub shutdown_command: String,
}

impl OperatingSystem {
    /// A descriptor with the default prompt patterns and shutdown command.
    pub fn new(name: &str, full_name: &str, default_credentials: Credentials) -> Self {
        Self {
            name: name.to_string(),
            full_name: full_name.to_string(),
            download_url: None,
            approximate_image_size: 0,
            default_credentials,
            login_pattern: DEFAULT_LOGIN_PATTERN.clone(),
            password_pattern: DEFAULT_PASSWORD_PATTERN.clone(),
            ready_pattern: DEFAULT_READY_PATTERN.clone(),
            dead_end_pattern: Some(DEFAULT_DEAD_END_PATTERN.clone()),
            shutdown_command: DEFAULT_SHUTDOWN_COMMAND.to_string(),
        }
    }

    pub fn download_url(mut self, url: &str) -> Self {
        self.download_url = Some(url.to_string());
        self
    }

    pub fn approximate_image_size(mut self, bytes: u64) -> Self {
        self.approximate_image_size = bytes;
        self
    }

    pub fn login_pattern(mut self, pattern: Pattern) -> Self {
        self.login_pattern = pattern;
        self
    }

    pub fn password_pattern(mut self, pattern: Pattern) -> Self {
        self.password_pattern = pattern;
        self
    }

    pub fn ready_pattern(mut self, pattern: Pattern) -> Self {
        self.ready_pattern = pattern;
        self
    }

    pub fn dead_end_pattern(mut self, pattern: Option<Pattern>) -> Self {
        self.dead_end_pattern = pattern;
        self
    }

    pub fn shutdown_command(mut self, command: &str) -> Self {
        self.shutdown_command = command.to_string();
        self
    }

    pub fn is_login_prompt(&self, line: &str) -> bool {
        match self.login_pattern.captures(line) {
            Some(caps) => !caps
                .iter()
                .any(|(name, value)| name == "host" && value.eq_ignore_ascii_case("last")),
            None => false,
        }
    }

    pub fn is_password_prompt(&self, line: &str) -> bool {
        self.password_pattern.matches(line)
    }

    pub fn is_ready(&self, line: &str) -> bool {
        self.ready_pattern.matches(line)
    }

    pub fn is_dead_end(&self, line: &str) -> bool {
        self.dead_end_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.matches(line))
    }

    /// A program that runs `commands` one after another at the shell prompt.
    pub fn compile_script(&self, name: &str, commands: &[String]) -> Result<Program> {
        if commands.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::EmptyScript(name.to_string()));
        }
        Ok(Program::from_script(name, self.ready_pattern.clone(), commands))
    }

    /// One program per labelled block of a setup script.
    pub fn compile_setup_script(&self, name: &str, text: &str) -> Result<Vec<Program>> {
        let programs = Program::from_setup_script(name, self.ready_pattern.clone(), text);
        if programs.is_empty() {
            return Err(Error::EmptyScript(name.to_string()));
        }
        Ok(programs)
    }

    pub fn login_program(&self, credentials: &Credentials) -> Program {
        program::login_program(self, credentials, &Timing::default())
    }

    pub fn shutdown_program(&self) -> Program {
        program::shutdown_program(self, &Timing::default())
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raspberry() -> OperatingSystem {
        OperatingSystem::new("test", "Test OS", Credentials::new("pi", "raspberry"))
    }

    #[test]
    fn test_default_login_pattern() {
        let os = raspberry();
        assert!(os.is_login_prompt("raspberrypi login: "));
        assert!(os.is_login_prompt("raspberrypi login: [  OK  ] Started Regenerate SSH host keys."));
        assert!(!os.is_login_prompt("Last login: Sat Jan 30 12:00:00 2021 from 10.0.2.2"));
        assert!(!os.is_login_prompt("Password:"));
    }

    #[test]
    fn test_default_ready_and_dead_end_patterns() {
        let os = raspberry();
        assert!(os.is_ready("pi@raspberrypi:~$ "));
        assert!(os.is_ready("root@raspberrypi:/home/pi# "));
        assert!(!os.is_ready("pi@raspberrypi:~$ ls"));
        assert!(os.is_dead_end("You are in emergency mode. After logging in, type ..."));
        assert!(!os.clone().dead_end_pattern(None).is_dead_end("in emergency mode"));
    }

    #[test]
    fn test_compile_empty_script_is_error() {
        let os = raspberry();
        let err = os.compile_script("noop", &[]).unwrap_err();
        assert!(matches!(err, Error::EmptyScript(name) if name == "noop"));
        assert!(os.compile_script("one", &["ls".to_string()]).is_ok());
    }
}
