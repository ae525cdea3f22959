use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Debounce, Program, Timing};
use crate::console::OperatingSystemProcess;
use crate::error::{Error, Result};
use crate::os::{Credentials, OperatingSystem};

const WAITING_FOR_PROMPT: &str = "1/4 waiting for prompt";
const CONFIRM_USERNAME: &str = "2/4 confirm username";
const PASSWORD: &str = "3/4 password…";
const CONFIRM_PASSWORD: &str = "4/4 confirm password";

/// First-login dialogs that are dismissed by tabbing through them.
const DIALOG_MARKERS: &[&str] = &["'tab'", "'enter'", "<ok>"];

/// Unmatched lines after which the password is typed blindly.
const BLIND_PASSWORD_AFTER: usize = 2;

struct Login {
    os: OperatingSystem,
    credentials: Credentials,
    timing: Timing,
    username_sent: Debounce,
    password_sent: Debounce,
    missed_password_prompts: AtomicUsize,
}

impl Login {
    fn waiting_for_prompt(&self, process: &OperatingSystemProcess, line: &str) -> Result<Option<String>> {
        if !self.os.is_login_prompt(line) {
            return Ok(Some(WAITING_FOR_PROMPT.to_string()));
        }
        if self.username_sent.try_acquire() {
            process.enter(&[self.credentials.username.as_str()], self.timing.keystroke_delay);
        }
        Ok(Some(CONFIRM_USERNAME.to_string()))
    }

    fn confirm_username(&self, process: &OperatingSystemProcess, line: &str) -> Result<Option<String>> {
        if self.os.is_login_prompt(line) {
            return Ok(Some(CONFIRM_USERNAME.to_string()));
        }
        // The first line after the username may already be the password prompt.
        self.password(process, line)
    }

    fn password(&self, process: &OperatingSystemProcess, line: &str) -> Result<Option<String>> {
        self.check_rejected(line)?;
        let missed = self.missed_password_prompts.load(Ordering::SeqCst);
        if self.os.is_password_prompt(line) || missed % 5 == BLIND_PASSWORD_AFTER {
            if self.password_sent.try_acquire() {
                process.enter(&[self.credentials.password.as_str()], self.timing.keystroke_delay);
            }
            return Ok(Some(CONFIRM_PASSWORD.to_string()));
        }
        self.missed_password_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(Some(PASSWORD.to_string()))
    }

    fn confirm_password(&self, process: &OperatingSystemProcess, line: &str) -> Result<Option<String>> {
        self.check_rejected(line)?;
        let lowercase = line.to_lowercase();
        if DIALOG_MARKERS.iter().any(|marker| lowercase.contains(marker)) {
            process.enter(&["\t\t\t\t\t"], self.timing.keystroke_delay);
            process.feedback(&format!(
                "Dismissing a dialog. If something goes wrong, the emulator PID is {:?}",
                process.pid()
            ));
            return Ok(Some(CONFIRM_PASSWORD.to_string()));
        }
        if self.os.is_login_prompt(line) {
            return self.waiting_for_prompt(process, line);
        }
        if self.os.is_password_prompt(line) {
            return self.password(process, line);
        }
        if self.os.is_ready(line) {
            process.feedback(&format!("Logged in as {}", self.credentials.username));
            return Ok(None);
        }
        Ok(Some(CONFIRM_PASSWORD.to_string()))
    }

    fn check_rejected(&self, line: &str) -> Result<()> {
        if line.to_lowercase().contains("incorrect") {
            return Err(Error::Authentication {
                username: self.credentials.username.clone(),
                line: line.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Logs in with `credentials`.
///
/// Username and password are each typed at most once per debounce window,
/// so duplicated prompt lines do not produce duplicated input. A rejected
/// password is an [`Error::Authentication`]; there is no retry.
pub fn login_program(os: &OperatingSystem, credentials: &Credentials, timing: &Timing) -> Program {
    let login = Arc::new(Login {
        os: os.clone(),
        credentials: credentials.clone(),
        timing: timing.clone(),
        username_sent: Debounce::new(timing.debounce),
        password_sent: Debounce::new(timing.debounce),
        missed_password_prompts: AtomicUsize::new(0),
    });

    let (l1, l2, l3, l4) = (
        Arc::clone(&login),
        Arc::clone(&login),
        Arc::clone(&login),
        login,
    );
    Program::new("login", |_| Ok(Some(WAITING_FOR_PROMPT.to_string())))
        .state(WAITING_FOR_PROMPT, move |p, line| l1.waiting_for_prompt(p, line))
        .state(CONFIRM_USERNAME, move |p, line| l2.confirm_username(p, line))
        .state(PASSWORD, move |p, line| l3.password(p, line))
        .state(CONFIRM_PASSWORD, move |p, line| l4.confirm_password(p, line))
}
