//! Runtime bridge between a live emulator process and the programs that
//! drive its console.

mod lines;

pub use lines::LineAssembler;

use std::io::Write;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::os::OperatingSystem;
use crate::watchdog::Watchdog;

/// Benign emulator warnings that are not worth showing.
pub const IGNORED_ERROR_OUTPUT: &[&str] = &[
    "WARNING: Image format was not specified for '/sdcard/filesystem.img' and probing guessed raw.",
    "Automatically detecting the format is dangerous for raw images, write operations on block 0 will be restricted.",
    "Specify the 'raw' format explicitly to remove the restrictions.",
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type Sink = Box<dyn Write + Send>;

/// Mutex-guarded console input of the emulator.
///
/// Cloned into the shutdown watchdog, which types concurrently with the
/// output reader. `None` inside means the process no longer accepts input.
#[derive(Clone)]
pub struct ConsoleInput {
    sink: Arc<Mutex<Option<Sink>>>,
}

impl ConsoleInput {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Some(Box::new(sink)))),
        }
    }

    pub fn closed() -> Self {
        Self {
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.sink).is_some()
    }

    pub fn close(&self) {
        lock(&self.sink).take();
    }

    /// Types each value followed by a newline, pausing `delay` between
    /// keystrokes. Returns whether everything was written.
    ///
    /// Never fails: a dead process is reported and skipped, a write error
    /// marks the input as closed.
    pub fn enter(&self, values: &[&str], delay: Duration) -> bool {
        let mut guard = lock(&self.sink);
        let Some(sink) = guard.as_mut() else {
            warn!("process is not alive; dropping input {:?}", values);
            return false;
        };

        let result = values
            .iter()
            .try_for_each(|value| type_line(sink, value, delay));
        if let Err(err) = result {
            warn!("writing to the console failed: {}", err);
            guard.take();
            return false;
        }
        true
    }
}

fn type_line(sink: &mut Sink, value: &str, delay: Duration) -> std::io::Result<()> {
    if delay.is_zero() {
        sink.write_all(value.as_bytes())?;
    } else {
        let mut buf = [0u8; 4];
        for ch in value.chars() {
            sink.write_all(ch.encode_utf8(&mut buf).as_bytes())?;
            sink.flush()?;
            thread::sleep(delay);
        }
    }
    sink.write_all(b"\n")?;
    sink.flush()
}

/// A running (or simulated) operating system console.
pub struct OperatingSystemProcess {
    os: Arc<OperatingSystem>,
    input: ConsoleInput,
    child: Mutex<Option<Child>>,
    shutting_down: AtomicBool,
    watchdog: Mutex<Option<Watchdog>>,
}

impl OperatingSystemProcess {
    pub fn new(os: Arc<OperatingSystem>, input: ConsoleInput) -> Self {
        Self {
            os,
            input,
            child: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            watchdog: Mutex::new(None),
        }
    }

    /// Binds a spawned subprocess whose stdin is `input`.
    pub fn with_child(os: Arc<OperatingSystem>, input: ConsoleInput, child: Child) -> Self {
        let process = Self::new(os, input);
        *lock(&process.child) = Some(child);
        process
    }

    pub fn os(&self) -> &OperatingSystem {
        &self.os
    }

    pub fn input(&self) -> ConsoleInput {
        self.input.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.input.is_alive()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.child).as_ref().map(Child::id)
    }

    pub fn enter(&self, values: &[&str], delay: Duration) -> bool {
        self.input.enter(values, delay)
    }

    /// Cosmetic status line; never reaches the console.
    pub fn feedback(&self, message: &str) {
        info!("{}", message.trim());
    }

    /// Error output, minus the known-benign emulator warnings.
    pub fn negative_feedback(&self, message: &str) {
        let message = message.trim();
        if message.is_empty() || is_ignored_error_output(message) {
            return;
        }
        warn!("{}", message);
    }

    /// Fails with [`Error::DeadEnd`] and stops the subprocess if `line`
    /// matches the dead-end pattern.
    pub fn check_stuck(&self, line: &str) -> Result<()> {
        if !self.os.is_dead_end(line) {
            return Ok(());
        }
        self.negative_feedback(
            "The VM is stuck. Chances are the VM starts correctly with less load on this machine.",
        );
        self.kill();
        Err(Error::DeadEnd {
            line: line.trim().to_string(),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Replaces the active watchdog, stopping a previous one.
    pub fn arm_watchdog(&self, watchdog: Watchdog) {
        let previous = lock(&self.watchdog).replace(watchdog);
        drop(previous);
    }

    /// Resets the active watchdog under the distinct-input rule.
    pub fn reset_watchdog(&self, line: &str) {
        if let Some(watchdog) = lock(&self.watchdog).as_ref() {
            watchdog.reset_on(line);
        }
    }

    pub fn has_watchdog(&self) -> bool {
        lock(&self.watchdog).is_some()
    }

    pub fn disarm_watchdog(&self) {
        let previous = lock(&self.watchdog).take();
        drop(previous);
    }

    pub fn kill(&self) {
        self.disarm_watchdog();
        self.input.close();
        if let Some(child) = lock(&self.child).as_mut() {
            if let Err(err) = child.kill() {
                warn!("failed to kill emulator: {}", err);
            }
        }
    }

    /// Waits for the subprocess, if one is attached.
    pub fn wait(&self) -> Result<Option<ExitStatus>> {
        self.disarm_watchdog();
        self.input.close();
        let mut child = lock(&self.child);
        match child.as_mut() {
            Some(child) => Ok(Some(child.wait()?)),
            None => Ok(None),
        }
    }
}

impl Drop for OperatingSystemProcess {
    fn drop(&mut self) {
        self.disarm_watchdog();
    }
}

pub fn is_ignored_error_output(message: &str) -> bool {
    let message = message.to_lowercase();
    IGNORED_ERROR_OUTPUT
        .iter()
        .any(|ignored| message.contains(&ignored.to_lowercase()))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    use super::{ConsoleInput, OperatingSystemProcess};
    use crate::os::{Credentials, OperatingSystem, Pattern};

    /// In-memory console input that records everything typed.
    #[derive(Clone, Default)]
    pub struct Recorder(Arc<Mutex<Vec<u8>>>);

    impl Recorder {
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        /// Every entered line, in order.
        pub fn entered(&self) -> Vec<String> {
            self.text().lines().map(str::to_string).collect()
        }

        pub fn count(&self, line: &str) -> usize {
            self.entered().iter().filter(|l| *l == line).count()
        }
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Minimal OS: `host login:`, `Password:`, `user@host:~$`.
    pub fn simple_os() -> Arc<OperatingSystem> {
        Arc::new(
            OperatingSystem::new("test", "Test OS", Credentials::new("pi", "raspberry"))
                .login_pattern(Pattern::new(r"host login:").unwrap())
                .password_pattern(Pattern::new(r"Password:").unwrap())
                .ready_pattern(Pattern::new(r"user@host:~\$").unwrap())
                .dead_end_pattern(Some(Pattern::new(r".*in emergency mode.*").unwrap())),
        )
    }

    pub fn recording_process(os: Arc<OperatingSystem>) -> (OperatingSystemProcess, Recorder) {
        let recorder = Recorder::default();
        let process = OperatingSystemProcess::new(os, ConsoleInput::new(recorder.clone()));
        (process, recorder)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{recording_process, simple_os, Recorder};
    use super::*;
    use std::io;

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_enter_writes_lines() {
        let (process, recorder) = recording_process(simple_os());
        assert!(process.enter(&["pi", "raspberry"], Duration::ZERO));
        assert!(process.enter(&["ls"], Duration::from_millis(1)));
        assert_eq!(recorder.entered(), vec!["pi", "raspberry", "ls"]);
    }

    #[test]
    fn test_enter_on_dead_process_is_noop() {
        let process = OperatingSystemProcess::new(simple_os(), ConsoleInput::closed());
        assert!(!process.is_alive());
        assert!(!process.enter(&["pi"], Duration::ZERO));
    }

    #[test]
    fn test_write_failure_marks_dead() {
        let process = OperatingSystemProcess::new(simple_os(), ConsoleInput::new(Broken));
        assert!(process.is_alive());
        assert!(!process.enter(&["pi"], Duration::ZERO));
        assert!(!process.is_alive());
    }

    #[test]
    fn test_check_stuck() {
        let (process, _recorder) = recording_process(simple_os());
        assert!(process.check_stuck("Booting...").is_ok());
        let err = process
            .check_stuck("You are in emergency mode. After logging in ...")
            .unwrap_err();
        assert!(matches!(err, Error::DeadEnd { .. }));
        assert!(!process.is_alive());
    }

    #[test]
    fn test_ignored_error_output() {
        assert!(is_ignored_error_output(
            "warning: image format was not specified for '/sdcard/filesystem.img' and probing guessed raw."
        ));
        assert!(!is_ignored_error_output("qemu: could not open disk image"));
    }

    #[test]
    fn test_input_is_shared_between_clones() {
        let recorder = Recorder::default();
        let input = ConsoleInput::new(recorder.clone());
        let clone = input.clone();
        clone.enter(&["from watchdog"], Duration::ZERO);
        input.close();
        assert!(!clone.is_alive());
        assert_eq!(recorder.entered(), vec!["from watchdog"]);
    }
}
