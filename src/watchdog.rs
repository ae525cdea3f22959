//! Restartable dead man's switch.
//!
//! A background thread waits on a command channel with `recv_timeout`; if no
//! reset arrives within the timeout the callback runs. A repeating watchdog
//! re-arms itself after firing.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

enum Command {
    Reset,
    Stop,
}

pub struct Watchdog {
    timeout: Duration,
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
    last_input: Mutex<Option<String>>,
}

impl Watchdog {
    /// Arms a watchdog that calls `on_timeout` once the timeout elapses
    /// without a reset.
    pub fn new<F>(timeout: Duration, repeating: bool, mut on_timeout: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Command>();
        let thread = thread::spawn(move || loop {
            match rx.recv_timeout(timeout) {
                Ok(Command::Reset) => continue,
                Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("watchdog timed out after {:?}", timeout);
                    on_timeout();
                    if !repeating {
                        break;
                    }
                }
            }
        });

        Self {
            timeout,
            commands: tx,
            thread: Some(thread),
            last_input: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Restarts the countdown.
    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    /// Restarts the countdown unless `input` equals the previously observed
    /// input. Echoed output of a stalled console must not keep it alive.
    pub fn reset_on(&self, input: &str) -> bool {
        let mut last = match self.last_input.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last.as_deref() == Some(input) {
            debug!("watchdog reset ignored for repeated input");
            return false;
        }
        *last = Some(input.to_string());
        self.reset();
        true
    }

    pub fn stop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(thread) = self.thread.take() {
            // The callback itself may drop the watchdog; never join ourselves.
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                warn!("watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(timeout_ms: u64, repeating: bool) -> (Watchdog, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let dog = Watchdog::new(Duration::from_millis(timeout_ms), repeating, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (dog, fired)
    }

    #[test]
    fn test_fires_once_when_not_repeating() {
        let (_dog, fired) = counting(50, false);
        thread::sleep(Duration::from_millis(300));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_postpones_timeout() {
        let (dog, fired) = counting(400, true);
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(150));
            dog.reset();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_repeated_input_does_not_reset() {
        let (dog, _fired) = counting(10_000, true);
        assert!(dog.reset_on("booting"));
        assert!(!dog.reset_on("booting"));
        assert!(dog.reset_on("login:"));
        assert!(dog.reset_on("booting"));
    }

    #[test]
    fn test_stop_prevents_firing() {
        let (mut dog, fired) = counting(100, true);
        dog.stop();
        thread::sleep(Duration::from_millis(250));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
