use tracing::info;

use super::{Debounce, Program, Timing};
use crate::console::OperatingSystemProcess;
use crate::error::Result;
use crate::os::OperatingSystem;
use crate::watchdog::Watchdog;

const SHUTTING_DOWN: &str = "shutting down";

/// Shuts the machine down.
///
/// Types the shutdown command and arms a repeating watchdog that types it
/// again whenever the console stays silent for `timing.shutdown_watchdog`.
/// Every line resets the watchdog unless it repeats the previous line. The
/// program never finishes on output; only the emulator exiting ends it.
pub fn shutdown_program(os: &OperatingSystem, timing: &Timing) -> Program {
    let command = os.shutdown_command.clone();
    let ready = os.ready_pattern.clone();
    let sent = Debounce::new(timing.debounce);
    let delay = timing.keystroke_delay;
    let silence = timing.shutdown_watchdog;

    let initial = {
        let (command, sent) = (command.clone(), sent.clone());
        move |process: &OperatingSystemProcess| -> Result<Option<String>> {
            sent.try_acquire();
            process.enter(&[command.as_str()], delay);
            process.set_shutting_down();

            let input = process.input();
            process.arm_watchdog(Watchdog::new(silence, true, move || {
                info!("no output for {:?}; repeating {:?}", silence, command);
                input.enter(&[command.as_str()], delay);
            }));
            Ok(Some(SHUTTING_DOWN.to_string()))
        }
    };

    Program::new("shutdown", initial)
        .state(SHUTTING_DOWN, move |process, line| {
            process.reset_watchdog(line);
            if ready.matches(line) && sent.try_acquire() {
                process.enter(&[command.as_str()], delay);
            }
            Ok(Some(SHUTTING_DOWN.to_string()))
        })
        .completes_on_exit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::{recording_process, simple_os};
    use std::thread;
    use std::time::Duration;

    const COMMAND: &str = "sudo shutdown -h now";

    fn timing(watchdog_ms: u64) -> Timing {
        Timing {
            keystroke_delay: Duration::ZERO,
            shutdown_watchdog: Duration::from_millis(watchdog_ms),
            ..Timing::default()
        }
    }

    #[test]
    fn test_sends_command_and_never_finishes() {
        let os = simple_os();
        let (process, recorder) = recording_process(os.clone());
        let mut shutdown = shutdown_program(&os, &timing(10_000));

        assert!(shutdown.compute(&process, "user@host:~$").unwrap());
        assert!(process.is_shutting_down());
        assert!(process.has_watchdog());
        assert!(shutdown.compute(&process, "[  OK  ] Stopped target Timers.").unwrap());
        assert!(shutdown.compute(&process, "").unwrap());
        assert_eq!(recorder.count(COMMAND), 1);
        assert!(shutdown.finishes_on_exit());
    }

    #[test]
    fn test_silence_causes_exactly_one_resend() {
        let os = simple_os();
        let (process, recorder) = recording_process(os.clone());
        let mut shutdown = shutdown_program(&os, &timing(500));

        shutdown.compute(&process, "user@host:~$").unwrap();
        assert_eq!(recorder.count(COMMAND), 1);

        thread::sleep(Duration::from_millis(750));
        assert_eq!(recorder.count(COMMAND), 2);
    }

    #[test]
    fn test_output_resets_countdown() {
        let os = simple_os();
        let (process, recorder) = recording_process(os.clone());
        let mut shutdown = shutdown_program(&os, &timing(500));

        shutdown.compute(&process, "user@host:~$").unwrap();
        for line in ["Stopping services", "Unmounting /boot"] {
            thread::sleep(Duration::from_millis(300));
            shutdown.compute(&process, line).unwrap();
        }
        thread::sleep(Duration::from_millis(200));
        assert_eq!(recorder.count(COMMAND), 1);
    }

    #[test]
    fn test_repeated_line_does_not_reset() {
        let os = simple_os();
        let (process, recorder) = recording_process(os.clone());
        let mut shutdown = shutdown_program(&os, &timing(500));

        shutdown.compute(&process, "reboot: Power down").unwrap();
        thread::sleep(Duration::from_millis(300));
        shutdown.compute(&process, "reboot: Power down").unwrap();
        thread::sleep(Duration::from_millis(350));
        assert_eq!(recorder.count(COMMAND), 2);
    }
}
