//! Scripted console interaction.
//!
//! A [`Program`] is a named state machine. Every console line is handed to
//! the handler of the current state, which may type into the console and
//! returns the next state. `None` means the program is done.

mod login;
mod script;
mod shutdown;

pub use login::login_program;
pub use shutdown::shutdown_program;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::console::OperatingSystemProcess;
use crate::error::{Error, Result};

pub type Handler =
    Box<dyn FnMut(&OperatingSystemProcess, &str) -> Result<Option<String>> + Send>;
pub type InitialState = Box<dyn FnOnce(&OperatingSystemProcess) -> Result<Option<String>> + Send>;

/// Delays and timeouts used while driving a console.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Minimum time between two entries of the same credential or command.
    pub debounce: Duration,
    /// Pause between two typed characters.
    pub keystroke_delay: Duration,
    /// Silence after which the shutdown command is repeated.
    pub shutdown_watchdog: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(10),
            keystroke_delay: Duration::from_millis(10),
            shutdown_watchdog: Duration::from_secs(5),
        }
    }
}

/// Allows an action at most once per window.
#[derive(Debug, Clone)]
pub(crate) struct Debounce {
    window: Duration,
    last: Arc<Mutex<Option<Instant>>>,
}

impl Debounce {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns `true` and starts a new window if the previous one elapsed.
    pub(crate) fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *last {
            Some(at) if now.duration_since(at) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// One transition: `(from, line, to)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub from: Option<String>,
    pub line: String,
    pub to: Option<String>,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.as_deref().unwrap_or("-");
        match &self.to {
            Some(to) if Some(to) == self.from.as_ref() => write!(f, "[{}] {:?}", from, self.line),
            Some(to) => write!(f, "[{}] {:?} -> [{}]", from, self.line, to),
            None => write!(f, "[{}] {:?} -> done", from, self.line),
        }
    }
}

pub struct Program {
    name: String,
    initial: Option<InitialState>,
    transitions: HashMap<String, Handler>,
    state: Option<String>,
    history: Vec<Step>,
    completes_on_exit: bool,
}

impl Program {
    /// `initial` is evaluated once, on the first [`Program::compute`].
    pub fn new<F>(name: &str, initial: F) -> Self
    where
        F: FnOnce(&OperatingSystemProcess) -> Result<Option<String>> + Send + 'static,
    {
        Self {
            name: name.trim().to_string(),
            initial: Some(Box::new(initial)),
            transitions: HashMap::new(),
            state: None,
            history: Vec::new(),
            completes_on_exit: false,
        }
    }

    /// Registers the handler for `state`.
    pub fn state<F>(mut self, state: &str, handler: F) -> Self
    where
        F: FnMut(&OperatingSystemProcess, &str) -> Result<Option<String>> + Send + 'static,
    {
        self.transitions.insert(state.to_string(), Box::new(handler));
        self
    }

    /// Marks a program whose only way to finish is the emulator exiting.
    pub fn completes_on_exit(mut self) -> Self {
        self.completes_on_exit = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn is_started(&self) -> bool {
        self.initial.is_none()
    }

    pub fn is_halted(&self) -> bool {
        self.is_started() && self.state.is_none()
    }

    pub fn finishes_on_exit(&self) -> bool {
        self.completes_on_exit
    }

    pub fn state_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn history(&self) -> &[Step] {
        &self.history
    }

    /// Feeds one console line. Returns whether more lines are needed.
    pub fn compute(&mut self, process: &OperatingSystemProcess, line: &str) -> Result<bool> {
        if let Some(initial) = self.initial.take() {
            self.state = initial(process)?;
            debug!("{} started in {:?}", self.name, self.state);
        } else if self.state.is_none() {
            warn!("{} already finished; ignoring {:?}", self.name, line);
            return Ok(false);
        }

        let Some(state) = self.state.clone() else {
            return Ok(false);
        };
        let handler = match self.transitions.get_mut(&state) {
            Some(handler) => handler,
            None => {
                return Err(Error::UnknownState {
                    program: self.name.clone(),
                    state,
                    history: self.history.clone(),
                })
            }
        };

        let next = match handler(process, line) {
            Ok(next) => next,
            Err(err) => {
                self.state = None;
                return Err(err);
            }
        };
        let step = Step {
            from: Some(state),
            line: line.to_string(),
            to: next.clone(),
        };
        debug!("{} #{}: {}", self.name, self.history.len(), step);
        self.history.push(step);
        self.state = next;
        Ok(self.state.is_some())
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("states", &self.transitions.len())
            .field("history", &self.history.len())
            .finish()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Some(state) => write!(f, "{} ({})", self.name, state),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::{recording_process, simple_os};

    fn counter() -> Program {
        Program::new("counter", |_| Ok(Some("one".to_string())))
            .state("one", |_, line| {
                Ok(Some(if line == "next" { "two" } else { "one" }.to_string()))
            })
            .state("two", |_, line| Ok((line != "stop").then(|| "two".to_string())))
    }

    #[test]
    fn test_initial_state_is_lazy() {
        let mut program = counter();
        assert!(!program.is_started());
        assert_eq!(program.current_state(), None);

        let (process, _) = recording_process(simple_os());
        assert!(program.compute(&process, "hello").unwrap());
        assert!(program.is_started());
        assert_eq!(program.current_state(), Some("one"));
        assert_eq!(program.history().len(), 1);
    }

    #[test]
    fn test_halted_program_ignores_lines() {
        let (process, _) = recording_process(simple_os());
        let mut program = counter();
        for line in ["next", "stop"] {
            program.compute(&process, line).unwrap();
        }
        assert!(program.is_halted());
        assert!(!program.compute(&process, "more").unwrap());
        assert_eq!(program.history().len(), 2);
    }

    #[test]
    fn test_unknown_state_carries_history() {
        let (process, _) = recording_process(simple_os());
        let mut program = Program::new("broken", |_| Ok(Some("a".to_string())))
            .state("a", |_, _| Ok(Some("b".to_string())));
        assert!(program.compute(&process, "x").unwrap());
        match program.compute(&process, "y") {
            Err(Error::UnknownState { program, state, history }) => {
                assert_eq!(program, "broken");
                assert_eq!(state, "b");
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].line, "x");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_replay_yields_identical_history() {
        let (process, _) = recording_process(simple_os());
        let lines = ["a", "next", "b", "c", "stop"];
        let run = || {
            let mut program = counter();
            for line in lines {
                program.compute(&process, line).unwrap();
            }
            program.history().to_vec()
        };
        let first = run();
        assert_eq!(first.len(), lines.len());
        assert_eq!(first, run());
    }

    #[test]
    fn test_debounce_window() {
        let debounce = Debounce::new(Duration::from_millis(200));
        assert!(debounce.try_acquire());
        assert!(!debounce.try_acquire());
        std::thread::sleep(Duration::from_millis(250));
        assert!(debounce.try_acquire());
    }

    #[test]
    fn test_step_display() {
        let step = Step {
            from: Some("1/4".into()),
            line: "login:".into(),
            to: Some("2/4".into()),
        };
        assert_eq!(step.to_string(), "[1/4] \"login:\" -> [2/4]");
    }
}
