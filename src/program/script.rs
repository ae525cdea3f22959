use std::sync::Arc;

use super::{Program, Timing};
use crate::console::OperatingSystemProcess;
use crate::error::Result;
use crate::os::Pattern;

fn waiting_state(index: usize, commands: &[String]) -> String {
    let program = commands[index].split_whitespace().next().unwrap_or_default();
    format!("{}/{}: {}", index + 1, commands.len(), program)
}

fn running_state(index: usize, commands: &[String]) -> String {
    format!("{} …", waiting_state(index, commands))
}

/// Types command `index` once `line` is a shell prompt.
fn start_command(
    process: &OperatingSystemProcess,
    line: &str,
    ready: &Pattern,
    commands: &[String],
    index: usize,
    timing: &Timing,
) -> Result<Option<String>> {
    if ready.matches(line) && process.enter(&[commands[index].as_str()], timing.keystroke_delay) {
        Ok(Some(running_state(index, commands)))
    } else {
        Ok(Some(waiting_state(index, commands)))
    }
}

impl Program {
    /// Runs `commands` one at a time, each after a shell prompt.
    ///
    /// Every command gets a waiting and a running state. The prompt that
    /// ends command `i` also starts command `i + 1`; the prompt after the
    /// last command finishes the program.
    pub fn from_script(name: &str, ready: Pattern, commands: &[String]) -> Program {
        Self::from_script_with(name, ready, commands, &Timing::default())
    }

    pub fn from_script_with(
        name: &str,
        ready: Pattern,
        commands: &[String],
        timing: &Timing,
    ) -> Program {
        let commands: Arc<Vec<String>> = Arc::new(
            commands
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        );

        let first = (!commands.is_empty()).then(|| waiting_state(0, &commands));
        let mut program = Program::new(name.trim_start_matches(':'), move |_| Ok(first));

        for index in 0..commands.len() {
            let (cmds, pattern, delays) = (Arc::clone(&commands), ready.clone(), timing.clone());
            program = program.state(&waiting_state(index, &commands), move |process, line| {
                start_command(process, line, &pattern, &cmds, index, &delays)
            });

            let (cmds, pattern, delays) = (Arc::clone(&commands), ready.clone(), timing.clone());
            program = program.state(&running_state(index, &commands), move |process, line| {
                if !pattern.matches(line) {
                    return Ok(Some(running_state(index, &cmds)));
                }
                if index + 1 == cmds.len() {
                    return Ok(None);
                }
                start_command(process, line, &pattern, &cmds, index + 1, &delays)
            });
        }
        program
    }

    /// Splits a labelled setup script into one program per block.
    ///
    /// A block starts with a `: label` line; lines before the first label
    /// form an unlabelled block named after `name` and its first command.
    ///
    /// ```text
    /// sudo -i
    ///
    /// : configure SSH port
    /// sed -i 's/^#Port 22$/Port 1234/g' /etc/ssh/sshd_config
    /// ```
    pub fn from_setup_script(name: &str, ready: Pattern, text: &str) -> Vec<Program> {
        let mut blocks: Vec<(Option<String>, Vec<String>)> = vec![(None, Vec::new())];
        for line in text.lines().map(str::trim) {
            if let Some(label) = line.strip_prefix(':') {
                blocks.push((Some(label.trim().to_string()), Vec::new()));
            } else if !line.is_empty() && !line.starts_with('#') {
                if let Some((_, commands)) = blocks.last_mut() {
                    commands.push(line.to_string());
                }
            }
        }

        blocks
            .into_iter()
            .filter(|(_, commands)| !commands.is_empty())
            .map(|(label, commands)| {
                let label = label
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| format!("{}: {}", name, commands[0]));
                Program::from_script(&label, ready.clone(), &commands)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::{recording_process, simple_os};
    use std::time::Duration;

    fn fast() -> Timing {
        Timing {
            keystroke_delay: Duration::ZERO,
            ..Timing::default()
        }
    }

    fn script(commands: &[&str]) -> Program {
        let commands: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
        Program::from_script_with("script", simple_os().ready_pattern.clone(), &commands, &fast())
    }

    #[test]
    fn test_only_last_completion_returns_false() {
        let (process, recorder) = recording_process(simple_os());
        let mut program = script(&["ls -la", "whoami", "uptime"]);

        let lines = [
            "Welcome",
            "user@host:~$",
            "total 0",
            "user@host:~$",
            "pi",
            "user@host:~$",
            " 10:00:00 up 1 min",
        ];
        for line in lines {
            assert!(program.compute(&process, line).unwrap(), "line {:?}", line);
        }
        assert!(!program.compute(&process, "user@host:~$").unwrap());
        assert_eq!(recorder.entered(), vec!["ls -la", "whoami", "uptime"]);
        assert!(program.is_halted());
    }

    #[test]
    fn test_state_names() {
        let (process, _) = recording_process(simple_os());
        let mut program = script(&["ls -la", "whoami"]);
        assert_eq!(program.state_count(), 4);
        program.compute(&process, "boot").unwrap();
        assert_eq!(program.current_state(), Some("1/2: ls"));
        program.compute(&process, "user@host:~$").unwrap();
        assert_eq!(program.current_state(), Some("1/2: ls …"));
    }

    #[test]
    fn test_empty_script_finishes_immediately() {
        let (process, recorder) = recording_process(simple_os());
        let mut program = script(&["  "]);
        assert!(!program.compute(&process, "user@host:~$").unwrap());
        assert!(recorder.entered().is_empty());
    }

    #[test]
    fn test_setup_script_blocks() {
        let text = "
            sudo -i

            : configure SSH port
            sed -i 's/^#Port 22$/Port 1234/g' /etc/ssh/sshd_config

            : remove unused DHCP clients
            apt-get purge -qq -m isc-dhcp-client
            apt-get autoremove -y -m
        ";
        let programs = Program::from_setup_script("setup", simple_os().ready_pattern.clone(), text);
        let names: Vec<_> = programs.iter().map(Program::name).collect();
        assert_eq!(
            names,
            vec!["setup: sudo -i", "configure SSH port", "remove unused DHCP clients"]
        );
        assert_eq!(programs[2].state_count(), 4);
    }
}
