use std::collections::VecDeque;
use std::io::Read;
use std::process::{ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info};

use super::Emulator;
use crate::console::{ConsoleInput, LineAssembler, OperatingSystemProcess};
use crate::error::{Error, Result};
use crate::os::OperatingSystemImage;
use crate::program::{login_program, shutdown_program, Program};

/// Raw output of the emulator, as read by the pipe reader threads.
#[derive(Debug)]
pub enum ConsoleEvent {
    Output(Vec<u8>),
    Error(Vec<u8>),
    /// One of the two pipes reached end of file.
    Closed,
}

fn spawn_reader<R, F>(mut stream: R, tx: Sender<ConsoleEvent>, wrap: F)
where
    R: Read + Send + 'static,
    F: Fn(Vec<u8>) -> ConsoleEvent + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = tx.send(ConsoleEvent::Closed);
    });
}

/// Boots `image` and runs `programs` on its console.
///
/// The queue is `[login] + programs + [shutdown]`, each bookend subject to
/// the emulator's `auto_login`/`auto_shutdown` flags. Returns the exit
/// status of the emulator; a stuck console, a rejected password or the
/// emulator exiting with unfinished programs is an error.
pub fn boot(
    image: &OperatingSystemImage,
    programs: Vec<Program>,
    emulator: &Emulator,
) -> anyhow::Result<ExitStatus> {
    let os = image.shared_os();
    let mut queue: VecDeque<Program> = VecDeque::with_capacity(programs.len() + 2);
    if emulator.auto_login && !image.credentials.is_empty() {
        queue.push_back(login_program(&os, &image.credentials, &emulator.timing));
    }
    queue.extend(programs);
    if emulator.auto_shutdown {
        queue.push_back(shutdown_program(&os, &emulator.timing));
    }

    let mut cmd = emulator.command.build(image.path());
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    info!(
        "Booting {} ({}) to run: {}",
        image.file_name(),
        os.full_name,
        queue.iter().map(Program::name).collect::<Vec<_>>().join(", ")
    );
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn emulator {:?}", cmd.get_program()))?;
    let stdin = child.stdin.take().context("Failed to capture emulator stdin")?;
    let stdout = child.stdout.take().context("Failed to capture emulator stdout")?;
    let stderr = child.stderr.take().context("Failed to capture emulator stderr")?;

    let (tx, rx) = mpsc::channel();
    spawn_reader(stdout, tx.clone(), ConsoleEvent::Output);
    spawn_reader(stderr, tx, ConsoleEvent::Error);

    let process = OperatingSystemProcess::with_child(Arc::clone(&os), ConsoleInput::new(stdin), child);
    process.feedback(&format!("Emulator started (PID {:?})", process.pid()));

    if let Err(err) = drive(&process, &mut queue, &rx, emulator.idle_flush) {
        process.kill();
        let _ = process.wait();
        return Err(err.into());
    }

    let status = process.wait()?;
    let pending: Vec<String> = queue
        .iter()
        .filter(|program| !program.finishes_on_exit())
        .map(|program| program.name().to_string())
        .collect();
    match status {
        Some(status) if pending.is_empty() => {
            process.feedback(&format!("Emulator exited with {}", status));
            Ok(status)
        }
        status => {
            let err = Error::process_died(status, pending);
            process.negative_feedback(&err.to_string());
            Err(err.into())
        }
    }
}

/// Feeds emulator output to the program queue until both pipes close.
///
/// Partial lines are flushed once no output arrived for `idle_flush`. If the
/// queue runs empty with no program waiting for the emulator to exit, the
/// emulator is stopped.
pub fn drive(
    process: &OperatingSystemProcess,
    queue: &mut VecDeque<Program>,
    events: &Receiver<ConsoleEvent>,
    idle_flush: Duration,
) -> Result<()> {
    let mut stdout = LineAssembler::new();
    let mut stderr = LineAssembler::new();
    let mut open_pipes = 2;
    let mut stopping = false;

    while open_pipes > 0 {
        match events.recv_timeout(idle_flush) {
            Ok(ConsoleEvent::Output(bytes)) => {
                for line in stdout.push(&bytes) {
                    dispatch(process, queue, &line)?;
                }
            }
            Ok(ConsoleEvent::Error(bytes)) => {
                for line in stderr.push(&bytes) {
                    route_error(process, &line)?;
                }
            }
            Ok(ConsoleEvent::Closed) => open_pipes -= 1,
            Err(RecvTimeoutError::Timeout) => {
                if let Some(line) = stdout.flush_partial() {
                    dispatch(process, queue, &line)?;
                }
                if let Some(line) = stderr.flush_partial() {
                    route_error(process, &line)?;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if queue.is_empty() && !stopping {
            process.feedback("All programs finished; stopping the emulator");
            process.kill();
            stopping = true;
        }
    }

    if let Some(line) = stdout.finish() {
        dispatch(process, queue, &line)?;
    }
    if let Some(line) = stderr.finish() {
        route_error(process, &line)?;
    }
    Ok(())
}

fn route_error(process: &OperatingSystemProcess, line: &str) -> Result<()> {
    process.check_stuck(line)?;
    process.negative_feedback(line);
    Ok(())
}

/// Hands `line` to the head of the queue.
///
/// When the head finishes, the same line is handed to the new head once:
/// the prompt that ends one program is usually the one the next program is
/// waiting for. This is not repeated if the new head finishes on it too.
fn dispatch(
    process: &OperatingSystemProcess,
    queue: &mut VecDeque<Program>,
    line: &str,
) -> Result<()> {
    process.check_stuck(line)?;

    let Some(head) = queue.front_mut() else {
        debug!("{}", line);
        return Ok(());
    };
    info!("{} | {}", head, line);
    if head.compute(process, line)? {
        return Ok(());
    }
    finish_head(process, queue);

    if let Some(next) = queue.front_mut() {
        if !next.compute(process, line)? {
            finish_head(process, queue);
        }
    }
    Ok(())
}

fn finish_head(process: &OperatingSystemProcess, queue: &mut VecDeque<Program>) {
    if let Some(done) = queue.pop_front() {
        process.feedback(&format!("{} finished after {} steps", done.name(), done.history().len()));
    }
}
