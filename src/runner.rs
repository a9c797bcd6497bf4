//! Build execution: spawns the build tool, relays its output and tracks the
//! run's state.
//!
//! A [`BuildRun`] moves `Pending -> Running -> {Succeeded | Failed | Cancelled}`
//! exactly once. Output is read on two reader threads (stdout and stderr) and
//! funnelled through one channel to a supervisor thread, which is the only
//! caller of `on_output`. Each stream keeps its own order; the interleaving of
//! the two streams follows arrival at the channel. `on_complete` runs once,
//! after the last `on_output` call.
//!
//! The run ends when the tool's process exits, not when its pipes close:
//! compiler servers and shader workers it leaves behind may keep them open.
//! Output still arriving shortly after the exit is relayed before completion.

use crate::error::{Error, Result};
use crate::operations::BuildCommand;
use crate::output::{OutputLine, StreamKind};
use chrono::{DateTime, Local};
use crossbeam_channel::{RecvTimeoutError, Sender};
use serde::Serialize;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long output is still relayed once the tool itself has exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub state: RunState,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl RunSummary {
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }

    /// `Err(BuildFailure)` for a failed run; everything else passes through.
    pub fn into_result(self) -> Result<RunSummary> {
        match self.state {
            RunState::Failed => Err(Error::BuildFailure {
                exit_code: self.exit_code.unwrap_or(-1),
            }),
            _ => Ok(self),
        }
    }
}

#[derive(Debug)]
struct Status {
    summary: RunSummary,
    /// Set once `on_complete` has returned (or will never be called).
    delivered: bool,
}

struct Shared {
    command: BuildCommand,
    status: Mutex<Status>,
    delivered: Condvar,
    child: Mutex<Option<Child>>,
    cancel_requested: AtomicBool,
}

/// Handle to one execution of a [`BuildCommand`]. Clones share the same run.
#[derive(Clone)]
pub struct BuildRun {
    shared: Arc<Shared>,
}

impl fmt::Debug for BuildRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRun")
            .field("command", &self.shared.command)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Launches `command` and relays its output.
///
/// A process that cannot be started yields [`Error::LaunchFailure`]; no run is
/// created in that case.
pub fn execute<O, C>(command: &BuildCommand, on_output: O, on_complete: C) -> Result<BuildRun>
where
    O: FnMut(OutputLine) + Send + 'static,
    C: FnOnce(RunSummary) + Send + 'static,
{
    let run = BuildRun::new(command.clone());
    run.start(on_output, on_complete)?;
    Ok(run)
}

impl BuildRun {
    pub fn new(command: BuildCommand) -> Self {
        Self {
            shared: Arc::new(Shared {
                command,
                status: Mutex::new(Status {
                    summary: RunSummary {
                        state: RunState::Pending,
                        exit_code: None,
                        started_at: None,
                        finished_at: None,
                    },
                    delivered: false,
                }),
                delivered: Condvar::new(),
                child: Mutex::new(None),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    /// The exact argument vector handed to the OS.
    pub fn command_line(&self) -> Vec<String> {
        self.shared.command.command_line()
    }

    pub fn state(&self) -> RunState {
        lock(&self.shared.status).summary.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        lock(&self.shared.status).summary.exit_code
    }

    pub fn summary(&self) -> RunSummary {
        lock(&self.shared.status).summary.clone()
    }

    /// Spawns the process for a pending run.
    pub fn start<O, C>(&self, on_output: O, on_complete: C) -> Result<()>
    where
        O: FnMut(OutputLine) + Send + 'static,
        C: FnOnce(RunSummary) + Send + 'static,
    {
        // Held until the child is registered so `cancel` never sees a running
        // run without a process to kill.
        let mut status = lock(&self.shared.status);
        if status.summary.state != RunState::Pending {
            return Err(Error::RunNotPending(status.summary.state));
        }

        let command = &self.shared.command;
        tracing::info!("Build command: {}", command.display());

        let mut child = spawn(command)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        *lock(&self.shared.child) = Some(child);

        status.summary.state = RunState::Running;
        status.summary.started_at = Some(Local::now());
        drop(status);

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut readers = Vec::new();
        let streams = [
            stdout.map(|s| Box::new(s) as Box<dyn Read + Send>),
            stderr.map(|s| Box::new(s) as Box<dyn Read + Send>),
        ];
        for (stream, kind) in streams.into_iter().zip([StreamKind::Stdout, StreamKind::Stderr]) {
            let Some(stream) = stream else { continue };
            match spawn_reader(stream, kind, tx.clone()) {
                Ok(handle) => readers.push(handle),
                Err(e) => return Err(self.abort(e)),
            }
        }
        drop(tx);

        let run = self.clone();
        let supervisor = thread::Builder::new()
            .name("uebuilder-supervisor".into())
            .spawn(move || {
                let mut on_output = on_output;
                let exit = loop {
                    match rx.recv_timeout(EXIT_POLL_INTERVAL) {
                        Ok(line) => on_output(line),
                        Err(RecvTimeoutError::Disconnected) => break run.wait_for_exit(),
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    if let Some(exit) = run.poll_exit() {
                        break exit;
                    }
                };

                // Helpers spawned by the tool may inherit the pipes and outlive it.
                // Take what is already buffered, then stop listening.
                let deadline = Instant::now() + OUTPUT_GRACE;
                while let Ok(line) = rx.recv_deadline(deadline) {
                    on_output(line);
                }
                drop(rx);
                for reader in readers {
                    if reader.is_finished() {
                        let _ = reader.join();
                    } else {
                        tracing::debug!("Build output pipe still held open after exit");
                    }
                }

                let summary = run.finish(exit);
                on_complete(summary);

                let mut status = lock(&run.shared.status);
                status.delivered = true;
                run.shared.delivered.notify_all();
            });

        match supervisor {
            Ok(_) => Ok(()),
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Tears down a run whose supervision could not be set up. The run ends as
    /// `Failed` without any callbacks.
    fn abort(&self, cause: std::io::Error) -> Error {
        if let Some(mut child) = lock(&self.shared.child).take() {
            terminate(&mut child);
            let _ = child.wait();
        }
        let mut status = lock(&self.shared.status);
        status.summary.state = RunState::Failed;
        status.summary.finished_at = Some(Local::now());
        status.delivered = true;
        self.shared.delivered.notify_all();
        tracing::error!("Could not supervise build process: {}", cause);
        Error::Io(cause)
    }

    /// Requests termination. Returns `true` if this call moved the run towards
    /// `Cancelled`; calls on a terminal run, or repeated calls, do nothing.
    pub fn cancel(&self) -> bool {
        let mut status = lock(&self.shared.status);
        match status.summary.state {
            RunState::Pending => {
                status.summary.state = RunState::Cancelled;
                status.summary.finished_at = Some(Local::now());
                status.delivered = true;
                self.shared.delivered.notify_all();
                tracing::info!("Plugin build cancelled before start");
                true
            }
            RunState::Running => {
                if self.shared.cancel_requested.swap(true, Ordering::SeqCst) {
                    return false;
                }
                drop(status);

                if let Some(child) = lock(&self.shared.child).as_mut() {
                    terminate(child);
                }
                tracing::warn!("Plugin build cancelled by user");
                true
            }
            _ => false,
        }
    }

    /// Blocks until the run is terminal and `on_complete` has returned.
    pub fn wait(&self) -> RunSummary {
        let mut status = lock(&self.shared.status);
        while !status.delivered {
            status = self
                .shared
                .delivered
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
        status.summary.clone()
    }

    /// Like [`BuildRun::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RunSummary> {
        let status = lock(&self.shared.status);
        let (status, _) = self
            .shared
            .delivered
            .wait_timeout_while(status, timeout, |s| !s.delivered)
            .unwrap_or_else(PoisonError::into_inner);
        status.delivered.then(|| status.summary.clone())
    }

    /// Polls the child so `cancel` can take the lock between checks.
    fn wait_for_exit(&self) -> std::io::Result<ExitStatus> {
        loop {
            if let Some(exit) = self.poll_exit() {
                return exit;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// `None` while the child is still running.
    fn poll_exit(&self) -> Option<std::io::Result<ExitStatus>> {
        let mut guard = lock(&self.shared.child);
        let Some(child) = guard.as_mut() else {
            return Some(Err(std::io::Error::other("child process handle missing")));
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                guard.take();
                Some(Ok(status))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }

    fn finish(&self, exit: std::io::Result<ExitStatus>) -> RunSummary {
        let mut status = lock(&self.shared.status);
        let cancelled = self.shared.cancel_requested.load(Ordering::SeqCst);

        let (state, exit_code) = match exit {
            Ok(exit) if cancelled => (RunState::Cancelled, exit.code()),
            Ok(exit) if exit.success() => (RunState::Succeeded, exit.code()),
            Ok(exit) => (RunState::Failed, exit.code()),
            Err(_) if cancelled => (RunState::Cancelled, None),
            Err(e) => {
                tracing::error!("Waiting for build process failed: {}", e);
                (RunState::Failed, None)
            }
        };

        status.summary.state = state;
        status.summary.exit_code = exit_code;
        status.summary.finished_at = Some(Local::now());

        match state {
            RunState::Succeeded => tracing::info!("Plugin build completed successfully"),
            RunState::Failed => tracing::error!(
                "Plugin build failed with error (code: {})",
                exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
            ),
            _ => tracing::info!("Plugin build terminated after cancellation"),
        }

        status.summary.clone()
    }
}

fn spawn(command: &BuildCommand) -> Result<Child> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group, so cancellation reaches UBT and compiler children too
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(0x00000200); // CREATE_NEW_PROCESS_GROUP
    }

    cmd.spawn().map_err(|source| Error::LaunchFailure {
        program: command.program.display().to_string(),
        source,
    })
}

fn spawn_reader<R>(
    stream: R,
    kind: StreamKind,
    tx: Sender<OutputLine>,
) -> std::io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let name = match kind {
        StreamKind::Stdout => "uebuilder-stdout",
        StreamKind::Stderr => "uebuilder-stderr",
    };
    thread::Builder::new().name(name.into()).spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    // UAT output is not guaranteed to be UTF-8 on every locale
                    let text = String::from_utf8_lossy(&buf);
                    let text = text.trim_end_matches(['\r', '\n']);
                    if text.trim().is_empty() {
                        continue;
                    }
                    if tx.send(OutputLine::new(text, kind)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Error reading build output: {}", e);
                    break;
                }
            }
        }
    })
}

/// Kills the whole process tree rooted at `child`.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child leads its own process group (see `spawn`).
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }

    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &child.id().to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    if let Err(e) = child.kill() {
        tracing::debug!("Direct kill of build process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Succeeded.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
    }

    #[test]
    fn test_cancel_pending_run_is_terminal_once() {
        let run = BuildRun::new(BuildCommand {
            program: "does-not-matter".into(),
            args: vec![],
            working_dir: ".".into(),
        });
        assert_eq!(run.state(), RunState::Pending);

        assert!(run.cancel());
        assert_eq!(run.state(), RunState::Cancelled);
        assert!(!run.cancel());
        assert_eq!(run.wait().state, RunState::Cancelled);

        let err = run.start(|_| {}, |_| {}).unwrap_err();
        assert!(matches!(err, Error::RunNotPending(RunState::Cancelled)));
    }

    #[test]
    fn test_summary_into_result() {
        let failed = RunSummary {
            state: RunState::Failed,
            exit_code: Some(6),
            started_at: None,
            finished_at: None,
        };
        assert!(matches!(
            failed.into_result(),
            Err(Error::BuildFailure { exit_code: 6 })
        ));
    }
}
