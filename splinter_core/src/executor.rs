use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use thiserror::Error;

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long output is still collected after a timed-out group was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Final classification of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The process exited on its own, with any exit code.
    Normal(i32),
    /// The process was terminated by the given signal.
    KilledBySignal(i32),
    /// The deadline passed; the process group was killed by the harness.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitKind,
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Exit code using the negative-signal convention: `-s` for a process
    /// killed by signal `s`. `None` for a timed out run.
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ExitKind::Normal(code) => Some(code),
            ExitKind::KilledBySignal(signal) => Some(-signal),
            ExitKind::TimedOut => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self.status, ExitKind::Normal(_))
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("no target command configured")]
    EmptyCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to stage input file: {0}")]
    InputFile(#[source] io::Error),

    #[error("input file path is not valid UTF-8")]
    NonUtf8Path,

    #[error("failed waiting for target: {0}")]
    Wait(#[source] io::Error),
}

/// Runs one candidate through a target and classifies the outcome.
pub trait Executor {
    fn execute_sync(&mut self, input: &[u8]) -> Result<ExecutionResult, ExecutorError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputDelivery {
    /// Candidate bytes are written to the target's stdin.
    #[default]
    StdIn,
    /// Candidate bytes are written to a temporary file; `{}` in the template
    /// is replaced by its path and the result is appended to the arguments.
    File { template: String },
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// Spawns a fresh child process for every execution.
///
/// The child leads its own process group so a timeout can reclaim it along
/// with anything it forked. Stdin is fed and stdout/stderr are drained on
/// helper threads. The deadline covers both the child's exit and the close of
/// its pipes, so a descendant that keeps an inherited pipe open counts as a
/// timeout.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Result<Self, ExecutorError> {
        if config.command.is_empty() {
            return Err(ExecutorError::EmptyCommand);
        }
        Ok(Self { config })
    }

    fn build_command(
        &self,
        input_file: Option<&NamedTempFile>,
    ) -> Result<Command, ExecutorError> {
        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..]);

        if let (InputDelivery::File { template }, Some(file)) =
            (&self.config.input_delivery, input_file)
        {
            let path = file.path().to_str().ok_or(ExecutorError::NonUtf8Path)?;
            for part in template.replace("{}", path).split_whitespace() {
                cmd.arg(part);
            }
        }

        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        let stdin = match self.config.input_delivery {
            InputDelivery::StdIn => Stdio::piped(),
            InputDelivery::File { .. } => Stdio::null(),
        };
        cmd.stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        Ok(cmd)
    }

    /// Polls until the child exits or `deadline` passes. `None` means the
    /// deadline passed with the child still running.
    fn wait_with_deadline(
        child: &mut Child,
        deadline: Instant,
    ) -> Result<Option<ExitStatus>, ExecutorError> {
        loop {
            if let Some(status) = child.try_wait().map_err(ExecutorError::Wait)? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kills the still-running child's whole process group, then reaps the
    /// child.
    fn reclaim(child: &mut Child) -> Result<(), ExecutorError> {
        let pgid = child.id() as libc::pid_t;
        if let Err(e) = kill_group(pgid) {
            warn!("killpg({pgid}) failed: {e}; killing the child alone");
            if let Err(e) = child.kill() {
                warn!("Failed to kill timed-out target: {e}");
            }
        }
        child.wait().map_err(ExecutorError::Wait)?;
        Ok(())
    }
}

/// Sends `SIGKILL` to every process left in group `pgid`. An empty group is
/// not an error.
fn kill_group(pgid: libc::pid_t) -> io::Result<()> {
    // SAFETY: killpg takes plain integers. The pid of a group leader is not
    // recycled while the group still has members.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

fn classify(status: ExitStatus) -> ExitKind {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitKind::Normal(code),
        (None, Some(signal)) => ExitKind::KilledBySignal(signal),
        (None, None) => ExitKind::Normal(status.into_raw()),
    }
}

/// Completion of one pipe helper thread.
enum PipeEvent {
    Written(io::Result<()>),
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// The helper threads attached to a child's stdio.
struct Pipes {
    events: Receiver<PipeEvent>,
    pending: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Pipes {
    fn attach(child: &mut Child, input: &[u8]) -> Self {
        let (tx, events) = mpsc::channel();
        let mut pending = 0;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = input.to_vec();
            let tx = tx.clone();
            thread::spawn(move || {
                let written = match stdin.write_all(&payload) {
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                };
                // The receiver is gone once the run has been abandoned.
                let _ = tx.send(PipeEvent::Written(written));
            });
            pending += 1;
        }
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone(), PipeEvent::Stdout);
            pending += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx, PipeEvent::Stderr);
            pending += 1;
        }

        Self {
            events,
            pending,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Collects helper results until every pipe has closed or `deadline`
    /// passes. Returns `false` if a pipe was still open at the deadline.
    fn drain_until(&mut self, deadline: Instant) -> bool {
        while self.pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) => {
                    self.pending -= 1;
                    self.record(event);
                }
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("A pipe helper thread exited without reporting");
                    self.pending = 0;
                }
            }
        }
        true
    }

    fn record(&mut self, event: PipeEvent) {
        match event {
            PipeEvent::Written(Ok(())) => {}
            PipeEvent::Written(Err(e)) => debug!("Writing candidate to target stdin failed: {e}"),
            PipeEvent::Stdout(bytes) => self.stdout = bytes,
            PipeEvent::Stderr(bytes) => self.stderr = bytes,
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    events: Sender<PipeEvent>,
    wrap: fn(Vec<u8>) -> PipeEvent,
) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!("Target output pipe closed with error: {e}");
        }
        let _ = events.send(wrap(buf));
    });
}

impl Executor for CommandExecutor {
    fn execute_sync(&mut self, input: &[u8]) -> Result<ExecutionResult, ExecutorError> {
        let input_file = match self.config.input_delivery {
            InputDelivery::StdIn => None,
            InputDelivery::File { .. } => {
                let mut file = NamedTempFile::new().map_err(ExecutorError::InputFile)?;
                file.write_all(input)
                    .and_then(|()| file.flush())
                    .map_err(ExecutorError::InputFile)?;
                Some(file)
            }
        };

        let mut cmd = self.build_command(input_file.as_ref())?;
        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: self.config.command[0].clone(),
            source,
        })?;
        let pgid = child.id() as libc::pid_t;
        debug!("Spawned target pid {pgid}");

        let mut pipes = Pipes::attach(&mut child, input);

        let status = match Self::wait_with_deadline(&mut child, deadline) {
            Ok(Some(status)) if pipes.drain_until(deadline) => {
                if let Err(e) = kill_group(pgid) {
                    warn!("Failed to kill leftover processes of group {pgid}: {e}");
                }
                classify(status)
            }
            Ok(Some(_)) => {
                debug!(
                    "Target pipes still open after {:?}, killing its process group",
                    self.config.timeout
                );
                if let Err(e) = kill_group(pgid) {
                    warn!("Failed to kill process group {pgid}: {e}");
                }
                ExitKind::TimedOut
            }
            Ok(None) => {
                debug!(
                    "Target exceeded {:?}, killing its process group",
                    self.config.timeout
                );
                Self::reclaim(&mut child)?;
                ExitKind::TimedOut
            }
            Err(e) => {
                if let Err(reclaim_err) = Self::reclaim(&mut child) {
                    warn!("Failed to reclaim target after wait error: {reclaim_err}");
                }
                return Err(e);
            }
        };
        let elapsed = start.elapsed();

        if status == ExitKind::TimedOut && !pipes.drain_until(Instant::now() + DRAIN_GRACE) {
            debug!("Target pipes stayed open after the kill; dropping their output");
        }

        Ok(ExecutionResult {
            stdout: pipes.stdout,
            stderr: pipes.stderr,
            status,
            elapsed,
        })
    }
}
