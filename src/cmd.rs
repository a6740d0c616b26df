use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{ProvisionError, ProvisionResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    ends_at: Instant,
    total: Duration,
}

/// Time budget of the step currently running, shared by every shell
/// of a host. While it is set, commands get whatever is left of it
/// instead of the shell's own timeout.
#[derive(Debug, Clone, Default)]
pub struct Deadline(Arc<Mutex<Option<Budget>>>);

impl Deadline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, budget: Duration) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(Budget {
            ends_at: Instant::now() + budget,
            total: budget,
        });
    }

    pub fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Time left and the full budget, `None` outside a step.
    #[must_use]
    pub fn remaining(&self) -> Option<(Duration, Duration)> {
        let budget = (*self.0.lock().unwrap_or_else(PoisonError::into_inner))?;
        Some((
            budget.ends_at.saturating_duration_since(Instant::now()),
            budget.total,
        ))
    }
}

/// Runs external commands with a hard timeout. Every collaborator
/// talks to the host through one of these.
#[derive(Debug, Clone)]
pub struct Shell {
    timeout: Duration,
    env: Vec<(String, String)>,
    deadline: Deadline,
}

impl Shell {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            env: Vec::new(),
            deadline: Deadline::new(),
        }
    }

    /// Bound commands by a step deadline shared with other shells.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a command and capture its stdout. Fails if the command
    /// returns a non-zero exit code.
    pub fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<String> {
        let output = self.output(program, args, None)?;
        into_stdout(program, args, output)
    }

    /// Run a command that pipes its stdin from a byte slice.
    pub fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin_data: &[u8],
    ) -> ProvisionResult<String> {
        let output = self.output(program, args, Some(stdin_data))?;
        into_stdout(program, args, output)
    }

    /// Run a shell snippet (via `sh -c`).
    pub fn run_script(&self, script: &str) -> ProvisionResult<String> {
        self.run("sh", &["-c", script])
    }

    /// Run a command used as a check. A non-zero exit is a `false`
    /// answer, not an error.
    pub fn check(&self, program: &str, args: &[&str]) -> ProvisionResult<bool> {
        Ok(self.output(program, args, None)?.success())
    }

    /// Run a command and return everything it produced regardless of
    /// its exit status.
    pub fn output(
        &self,
        program: &str,
        args: &[&str],
        stdin_data: Option<&[u8]>,
    ) -> ProvisionResult<CommandOutput> {
        log::debug!("exec: {}", format_command(program, args));

        let (limit, reported) = self.limit();
        if limit.is_zero() {
            return Err(ProvisionError::CommandTimedOut {
                command: format_command(program, args),
                after: reported,
            });
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProvisionError::CommandNotFound(program.to_string())
            } else {
                ProvisionError::Io(e)
            }
        })?;

        let writer = stdin_data.and_then(|data| feed(child.stdin.take(), data.to_vec()));
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait(&mut child, limit);
        if let Some(handle) = writer {
            let _ = handle.join();
        }
        let Some(status) = status? else {
            return Err(ProvisionError::CommandTimedOut {
                command: format_command(program, args),
                after: reported,
            });
        };

        Ok(CommandOutput {
            status,
            stdout: join_drain(stdout).trim().to_string(),
            stderr: join_drain(stderr).trim().to_string(),
        })
    }

    /// How long the next command may run, and the budget to report
    /// when it does not finish.
    fn limit(&self) -> (Duration, Duration) {
        self.deadline
            .remaining()
            .unwrap_or((self.timeout, self.timeout))
    }
}

/// Wait for the child, killing it once `limit` has passed. `None`
/// means it was killed.
fn wait(child: &mut Child, limit: Duration) -> ProvisionResult<Option<ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= limit {
            // The process may have exited between the poll and the
            // kill; either way it is reaped here.
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(limit.saturating_sub(started.elapsed())));
    }
}

/// Render a command line for logs and error messages.
#[must_use]
pub fn format_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| (*a).to_string()));
    parts.join(" ")
}

fn into_stdout(program: &str, args: &[&str], output: CommandOutput) -> ProvisionResult<String> {
    if output.success() {
        Ok(output.stdout)
    } else {
        log::debug!("stderr: {}", output.stderr);
        Err(ProvisionError::CommandFailed {
            command: format_command(program, args),
            code: output.status.code(),
            stderr: output.stderr,
        })
    }
}

/// Write stdin from its own thread so a child that does not read it
/// cannot keep us from enforcing the timeout. Closing the pipe when
/// done signals end of input.
fn feed<W: Write + Send + 'static>(pipe: Option<W>, data: Vec<u8>) -> Option<JoinHandle<()>> {
    pipe.map(|mut writer| {
        thread::spawn(move || {
            if let Err(e) = writer.write_all(&data) {
                log::debug!("stdin closed early: {e}");
            }
        })
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
