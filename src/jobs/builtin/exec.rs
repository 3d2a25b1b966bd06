//! Exec job: runs a shell command on the node.
//!
//! The child process is polled rather than waited on so the job can notice
//! cancellation; a cancelled or timed-out child is killed.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::error::JobError;
use crate::jobs::handler::{JobHandler, WorkerContext};
use crate::stream::CommandCode;

/// Maximum output size before truncation (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Commands that are always refused.
static BLOCKED_COMMANDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "rm -rf /",
        "rm -rf /*",
        ":(){ :|:& };:",
        "dd if=/dev/zero",
        "mkfs",
        "chmod -r 777 /",
    ])
});

/// Shell command execution job.
///
/// Payload: `{"command": "...", "workdir": "...", "timeout": secs}`; only
/// `command` is required.
#[derive(Debug, Default)]
pub struct ExecJob;

impl ExecJob {
    fn is_blocked(cmd: &str) -> bool {
        let normalized = cmd.to_lowercase();
        BLOCKED_COMMANDS.iter().any(|b| normalized.contains(b))
    }

    fn spawn(cmd: &str, workdir: &Path) -> std::io::Result<Child> {
        let mut command = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", cmd]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", cmd]);
            c
        };

        command
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

impl JobHandler for ExecJob {
    fn cmd_code(&self) -> CommandCode {
        CommandCode::Exec
    }

    fn run(&self, ctx: &WorkerContext) -> Result<(), JobError> {
        let invalid = |reason: String| JobError::InvalidInput {
            id: ctx.job_id,
            reason,
        };
        let initial = ctx
            .initial
            .as_ref()
            .ok_or_else(|| invalid("missing initial stream".to_string()))?;
        let cmd = initial
            .require_str("command")
            .map_err(|e| invalid(e.to_string()))?;

        if Self::is_blocked(cmd) {
            return Err(invalid("command contains blocked pattern".to_string()));
        }
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled { id: ctx.job_id });
        }

        let workdir = match initial.require_str("workdir") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let timeout = initial
            .require_u64("timeout")
            .map(Duration::from_secs)
            .unwrap_or(ctx.exec_timeout);

        let mut child = Self::spawn(cmd, &workdir).map_err(|e| JobError::ExecutionFailed {
            id: ctx.job_id,
            reason: format!("failed to spawn command: {e}"),
        })?;
        tracing::debug!(job_id = ctx.job_id, pid = child.id(), "Spawned command");

        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);

        // The shell exiting is not enough: a backgrounded process can hold
        // the pipes open, so the command only counts as done once both
        // readers have finished.
        let start = Instant::now();
        let mut exited = None;
        let status = loop {
            if exited.is_none() {
                match child.try_wait() {
                    Ok(status) => exited = status,
                    Err(e) => {
                        stop(&mut child);
                        return Err(JobError::ExecutionFailed {
                            id: ctx.job_id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            match exited {
                Some(status) if drained(&stdout) && drained(&stderr) => break status,
                _ => {}
            }

            // Readers still blocked on an inherited pipe are left behind and
            // exit once the last writer closes it.
            if ctx.is_cancelled() {
                stop(&mut child);
                return Err(JobError::Cancelled { id: ctx.job_id });
            }
            if start.elapsed() >= timeout {
                stop(&mut child);
                return Err(JobError::ExecutionFailed {
                    id: ctx.job_id,
                    reason: format!("command timed out after {timeout:?}"),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout.map(collect).unwrap_or_default();
        let stderr = stderr.map(collect).unwrap_or_default();
        let output = if stderr.is_empty() {
            stdout
        } else if stdout.is_empty() {
            stderr
        } else {
            format!("{stdout}\n\n--- stderr ---\n{stderr}")
        };
        let exit_code = status.code().unwrap_or(-1);

        ctx.reply(json!({
            "output": output,
            "exit_code": exit_code,
            "success": exit_code == 0,
            "duration_ms": start.elapsed().as_millis() as u64,
        }));
        Ok(())
    }
}

/// Kill the shell if it is still running and reap it.
fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drained(reader: &Option<JoinHandle<String>>) -> bool {
    reader.as_ref().is_none_or(JoinHandle::is_finished)
}

/// Drain a pipe on its own thread so a chatty child never blocks on a full
/// pipe while we poll it.
fn capture<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        truncate_output(&String::from_utf8_lossy(&buf))
    })
}

fn collect(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s.to_string();
    }
    let mut end = MAX_OUTPUT_SIZE;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n\n... [truncated, {} bytes total]", &s[..end], s.len())
}
