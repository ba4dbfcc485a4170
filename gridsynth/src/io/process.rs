//! Child-process execution with a wall-clock limit and bounded output capture.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

/// How long output readers may lag behind the child's exit.
const READER_GRACE: Duration = Duration::from_secs(1);

type Captured = Result<(Vec<u8>, usize)>;

/// Captured result of one child process.
#[derive(Debug)]
pub struct ChildOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the capture limit, across both streams.
    pub truncated: usize,
    pub timed_out: bool,
}

impl ChildOutput {
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run `cmd` feeding `stdin`, killing it after `timeout`.
///
/// Both pipes are drained on reader threads while the child runs so a chatty
/// child can never block on a full pipe. At most `output_limit` bytes per
/// stream are kept.
///
/// On unix the child leads its own process group, and the whole group is
/// killed once the child is done, so processes it spawned cannot outlive the
/// call or hold its pipes open.
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: &[u8],
    timeout: Duration,
    output_limit: usize,
) -> Result<ChildOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    trace!("spawning child process");
    let mut child = cmd.spawn().context("spawn child process")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_rx = spawn_reader(stdout, output_limit);
    let stderr_rx = spawn_reader(stderr, output_limit);

    {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits before reading its input closes the pipe; that
        // shows up in its exit status, not here.
        if let Err(err) = child_stdin.write_all(stdin) {
            debug!(err = %err, "child closed stdin early");
        }
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => status,
        None => {
            debug!(timeout_ms = timeout.as_millis() as u64, "child timed out, killing");
            timed_out = true;
            kill_process_group(&child);
            child.kill().context("kill child")?;
            child.wait().context("wait child after kill")?
        }
    };
    kill_process_group(&child);

    let deadline = Instant::now() + READER_GRACE;
    let (stdout, stdout_truncated) = collect_reader(&stdout_rx, deadline, "stdout")?;
    let (stderr, stderr_truncated) = collect_reader(&stderr_rx, deadline, "stderr")?;
    let truncated = stdout_truncated + stderr_truncated;
    if truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "child output truncated");
    }

    Ok(ChildOutput {
        status,
        stdout,
        stderr,
        truncated,
        timed_out,
    })
}

/// SIGKILL every process left in the child's group.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => trace!(pgid, "killed child process group"),
        // Nothing left in the group.
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid, err = %err, "could not kill child process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_: &Child) {}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only if the caller abandoned this stream.
        let _ = tx.send(read_limited(reader, limit));
    });
    rx
}

/// Wait for a reader until `deadline`. A pipe still held open by a process
/// outside the child's group is abandoned with nothing captured.
fn collect_reader(
    rx: &Receiver<Captured>,
    deadline: Instant,
    stream: &str,
) -> Result<(Vec<u8>, usize)> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(captured) => captured,
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "pipe still open after child exit, abandoning output");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{stream} reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
