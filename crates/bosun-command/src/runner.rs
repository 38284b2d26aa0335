//! Runner abstraction and the local-subprocess backend.
//!
//! A [`CommandRunner`] takes a fully-expanded argv plus its I/O wiring and
//! returns an exit code; it never returns a Rust error, because every
//! failure mode has a chat-facing representation (stderr text plus a
//! conventional code). The contract:
//!
//! - 0-255: the child's own exit status
//! - 127: failed to start / command not found
//! - 143: terminated by timeout or signal (128 + SIGTERM)

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::output::OutputWriter;

pub const EXIT_PARSE_ERROR: i32 = 2;
pub const EXIT_NOT_FOUND: i32 = 127;
pub const EXIT_TERMINATED: i32 = 143;

/// Grace period between SIGTERM and SIGKILL escalation.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Everything a runner needs for one command execution.
pub struct RunRequest<'a> {
    /// Expanded argv; never empty.
    pub argv: &'a [String],
    /// Text piped to the child's stdin (lines after the first message line).
    pub stdin: &'a str,
    pub stdout: &'a OutputWriter,
    pub stderr: &'a OutputWriter,
    /// Deadline for the whole run; `None` disables the timeout.
    pub timeout: Option<Duration>,
    /// Explicit cancellation, independent of the deadline.
    pub cancel: CancellationToken,
}

/// One execution backend (local process, container exec, webhook).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and return the exit code.
    async fn run(&self, req: RunRequest<'_>) -> i32;
}

/// Runs the argv as a local subprocess in its own process group.
pub struct ExecRunner;

impl ExecRunner {
    pub fn new() -> Self {
        ExecRunner
    }
}

impl Default for ExecRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ExecRunner {
    async fn run(&self, req: RunRequest<'_>) -> i32 {
        let mut cmd = Command::new(&req.argv[0]);
        cmd.args(&req.argv[1..]);
        spawn_and_stream(cmd, req).await
    }
}

/// Spawn a prepared command and stream its output until exit.
///
/// Shared by the exec and compose runners. The child gets its own process
/// group so the kill sequence reaches grandchildren too; on deadline or
/// cancellation the whole group receives SIGTERM, then SIGKILL after
/// [`KILL_GRACE`].
pub(crate) async fn spawn_and_stream(mut cmd: Command, req: RunRequest<'_>) -> i32 {
    cmd.stdin(if req.stdin.is_empty() {
        Stdio::null()
    } else {
        Stdio::piped()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0)
    .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            req.stderr.write(e.to_string().as_bytes()).await;
            return EXIT_NOT_FOUND;
        }
    };
    let pid = child.id();

    if let Some(mut stdin) = child.stdin.take() {
        let payload = req.stdin.as_bytes().to_vec();
        tokio::spawn(async move {
            let _ = stdin.write_all(&payload).await;
            let _ = stdin.shutdown().await;
        });
    }
    let out_pump = tokio::spawn(pump(child.stdout.take(), req.stdout.clone()));
    let err_pump = tokio::spawn(pump(child.stderr.take(), req.stderr.clone()));

    let deadline = async {
        match req.timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };

    let status = tokio::select! {
        status = child.wait() => status,
        _ = deadline => {
            kill_group(pid).await;
            child.wait().await
        }
        _ = req.cancel.cancelled() => {
            kill_group(pid).await;
            child.wait().await
        }
    };

    // Drain whatever the child managed to write before it died.
    let _ = out_pump.await;
    let _ = err_pump.await;

    match status {
        Ok(status) => match status.code() {
            Some(code) => code,
            None => {
                if let Some(timeout) = req.timeout {
                    let note = format!("Timeout exceeded ({}s)", timeout.as_secs());
                    req.stderr.write(note.as_bytes()).await;
                }
                EXIT_TERMINATED
            }
        },
        Err(e) => {
            req.stderr.write(format!("Error: {e}").as_bytes()).await;
            EXIT_NOT_FOUND
        }
    }
}

/// SIGTERM the process group, wait out the grace period, then SIGKILL.
async fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    // process_group(0) gives the child a PGID equal to its own PID.
    let pgid = Pid::from_raw(pid as i32);
    if let Err(e) = signal::killpg(pgid, Signal::SIGTERM) {
        debug!(%pgid, error = %e, "SIGTERM to process group failed");
    }
    tokio::time::sleep(KILL_GRACE).await;
    if let Err(e) = signal::killpg(pgid, Signal::SIGKILL) {
        // ESRCH here just means the group exited within the grace period.
        debug!(%pgid, error = %e, "SIGKILL to process group failed");
    }
}

async fn pump<R>(src: Option<R>, writer: OutputWriter)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut src) = src else { return };
    let mut buf = [0u8; 4096];
    loop {
        match src.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => writer.write(&buf[..n]).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use bosun_types::ReplyRef;
    use tokio::sync::mpsc;

    use super::*;
    use crate::queue::CommandOutput;

    fn reply() -> ReplyRef {
        ReplyRef::Message {
            channel: "C1".into(),
            ts: "1.2".into(),
        }
    }

    struct Harness {
        stdout: OutputWriter,
        stderr: OutputWriter,
        rx: mpsc::Receiver<CommandOutput>,
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::channel(100);
        Harness {
            stdout: OutputWriter::stdout(tx.clone(), reply(), None),
            stderr: OutputWriter::stderr(tx, reply(), None),
            rx,
        }
    }

    async fn run_argv(argv: &[&str], stdin: &str, timeout: Option<Duration>) -> (i32, Vec<CommandOutput>) {
        let mut h = harness();
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let code = ExecRunner::new()
            .run(RunRequest {
                argv: &argv,
                stdin,
                stdout: &h.stdout,
                stderr: &h.stderr,
                timeout,
                cancel: CancellationToken::new(),
            })
            .await;
        h.stdout.flush().await;
        h.stderr.flush().await;
        let mut outs = Vec::new();
        while let Ok(o) = h.rx.try_recv() {
            outs.push(o);
        }
        (code, outs)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_zero() {
        let (code, outs) = run_argv(&["/bin/echo", "hello"], "", None).await;
        assert_eq!(code, 0);
        let text: String = outs.iter().filter_map(|o| o.text.clone()).collect();
        assert_eq!(text, "hello\n");
    }

    #[tokio::test]
    async fn propagates_nonzero_exit() {
        let (code, _) = run_argv(&["/bin/sh", "-c", "exit 42"], "", None).await;
        assert_eq!(code, 42);
    }

    #[tokio::test]
    async fn stderr_is_tagged_as_error_output() {
        let (code, outs) = run_argv(&["/bin/sh", "-c", "echo oops 1>&2"], "", None).await;
        assert_eq!(code, 0);
        let err: String = outs
            .iter()
            .filter(|o| o.is_err_out)
            .filter_map(|o| o.text.clone())
            .collect();
        assert_eq!(err, "oops\n");
    }

    #[tokio::test]
    async fn pipes_stdin_payload() {
        let (code, outs) = run_argv(&["/bin/cat"], "line1\nline2", None).await;
        assert_eq!(code, 0);
        let text: String = outs.iter().filter_map(|o| o.text.clone()).collect();
        assert_eq!(text, "line1\nline2");
    }

    #[tokio::test]
    async fn missing_binary_is_127_with_error_text() {
        let (code, outs) = run_argv(&["/nonexistent/definitely-not-here"], "", None).await;
        assert_eq!(code, EXIT_NOT_FOUND);
        assert!(outs.iter().any(|o| o.is_err_out && o.text.is_some()));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_143() {
        let started = std::time::Instant::now();
        let (code, outs) = run_argv(
            &["/bin/sh", "-c", "sleep 30"],
            "",
            Some(Duration::from_secs(1)),
        )
        .await;
        assert_eq!(code, EXIT_TERMINATED);
        // Deadline plus the SIGTERM grace, well under the sleep.
        assert!(started.elapsed() < Duration::from_secs(10));
        let err: String = outs
            .iter()
            .filter(|o| o.is_err_out)
            .filter_map(|o| o.text.clone())
            .collect();
        assert!(err.contains("Timeout exceeded (1s)"));
    }

    #[tokio::test]
    async fn cancellation_without_timeout_is_silent_143() {
        let mut h = harness();
        let argv: Vec<String> = vec!["/bin/sh".into(), "-c".into(), "sleep 30".into()];
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let code = ExecRunner::new()
            .run(RunRequest {
                argv: &argv,
                stdin: "",
                stdout: &h.stdout,
                stderr: &h.stderr,
                timeout: None,
                cancel,
            })
            .await;
        h.stderr.flush().await;
        assert_eq!(code, EXIT_TERMINATED);
        let mut outs = Vec::new();
        while let Ok(o) = h.rx.try_recv() {
            outs.push(o);
        }
        assert!(outs.iter().all(|o| o.text.is_none()));
    }
}
