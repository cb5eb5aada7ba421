// src/exec/shell.rs

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::engine::context::CancelToken;
use crate::envelope::ShellResult;

/// Exit code reported when the process could not be started or waited on.
pub const EXIT_START_FAILED: i32 = -1;
/// Exit code reported when the process was stopped for exceeding its timeout.
pub const EXIT_TIMED_OUT: i32 = -2;

/// Slack for the capture readers once the process itself is gone.
const READER_DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Everything needed to run one subprocess.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub capture: CaptureConfig,
    pub kill_process_group: bool,
    pub term_grace: Duration,
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

type CaptureSlot = Arc<Mutex<Captured>>;

enum WaitOutcome {
    Exited(io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run a subprocess to completion (or timeout) and describe the outcome.
///
/// Never fails: start and wait problems are reported through
/// `ShellResult::error` with exit code `-1`.
pub async fn run_command(spec: &CommandSpec, cancel: &CancelToken) -> ShellResult {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(if spec.capture.stdout { Stdio::piped() } else { Stdio::null() })
        .stderr(if spec.capture.stderr { Stdio::piped() } else { Stdio::null() })
        .kill_on_drop(true);

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    if spec.kill_process_group {
        own_process_group(&mut cmd);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(err) => {
            let message = if err.kind() == io::ErrorKind::NotFound {
                format!("program {} not found", spec.program)
            } else {
                format!("program {} start failed", spec.program)
            };
            warn!(program = %spec.program, error = %err, "failed to start process");
            return failed(message);
        }
    };

    let pid = child.id();
    debug!(program = %spec.program, ?pid, "process started");

    let max = spec.capture.max_bytes;
    let stdout = child.stdout.take().map(|r| spawn_reader(r, max));
    let stderr = child.stderr.take().map(|r| spawn_reader(r, max));

    let outcome = tokio::select! {
        status = child.wait() => WaitOutcome::Exited(status),
        _ = tokio::time::sleep(spec.timeout) => WaitOutcome::TimedOut,
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
    };

    let mut result = match outcome {
        WaitOutcome::Exited(Ok(status)) => {
            let code = status.code().unwrap_or(EXIT_START_FAILED);
            info!(program = %spec.program, exit_code = code, "process exited");
            ShellResult {
                exit_code: code,
                ..ShellResult::default()
            }
        }
        WaitOutcome::Exited(Err(err)) => {
            warn!(program = %spec.program, error = %err, "waiting for process failed");
            failed(format!("program {} execution failed", spec.program))
        }
        WaitOutcome::TimedOut => {
            warn!(program = %spec.program, timeout_ms = spec.timeout.as_millis() as u64, "process timed out");
            terminate(&mut child, pid, spec).await;
            ShellResult {
                exit_code: EXIT_TIMED_OUT,
                timed_out: true,
                ..ShellResult::default()
            }
        }
        WaitOutcome::Cancelled => {
            terminate(&mut child, pid, spec).await;
            failed("cancelled".to_string())
        }
    };

    if let Some((slot, handle)) = stdout {
        let c = finish_reader(slot, handle).await;
        result.stdout = Some(String::from_utf8_lossy(&c.bytes).into_owned());
        result.stdout_truncated = c.truncated;
    }
    if let Some((slot, handle)) = stderr {
        let c = finish_reader(slot, handle).await;
        result.stderr = Some(String::from_utf8_lossy(&c.bytes).into_owned());
        result.stderr_truncated = c.truncated;
    }

    result
}

fn failed(message: String) -> ShellResult {
    ShellResult {
        exit_code: EXIT_START_FAILED,
        error: Some(message),
        ..ShellResult::default()
    }
}

/// SIGTERM, wait `term_grace`, then SIGKILL.
async fn terminate(child: &mut Child, pid: Option<u32>, spec: &CommandSpec) {
    send_term(child, pid, spec.kill_process_group);
    match tokio::time::timeout(spec.term_grace, child.wait()).await {
        Ok(_) => debug!(program = %spec.program, "process exited after SIGTERM"),
        Err(_) => {
            warn!(program = %spec.program, "process ignored SIGTERM; sending SIGKILL");
            send_kill(child, pid, spec.kill_process_group);
            let _ = child.wait().await;
        }
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal(pid: Option<u32>, group: bool, sig: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    let target = Pid::from_raw(raw);
    let res = if group { killpg(target, sig) } else { kill(target, sig) };
    if let Err(err) = res {
        debug!(pid = raw, ?sig, error = %err, "signal delivery failed");
        return false;
    }
    true
}

#[cfg(unix)]
fn send_term(_child: &mut Child, pid: Option<u32>, group: bool) {
    signal(pid, group, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn send_kill(child: &mut Child, pid: Option<u32>, group: bool) {
    if !signal(pid, group, nix::sys::signal::Signal::SIGKILL) {
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn send_term(child: &mut Child, _pid: Option<u32>, _group: bool) {
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn send_kill(child: &mut Child, _pid: Option<u32>, _group: bool) {
    let _ = child.start_kill();
}

/// Drain a pipe into a capped buffer. Reading continues past the cap so the
/// child never blocks on a full pipe.
fn spawn_reader<R>(mut reader: R, max_bytes: usize) -> (CaptureSlot, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let slot: CaptureSlot = Arc::new(Mutex::new(Captured::default()));
    let sink = slot.clone();
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let Ok(mut c) = sink.lock() else { break };
            let room = max_bytes.saturating_sub(c.bytes.len());
            if n > room {
                c.bytes.extend_from_slice(&chunk[..room]);
                c.truncated = true;
            } else {
                c.bytes.extend_from_slice(&chunk[..n]);
            }
        }
    });
    (slot, handle)
}

async fn finish_reader(slot: CaptureSlot, handle: JoinHandle<()>) -> Captured {
    let abort = handle.abort_handle();
    if tokio::time::timeout(READER_DRAIN_GRACE, handle).await.is_err() {
        // A grandchild still holds the pipe open; keep what we have.
        abort.abort();
    }
    match slot.lock() {
        Ok(mut c) => std::mem::take(&mut *c),
        Err(_) => Captured::default(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> CommandSpec {
        CommandSpec {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(10),
            capture: CaptureConfig::default(),
            kill_process_group: true,
            term_grace: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let mut s = spec("sh", &["-c", "printf out; printf err >&2; exit 3"]);
        s.env.insert("THOTH_TEST_VAR".into(), "v".into());
        let r = run_command(&s, &CancelToken::new()).await;
        assert_eq!(r.exit_code, 3);
        assert_eq!(r.stdout.as_deref(), Some("out"));
        assert_eq!(r.stderr.as_deref(), Some("err"));
        assert!(r.error.is_none());
        assert!(!r.timed_out);
    }

    #[tokio::test]
    async fn env_overlay_reaches_the_child() {
        let mut s = spec("sh", &["-c", "printf %s \"$THOTH_TEST_VAR\""]);
        s.env.insert("THOTH_TEST_VAR".into(), "overlay".into());
        let r = run_command(&s, &CancelToken::new()).await;
        assert_eq!(r.stdout.as_deref(), Some("overlay"));
    }

    #[tokio::test]
    async fn output_past_the_cap_is_truncated() {
        let mut s = spec("sh", &["-c", "printf 0123456789"]);
        s.capture.max_bytes = 4;
        let r = run_command(&s, &CancelToken::new()).await;
        assert_eq!(r.stdout.as_deref(), Some("0123"));
        assert!(r.stdout_truncated);
        assert!(!r.stderr_truncated);
    }

    #[tokio::test]
    async fn disabled_capture_leaves_streams_absent() {
        let mut s = spec("sh", &["-c", "echo hi"]);
        s.capture.stdout = false;
        s.capture.stderr = false;
        let r = run_command(&s, &CancelToken::new()).await;
        assert_eq!(r.exit_code, 0);
        assert!(r.stdout.is_none() && r.stderr.is_none());
    }

    #[tokio::test]
    async fn timeout_escalates_and_reports_minus_two() {
        let mut s = spec("sh", &["-c", "sleep 2"]);
        s.timeout = Duration::from_millis(30);
        s.term_grace = Duration::from_millis(10);
        let started = std::time::Instant::now();
        let r = run_command(&s, &CancelToken::new()).await;
        assert!(r.timed_out);
        assert_eq!(r.exit_code, EXIT_TIMED_OUT);
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn term_ignoring_child_is_killed() {
        let mut s = spec("sh", &["-c", "trap '' TERM; sleep 2"]);
        s.timeout = Duration::from_millis(30);
        s.term_grace = Duration::from_millis(20);
        let started = std::time::Instant::now();
        let r = run_command(&s, &CancelToken::new()).await;
        assert!(r.timed_out);
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let s = spec("thoth-definitely-not-a-program", &[]);
        let r = run_command(&s, &CancelToken::new()).await;
        assert_eq!(r.exit_code, EXIT_START_FAILED);
        assert_eq!(
            r.error.as_deref(),
            Some("program thoth-definitely-not-a-program not found")
        );
    }
}
