// src/engine/context.rs

//! Ambient state threaded through every stage call.
//!
//! - [`CancelToken`]: cooperative cancellation, cloned into workers and
//!   subprocess waits.
//! - [`ProgressReporter`]: optional `(stage, processed, errors)` snapshot
//!   plus the stderr ticker that reads it.
//! - [`Deps`]: the process-facing writers stages print through.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cancellation flag shared between the driver, pools and executors.
///
/// A child token is cancelled together with its parent; cancelling the child
/// leaves the parent untouched.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
struct CancelInner {
    tx: watch::Sender<bool>,
    children: Mutex<Vec<Weak<CancelInner>>>,
}

impl CancelInner {
    fn cancel(&self) {
        self.tx.send_replace(true);
        let children = match self.children.lock() {
            Ok(mut c) => std::mem::take(&mut *c),
            Err(_) => return,
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            inner: Arc::new(CancelInner {
                tx,
                children: Mutex::new(Vec::new()),
            }),
            rx,
        }
    }

    pub fn child(&self) -> Self {
        let child = Self::new();
        if let Ok(mut children) = self.inner.children.lock() {
            children.retain(|w| w.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|c| *c).await;
    }
}

/// Writer shared between stages and the progress ticker.
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Process-facing dependencies of a stage.
#[derive(Clone)]
pub struct Deps {
    pub stdout: SharedWriter,
    pub stderr: SharedWriter,
}

impl std::fmt::Debug for Deps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deps").finish_non_exhaustive()
    }
}

impl Deps {
    /// Real process stdout / stderr.
    pub fn stdio() -> Self {
        Self {
            stdout: Arc::new(Mutex::new(io::stdout())),
            stderr: Arc::new(Mutex::new(io::stderr())),
        }
    }

    pub fn new(stdout: SharedWriter, stderr: SharedWriter) -> Self {
        Self { stdout, stderr }
    }

    pub fn write_stdout(&self, bytes: &[u8]) -> io::Result<()> {
        write_locked(&self.stdout, bytes)
    }

    /// Write one line to stderr.
    pub fn write_stderr_line(&self, line: &str) -> io::Result<()> {
        write_locked(&self.stderr, format!("{line}\n").as_bytes())
    }
}

fn write_locked(writer: &SharedWriter, bytes: &[u8]) -> io::Result<()> {
    let mut guard = writer
        .lock()
        .map_err(|_| io::Error::other("output writer lock poisoned"))?;
    guard.write_all(bytes)?;
    guard.flush()
}

/// Snapshot read by the progress ticker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub stage: String,
    pub processed: usize,
    pub total: usize,
    pub errors: usize,
}

impl ProgressSnapshot {
    pub fn line(&self) -> String {
        format!(
            "thoth: {} {}/{} ({} errors)",
            self.stage, self.processed, self.total, self.errors
        )
    }
}

/// Mutex-guarded progress counters.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    state: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the counters for a new stage.
    pub fn begin(&self, stage: &str, total: usize) {
        if let Ok(mut s) = self.state.lock() {
            *s = ProgressSnapshot {
                stage: stage.to_string(),
                processed: 0,
                total,
                errors: 0,
            };
        }
    }

    /// Count one finished record.
    pub fn record_done(&self, errored: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.processed += 1;
            if errored {
                s.errors += 1;
            }
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Print the snapshot to `sink` every `interval` until `stop` fires.
    pub fn spawn_ticker(&self, interval: Duration, sink: SharedWriter, stop: CancelToken) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let snap = reporter.snapshot();
                        if snap.stage.is_empty() {
                            continue;
                        }
                        if let Err(err) = write_locked(&sink, format!("{}\n", snap.line()).as_bytes()) {
                            debug!(error = %err, "progress ticker write failed");
                        }
                    }
                }
            }
        })
    }
}

/// Per-invocation context handed to each stage runner.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    pub cancel: CancelToken,
    pub progress: Option<ProgressReporter>,
}

impl StageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root context driven by an externally owned token.
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Context for one stage's pool: same progress, child cancellation.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child(),
            progress: self.progress.clone(),
        }
    }

    pub fn progress_begin(&self, stage: &str, total: usize) {
        if let Some(p) = &self.progress {
            p.begin(stage, total);
        }
    }

    pub fn progress_tick(&self, errored: bool) {
        if let Some(p) = &self.progress {
            p.record_done(errored);
        }
    }
}
