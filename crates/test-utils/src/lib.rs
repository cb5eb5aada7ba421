pub mod builders;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use serde_json::Value;
use tempfile::TempDir;
use thoth::engine::{Deps, SharedWriter};
use thoth::metafile::{marshal_meta, sidecar_locator};
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::ConfigBuilder;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// A throwaway discovery root.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write a plain file, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> &Self {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, contents).expect("write fixture file");
        self
    }

    /// Write `<locator>.thoth.yaml` in canonical form.
    pub fn sidecar(&self, locator: &str, meta: Value) -> &Self {
        let Value::Object(meta) = meta else {
            panic!("sidecar meta must be a JSON object");
        };
        let text = marshal_meta(locator, &meta).expect("marshal sidecar");
        self.write(&sidecar_locator(locator), &text)
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).expect("read fixture file")
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory stdout/stderr for stage deps.
#[derive(Clone, Default)]
pub struct CapturedIo {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl CapturedIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deps(&self) -> Deps {
        let out: SharedWriter = self.stdout.clone();
        let err: SharedWriter = self.stderr.clone();
        Deps::new(out, err)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout.lock().expect("stdout lock")).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr.lock().expect("stderr lock")).into_owned()
    }

    pub fn stdout_json(&self) -> Value {
        serde_json::from_str(&self.stdout_text()).expect("stdout is one JSON document")
    }
}
