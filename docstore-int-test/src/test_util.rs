use docstore::errors::{DocStoreError, DocStoreResult, ErrorKind};
use docstore::DocStore;
use std::backtrace::Backtrace;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use std::{fs, thread};
use tempfile::TempDir;

/// Secret used by tests that need an encryption key.
pub const TEST_KEY: &str = "k3y-f0r-t3st1ng-0nly-#9Zq!xWv@pLm$";
/// A second valid secret, different from [TEST_KEY].
pub const OTHER_KEY: &str = "an0ther-k3y-wh1ch-d0es-n0t-m@tch-&4Rt";

static LOGGER: Once = Once::new();

/// Runs a test between a setup and a teardown.
///
/// A failing test is retried a few times before panicking with the last
/// error, the way flaky file system setups are handled in CI.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> DocStoreResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> DocStoreResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> DocStoreResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => after(ctx).map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();
        match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                last_error = Some(e);
                last_backtrace = Some(bt);
            }
            Err(panic_err) => {
                let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                last_error = Some(format!("Panic: {}", err_msg));
                last_backtrace = Some(Backtrace::capture().to_string());
            }
        }

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("{}", last_error.as_deref().unwrap_or("Unknown"));
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// A database file in its own temporary directory.
#[derive(Clone)]
pub struct TestContext {
    path: String,
    db: DocStore,
    _dir: Arc<TempDir>,
}

impl TestContext {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn db(&self) -> DocStore {
        self.db.clone()
    }

    /// Opens the same file again with a fresh handle, optionally with a
    /// database-wide key.
    pub fn reopen(&self, key: Option<&str>) -> DocStoreResult<DocStore> {
        let mut builder = DocStore::builder();
        if let Some(key) = key {
            builder = builder.encryption_key(key);
        }
        builder.open(&self.path)
    }
}

pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = colog::default_builder()
            .filter_level(log::LevelFilter::Warn)
            .try_init();
    });
}

fn temp_dir() -> DocStoreResult<TempDir> {
    tempfile::Builder::new().prefix("docstore-").tempdir().map_err(|e| {
        DocStoreError::new(
            &format!("Failed to create temporary directory: {}", e),
            ErrorKind::IOError,
        )
    })
}

pub fn random_path(dir: &TempDir) -> String {
    let file: PathBuf = dir.path().join(format!("{}.db", uuid::Uuid::new_v4()));
    file.to_string_lossy().to_string()
}

pub fn create_test_context() -> DocStoreResult<TestContext> {
    init_logger();
    let dir = temp_dir()?;
    let path = random_path(&dir);
    let db = DocStore::builder().open(&path)?;
    Ok(TestContext {
        path,
        db,
        _dir: Arc::new(dir),
    })
}

/// A database whose collections inherit [TEST_KEY].
pub fn create_encrypted_test_context() -> DocStoreResult<TestContext> {
    init_logger();
    let dir = temp_dir()?;
    let path = random_path(&dir);
    let db = DocStore::builder().encryption_key(TEST_KEY).open(&path)?;
    Ok(TestContext {
        path,
        db,
        _dir: Arc::new(dir),
    })
}

pub fn cleanup(ctx: TestContext) -> DocStoreResult<()> {
    ctx.db.close()?;
    let _ = fs::remove_file(&ctx.path);
    Ok(())
}
