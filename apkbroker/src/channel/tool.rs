//! External acquisition tool channel.
//!
//! Runs `<program> -a <id> <output-dir>` and interprets its standard output:
//!
//! - `downloaded successfully` → look for `<id>.xapk`, `<id>.apk` or
//!   `<id>.apks` in the output directory
//! - `could not get download url` / `skipping` → the upstream does not have
//!   the package ([`ChannelError::NotAvailable`])
//! - anything else → [`ChannelError::ToolFailed`]
//!
//! A delivered file is moved to `<staging>/<id>.tool.part` and the per-run
//! output directory is removed. Matching is case-insensitive. The child is killed if it outlives the
//! configured timeout, and a worker-pool permit is held for its whole
//! lifetime so tool runs count against the same blocking capacity as
//! direct transfers.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{check_plausible, Acquired, AcquisitionStrategy, BoxFuture, Channel, ChannelError, ChannelResult};
use crate::package::PackageId;
use crate::worker::WorkerPool;

/// Default program name, resolved via `PATH`.
pub const DEFAULT_TOOL_PROGRAM: &str = "apkeep";

/// Default time limit for one tool run in seconds.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

/// Strategy name reported as the artifact source.
pub const TOOL_STRATEGY_NAME: &str = "tool";

/// Extensions the tool may produce, in preference order.
const OUTPUT_EXTENSIONS: [&str; 3] = ["xapk", "apk", "apks"];

const SUCCESS_MARKER: &str = "downloaded successfully";
const NOT_FOUND_MARKERS: [&str; 2] = ["could not get download url", "skipping"];

/// How the tool described its own run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Reported a completed download.
    Success,
    /// Reported the package as unavailable.
    NotAvailable,
    /// Neither marker present.
    Unrecognized,
}

/// Classify the tool's standard output.
pub fn interpret_output(stdout: &str) -> ToolOutcome {
    let lower = stdout.to_lowercase();
    if lower.contains(SUCCESS_MARKER) {
        ToolOutcome::Success
    } else if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        ToolOutcome::NotAvailable
    } else {
        ToolOutcome::Unrecognized
    }
}

/// Acquisition strategy that shells out to an external tool.
pub struct ToolStrategy {
    program: PathBuf,
    timeout: Duration,
    pool: WorkerPool,
    min_bytes: u64,
}

impl ToolStrategy {
    /// Create a strategy running `program` with the given time limit.
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, pool: WorkerPool, min_bytes: u64) -> Self {
        Self {
            program: program.into(),
            timeout,
            pool,
            min_bytes,
        }
    }

    /// The configured program.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn tool_label(&self) -> String {
        self.program.display().to_string()
    }

    async fn run(&self, id: &PackageId, staging_dir: &Path) -> ChannelResult<Acquired> {
        let out_dir = staging_dir.join(format!("{}.tool", id));
        prepare_output_dir(&out_dir).await?;

        let _permit = self.pool.acquire().await?;
        info!(package = %id, program = %self.program.display(), "Running acquisition tool");
        let start = Instant::now();

        let child = Command::new(&self.program)
            .arg("-a")
            .arg(id.as_str())
            .arg(&out_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ChannelError::Spawn {
                tool: self.tool_label(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ChannelError::Spawn {
                tool: self.tool_label(),
                source,
            })?,
            Err(_) => {
                warn!(package = %id, timeout_secs = self.timeout.as_secs(), "Acquisition tool timed out");
                return Err(ChannelError::Timeout {
                    target: format!("{} -a {}", self.tool_label(), id),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(package = %id, status = %output.status, elapsed_ms, "Acquisition tool exited");

        match interpret_output(&stdout) {
            ToolOutcome::Success => match find_output(&out_dir, id) {
                Some(path) => {
                    let staged = staging_dir.join(format!("{}.{}.part", id, TOOL_STRATEGY_NAME));
                    tokio::fs::rename(&path, &staged)
                        .await
                        .map_err(|source| ChannelError::Io {
                            path: staged.clone(),
                            source,
                        })?;
                    tokio::fs::remove_dir_all(&out_dir).await.ok();

                    let acquired = check_plausible(&staged, self.min_bytes).inspect_err(|_| {
                        std::fs::remove_file(&staged).ok();
                    })?;
                    info!(
                        package = %id,
                        size_bytes = acquired.size_bytes,
                        elapsed_ms,
                        "Acquisition tool delivered"
                    );
                    Ok(acquired)
                }
                None => {
                    warn!(package = %id, "Acquisition tool reported success but produced no file");
                    Err(ChannelError::ToolFailed {
                        tool: self.tool_label(),
                        reason: "reported success but no output file was found".to_string(),
                    })
                }
            },
            ToolOutcome::NotAvailable => {
                info!(package = %id, "Acquisition tool reports package not found");
                Err(ChannelError::NotAvailable {
                    tool: self.tool_label(),
                    package: id.to_string(),
                })
            }
            ToolOutcome::Unrecognized => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    package = %id,
                    status = %output.status,
                    stdout = %stdout.trim(),
                    stderr = %stderr.trim(),
                    "Acquisition tool failed"
                );
                Err(ChannelError::ToolFailed {
                    tool: self.tool_label(),
                    reason: format!("exited with {} without a recognizable result", output.status),
                })
            }
        }
    }
}

impl AcquisitionStrategy for ToolStrategy {
    fn name(&self) -> &str {
        TOOL_STRATEGY_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Tool
    }

    fn acquire<'a>(
        &'a self,
        id: &'a PackageId,
        staging_dir: &'a Path,
    ) -> BoxFuture<'a, ChannelResult<Acquired>> {
        Box::pin(self.run(id, staging_dir))
    }
}

/// Start every run from an empty directory so stale output is never mistaken
/// for a fresh result.
async fn prepare_output_dir(dir: &Path) -> ChannelResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ChannelError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ChannelError::Io {
            path: dir.to_path_buf(),
            source,
        })
}

fn find_output(dir: &Path, id: &PackageId) -> Option<PathBuf> {
    OUTPUT_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", id, ext)))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_success() {
        assert_eq!(
            interpret_output("com.example.app Downloaded Successfully!"),
            ToolOutcome::Success
        );
    }

    #[test]
    fn test_interpret_not_found() {
        assert_eq!(
            interpret_output("Could not get download URL for com.example.app"),
            ToolOutcome::NotAvailable
        );
        assert_eq!(
            interpret_output("Skipping com.example.app..."),
            ToolOutcome::NotAvailable
        );
    }

    #[test]
    fn test_interpret_unrecognized() {
        assert_eq!(interpret_output(""), ToolOutcome::Unrecognized);
        assert_eq!(interpret_output("panic: boom"), ToolOutcome::Unrecognized);
    }

    #[test]
    fn test_find_output_prefers_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let id = PackageId::parse("com.example.app").unwrap();
        assert!(find_output(dir.path(), &id).is_none());

        std::fs::write(dir.path().join("com.example.app.apk"), b"x").unwrap();
        std::fs::write(dir.path().join("com.example.app.xapk"), b"x").unwrap();
        assert_eq!(
            find_output(dir.path(), &id).unwrap(),
            dir.path().join("com.example.app.xapk")
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let id = PackageId::parse("com.example.app").unwrap();
        let strategy = ToolStrategy::new(
            dir.path().join("no-such-tool"),
            Duration::from_secs(5),
            WorkerPool::new(1),
            100_000,
        );

        let err = strategy.acquire(&id, dir.path()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Spawn { .. }));
        assert_eq!(strategy.name(), "tool");
        assert_eq!(strategy.channel(), Channel::Tool);
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_tool(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-tool.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn strategy(program: PathBuf, timeout: Duration) -> ToolStrategy {
            ToolStrategy::new(program, timeout, WorkerPool::new(2), 100_000)
        }

        #[tokio::test]
        async fn test_successful_run_delivers_file() {
            let bin = tempfile::tempdir().unwrap();
            let staging = tempfile::tempdir().unwrap();
            let tool = fake_tool(
                bin.path(),
                r#"head -c 150000 /dev/zero > "$3/$2.apk"; echo "$2 downloaded successfully""#,
            );
            let id = PackageId::parse("com.example.app").unwrap();

            let acquired = strategy(tool, Duration::from_secs(10))
                .acquire(&id, staging.path())
                .await
                .unwrap();
            assert_eq!(acquired.size_bytes, 150_000);
            assert_eq!(acquired.path, staging.path().join("com.example.app.tool.part"));
            assert!(!staging.path().join("com.example.app.tool").exists());
        }

        #[tokio::test]
        async fn test_not_found_run() {
            let bin = tempfile::tempdir().unwrap();
            let staging = tempfile::tempdir().unwrap();
            let tool = fake_tool(bin.path(), r#"echo "Could not get download url for $2""#);
            let id = PackageId::parse("com.example.missing").unwrap();

            let err = strategy(tool, Duration::from_secs(10))
                .acquire(&id, staging.path())
                .await
                .unwrap_err();
            assert!(err.is_not_available());
        }

        #[tokio::test]
        async fn test_tiny_output_is_implausible() {
            let bin = tempfile::tempdir().unwrap();
            let staging = tempfile::tempdir().unwrap();
            let tool = fake_tool(
                bin.path(),
                r#"echo "<html>" > "$3/$2.apk"; echo "downloaded successfully""#,
            );
            let id = PackageId::parse("com.example.app").unwrap();

            let err = strategy(tool, Duration::from_secs(10))
                .acquire(&id, staging.path())
                .await
                .unwrap_err();
            assert!(err.is_implausible());
        }

        #[tokio::test]
        async fn test_stale_output_is_not_reused() {
            let bin = tempfile::tempdir().unwrap();
            let staging = tempfile::tempdir().unwrap();
            let id = PackageId::parse("com.example.app").unwrap();
            let out = staging.path().join("com.example.app.tool");
            std::fs::create_dir_all(&out).unwrap();
            std::fs::write(out.join("com.example.app.apk"), vec![0u8; 200_000]).unwrap();

            let tool = fake_tool(bin.path(), r#"echo "downloaded successfully""#);
            let err = strategy(tool, Duration::from_secs(10))
                .acquire(&id, staging.path())
                .await
                .unwrap_err();
            assert!(matches!(err, ChannelError::ToolFailed { .. }));
        }

        #[tokio::test]
        async fn test_slow_tool_times_out() {
            let bin = tempfile::tempdir().unwrap();
            let staging = tempfile::tempdir().unwrap();
            let tool = fake_tool(bin.path(), "sleep 5");
            let id = PackageId::parse("com.example.app").unwrap();

            let err = strategy(tool, Duration::from_millis(200))
                .acquire(&id, staging.path())
                .await
                .unwrap_err();
            assert!(matches!(err, ChannelError::Timeout { .. }));
        }
    }
}
