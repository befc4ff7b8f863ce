//! Multi-connection HTTP fetcher with resume support.
//!
//! This module provides the blocking transfer engine behind the direct
//! channel:
//! - Size/range probing via a HEAD request
//! - Segmented parallel transfer: the body is split into byte ranges, each
//!   fetched on its own connection into its own segment file, then merged
//! - Resumable transfers: segment files (or the single-stream file when the
//!   server does not honour `Range`) are continued on the next attempt
//! - A connect timeout, a per-request stall timeout and an overall deadline
//!
//! Every method here blocks; callers run it on the [`WorkerPool`].
//!
//! [`WorkerPool`]: crate::worker::WorkerPool

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::channel::{ChannelError, ChannelResult};

/// Default number of parallel connections.
pub const DEFAULT_CONNECTIONS: usize = 16;

/// Default minimum segment size (1 MiB).
pub const DEFAULT_MIN_SPLIT_BYTES: u64 = 1024 * 1024;

/// Default TCP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-request stall timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default overall deadline for one fetch in seconds.
pub const DEFAULT_OVERALL_TIMEOUT_SECS: u64 = 300;

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

const USER_AGENT: &str = concat!("apkbroker/", env!("CARGO_PKG_VERSION"));

/// Tuning for [`SegmentedFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Maximum simultaneous range requests per transfer.
    pub connections: usize,
    /// Segments are never smaller than this.
    pub min_split_bytes: u64,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Timeout for each request/read operation.
    pub request_timeout: Duration,
    /// Hard limit for the whole transfer.
    pub overall_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connections: DEFAULT_CONNECTIONS,
            min_split_bytes: DEFAULT_MIN_SPLIT_BYTES,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            overall_timeout: Duration::from_secs(DEFAULT_OVERALL_TIMEOUT_SECS),
        }
    }
}

impl FetchConfig {
    /// Set the number of parallel connections (minimum 1).
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }

    /// Set the minimum segment size (minimum 1 byte).
    pub fn with_min_split_bytes(mut self, bytes: u64) -> Self {
        self.min_split_bytes = bytes.max(1);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the overall deadline.
    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = timeout;
        self
    }
}

/// What the server told us about the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemoteInfo {
    total_size: Option<u64>,
    supports_range: bool,
}

/// Overall time budget for one fetch.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn check(&self, url: &str) -> ChannelResult<()> {
        if Instant::now() >= self.at {
            return Err(ChannelError::Timeout {
                target: url.to_string(),
                timeout_secs: self.budget.as_secs(),
            });
        }
        Ok(())
    }
}

/// One byte range of a segmented transfer (`end` inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    index: usize,
    start: u64,
    end: u64,
    path: PathBuf,
}

impl Segment {
    fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Split `total` bytes into at most `connections` ranges of at least
/// `min_split` bytes each.
fn plan_ranges(total: u64, connections: usize, min_split: u64) -> Vec<(u64, u64)> {
    if total == 0 {
        return Vec::new();
    }

    let by_size = (total / min_split.max(1)).max(1);
    let count = (connections.max(1) as u64).min(by_size);
    let base = total / count;
    let remainder = total % count;

    let mut ranges = Vec::with_capacity(count as usize);
    let mut start = 0;
    for i in 0..count {
        let len = base + u64::from(i < remainder);
        ranges.push((start, start + len - 1));
        start += len;
    }
    ranges
}

/// Blocking multi-connection downloader.
///
/// Cheap to clone; holds configuration only. An HTTP client is built per
/// fetch on the calling (worker) thread.
#[derive(Debug, Clone, Default)]
pub struct SegmentedFetcher {
    config: FetchConfig,
}

impl SegmentedFetcher {
    /// Create a fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Download `url` into `dest_dir/filename`.
    ///
    /// If a previous attempt left partial data for the same file name, the
    /// transfer resumes from it when the server supports range requests.
    /// Returns the path of the complete file.
    pub fn fetch(&self, url: &str, dest_dir: &Path, filename: &str) -> ChannelResult<PathBuf> {
        let deadline = Deadline::after(self.config.overall_timeout);
        deadline.check(url)?;

        fs::create_dir_all(dest_dir).map_err(|source| ChannelError::Io {
            path: dest_dir.to_path_buf(),
            source,
        })?;
        let dest = dest_dir.join(filename);

        let client = self.build_client()?;
        let info = self.probe(&client, url)?;
        debug!(
            url,
            total_size = ?info.total_size,
            supports_range = info.supports_range,
            "Probed remote resource"
        );

        if let Some(total) = info.total_size {
            let existing = file_len(&dest);
            if total > 0 && existing == total {
                debug!(url, path = %dest.display(), "Staged file already complete");
                return Ok(dest);
            }
        }

        let start = Instant::now();
        let bytes = match info.total_size {
            Some(total)
                if info.supports_range
                    && self.config.connections > 1
                    && total >= 2 * self.config.min_split_bytes =>
            {
                self.fetch_segmented(&client, url, &dest, total, &deadline)?
            }
            _ => self.fetch_single(&client, url, &dest, info, &deadline)?,
        };

        let elapsed = start.elapsed();
        info!(
            url,
            size_bytes = bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Transfer complete"
        );
        Ok(dest)
    }

    fn build_client(&self) -> ChannelResult<Client> {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| ChannelError::Http {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })
    }

    /// Query size and range support via HEAD.
    ///
    /// Servers that reject HEAD are treated as "size unknown"; an explicit
    /// 404/410 fails the fetch immediately.
    fn probe(&self, client: &Client, url: &str) -> ChannelResult<RemoteInfo> {
        let response = client
            .head(url)
            .send()
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ChannelError::Http {
                url: url.to_string(),
                reason: format!("HEAD request failed with status {}", status),
            });
        }
        if !status.is_success() {
            return Ok(RemoteInfo {
                total_size: None,
                supports_range: false,
            });
        }

        let total_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let supports_range = response
            .headers()
            .get(ACCEPT_RANGES)
            .map(|v| v.to_str().unwrap_or("") == "bytes")
            .unwrap_or(false);

        Ok(RemoteInfo {
            total_size,
            supports_range,
        })
    }

    /// Single-connection transfer, resuming the destination file if possible.
    fn fetch_single(
        &self,
        client: &Client,
        url: &str,
        dest: &Path,
        info: RemoteInfo,
        deadline: &Deadline,
    ) -> ChannelResult<u64> {
        let existing = file_len(dest);
        let resume_from = match info.total_size {
            Some(total) if info.supports_range && existing > 0 && existing < total => existing,
            _ => 0,
        };

        let mut request = client.get(url);
        if resume_from > 0 {
            debug!(url, resume_from, "Resuming single-stream transfer");
            request = request.header(RANGE, format!("bytes={}-", resume_from));
        }
        let response = request.send().map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Http {
                url: url.to_string(),
                reason: format!("GET request failed with status {}", status),
            });
        }

        // A 200 to a ranged request means the server restarted from zero.
        let (start_byte, file) = if resume_from > 0 && status == StatusCode::PARTIAL_CONTENT {
            (resume_from, open_append(dest)?)
        } else {
            (0, create_truncated(dest)?)
        };

        let written = self.copy_body(response, file, dest, url, None, deadline)?;
        let downloaded = start_byte + written;

        if let Some(total) = info.total_size {
            if downloaded != total {
                return Err(ChannelError::Http {
                    url: url.to_string(),
                    reason: format!("transfer ended at {} of {} bytes", downloaded, total),
                });
            }
        }

        Ok(downloaded)
    }

    /// Parallel range transfer into per-segment files, then merge.
    fn fetch_segmented(
        &self,
        client: &Client,
        url: &str,
        dest: &Path,
        total: u64,
        deadline: &Deadline,
    ) -> ChannelResult<u64> {
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));

        let segments: Vec<Segment> = plan_ranges(
            total,
            self.config.connections,
            self.config.min_split_bytes,
        )
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Segment {
            index,
            start,
            end,
            path: dir.join(format!("{}.seg{}", file_name, index)),
        })
        .collect();

        debug!(url, total, segments = segments.len(), "Starting segmented transfer");

        let results: Vec<ChannelResult<()>> = thread::scope(|scope| {
            let handles: Vec<_> = segments
                .iter()
                .map(|segment| scope.spawn(move || self.fetch_segment(client, url, segment, deadline)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ChannelError::Http {
                            url: url.to_string(),
                            reason: "segment worker panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        // Prefer reporting a timeout: it explains the other failures.
        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                let is_timeout = matches!(e, ChannelError::Timeout { .. });
                if first_error.is_none() || is_timeout {
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let merged = merge_segments(&segments, dest)?;
        if merged != total {
            return Err(ChannelError::Http {
                url: url.to_string(),
                reason: format!("merged {} of {} bytes", merged, total),
            });
        }

        for segment in &segments {
            fs::remove_file(&segment.path).ok();
        }

        Ok(merged)
    }

    fn fetch_segment(
        &self,
        client: &Client,
        url: &str,
        segment: &Segment,
        deadline: &Deadline,
    ) -> ChannelResult<()> {
        let mut have = file_len(&segment.path);
        if have > segment.len() {
            fs::remove_file(&segment.path).ok();
            have = 0;
        }
        if have == segment.len() {
            return Ok(());
        }
        deadline.check(url)?;

        let from = segment.start + have;
        let response = client
            .get(url)
            .header(RANGE, format!("bytes={}-{}", from, segment.end))
            .send()
            .map_err(|e| self.request_error(url, e))?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(ChannelError::Http {
                url: url.to_string(),
                reason: format!(
                    "segment {} expected 206 Partial Content, got {}",
                    segment.index,
                    response.status()
                ),
            });
        }

        let file = if have > 0 {
            open_append(&segment.path)?
        } else {
            create_truncated(&segment.path)?
        };

        let remaining = segment.len() - have;
        let written =
            self.copy_body(response, file, &segment.path, url, Some(remaining), deadline)?;
        if written != remaining {
            return Err(ChannelError::Http {
                url: url.to_string(),
                reason: format!(
                    "segment {} ended after {} of {} bytes",
                    segment.index, written, remaining
                ),
            });
        }

        Ok(())
    }

    /// Stream a response body to `file`, checking the deadline per chunk.
    fn copy_body(
        &self,
        mut response: Response,
        file: File,
        path: &Path,
        url: &str,
        limit: Option<u64>,
        deadline: &Deadline,
    ) -> ChannelResult<u64> {
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            deadline.check(url)?;

            let want = match limit {
                Some(limit) if written >= limit => break,
                Some(limit) => ((limit - written) as usize).min(BUFFER_SIZE),
                None => BUFFER_SIZE,
            };

            let bytes_read = response
                .read(&mut buffer[..want])
                .map_err(|e| self.read_error(url, e))?;
            if bytes_read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..bytes_read])
                .map_err(|source| ChannelError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            written += bytes_read as u64;
        }

        writer.flush().map_err(|source| ChannelError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(written)
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> ChannelError {
        if e.is_timeout() {
            ChannelError::Timeout {
                target: url.to_string(),
                timeout_secs: self.config.request_timeout.as_secs(),
            }
        } else {
            ChannelError::Http {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    fn read_error(&self, url: &str, e: io::Error) -> ChannelError {
        if e.kind() == io::ErrorKind::TimedOut {
            ChannelError::Timeout {
                target: url.to_string(),
                timeout_secs: self.config.request_timeout.as_secs(),
            }
        } else {
            ChannelError::Http {
                url: url.to_string(),
                reason: format!("read error: {}", e),
            }
        }
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn open_append(path: &Path) -> ChannelResult<File> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|source| ChannelError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn create_truncated(path: &Path) -> ChannelResult<File> {
    File::create(path).map_err(|source| ChannelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_segments(segments: &[Segment], dest: &Path) -> ChannelResult<u64> {
    let mut writer = BufWriter::new(create_truncated(dest)?);
    let mut total = 0u64;

    for segment in segments {
        let mut reader = File::open(&segment.path).map_err(|source| ChannelError::Io {
            path: segment.path.clone(),
            source,
        })?;
        total += io::copy(&mut reader, &mut writer).map_err(|source| ChannelError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
    }

    writer.flush().map_err(|source| ChannelError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(total)
}
