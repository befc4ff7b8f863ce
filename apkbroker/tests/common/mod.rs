//! Shared fixtures: a broker wired to scripted in-memory strategies.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apkbroker::cache::{CacheStore, DiskStore};
use apkbroker::channel::{
    check_plausible, Acquired, AcquisitionStrategy, BoxFuture, Channel, ChannelError,
    ChannelResult,
};
use apkbroker::classify::Classifier;
use apkbroker::resolver::FallbackResolver;
use apkbroker::worker::WorkerPool;
use apkbroker::{Broker, PackageId};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

/// Plausibility threshold used throughout the tests.
pub const MIN_BYTES: u64 = 100_000;

/// A strategy whose outcome the test controls.
pub struct ScriptedStrategy {
    name: &'static str,
    channel: Channel,
    payload: Mutex<Option<Vec<u8>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    pub fn new(name: &'static str, channel: Channel, payload: Option<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            channel,
            payload: Mutex::new(payload),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    /// Deliver `payload` from now on; `None` reports the package as unavailable.
    pub fn set_payload(&self, payload: Option<Vec<u8>>) {
        *self.payload.lock().unwrap() = payload;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AcquisitionStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn acquire<'a>(
        &'a self,
        id: &'a PackageId,
        staging_dir: &'a Path,
    ) -> BoxFuture<'a, ChannelResult<Acquired>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let payload = self.payload.lock().unwrap().clone();
            let Some(bytes) = payload else {
                return Err(ChannelError::NotAvailable {
                    tool: self.name.to_string(),
                    package: id.to_string(),
                });
            };

            let path = staging_dir.join(format!("{}.{}.part", id, self.name));
            std::fs::write(&path, bytes).unwrap();
            let checked = check_plausible(&path, MIN_BYTES);
            if checked.is_err() {
                std::fs::remove_file(&path).ok();
            }
            checked
        })
    }
}

/// Broker over a direct strategy followed by a tool strategy.
pub struct Harness {
    pub dir: TempDir,
    pub broker: Arc<Broker>,
    pub direct: Arc<ScriptedStrategy>,
    pub tool: Arc<ScriptedStrategy>,
}

impl Harness {
    pub async fn new(direct: Option<Vec<u8>>, tool: Option<Vec<u8>>) -> Self {
        Self::with_timing(direct, tool, Duration::from_secs(3600), Duration::from_secs(60)).await
    }

    pub async fn with_timing(
        direct: Option<Vec<u8>>,
        tool: Option<Vec<u8>>,
        negative_ttl: Duration,
        deletion_delay: Duration,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskStore::open(dir.path(), MIN_BYTES).await.unwrap();
        let staging = disk.staging_dir().to_path_buf();
        let cache = Arc::new(CacheStore::new(disk, negative_ttl, deletion_delay));

        let direct = ScriptedStrategy::new("direct-bundle", Channel::Direct, direct);
        let tool = ScriptedStrategy::new("tool", Channel::Tool, tool);
        let resolver = FallbackResolver::new(
            vec![
                direct.clone() as Arc<dyn AcquisitionStrategy>,
                tool.clone() as Arc<dyn AcquisitionStrategy>,
            ],
            Classifier::default(),
            WorkerPool::new(4),
            staging,
        );

        Self {
            dir,
            broker: Arc::new(Broker::new(cache, resolver)),
            direct,
            tool,
        }
    }
}

pub fn id(raw: &str) -> PackageId {
    PackageId::parse(raw).unwrap()
}

/// A zip archive holding `entries` plus an uncompressed padding entry, so
/// the result clears the plausibility threshold.
pub fn zip_payload(entries: &[&str]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for name in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(b"payload").unwrap();
    }
    writer
        .start_file(
            "assets/padding.bin",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(&vec![7u8; 150_000]).unwrap();
    writer.finish().unwrap().into_inner()
}

/// A single-package archive (core installer only).
pub fn single_package() -> Vec<u8> {
    zip_payload(&["classes.dex"])
}

/// A split bundle (root bundle manifest).
pub fn split_bundle() -> Vec<u8> {
    zip_payload(&["manifest.json", "base.apk"])
}
