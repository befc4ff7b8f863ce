//! Positive cache tier: artifacts on disk.
//!
//! Layout:
//!
//! ```text
//! <dir>/
//! ├── com.example.app.xapk        canonical artifacts, {id}.{ext}
//! ├── org.example.tool.apk
//! └── staging/                    in-progress acquisitions
//!     ├── com.example.app.direct-bundle.part
//!     ├── com.example.app.direct-bundle.part.seg0
//!     └── com.example.app.tool/
//! ```
//!
//! Readers only ever see canonical names. A file appears under its
//! canonical name by `rename` from the staging directory on the same
//! filesystem, so a partially written artifact is never visible.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, warn};

use super::error::{CacheError, CacheResult, RemovalResult};
use crate::package::{ArtifactKind, PackageId};

/// Name of the staging subdirectory.
pub const STAGING_DIR_NAME: &str = "staging";

/// A canonical artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub id: PackageId,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Filesystem-backed positive cache.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
    staging_dir: PathBuf,
    min_bytes: u64,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// Files of `min_bytes` or less are treated as absent.
    pub async fn open(dir: impl Into<PathBuf>, min_bytes: u64) -> CacheResult<Self> {
        let dir = dir.into();
        let staging_dir = dir.join(STAGING_DIR_NAME);

        for path in [&dir, &staging_dir] {
            fs::create_dir_all(path)
                .await
                .map_err(|source| CacheError::CreateDir {
                    path: path.clone(),
                    source,
                })?;
        }

        Ok(Self {
            dir,
            staging_dir,
            min_bytes,
        })
    }

    /// Cache root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory where acquisitions are staged.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Plausibility threshold in bytes.
    pub fn min_bytes(&self) -> u64 {
        self.min_bytes
    }

    /// Canonical path for `id` stored as `kind`.
    pub fn path_for(&self, id: &PackageId, kind: ArtifactKind) -> PathBuf {
        self.dir.join(id.file_name(kind))
    }

    /// First plausible artifact for `id`, in [`ArtifactKind::LOOKUP_ORDER`].
    pub async fn get(&self, id: &PackageId) -> Option<CachedFile> {
        for kind in ArtifactKind::LOOKUP_ORDER {
            let path = self.path_for(id, kind);
            let Ok(meta) = fs::metadata(&path).await else {
                continue;
            };
            if !meta.is_file() || meta.len() <= self.min_bytes {
                continue;
            }
            return Some(CachedFile {
                id: id.clone(),
                kind,
                path,
                size_bytes: meta.len(),
                modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
            });
        }
        None
    }

    /// Move a staged file into the cache under its canonical name.
    ///
    /// Any artifact of another kind for the same identifier is removed first,
    /// so at most one canonical file exists per identifier.
    pub async fn put(
        &self,
        id: &PackageId,
        staged: &Path,
        kind: ArtifactKind,
    ) -> CacheResult<CachedFile> {
        for other in ArtifactKind::LOOKUP_ORDER.into_iter().filter(|k| *k != kind) {
            remove_if_exists(&self.path_for(id, other)).await?;
        }

        let path = self.path_for(id, kind);
        fs::rename(staged, &path)
            .await
            .map_err(|source| CacheError::Store {
                path: path.clone(),
                source,
            })?;

        let meta = fs::metadata(&path)
            .await
            .map_err(|source| CacheError::Read {
                path: path.clone(),
                source,
            })?;

        debug!(package = %id, kind = %kind, path = %path.display(), "Stored artifact");
        Ok(CachedFile {
            id: id.clone(),
            kind,
            path,
            size_bytes: meta.len(),
            modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
        })
    }

    /// Remove every canonical artifact for `id`.
    pub async fn remove(&self, id: &PackageId) -> CacheResult<RemovalResult> {
        let mut result = RemovalResult::default();
        for kind in ArtifactKind::LOOKUP_ORDER {
            let path = self.path_for(id, kind);
            if let Some(bytes) = remove_if_exists(&path).await? {
                result.files_removed += 1;
                result.bytes_freed += bytes;
            }
        }
        Ok(result)
    }

    /// Canonical artifacts currently on disk, sorted by identifier.
    pub async fn list(&self) -> CacheResult<Vec<CachedFile>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|source| CacheError::Read {
                path: self.dir.clone(),
                source,
            })?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((stem, ext)) = name.rsplit_once('.') else {
                continue;
            };
            let (Ok(id), Some(kind)) = (PackageId::parse(stem), ArtifactKind::from_extension(ext))
            else {
                continue;
            };
            files.push(CachedFile {
                id,
                kind,
                path: entry.path(),
                size_bytes: meta.len(),
                modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
            });
        }

        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }

    /// Remove every file in the cache directory, staging included.
    pub async fn clear(&self) -> CacheResult<RemovalResult> {
        let mut result = self.remove_matching(&self.dir, |_| true).await?;
        result.merge(self.remove_matching(&self.staging_dir, |_| true).await?);
        Ok(result)
    }

    /// Remove files (and staging entries) last modified more than `max_age` ago.
    pub async fn remove_older_than(&self, max_age: Duration) -> CacheResult<RemovalResult> {
        let now = SystemTime::now();
        let stale = |modified: SystemTime| {
            now.duration_since(modified)
                .map(|age| age > max_age)
                .unwrap_or(false)
        };

        let mut result = self.remove_matching(&self.dir, stale).await?;
        result.merge(self.remove_matching(&self.staging_dir, stale).await?);
        Ok(result)
    }

    /// Total bytes under the cache directory, staging included.
    pub async fn size_bytes(&self) -> u64 {
        let mut total = 0;
        let mut pending = vec![self.dir.clone()];

        while let Some(dir) = pending.pop() {
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                if meta.is_dir() {
                    pending.push(entry.path());
                } else {
                    total += meta.len();
                }
            }
        }
        total
    }

    /// Remove direct children of `dir` whose mtime satisfies `predicate`.
    ///
    /// Files and subdirectories of the staging area are both candidates; the
    /// staging directory itself is never removed. Entries vanishing
    /// concurrently are skipped; other failures are logged and skipped.
    async fn remove_matching<F>(&self, dir: &Path, predicate: F) -> CacheResult<RemovalResult>
    where
        F: Fn(SystemTime) -> bool,
    {
        let mut result = RemovalResult::default();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(result),
            Err(source) => {
                return Err(CacheError::Read {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path == self.staging_dir {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
            if !predicate(modified) {
                continue;
            }

            let removed = if meta.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };

            match removed {
                Ok(()) => {
                    result.files_removed += 1;
                    if meta.is_file() {
                        result.bytes_freed += meta.len();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache entry"),
            }
        }

        Ok(result)
    }
}

/// Remove `path` if present, returning its size.
async fn remove_if_exists(path: &Path) -> CacheResult<Option<u64>> {
    let size = match fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(None),
    };
    match fs::remove_file(path).await {
        Ok(()) => Ok(Some(size)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CacheError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};

    const MIN: u64 = 100_000;

    fn id(raw: &str) -> PackageId {
        PackageId::parse(raw).unwrap()
    }

    async fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().join("cache"), MIN).await.unwrap();
        (dir, store)
    }

    fn stage(store: &DiskStore, name: &str, len: usize) -> PathBuf {
        let path = store.staging_dir().join(name);
        std::fs::write(&path, vec![1u8; len]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let (_dir, store) = store().await;
        assert!(store.dir().is_dir());
        assert!(store.staging_dir().is_dir());
        assert_eq!(store.min_bytes(), MIN);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_dir, store) = store().await;
        let pkg = id("com.example.app");
        let staged = stage(&store, "x.part", 150_000);

        let stored = store.put(&pkg, &staged, ArtifactKind::SplitBundle).await.unwrap();
        assert_eq!(stored.path, store.dir().join("com.example.app.xapk"));
        assert!(!staged.exists());

        let found = store.get(&pkg).await.unwrap();
        assert_eq!(found.kind, ArtifactKind::SplitBundle);
        assert_eq!(found.size_bytes, 150_000);
    }

    #[tokio::test]
    async fn test_undersized_file_is_absent() {
        let (_dir, store) = store().await;
        let pkg = id("com.example.app");
        std::fs::write(store.path_for(&pkg, ArtifactKind::SinglePackage), vec![0u8; 100_000])
            .unwrap();

        assert!(store.get(&pkg).await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_order_prefers_bundle() {
        let (_dir, store) = store().await;
        let pkg = id("com.example.app");
        std::fs::write(store.path_for(&pkg, ArtifactKind::SinglePackage), vec![0u8; 200_000])
            .unwrap();
        std::fs::write(store.path_for(&pkg, ArtifactKind::SplitBundle), vec![0u8; 200_000])
            .unwrap();

        assert_eq!(store.get(&pkg).await.unwrap().kind, ArtifactKind::SplitBundle);
    }

    #[tokio::test]
    async fn test_put_replaces_other_kind() {
        let (_dir, store) = store().await;
        let pkg = id("com.example.app");
        let old = store.path_for(&pkg, ArtifactKind::SplitBundle);
        std::fs::write(&old, vec![0u8; 200_000]).unwrap();

        let staged = stage(&store, "y.part", 150_000);
        store.put(&pkg, &staged, ArtifactKind::SinglePackage).await.unwrap();

        assert!(!old.exists());
        assert_eq!(store.get(&pkg).await.unwrap().kind, ArtifactKind::SinglePackage);
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let (_dir, store) = store().await;
        let a = id("a.app");
        let b = id("b.app");
        for (pkg, name) in [(&a, "a.part"), (&b, "b.part")] {
            let staged = stage(&store, name, 150_000);
            store.put(pkg, &staged, ArtifactKind::SinglePackage).await.unwrap();
        }

        let listed: Vec<_> = store.list().await.unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(listed, vec![a.clone(), b.clone()]);

        let removed = store.remove(&a).await.unwrap();
        assert_eq!(removed.files_removed, 1);
        assert_eq!(removed.bytes_freed, 150_000);
        assert!(store.get(&a).await.is_none());
        assert!(store.get(&b).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_removes_everything_but_layout() {
        let (_dir, store) = store().await;
        let staged = stage(&store, "keep-me-not.part", 10);
        let pkg = id("com.example.app");
        let other = stage(&store, "z.part", 150_000);
        store.put(&pkg, &other, ArtifactKind::SplitBundle).await.unwrap();
        std::fs::create_dir_all(store.staging_dir().join("com.example.app.tool")).unwrap();

        let result = store.clear().await.unwrap();
        assert_eq!(result.files_removed, 3);
        assert_eq!(result.bytes_freed, 150_010);
        assert!(!staged.exists());
        assert!(store.staging_dir().is_dir());
        assert_eq!(store.size_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_remove_older_than() {
        let (_dir, store) = store().await;
        let old_pkg = id("old.app");
        let new_pkg = id("new.app");
        for (pkg, name) in [(&old_pkg, "o.part"), (&new_pkg, "n.part")] {
            let staged = stage(&store, name, 150_000);
            store.put(pkg, &staged, ArtifactKind::SinglePackage).await.unwrap();
        }
        let stale_part = stage(&store, "stale.part", 5);

        let ten_minutes_ago = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(600));
        set_file_mtime(store.path_for(&old_pkg, ArtifactKind::SinglePackage), ten_minutes_ago)
            .unwrap();
        set_file_mtime(&stale_part, ten_minutes_ago).unwrap();

        let result = store.remove_older_than(Duration::from_secs(300)).await.unwrap();
        assert_eq!(result.files_removed, 2);
        assert!(store.get(&old_pkg).await.is_none());
        assert!(store.get(&new_pkg).await.is_some());
        assert!(!stale_part.exists());
    }

    #[tokio::test]
    async fn test_size_bytes_includes_staging() {
        let (_dir, store) = store().await;
        stage(&store, "a.part", 1_000);
        std::fs::write(store.dir().join("b.apk"), vec![0u8; 2_000]).unwrap();
        assert_eq!(store.size_bytes().await, 3_000);
    }
}
