//! Classified artifacts and their kinds.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

use serde::Serialize;

use super::PackageId;

/// Classifier-assigned type of an artifact.
///
/// The kind is decided by inspecting the archive, never by the extension a
/// channel reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// A single installable package (`.apk`).
    SinglePackage,
    /// A bundle of split packages and/or data packs (`.xapk`).
    SplitBundle,
    /// Could not be classified (`.bin`).
    Unknown,
}

impl ArtifactKind {
    /// Order in which the positive cache probes kind extensions.
    pub const LOOKUP_ORDER: [ArtifactKind; 3] = [
        ArtifactKind::SplitBundle,
        ArtifactKind::SinglePackage,
        ArtifactKind::Unknown,
    ];

    /// File extension (without the dot) used for cached files of this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::SinglePackage => "apk",
            ArtifactKind::SplitBundle => "xapk",
            ArtifactKind::Unknown => "bin",
        }
    }

    /// Map a cached file extension back to its kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::LOOKUP_ORDER
            .into_iter()
            .find(|kind| kind.extension().eq_ignore_ascii_case(ext))
    }

    /// Human-readable label (`single-package`, `split-bundle`, `unknown`).
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::SinglePackage => "single-package",
            ArtifactKind::SplitBundle => "split-bundle",
            ArtifactKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single-package" | "apk" => Ok(ArtifactKind::SinglePackage),
            "split-bundle" | "xapk" => Ok(ArtifactKind::SplitBundle),
            "unknown" | "bin" => Ok(ArtifactKind::Unknown),
            other => Err(format!("unknown artifact kind: {other}")),
        }
    }
}

/// Where a served artifact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Served from the positive cache without touching any channel.
    Cache,
    /// Freshly acquired by the named acquisition strategy.
    Channel(String),
}

impl ArtifactSource {
    /// Whether this artifact was a cache hit.
    pub fn is_cache(&self) -> bool {
        matches!(self, ArtifactSource::Cache)
    }
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactSource::Cache => f.write_str("cache"),
            ArtifactSource::Channel(name) => f.write_str(name),
        }
    }
}

/// A successfully acquired, classified, cached file.
///
/// The file itself is owned by the cache store; an `Artifact` is only a view
/// of it at the moment it was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Package this artifact belongs to.
    pub id: PackageId,
    /// Classified kind.
    pub kind: ArtifactKind,
    /// Canonical path inside the cache directory.
    pub path: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
    /// When the file was created (acquisition completion time).
    pub created_at: SystemTime,
    /// Acquiring channel, or the cache.
    pub source: ArtifactSource,
}

impl Artifact {
    /// File name presented to clients (`{id}.{ext}`).
    pub fn file_name(&self) -> String {
        self.id.file_name(self.kind)
    }

    /// Whether this artifact was served from cache.
    pub fn is_cache_hit(&self) -> bool {
        self.source.is_cache()
    }
}
