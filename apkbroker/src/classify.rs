//! Archive-based artifact classification.
//!
//! Upstream channels report whatever extension they like; a "bundle"
//! endpoint may hand back a plain package and vice versa. The classifier
//! opens the downloaded file as a zip archive and reads its table of
//! contents (no extraction) to decide the real [`ArtifactKind`]:
//!
//! | Marker (case-insensitive)                      | Kind           |
//! |------------------------------------------------|----------------|
//! | root `manifest.json`                           | split-bundle   |
//! | any nested `*.apk` entry or `.obb` data pack   | split-bundle   |
//! | root `AndroidManifest.xml`                     | single-package |
//! | root `classes.dex` or `resources.arsc`         | single-package |
//! | none of the above / not a zip                  | policy default |
//!
//! The default for unrecognised archives is governed by
//! [`UnrecognizedPolicy`]; out of the box it is fail-open
//! (`single-package`).

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::package::ArtifactKind;

/// What to call an archive that carries no recognisable marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnrecognizedPolicy {
    /// Treat it as a single package (fail-open).
    #[default]
    AssumeSinglePackage,
    /// Tag it as [`ArtifactKind::Unknown`].
    Unknown,
}

impl UnrecognizedPolicy {
    /// Kind assigned when no marker decides.
    pub fn default_kind(&self) -> ArtifactKind {
        match self {
            UnrecognizedPolicy::AssumeSinglePackage => ArtifactKind::SinglePackage,
            UnrecognizedPolicy::Unknown => ArtifactKind::Unknown,
        }
    }
}

impl FromStr for UnrecognizedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single-package" | "apk" => Ok(UnrecognizedPolicy::AssumeSinglePackage),
            "unknown" => Ok(UnrecognizedPolicy::Unknown),
            other => Err(format!(
                "expected 'single-package' or 'unknown', got '{other}'"
            )),
        }
    }
}

/// Which marker decided the classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    /// Root-level bundle manifest.
    BundleManifest,
    /// Nested installer or data-pack entries.
    NestedEntries { packages: usize, data_packs: usize },
    /// Root-level platform manifest.
    PlatformManifest,
    /// Root-level core installer payload.
    CoreInstaller,
    /// A readable archive without any known marker.
    NoMarkers,
    /// The file could not be opened as an archive.
    Unreadable(String),
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::BundleManifest => write!(f, "bundle manifest"),
            Evidence::NestedEntries {
                packages,
                data_packs,
            } => write!(
                f,
                "{} nested packages, {} data packs",
                packages, data_packs
            ),
            Evidence::PlatformManifest => write!(f, "platform manifest"),
            Evidence::CoreInstaller => write!(f, "core installer entries"),
            Evidence::NoMarkers => write!(f, "no recognisable markers"),
            Evidence::Unreadable(reason) => write!(f, "unreadable archive: {}", reason),
        }
    }
}

/// Result of classifying one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ArtifactKind,
    pub evidence: Evidence,
}

impl Classification {
    /// Whether the kind came from the fallback policy rather than a marker.
    pub fn is_fallback(&self) -> bool {
        matches!(self.evidence, Evidence::NoMarkers | Evidence::Unreadable(_))
    }
}

/// Zip table-of-contents classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    policy: UnrecognizedPolicy,
}

impl Classifier {
    /// Create a classifier with the given fallback policy.
    pub fn new(policy: UnrecognizedPolicy) -> Self {
        Self { policy }
    }

    /// The fallback policy in use.
    pub fn policy(&self) -> UnrecognizedPolicy {
        self.policy
    }

    /// Classify the file at `path`.
    ///
    /// Never fails: an unreadable file is classified by the fallback policy.
    /// This is blocking I/O and belongs on the worker pool.
    pub fn classify(&self, path: &Path) -> Classification {
        let names = match read_entry_names(path) {
            Ok(names) => names,
            Err(reason) => {
                warn!(path = %path.display(), %reason, "Archive unreadable, using fallback kind");
                return Classification {
                    kind: self.policy.default_kind(),
                    evidence: Evidence::Unreadable(reason),
                };
            }
        };

        let classification = self.classify_entries(&names);
        debug!(
            path = %path.display(),
            kind = %classification.kind,
            evidence = %classification.evidence,
            entries = names.len(),
            "Classified artifact"
        );
        classification
    }

    /// Classify from a list of archive entry names.
    pub fn classify_entries<S: AsRef<str>>(&self, names: &[S]) -> Classification {
        let lower: Vec<String> = names.iter().map(|n| n.as_ref().to_lowercase()).collect();
        let has_root = |marker: &str| lower.iter().any(|n| n == marker);

        if has_root("manifest.json") {
            return Classification {
                kind: ArtifactKind::SplitBundle,
                evidence: Evidence::BundleManifest,
            };
        }

        let packages = lower.iter().filter(|n| n.ends_with(".apk")).count();
        let data_packs = lower.iter().filter(|n| n.contains(".obb")).count();
        if packages > 0 || data_packs > 0 {
            return Classification {
                kind: ArtifactKind::SplitBundle,
                evidence: Evidence::NestedEntries {
                    packages,
                    data_packs,
                },
            };
        }

        if has_root("androidmanifest.xml") {
            return Classification {
                kind: ArtifactKind::SinglePackage,
                evidence: Evidence::PlatformManifest,
            };
        }

        if has_root("classes.dex") || has_root("resources.arsc") {
            return Classification {
                kind: ArtifactKind::SinglePackage,
                evidence: Evidence::CoreInstaller,
            };
        }

        Classification {
            kind: self.policy.default_kind(),
            evidence: Evidence::NoMarkers,
        }
    }
}

fn read_entry_names(path: &Path) -> Result<Vec<String>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let archive = ZipArchive::new(file).map_err(|e| e.to_string())?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Classify a file with the default (fail-open) policy.
pub fn classify(path: &Path) -> ArtifactKind {
    Classifier::default().classify(path).kind
}
