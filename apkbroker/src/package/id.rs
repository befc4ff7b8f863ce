//! Validated package identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::ArtifactKind;

/// Maximum identifier length in bytes.
///
/// Identifiers become file names, so they are capped at the common
/// filesystem name limit.
pub const MAX_PACKAGE_ID_LEN: usize = 255;

/// Reasons an identifier can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageIdError {
    /// The identifier was empty.
    #[error("package identifier is empty")]
    Empty,

    /// The identifier exceeds [`MAX_PACKAGE_ID_LEN`].
    #[error("package identifier is {len} bytes (max: {max})")]
    TooLong { len: usize, max: usize },

    /// The identifier contains characters that are not allowed.
    #[error("package identifier {0:?} contains invalid characters")]
    InvalidCharacters(String),
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("identifier pattern is valid")
    })
}

/// Opaque key naming a logical package.
///
/// The identifier is stable across acquisition channels and is used verbatim
/// as the stem of cached file names, which is why construction is restricted
/// to a conservative character set: ASCII letters, digits, `.`, `_` and `-`,
/// not starting with a separator. This rules out path traversal
/// (`..`, `/`) and hidden files before any filesystem access happens.
///
/// # Example
///
/// ```
/// use apkbroker::package::PackageId;
///
/// let id: PackageId = "org.videolan.vlc".parse().unwrap();
/// assert_eq!(id.as_str(), "org.videolan.vlc");
///
/// assert!(PackageId::parse("../etc/passwd").is_err());
/// assert!(PackageId::parse("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(String);

impl PackageId {
    /// Parse and validate an identifier.
    pub fn parse(raw: &str) -> Result<Self, PackageIdError> {
        if raw.is_empty() {
            return Err(PackageIdError::Empty);
        }
        if raw.len() > MAX_PACKAGE_ID_LEN {
            return Err(PackageIdError::TooLong {
                len: raw.len(),
                max: MAX_PACKAGE_ID_LEN,
            });
        }
        if !id_pattern().is_match(raw) {
            return Err(PackageIdError::InvalidCharacters(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical cache file name for this identifier and kind.
    pub fn file_name(&self, kind: ArtifactKind) -> String {
        format!("{}.{}", self.0, kind.extension())
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PackageId {
    type Err = PackageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_reverse_domain_names() {
        for raw in ["com.whatsapp", "org.telegram.messenger", "a", "x_y-z.1"] {
            let id = PackageId::parse(raw).unwrap();
            assert_eq!(id.as_str(), raw);
        }
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(PackageId::parse(""), Err(PackageIdError::Empty));
    }

    #[test]
    fn test_rejects_path_components() {
        for raw in ["..", "../x", "a/b", "a\\b", ".hidden", "-flag", "a b"] {
            assert!(
                matches!(
                    PackageId::parse(raw),
                    Err(PackageIdError::InvalidCharacters(_))
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_too_long() {
        let raw = "a".repeat(MAX_PACKAGE_ID_LEN + 1);
        assert_eq!(
            PackageId::parse(&raw),
            Err(PackageIdError::TooLong {
                len: MAX_PACKAGE_ID_LEN + 1,
                max: MAX_PACKAGE_ID_LEN
            })
        );
    }

    #[test]
    fn test_file_name_per_kind() {
        let id = PackageId::parse("com.example").unwrap();
        assert_eq!(id.file_name(ArtifactKind::SinglePackage), "com.example.apk");
        assert_eq!(id.file_name(ArtifactKind::SplitBundle), "com.example.xapk");
        assert_eq!(id.file_name(ArtifactKind::Unknown), "com.example.bin");
    }

    proptest! {
        #[test]
        fn prop_valid_ids_never_escape_directory(raw in "[A-Za-z0-9][A-Za-z0-9._-]{0,60}") {
            let id = PackageId::parse(&raw).unwrap();
            let name = id.file_name(ArtifactKind::SinglePackage);
            prop_assert!(!name.contains('/'));
            prop_assert!(!name.starts_with('.'));
            let joined = std::path::Path::new("/cache").join(&name);
            prop_assert_eq!(joined.parent(), Some(std::path::Path::new("/cache")));
        }

        #[test]
        fn prop_slash_is_always_rejected(prefix in "[a-z]{1,8}", suffix in "[a-z]{0,8}") {
            let raw = format!("{prefix}/{suffix}");
            prop_assert!(PackageId::parse(&raw).is_err());
        }
    }
}
