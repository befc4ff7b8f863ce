//! Package identity and artifact types.
//!
//! Every entity in the broker is indexed by a [`PackageId`]. Once an upstream
//! channel has delivered a file and the classifier has inspected it, the file
//! becomes an [`Artifact`] with a classified [`ArtifactKind`].
//!
//! All filesystem names are derived here so the cache, the resolver and the
//! HTTP surface agree on them:
//!
//! ```
//! use apkbroker::package::{ArtifactKind, PackageId};
//!
//! let id = PackageId::parse("com.example.app").unwrap();
//! assert_eq!(id.file_name(ArtifactKind::SplitBundle), "com.example.app.xapk");
//! assert_eq!(id.file_name(ArtifactKind::SinglePackage), "com.example.app.apk");
//! ```

mod artifact;
mod id;

pub use artifact::{Artifact, ArtifactKind, ArtifactSource};
pub use id::{PackageId, PackageIdError, MAX_PACKAGE_ID_LEN};
