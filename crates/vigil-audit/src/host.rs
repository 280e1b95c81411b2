//! Read-only view of the host's installed packages.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use vigil_common::{Error, Result};

/// A permission an application defines for others to request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredPermission {
    pub name: String,
    /// Raw protection level: base class plus modifier flags.
    pub protection_level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub label: String,
    pub package_id: String,
    #[serde(default)]
    pub declared_permissions: Vec<DeclaredPermission>,
}

pub trait PackageSource {
    /// Every installed package with the permissions it declares itself.
    fn installed_packages(&self) -> Result<Vec<InstalledPackage>>;
}

impl PackageSource for Vec<InstalledPackage> {
    fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
        Ok(self.clone())
    }
}

/// Package listing captured to a JSON file.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn parse(json: &str) -> Result<Vec<InstalledPackage>> {
        serde_json::from_str(json).map_err(Error::serialization)
    }
}

impl PackageSource for SnapshotSource {
    fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
        let raw = fs::read_to_string(&self.path)?;
        let packages = Self::parse(&raw)?;
        debug!(path = %self.path.display(), count = packages.len(), "loaded package snapshot");
        Ok(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot() {
        let json = r#"[
            {"label": "Camera Helper", "package_id": "com.x.helper",
             "declared_permissions": [{"name": "com.x.CUSTOM_A", "protection_level": 0}]},
            {"label": "Notes", "package_id": "com.y.notes"}
        ]"#;
        let packages = SnapshotSource::parse(json).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].declared_permissions[0].name, "com.x.CUSTOM_A");
        assert!(packages[1].declared_permissions.is_empty());
    }

    #[test]
    fn test_bad_snapshot_is_rejected() {
        assert!(matches!(
            SnapshotSource::parse("{not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = SnapshotSource::new("/nonexistent/vigil/packages.json");
        assert!(matches!(source.installed_packages(), Err(Error::Io(_))));
    }
}
