//! Mule-risk classification of declared custom permissions.

use std::cmp::Reverse;

use serde::Serialize;
use tracing::{info, warn};
use vigil_common::config::DEFAULT_PLATFORM_NAMESPACE;
use vigil_common::{Error, MonitorConfig, RiskRule};

use crate::host::{DeclaredPermission, InstalledPackage, PackageSource};
use crate::protection::{ProtectionClass, ProtectionFlags};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierOptions {
    /// Name prefix reserved for platform permissions; these are never custom.
    pub platform_namespace: String,
    pub risk_rule: RiskRule,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            platform_namespace: DEFAULT_PLATFORM_NAMESPACE.to_string(),
            risk_rule: RiskRule::default(),
        }
    }
}

impl From<&MonitorConfig> for ClassifierOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            platform_namespace: config.platform_namespace.clone(),
            risk_rule: config.risk_rule,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomPermission {
    pub name: String,
    pub protection: ProtectionClass,
    pub flags: ProtectionFlags,
    pub raw_level: u32,
    pub is_risk: bool,
}

impl CustomPermission {
    fn classify(declared: &DeclaredPermission, rule: RiskRule) -> Self {
        let protection = ProtectionClass::from_level(declared.protection_level);
        Self {
            name: declared.name.clone(),
            protection,
            flags: ProtectionFlags::from_level(declared.protection_level),
            raw_level: declared.protection_level,
            is_risk: protection.is_risk(rule),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppPermissionProfile {
    pub app_label: String,
    pub package_id: String,
    /// Declaration order is preserved.
    pub declared_custom_permissions: Vec<CustomPermission>,
}

impl AppPermissionProfile {
    pub fn risk_count(&self) -> usize {
        self.declared_custom_permissions
            .iter()
            .filter(|p| p.is_risk)
            .count()
    }
}

/// Profile every package that declares at least one custom permission,
/// riskiest first. Ties keep enumeration order.
pub fn classify(
    packages: &[InstalledPackage],
    options: &ClassifierOptions,
) -> Vec<AppPermissionProfile> {
    let mut profiles: Vec<AppPermissionProfile> = packages
        .iter()
        .filter_map(|package| {
            let custom: Vec<CustomPermission> = package
                .declared_permissions
                .iter()
                .filter(|p| !is_platform(&p.name, &options.platform_namespace))
                .map(|p| CustomPermission::classify(p, options.risk_rule))
                .collect();
            if custom.is_empty() {
                return None;
            }
            Some(AppPermissionProfile {
                app_label: package.label.clone(),
                package_id: package.package_id.clone(),
                declared_custom_permissions: custom,
            })
        })
        .collect();

    profiles.sort_by_key(|p| Reverse(p.risk_count()));
    profiles
}

fn is_platform(name: &str, namespace: &str) -> bool {
    !namespace.is_empty() && name.starts_with(namespace)
}

/// Result of a scan. A failed enumeration yields no profiles and the error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanOutcome {
    pub profiles: Vec<AppPermissionProfile>,
    pub error: Option<Error>,
}

pub fn scan(source: &dyn PackageSource, options: &ClassifierOptions) -> ScanOutcome {
    let packages = match source.installed_packages() {
        Ok(packages) => packages,
        Err(e) => {
            warn!(error = %e, "package enumeration failed");
            return ScanOutcome {
                profiles: Vec::new(),
                error: Some(match e {
                    Error::ClassificationUnavailable(_) => e,
                    other => Error::classification(other),
                }),
            };
        }
    };

    let profiles = classify(&packages, options);
    info!(
        packages = packages.len(),
        flagged = profiles.iter().filter(|p| p.risk_count() > 0).count(),
        rule = %options.risk_rule,
        "permission scan complete"
    );
    ScanOutcome {
        profiles,
        error: None,
    }
}
