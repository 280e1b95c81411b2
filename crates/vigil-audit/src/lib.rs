//! Static permission analysis.
//!
//! Flags installed applications that declare custom permissions with weak
//! enforcement, which would let a less privileged app borrow ("launder") a
//! capability it could not request directly.

#![forbid(unsafe_code)]

pub mod classifier;
pub mod host;
pub mod protection;

pub use classifier::{
    classify, scan, AppPermissionProfile, ClassifierOptions, CustomPermission, ScanOutcome,
};
pub use host::{DeclaredPermission, InstalledPackage, PackageSource, SnapshotSource};
pub use protection::{ProtectionClass, ProtectionFlags};
