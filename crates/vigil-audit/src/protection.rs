//! Permission protection levels.
//!
//! A raw protection level packs a base class into the low nibble and
//! modifier flags into the bits above it.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use vigil_common::RiskRule;

/// Bits holding the base protection class.
pub const BASE_MASK: u32 = 0xF;

const BASE_NORMAL: u32 = 0;
const BASE_DANGEROUS: u32 = 1;
const BASE_SIGNATURE: u32 = 2;
const BASE_SIGNATURE_OR_SYSTEM: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionClass {
    /// Granted to any app that asks.
    Normal,
    /// Granted after user consent.
    Dangerous,
    /// Granted only to apps signed with the declaring app's key.
    Signature,
    Other,
}

impl ProtectionClass {
    pub fn from_level(level: u32) -> Self {
        match level & BASE_MASK {
            BASE_NORMAL => Self::Normal,
            BASE_DANGEROUS => Self::Dangerous,
            BASE_SIGNATURE | BASE_SIGNATURE_OR_SYSTEM => Self::Signature,
            _ => Self::Other,
        }
    }

    pub fn is_risk(&self, rule: RiskRule) -> bool {
        match (self, rule) {
            (Self::Normal, _) => true,
            (Self::Dangerous, RiskRule::NormalAndDangerous) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProtectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Dangerous => "dangerous",
            Self::Signature => "signature",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Modifier bits above the base class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ProtectionFlags: u32 {
        const PRIVILEGED = 0x10;
        const DEVELOPMENT = 0x20;
        const APPOP = 0x40;
        const PRE23 = 0x80;
        const INSTALLER = 0x100;
        const VERIFIER = 0x200;
        const PREINSTALLED = 0x400;
        const SETUP = 0x800;
        const INSTANT = 0x1000;
        const RUNTIME_ONLY = 0x2000;
        const OEM = 0x4000;
        const VENDOR_PRIVILEGED = 0x8000;
    }
}

impl ProtectionFlags {
    /// Modifier bits of a raw level. Bits without a name are kept.
    pub fn from_level(level: u32) -> Self {
        Self::from_bits_retain(level & !BASE_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_class_ignores_flags() {
        assert_eq!(ProtectionClass::from_level(0), ProtectionClass::Normal);
        assert_eq!(ProtectionClass::from_level(0x1), ProtectionClass::Dangerous);
        assert_eq!(ProtectionClass::from_level(0x2), ProtectionClass::Signature);
        assert_eq!(ProtectionClass::from_level(0x3), ProtectionClass::Signature);
        assert_eq!(ProtectionClass::from_level(0x12), ProtectionClass::Signature);
        assert_eq!(ProtectionClass::from_level(0x40), ProtectionClass::Normal);
        assert_eq!(ProtectionClass::from_level(0x4), ProtectionClass::Other);
    }

    #[test]
    fn test_flags_are_split_from_base() {
        let flags = ProtectionFlags::from_level(0x12 | 0x100);
        assert_eq!(flags, ProtectionFlags::PRIVILEGED | ProtectionFlags::INSTALLER);
        assert!(ProtectionFlags::from_level(0x3).is_empty());
        assert_eq!(ProtectionFlags::from_level(0x10_0000).bits(), 0x10_0000);
    }

    #[test]
    fn test_risk_rules() {
        use ProtectionClass::*;
        assert!(Normal.is_risk(RiskRule::NormalOnly));
        assert!(!Dangerous.is_risk(RiskRule::NormalOnly));
        assert!(Dangerous.is_risk(RiskRule::NormalAndDangerous));
        assert!(!Signature.is_risk(RiskRule::NormalAndDangerous));
        assert!(!Other.is_risk(RiskRule::NormalAndDangerous));
    }
}
