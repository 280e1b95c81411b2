//! Environment-driven configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const ENV_RTC_APP_ID: &str = "VIGIL_RTC_APP_ID";
pub const ENV_PLATFORM_NAMESPACE: &str = "VIGIL_PLATFORM_NAMESPACE";
pub const ENV_RISK_RULE: &str = "VIGIL_RISK_RULE";

/// Permission names under this prefix belong to the platform itself.
pub const DEFAULT_PLATFORM_NAMESPACE: &str = "android.";

/// Which protection classes count as a laundering risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RiskRule {
    NormalOnly,
    #[default]
    NormalAndDangerous,
}

impl RiskRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NormalOnly => "normal-only",
            Self::NormalAndDangerous => "normal-and-dangerous",
        }
    }
}

impl fmt::Display for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal-only" | "normal" => Ok(Self::NormalOnly),
            "normal-and-dangerous" | "dangerous" => Ok(Self::NormalAndDangerous),
            other => Err(Error::config(format!("unknown risk rule: {other}"))),
        }
    }
}

#[derive(Clone)]
pub struct MonitorConfig {
    /// Pre-shared credential for the real-time engine.
    pub rtc_app_id: Option<String>,
    pub platform_namespace: String,
    pub risk_rule: RiskRule,
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("rtc_app_id", &self.rtc_app_id.as_ref().map(|_| "<redacted>"))
            .field("platform_namespace", &self.platform_namespace)
            .field("risk_rule", &self.risk_rule)
            .finish()
    }
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rtc_app_id = lookup(ENV_RTC_APP_ID)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let platform_namespace = match lookup(ENV_PLATFORM_NAMESPACE) {
            Some(v) if v.trim().is_empty() => {
                return Err(Error::config(format!("{ENV_PLATFORM_NAMESPACE} is empty")))
            }
            Some(v) => v.trim().to_string(),
            None => DEFAULT_PLATFORM_NAMESPACE.to_string(),
        };

        let risk_rule = lookup(ENV_RISK_RULE)
            .map(|v| v.parse::<RiskRule>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            rtc_app_id,
            platform_namespace,
            risk_rule,
        })
    }

    pub fn require_app_id(&self) -> Result<&str> {
        self.rtc_app_id
            .as_deref()
            .ok_or_else(|| Error::config(format!("{ENV_RTC_APP_ID} is not set")))
    }
}
