//! Version compatibility with the mobile app.
//!
//! The mobile reports a minimum CLI version in its `mobile-info` frame.
//! When this build is older, the bridge answers with an
//! `update-required:<json>` control frame so the app can prompt the user.
//! (Replacing the binary is handled by the installer, not the bridge.)

use serde::{Deserialize, Serialize};

use crate::constants::VERSION;

/// Parsed `major.minor.patch` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Semver {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Semver {
    /// Parse `1.2.3` or `v1.2.3`.
    #[must_use]
    pub fn parse(version: &str) -> Option<Self> {
        let version = version.trim().trim_start_matches('v');
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

impl std::fmt::Display for Semver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Fields the bridge reads from a `mobile-info:<json>` frame. Everything
/// else the mobile sends is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileInfo {
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub min_cli_version: Option<String>,
}

/// Body of an `update-required:<json>` control frame.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UpdateRequired {
    pub current: String,
    pub required: String,
}

/// Decide whether this CLI is too old for the reporting mobile.
#[must_use]
pub fn check_mobile_info(info_json: &str) -> Option<UpdateRequired> {
    let info: MobileInfo = serde_json::from_str(info_json).ok()?;
    let required_str = info.min_cli_version?;
    let required = Semver::parse(&required_str)?;
    let current = Semver::parse(VERSION)?;
    if current < required {
        Some(UpdateRequired {
            current: current.to_string(),
            required: required.to_string(),
        })
    } else {
        None
    }
}
