//! Platforms and platform matching.
//!
//! Manifest lists declare one platform per child manifest. Selecting the child
//! to use is done with a [`PlatformMatcher`]; the strict matcher for the host
//! platform ([`PlatformMatcher::default_strict`]) is what the pruner and the
//! size accounting use when the caller does not ask for something else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An `os/architecture[/variant]` triple, normalized to OCI spellings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Build a normalized platform.
    pub fn new(os: &str, architecture: &str, variant: Option<&str>) -> Self {
        let os = match os.to_lowercase().as_str() {
            "macos" => "darwin".to_string(),
            other => other.to_string(),
        };
        let (architecture, variant) = normalize_arch(
            &architecture.to_lowercase(),
            variant.map(str::to_lowercase).as_deref(),
        );
        Platform {
            os,
            architecture,
            variant,
        }
    }

    /// Parse `os/arch` or `os/arch/variant`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Self::new(os, arch, None)),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Self::new(os, arch, Some(variant)))
            }
            _ => Err(Error::InvalidParameter(format!(
                "invalid platform {s:?}: expected os/arch[/variant]"
            ))),
        }
    }

    /// The platform this process is running on.
    pub fn host() -> Self {
        let arch = host_arch(std::env::consts::ARCH, cfg!(target_endian = "little"));
        Self::new(std::env::consts::OS, arch, None)
    }
}

/// OCI spelling of a Rust target architecture.
fn host_arch(arch: &str, little_endian: bool) -> &str {
    match arch {
        "x86" => "386",
        "powerpc64" if little_endian => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}

impl From<&oci_spec::image::Platform> for Platform {
    fn from(p: &oci_spec::image::Platform) -> Self {
        Platform::new(
            &p.os().to_string(),
            &p.architecture().to_string(),
            p.variant().as_deref(),
        )
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

fn normalize_arch(arch: &str, variant: Option<&str>) -> (String, Option<String>) {
    let (arch, variant) = match (arch, variant) {
        ("i386", v) => ("386", v),
        ("x86_64" | "x86-64" | "amd64", Some("v1")) => ("amd64", None),
        ("x86_64" | "x86-64" | "amd64", v) => ("amd64", v),
        ("aarch64" | "arm64", Some("8" | "v8")) => ("arm64", None),
        ("aarch64" | "arm64", v) => ("arm64", v),
        ("armhf", _) => ("arm", Some("v7")),
        ("armel", _) => ("arm", Some("v6")),
        ("arm", None) => ("arm", Some("v7")),
        ("arm", Some(v @ ("5" | "6" | "7" | "8"))) => {
            return ("arm".to_string(), Some(format!("v{v}")));
        }
        (other, v) => (other, v),
    };
    (arch.to_string(), variant.map(str::to_string))
}

/// Decides whether a declared platform is acceptable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlatformMatcher {
    /// Every platform (and a missing platform) matches.
    All,
    /// Only the given platform matches, after normalization.
    Strict(Platform),
}

impl PlatformMatcher {
    /// Strict matcher for the host platform.
    pub fn default_strict() -> Self {
        PlatformMatcher::Strict(Platform::host())
    }

    pub fn only_strict(platform: Platform) -> Self {
        PlatformMatcher::Strict(platform)
    }

    pub fn matches(&self, platform: &Platform) -> bool {
        match self {
            PlatformMatcher::All => true,
            PlatformMatcher::Strict(wanted) => wanted == platform,
        }
    }
}

impl fmt::Display for PlatformMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformMatcher::All => f.write_str("all"),
            PlatformMatcher::Strict(p) => write!(f, "{p}"),
        }
    }
}
