//! Kubernetes version gate

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` cluster version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubeVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl KubeVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a `gitVersion` such as `v1.29.3`, `v1.29.3+k3s1` or
    /// `v1.27.8-gke.1067004`. Pre-release and build suffixes are ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let core = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = core.split(['-', '+']).next().unwrap_or_default();

        let mut parts = core.split('.');
        let mut next = |label: &str| -> Result<u64> {
            parts
                .next()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| Error::InvalidVersion(format!("{}: missing {} version", raw, label)))?
                .parse::<u64>()
                .map_err(|e| Error::InvalidVersion(format!("{}: {}", raw, e)))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(Error::InvalidVersion(format!(
                "{}: too many version components",
                raw
            )));
        }

        Ok(Self::new(major, minor, patch))
    }

    /// Whether this version is `min` or newer
    pub fn at_least(&self, min: &KubeVersion) -> bool {
        self >= min
    }
}

impl FromStr for KubeVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_distribution_versions() {
        assert_eq!(KubeVersion::parse("v1.29.3").unwrap(), KubeVersion::new(1, 29, 3));
        assert_eq!(
            KubeVersion::parse("v1.29.3+k3s1").unwrap(),
            KubeVersion::new(1, 29, 3)
        );
        assert_eq!(
            KubeVersion::parse("v1.27.8-gke.1067004").unwrap(),
            KubeVersion::new(1, 27, 8)
        );
        assert_eq!(KubeVersion::parse("1.20.0").unwrap(), KubeVersion::new(1, 20, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_matches!(KubeVersion::parse("v1.29"), Err(Error::InvalidVersion(_)));
        assert_matches!(KubeVersion::parse("v1.x.0"), Err(Error::InvalidVersion(_)));
        assert_matches!(KubeVersion::parse("1.2.3.4"), Err(Error::InvalidVersion(_)));
        assert_matches!(KubeVersion::parse(""), Err(Error::InvalidVersion(_)));
    }

    #[test]
    fn test_ordering() {
        let min: KubeVersion = "v1.20.0".parse().unwrap();
        assert!(KubeVersion::new(1, 20, 0).at_least(&min));
        assert!(KubeVersion::new(1, 29, 1).at_least(&min));
        assert!(KubeVersion::new(2, 0, 0).at_least(&min));
        assert!(!KubeVersion::new(1, 19, 16).at_least(&min));
        assert_eq!(min.to_string(), "v1.20.0");
    }
}
