//! Database engine version parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::UpgradeError;

/// Target engine version, e.g. `3.2`, `3.2.1` or `3.0/wiredTiger`.
///
/// The optional storage engine suffix selects the on-disk format the
/// upgraded engine should run with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
    pub storage_engine: Option<String>,
}

impl EngineVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: None,
            storage_engine: None,
        }
    }

    pub fn with_storage_engine(mut self, engine: impl Into<String>) -> Self {
        self.storage_engine = Some(engine.into());
        self
    }

    /// Parse a version string.
    pub fn parse(raw: &str) -> Result<Self, UpgradeError> {
        let invalid = || UpgradeError::InvalidVersion(raw.to_string());
        let trimmed = raw.trim();

        let (numbers, storage_engine) = match trimmed.split_once('/') {
            Some((numbers, engine)) => {
                let engine = engine.trim();
                if engine.is_empty() || !engine.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(invalid());
                }
                (numbers, Some(engine.to_string()))
            }
            None => (trimmed, None),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid());
        }

        let component = |s: &str| -> Result<u32, UpgradeError> {
            if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse().map_err(|_| invalid())
        };

        Ok(Self {
            major: component(parts[0])?,
            minor: component(parts[1])?,
            patch: parts.get(2).map(|p| component(p)).transpose()?,
            storage_engine,
        })
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(patch) = self.patch {
            write!(f, ".{}", patch)?;
        }
        if let Some(engine) = &self.storage_engine {
            write!(f, "/{}", engine)?;
        }
        Ok(())
    }
}

impl FromStr for EngineVersion {
    type Err = UpgradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for EngineVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_minor() {
        let v = EngineVersion::parse("3.0").unwrap();
        assert_eq!(v, EngineVersion::new(3, 0));
        assert_eq!(v.to_string(), "3.0");
    }

    #[test]
    fn test_parse_with_patch_and_engine() {
        let v = EngineVersion::parse("3.2.12/wiredTiger").unwrap();
        assert_eq!(v.major, 3);
        assert_eq!(v.minor, 2);
        assert_eq!(v.patch, Some(12));
        assert_eq!(v.storage_engine.as_deref(), Some("wiredTiger"));
        assert_eq!(v.to_string(), "3.2.12/wiredTiger");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(
            EngineVersion::parse(" 3.0/mmapv1 ").unwrap(),
            EngineVersion::new(3, 0).with_storage_engine("mmapv1")
        );
    }

    #[test]
    fn test_parse_invalid() {
        for raw in ["", "3", "3.", "x.1", "3.0.1.2", "3.0/", "3.0/wired tiger", "-3.0"] {
            assert!(
                matches!(EngineVersion::parse(raw), Err(UpgradeError::InvalidVersion(_))),
                "expected {:?} to be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_patch_presence_changes_display() {
        let short = EngineVersion::parse("3.0").unwrap();
        let long = EngineVersion::parse("3.0.0").unwrap();
        assert_ne!(short, long);
        assert_ne!(short.to_string(), long.to_string());
    }

    #[test]
    fn test_serialize_as_string() {
        let v = EngineVersion::parse("3.2/wiredTiger").unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"3.2/wiredTiger\"");
    }
}
