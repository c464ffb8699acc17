//! Per-record access permissions.
//!
//! A record may restrict what the engine is allowed to do to its external
//! resource, e.g. `"R"` for an adopted resource the engine must only observe.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PermissionParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPermissions {
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl AccessPermissions {
    pub const ALL: AccessPermissions = AccessPermissions {
        create: true,
        update: true,
        delete: true,
    };

    pub const READ_ONLY: AccessPermissions = AccessPermissions {
        create: false,
        update: false,
        delete: false,
    };
}

impl Default for AccessPermissions {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromStr for AccessPermissions {
    type Err = PermissionParseError;

    /// Parse a `"CRUD"`-style string. Read is always implied.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut perms = AccessPermissions::READ_ONLY;
        for c in s.chars().filter(|c| !c.is_whitespace()) {
            match c.to_ascii_uppercase() {
                'C' => perms.create = true,
                'R' => {}
                'U' => perms.update = true,
                'D' => perms.delete = true,
                other => return Err(PermissionParseError(other)),
            }
        }
        Ok(perms)
    }
}

impl fmt::Display for AccessPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.create {
            f.write_str("C")?;
        }
        f.write_str("R")?;
        if self.update {
            f.write_str("U")?;
        }
        if self.delete {
            f.write_str("D")?;
        }
        Ok(())
    }
}

impl Serialize for AccessPermissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccessPermissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_letters_in_any_case_and_order() {
        assert_eq!("CRUD".parse::<AccessPermissions>().unwrap(), AccessPermissions::ALL);
        assert_eq!("dcu".parse::<AccessPermissions>().unwrap(), AccessPermissions::ALL);
        assert_eq!(
            "R".parse::<AccessPermissions>().unwrap(),
            AccessPermissions::READ_ONLY
        );

        let perms: AccessPermissions = "CR".parse().unwrap();
        assert!(perms.create);
        assert!(!perms.update);
        assert!(!perms.delete);
        assert_eq!(perms.to_string(), "CR");
    }

    #[test]
    fn rejects_unknown_letters() {
        assert_eq!(
            "CRUX".parse::<AccessPermissions>(),
            Err(PermissionParseError('X'))
        );
    }

    #[test]
    fn serde_uses_the_letter_form() {
        let perms: AccessPermissions = serde_json::from_str("\"RU\"").unwrap();
        assert!(perms.update && !perms.create && !perms.delete);
        assert_eq!(serde_json::to_string(&perms).unwrap(), "\"RU\"");
        assert!(serde_json::from_str::<AccessPermissions>("\"Q\"").is_err());
    }
}
