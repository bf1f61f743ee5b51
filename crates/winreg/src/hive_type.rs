//! Hive classification.
//!
//! Plugins declare which hive they apply to; the scanner decides the type of
//! each input from the file name embedded in the base block (e.g.
//! `\SystemRoot\System32\Config\SOFTWARE`), falling back to the on-disk name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registry hive type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HiveType {
    Software,
    System,
    Sam,
    Security,
    Ntuser,
    Usrclass,
    Unknown,
}

impl HiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HiveType::Software => "SOFTWARE",
            HiveType::System => "SYSTEM",
            HiveType::Sam => "SAM",
            HiveType::Security => "SECURITY",
            HiveType::Ntuser => "NTUSER",
            HiveType::Usrclass => "USRCLASS",
            HiveType::Unknown => "UNKNOWN",
        }
    }

    /// Classify a hive from a file name or embedded hive path.
    ///
    /// Only the last path component counts, and transaction logs / saved
    /// copies (`SOFTWARE.LOG1`, `SOFTWARE.SAV`) are not hives.
    pub fn from_hive_name(name: &str) -> HiveType {
        let base = name
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(name)
            .to_uppercase();
        if base.contains(".LOG") || base.ends_with(".SAV") {
            return HiveType::Unknown;
        }
        let stem = base.split('.').next().unwrap_or(&base);
        match stem {
            "SOFTWARE" => HiveType::Software,
            "SYSTEM" => HiveType::System,
            "SAM" => HiveType::Sam,
            "SECURITY" => HiveType::Security,
            "NTUSER" => HiveType::Ntuser,
            "USRCLASS" => HiveType::Usrclass,
            _ => HiveType::Unknown,
        }
    }
}

impl fmt::Display for HiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SOFTWARE" => Ok(HiveType::Software),
            "SYSTEM" => Ok(HiveType::System),
            "SAM" => Ok(HiveType::Sam),
            "SECURITY" => Ok(HiveType::Security),
            "NTUSER" => Ok(HiveType::Ntuser),
            "USRCLASS" => Ok(HiveType::Usrclass),
            "UNKNOWN" => Ok(HiveType::Unknown),
            other => Err(format!("unknown registry type '{}'", other)),
        }
    }
}
