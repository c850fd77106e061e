use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DualWriteError;

/// Migration stage of one resource kind.
///
/// | Mode | Reads from | Writes to |
/// |---|---|---|
/// | 1 | Legacy | Legacy |
/// | 2 | Legacy, List also compared against New | Legacy, then New best-effort |
/// | 3 | New, Get falls back to Legacy | Legacy, then New |
/// | 4 | New | New |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Legacy,
    DualLegacy,
    DualUnified,
    Unified,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Legacy, Mode::DualLegacy, Mode::DualUnified, Mode::Unified];

    pub fn number(self) -> u8 {
        match self {
            Self::Legacy => 1,
            Self::DualLegacy => 2,
            Self::DualUnified => 3,
            Self::Unified => 4,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    pub fn reads_legacy(self) -> bool {
        matches!(self, Self::Legacy | Self::DualLegacy)
    }

    pub fn writes_legacy(self) -> bool {
        self != Self::Unified
    }

    pub fn writes_unified(self) -> bool {
        self != Self::Legacy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::DualLegacy => "dual-legacy",
            Self::DualUnified => "dual-unified",
            Self::Unified => "unified",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.as_str())
    }
}

impl FromStr for Mode {
    type Err = DualWriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return Self::from_number(n).ok_or_else(|| DualWriteError::InvalidMode(s.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DualWriteError::InvalidMode(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_numbers_and_names() {
        assert_eq!("1".parse::<Mode>().unwrap(), Mode::Legacy);
        assert_eq!("3".parse::<Mode>().unwrap(), Mode::DualUnified);
        assert_eq!("dual-legacy".parse::<Mode>().unwrap(), Mode::DualLegacy);
        assert_eq!(" Unified ".parse::<Mode>().unwrap(), Mode::Unified);
        assert!("0".parse::<Mode>().is_err());
        assert!("5".parse::<Mode>().is_err());
        assert!("both".parse::<Mode>().is_err());
    }

    #[test]
    fn numbering_is_stable() {
        for m in Mode::ALL {
            assert_eq!(Mode::from_number(m.number()), Some(m));
        }
        assert_eq!(Mode::Unified.to_string(), "4 (unified)");
    }

    #[test]
    fn routing_table() {
        assert!(Mode::Legacy.reads_legacy() && !Mode::Legacy.writes_unified());
        assert!(Mode::DualLegacy.reads_legacy() && Mode::DualLegacy.writes_unified());
        assert!(!Mode::DualUnified.reads_legacy() && Mode::DualUnified.writes_legacy());
        assert!(!Mode::Unified.writes_legacy());
    }
}
