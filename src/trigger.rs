//! Trigger configuration parsing
//!
//! The trigger string is a comma-separated list of alternating tokens:
//! `device_key,case_kind,device_key,case_kind,...`

use std::fmt;

/// Processing behavior bound to a trigger device key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CaseKind {
    TimeDuration,
    Standard,
    Trigger,
    Hold,
    Special,
    HoldFilling,
    HoldFillingWeight,
    Weight,
    Vacuum,
    /// Unrecognised token, kept so parsing stays total
    Other(String),
}

impl CaseKind {
    /// Parse a case token. `time.duration` is accepted as an alias.
    pub fn parse(token: &str) -> Self {
        match token {
            "time_duration" | "time.duration" => CaseKind::TimeDuration,
            "standard" => CaseKind::Standard,
            "trigger" => CaseKind::Trigger,
            "hold" => CaseKind::Hold,
            "special" => CaseKind::Special,
            "holdfilling" => CaseKind::HoldFilling,
            "holdfillingweight" => CaseKind::HoldFillingWeight,
            "weight" => CaseKind::Weight,
            "vacuum" => CaseKind::Vacuum,
            other => CaseKind::Other(other.to_string()),
        }
    }

    /// Canonical token
    pub fn as_str(&self) -> &str {
        match self {
            CaseKind::TimeDuration => "time_duration",
            CaseKind::Standard => "standard",
            CaseKind::Trigger => "trigger",
            CaseKind::Hold => "hold",
            CaseKind::Special => "special",
            CaseKind::HoldFilling => "holdfilling",
            CaseKind::HoldFillingWeight => "holdfillingweight",
            CaseKind::Weight => "weight",
            CaseKind::Vacuum => "vacuum",
            CaseKind::Other(s) => s,
        }
    }

    /// Whether the engine has a handler for this kind
    pub fn is_known(&self) -> bool {
        !matches!(self, CaseKind::Other(_))
    }
}

impl fmt::Display for CaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A device key paired with its case
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    /// Lower-cased device address
    pub device_key: String,
    pub case_kind: CaseKind,
}

impl TriggerKey {
    pub fn new(device_key: &str, case_kind: CaseKind) -> Self {
        Self {
            device_key: device_key.trim().to_lowercase(),
            case_kind,
        }
    }
}

/// Parse a trigger configuration string.
///
/// An even token count yields `len / 2` ordered pairs. An odd count is
/// malformed and yields nothing. An empty string yields nothing.
pub fn parse_triggers(config: &str) -> Vec<TriggerKey> {
    if config.trim().is_empty() {
        return Vec::new();
    }

    let tokens: Vec<&str> = config.split(',').map(str::trim).collect();
    if tokens.len() % 2 != 0 {
        log::warn!(
            "Malformed trigger config {:?}: {} tokens, expected device/case pairs",
            config,
            tokens.len()
        );
        return Vec::new();
    }

    tokens
        .chunks_exact(2)
        .map(|pair| TriggerKey::new(pair[0], CaseKind::parse(pair[1])))
        .collect()
}
