//! Configuration types for fieldpatch
//!
//! [`EngineConfig`] carries the pipeline-wide settings. [`CaseSettings`]
//! carries the per-case device keys and key tables, built from
//! name/value pairs so tests never touch the process environment.
//!
//! Case variables:
//!
//! | Name | Meaning |
//! |---|---|
//! | `RENAME_<name>` | rename table for direct sends |
//! | `IDENTIFIER_<name>` | comma-separated identifier parts |
//! | `HOLD_RATE_GATE` | accumulation-rate device |
//! | `HOLD_TRIGGER_CH1..3` | per-channel hold triggers |
//! | `HOLD_VACUUM_REACHED`, `HOLD_SEALING` | vacuum presence and sealing devices |
//! | `HOLD_MAP_CH1_..3_`, `HOLD_MAP_COUNTER_`, `VACUUM_MAP_` | bucket tables |
//! | `SPECIAL_MAP_`, `SPECIAL_SERIES_FIELD` | special table and sampled field |
//! | `FILL_STATE`, `FILL_TRIGGER_CH1..3`, `FILL_DO_MAP_` | fill bookkeeping |
//! | `WEIGHT_TRIGGER_CH1..3`, `WEIGHT_MAP_CH1_..3_`, `WEIGHT_READING_CH1..3` | weight workers |
//! | `VACUUM_TRIGGER_UPLOAD`, `VACUUM_LEAVE_1MIN..3MIN`, `VACUUM_START` | vacuum check |

use crate::error::ConfigError;
use crate::message::Value;
use crate::transform::IdentifierRule;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Number of process channels on a line
pub const CHANNELS: usize = 3;

/// Longest accepted accumulation window, in seconds
pub const MAX_LOOP_SECONDS: f64 = 86_400.0;

/// Default response fields written back after an upsert
pub const DEFAULT_RESPONSE_FIELDS: [&str; 3] = ["y_status", "x_status", "vacuum_status"];

/// How documents are delivered to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    /// Plain request, response ignored
    #[default]
    Patch,
    /// Request asking for the stored row back
    Upsert,
}

impl FromStr for SinkMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "patch" => Ok(SinkMode::Patch),
            "upsert" => Ok(SinkMode::Upsert),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkMode::Patch => write!(f, "patch"),
            SinkMode::Upsert => write!(f, "upsert"),
        }
    }
}

/// Device write-back after a successful flush
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBackConfig {
    /// Patch-mode target, `Type,Number,ProcessWidth,RegisterCount`
    pub device: Option<String>,
    /// Document field written in patch mode
    pub field: Option<String>,
    /// Constant written in patch mode when no field applies
    pub value: Option<Value>,
    /// Upsert-mode targets, concatenated 4-tuples
    pub upsert_devices: Option<String>,
    /// Response fields zipped against `upsert_devices`
    pub response_fields: Vec<String>,
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            device: None,
            field: None,
            value: None,
            upsert_devices: None,
            response_fields: DEFAULT_RESPONSE_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl WriteBackConfig {
    /// Patch-mode write-back of a constant
    pub fn constant(device: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            device: Some(device.into()),
            value: Some(value.into()),
            ..Default::default()
        }
    }
}

/// Pipeline-wide settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sink request verb; also namespaces the session
    pub method: String,
    /// Trigger configuration string
    pub trigger: String,
    /// Accumulation window for blocking cases, in seconds
    pub loop_seconds: f64,
    /// Sleep between re-polls inside an accumulation window
    pub poll_interval: Duration,
    /// Device that must be nonzero for the trigger case to send
    pub filter_key: String,
    pub mode: SinkMode,
    pub write_back: WriteBackConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            method: "PATCH".to_string(),
            trigger: String::new(),
            loop_seconds: 1.0,
            poll_interval: Duration::from_secs(1),
            filter_key: "d174".to_string(),
            mode: SinkMode::Patch,
            write_back: WriteBackConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration for a trigger string
    pub fn with_trigger(trigger: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            ..Default::default()
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=MAX_LOOP_SECONDS).contains(&self.loop_seconds) {
            return Err(ConfigError::InvalidValue {
                key: "LOOP_SECONDS".to_string(),
                value: self.loop_seconds.to_string(),
            });
        }
        Ok(())
    }

    /// Accumulation window as a duration, clamped to `0..=MAX_LOOP_SECONDS`
    pub fn loop_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.loop_seconds.clamp(0.0, MAX_LOOP_SECONDS))
            .unwrap_or_default()
    }

    /// Session namespace for this pipeline
    pub fn session_key(&self) -> String {
        format!("{}_{}", self.method, self.trigger)
    }
}

/// Suffix-to-device table collected from variables sharing a prefix
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyTable {
    entries: BTreeMap<String, String>,
}

impl KeyTable {
    /// Collect `prefix<suffix>=device` entries. Device keys are
    /// lower-cased; empty suffixes and devices are skipped.
    pub fn from_vars(prefix: &str, vars: &BTreeMap<String, String>) -> Self {
        let entries = vars
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .filter_map(|(name, device)| {
                let suffix = &name[prefix.len()..];
                let device = device.trim();
                if suffix.is_empty() || device.is_empty() {
                    None
                } else {
                    Some((suffix.to_string(), device.to_lowercase()))
                }
            })
            .collect();
        Self { entries }
    }

    /// Add an entry
    pub fn insert(&mut self, name: impl Into<String>, device: &str) {
        self.entries.insert(name.into(), device.trim().to_lowercase());
    }

    /// Device key for an output name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// `(output name, device key)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for KeyTable {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut table = KeyTable::default();
        for (name, device) in pairs {
            table.insert(name, device);
        }
        table
    }
}

/// Hold case devices and tables (also used by the weight case)
#[derive(Debug, Clone, Default)]
pub struct HoldSettings {
    pub rate_gate: Option<String>,
    pub triggers: [Option<String>; CHANNELS],
    pub vacuum_reached: Option<String>,
    pub sealing: Option<String>,
    pub channel_tables: [KeyTable; CHANNELS],
    pub counter_table: KeyTable,
    pub vacuum_table: KeyTable,
}

/// Special case table and sampled field
#[derive(Debug, Clone)]
pub struct SpecialSettings {
    pub table: KeyTable,
    pub series_field: String,
}

impl Default for SpecialSettings {
    fn default() -> Self {
        Self {
            table: KeyTable::default(),
            series_field: "pica1".to_string(),
        }
    }
}

/// Fill bookkeeping for the holdfilling family
#[derive(Debug, Clone, Default)]
pub struct FillSettings {
    /// Raw state number; parsed when the case runs
    pub state: Option<String>,
    pub triggers: [Option<String>; CHANNELS],
    pub do_table: KeyTable,
}

/// Weight worker devices and tables
#[derive(Debug, Clone)]
pub struct WeightSettings {
    pub triggers: [Option<String>; CHANNELS],
    pub tables: [KeyTable; CHANNELS],
    /// Field of each extraction holding the scale reading
    pub readings: [String; CHANNELS],
}

impl Default for WeightSettings {
    fn default() -> Self {
        Self {
            triggers: Default::default(),
            tables: Default::default(),
            readings: std::array::from_fn(|i| format!("ch{}_weighing", i + 1)),
        }
    }
}

/// Vacuum check devices
#[derive(Debug, Clone, Default)]
pub struct VacuumSettings {
    pub upload_trigger: Option<String>,
    /// 1, 2 and 3 minute leave readings
    pub leave: [Option<String>; CHANNELS],
    pub start: Option<String>,
}

/// Per-case settings
#[derive(Debug, Clone)]
pub struct CaseSettings {
    pub rename: KeyTable,
    pub identifiers: Vec<IdentifierRule>,
    pub hold: HoldSettings,
    pub special: SpecialSettings,
    pub filling: FillSettings,
    pub weight: WeightSettings,
    pub vacuum: VacuumSettings,
}

impl Default for CaseSettings {
    fn default() -> Self {
        Self {
            rename: KeyTable::default(),
            identifiers: vec![IdentifierRule::ink_lot()],
            hold: HoldSettings::default(),
            special: SpecialSettings::default(),
            filling: FillSettings::default(),
            weight: WeightSettings::default(),
            vacuum: VacuumSettings::default(),
        }
    }
}

impl CaseSettings {
    /// Build from name/value pairs
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let device = |name: &str| -> Option<String> {
            vars.get(name)
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
        };
        let per_channel = |prefix: &str| -> [Option<String>; CHANNELS] {
            std::array::from_fn(|i| device(&format!("{}{}", prefix, i + 1)))
        };
        let tables = |prefix: &str| -> [KeyTable; CHANNELS] {
            std::array::from_fn(|i| KeyTable::from_vars(&format!("{}{}_", prefix, i + 1), &vars))
        };

        let mut identifiers = vec![IdentifierRule::ink_lot()];
        for (output, parts) in KeyTable::from_vars("IDENTIFIER_", &vars).iter() {
            let rule = IdentifierRule::parse(&output.to_lowercase(), parts);
            identifiers.retain(|r| r.output != rule.output);
            identifiers.push(rule);
        }

        let mut weight = WeightSettings {
            triggers: per_channel("WEIGHT_TRIGGER_CH"),
            tables: tables("WEIGHT_MAP_CH"),
            ..Default::default()
        };
        for (i, reading) in weight.readings.iter_mut().enumerate() {
            if let Some(field) = vars.get(&format!("WEIGHT_READING_CH{}", i + 1)) {
                *reading = field.trim().to_string();
            }
        }

        Self {
            rename: KeyTable::from_vars("RENAME_", &vars),
            identifiers,
            hold: HoldSettings {
                rate_gate: device("HOLD_RATE_GATE"),
                triggers: per_channel("HOLD_TRIGGER_CH"),
                vacuum_reached: device("HOLD_VACUUM_REACHED"),
                sealing: device("HOLD_SEALING"),
                channel_tables: tables("HOLD_MAP_CH"),
                counter_table: KeyTable::from_vars("HOLD_MAP_COUNTER_", &vars),
                vacuum_table: KeyTable::from_vars("VACUUM_MAP_", &vars),
            },
            special: SpecialSettings {
                table: KeyTable::from_vars("SPECIAL_MAP_", &vars),
                series_field: vars
                    .get("SPECIAL_SERIES_FIELD")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "pica1".to_string()),
            },
            filling: FillSettings {
                state: vars.get("FILL_STATE").map(|s| s.trim().to_string()),
                triggers: per_channel("FILL_TRIGGER_CH"),
                do_table: KeyTable::from_vars("FILL_DO_MAP_", &vars),
            },
            weight,
            vacuum: VacuumSettings {
                upload_trigger: device("VACUUM_TRIGGER_UPLOAD"),
                leave: std::array::from_fn(|i| device(&format!("VACUUM_LEAVE_{}MIN", i + 1))),
                start: device("VACUUM_START"),
            },
        }
    }

    /// Build from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_table_prefix_scan() {
        let vars = vars(&[
            ("RENAME_temperature", "D200"),
            ("RENAME_pressure", "d201"),
            ("RENAMED", "d1"),
            ("RENAME_", "d2"),
            ("OTHER_x", "d3"),
        ]);
        let table = KeyTable::from_vars("RENAME_", &vars);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("temperature"), Some("d200"));
        assert_eq!(table.get("pressure"), Some("d201"));
    }

    #[test]
    fn test_sink_mode_parse() {
        assert_eq!("upsert".parse::<SinkMode>().unwrap(), SinkMode::Upsert);
        assert_eq!("PATCH".parse::<SinkMode>().unwrap(), SinkMode::Patch);
        assert_eq!("".parse::<SinkMode>().unwrap(), SinkMode::Patch);
        assert!("merge".parse::<SinkMode>().is_err());
    }

    #[test]
    fn test_case_settings_from_vars() {
        let settings = CaseSettings::from_vars([
            ("HOLD_TRIGGER_CH1", "D300"),
            ("HOLD_TRIGGER_CH3", "d302"),
            ("HOLD_MAP_CH2_fill_level", "d310"),
            ("WEIGHT_READING_CH2", "scale_b"),
            ("VACUUM_LEAVE_2MIN", "d400"),
            ("FILL_STATE", "3"),
        ]);
        assert_eq!(settings.hold.triggers[0].as_deref(), Some("d300"));
        assert!(settings.hold.triggers[1].is_none());
        assert_eq!(settings.hold.triggers[2].as_deref(), Some("d302"));
        assert_eq!(settings.hold.channel_tables[1].get("fill_level"), Some("d310"));
        assert_eq!(settings.weight.readings[0], "ch1_weighing");
        assert_eq!(settings.weight.readings[1], "scale_b");
        assert_eq!(settings.vacuum.leave[1].as_deref(), Some("d400"));
        assert_eq!(settings.filling.state.as_deref(), Some("3"));
        assert_eq!(settings.special.series_field, "pica1");
    }

    #[test]
    fn test_identifier_rules() {
        let settings = CaseSettings::from_vars([("IDENTIFIER_MODEL_NAME", "d180, d181")]);
        assert_eq!(settings.identifiers.len(), 2);
        assert_eq!(settings.identifiers[0].output, "ink_lot");
        assert_eq!(settings.identifiers[1].output, "model_name");
        assert_eq!(settings.identifiers[1].parts, vec!["d180", "d181"]);

        let overridden = CaseSettings::from_vars([("IDENTIFIER_ink_lot", "d1,d2")]);
        assert_eq!(overridden.identifiers.len(), 1);
        assert_eq!(overridden.identifiers[0].parts, vec!["d1", "d2"]);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::with_trigger("d100,hold");
        assert_eq!(config.filter_key, "d174");
        assert_eq!(config.session_key(), "PATCH_d100,hold");
        assert_eq!(config.loop_window(), Duration::from_secs(1));
        assert_eq!(config.write_back.response_fields.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_loop_seconds_out_of_range() {
        for raw in ["inf", "-inf", "NaN", "1e300", "-1"] {
            let config = EngineConfig {
                loop_seconds: raw.parse().unwrap(),
                ..Default::default()
            };
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidValue {
                    key: "LOOP_SECONDS".to_string(),
                    value: config.loop_seconds.to_string(),
                })
            );
        }
    }

    #[test]
    fn test_loop_window_never_panics() {
        let window = |raw: &str| {
            EngineConfig {
                loop_seconds: raw.parse().unwrap(),
                ..Default::default()
            }
            .loop_window()
        };
        assert_eq!(window("inf"), Duration::from_secs(86_400));
        assert_eq!(window("1e300"), Duration::from_secs(86_400));
        assert_eq!(window("-5"), Duration::ZERO);
        assert_eq!(window("NaN"), Duration::ZERO);
        assert_eq!(window("0.25"), Duration::from_millis(250));
    }
}
