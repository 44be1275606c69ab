//! Key transformations applied to the payload before dispatch
//!
//! - identifier derivation: reversed multi-part string fields joined into one
//! - rename: device keys replaced by readable names
//! - extraction: a key table projected into a bucket sub-document

use crate::config::KeyTable;
use crate::message::{Document, Value};

/// Joins several device string fields into one identifier.
///
/// Each part is reversed character-wise before concatenation, NUL bytes
/// are stripped and the result is trimmed. Parts are removed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRule {
    pub output: String,
    pub parts: Vec<String>,
}

impl IdentifierRule {
    pub fn new(output: impl Into<String>, parts: &[&str]) -> Self {
        Self {
            output: output.into(),
            parts: parts.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Parse a comma-separated part list
    pub fn parse(output: &str, parts: &str) -> Self {
        Self {
            output: output.to_string(),
            parts: parts
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Lot number carried by d171..d173
    pub fn ink_lot() -> Self {
        Self::new("ink_lot", &["d171", "d172", "d173"])
    }

    /// Apply to a document. Returns the derived identifier when written.
    ///
    /// Nothing happens when no part is present. When only some parts are
    /// present the identifier is written empty.
    pub fn apply(&self, doc: &mut Document) -> Option<String> {
        let rendered: Vec<Option<String>> = self
            .parts
            .iter()
            .map(|key| doc.get(key).and_then(Value::render))
            .collect();

        if rendered.iter().all(Option::is_none) {
            return None;
        }

        let identifier = if rendered.iter().all(Option::is_some) {
            let joined: String = rendered
                .iter()
                .flatten()
                .map(|part| part.chars().rev().collect::<String>())
                .collect();
            sanitize(&joined)
        } else {
            log::warn!(
                "Incomplete parts for {}: {:?}",
                self.output,
                self.parts
                    .iter()
                    .zip(&rendered)
                    .filter(|(_, r)| r.is_none())
                    .map(|(k, _)| k.as_str())
                    .collect::<Vec<_>>()
            );
            String::new()
        };

        for key in &self.parts {
            doc.remove(key);
        }
        doc.insert(self.output.clone(), Value::Text(identifier.clone()));
        Some(identifier)
    }
}

/// Strip NUL padding and surrounding whitespace
pub fn sanitize(s: &str) -> String {
    s.replace('\0', "").trim().to_string()
}

/// Apply every identifier rule in order
pub fn derive_identifiers(doc: &mut Document, rules: &[IdentifierRule]) {
    for rule in rules {
        rule.apply(doc);
    }
}

/// Move each present device key to its readable name
pub fn rename(doc: &mut Document, table: &KeyTable) {
    for (name, device) in table.iter() {
        if let Some(value) = doc.remove(device) {
            doc.insert(name.to_string(), value);
        }
    }
}

/// Project a key table out of a document.
///
/// Numeric zero readings are dropped; every other present value,
/// null included, is copied under the table name.
pub fn extract(doc: &Document, table: &KeyTable) -> Document {
    table
        .iter()
        .filter_map(|(name, device)| match doc.get(device) {
            Some(value) if !value.is_zero() => Some((name.to_string(), value.clone())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_ink_lot_round_trip() {
        let mut d = doc(&[
            ("d171", "abc".into()),
            ("d172", "12".into()),
            ("d173", "xy".into()),
            ("d1", 5.0.into()),
        ]);
        let id = IdentifierRule::ink_lot().apply(&mut d);
        assert_eq!(id.as_deref(), Some("cba21yx"));
        assert_eq!(d.get("ink_lot"), Some(&Value::Text("cba21yx".into())));
        assert!(!d.contains_key("d171"));
        assert!(!d.contains_key("d172"));
        assert!(!d.contains_key("d173"));
        assert!(d.contains_key("d1"));
    }

    #[test]
    fn test_identifier_sanitizes_padding() {
        let mut d = doc(&[("d1", "\0\0BA ".into()), ("d2", "DC".into())]);
        let rule = IdentifierRule::new("model_name", &["d1", "d2"]);
        assert_eq!(rule.apply(&mut d).as_deref(), Some("ABCD"));
    }

    #[test]
    fn test_identifier_numeric_part() {
        let mut d = doc(&[("d1", 123.0.into()), ("d2", "x".into())]);
        let rule = IdentifierRule::new("lot", &["d1", "d2"]);
        assert_eq!(rule.apply(&mut d).as_deref(), Some("321x"));
    }

    #[test]
    fn test_identifier_absent_parts_untouched() {
        let mut d = doc(&[("d1", 1.0.into())]);
        assert_eq!(IdentifierRule::ink_lot().apply(&mut d), None);
        assert!(!d.contains_key("ink_lot"));
    }

    #[test]
    fn test_identifier_partial_parts_written_empty() {
        let mut d = doc(&[("d171", "abc".into())]);
        assert_eq!(IdentifierRule::ink_lot().apply(&mut d).as_deref(), Some(""));
        assert!(!d.contains_key("d171"));
    }

    #[test]
    fn test_rename() {
        let mut d = doc(&[("d200", 21.5.into()), ("d201", Value::Null)]);
        let table = KeyTable::from([("temperature", "d200"), ("humidity", "d999")]);
        rename(&mut d, &table);
        assert_eq!(d.get("temperature"), Some(&Value::Number(21.5)));
        assert!(!d.contains_key("d200"));
        assert!(!d.contains_key("humidity"));
        assert!(d.contains_key("d201"));
    }

    #[test]
    fn test_extract_drops_numeric_zero() {
        let d = doc(&[
            ("d1", 0.0.into()),
            ("d2", 4.5.into()),
            ("d3", "0".into()),
            ("d4", Value::Null),
        ]);
        let table = KeyTable::from([("a", "d1"), ("b", "d2"), ("c", "d3"), ("n", "d4"), ("m", "d5")]);
        let out = extract(&d, &table);
        assert_eq!(out.len(), 3);
        assert!(!out.contains_key("a"));
        assert_eq!(out.get("b"), Some(&Value::Number(4.5)));
        assert_eq!(out.get("c"), Some(&Value::Text("0".into())));
        assert_eq!(out.get("n"), Some(&Value::Null));
    }
}
