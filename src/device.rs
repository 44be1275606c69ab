//! Device write-back addressing
//!
//! A write-back target is the 4-tuple `Type,Number,ProcessWidth,RegisterCount`.
//! Several tuples may be concatenated in one comma-separated list and are
//! zipped positionally against the values to write.

use crate::error::AddressError;
use crate::message::Value;
use std::fmt;

/// One device register block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    /// Device type code, e.g. `D` or `M`
    pub kind: String,
    /// Device number within the type
    pub number: String,
    /// Words per integer value
    pub process_width: u16,
    /// Registers written
    pub register_count: u16,
}

impl DeviceAddress {
    /// Parse a single 4-tuple
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let list = parse_addresses(s)?;
        match <[DeviceAddress; 1]>::try_from(list) {
            Ok([address]) => Ok(address),
            Err(_) => Err(AddressError::InvalidFormat(s.to_string())),
        }
    }

    fn from_parts(parts: &[&str]) -> Result<Self, AddressError> {
        let number = |field: &'static str, value: &str| -> Result<u16, AddressError> {
            value.parse().map_err(|_| AddressError::InvalidNumber {
                field,
                value: value.to_string(),
            })
        };

        Ok(Self {
            kind: parts[0].to_string(),
            number: parts[1].to_string(),
            process_width: number("process_width", parts[2])?,
            register_count: number("register_count", parts[3])?,
        })
    }

    /// Encode a value into this block's registers.
    ///
    /// Booleans write 0/1. Integral numbers fill `process_width` little-endian
    /// words. Other numbers write an f32 across two words. Text packs two
    /// ASCII bytes per word. The result is padded or truncated to
    /// `register_count` words.
    pub fn encode(&self, value: &Value) -> Result<Vec<u16>, AddressError> {
        let mut words = match value {
            Value::Null => return Err(AddressError::UnsupportedValue("null".to_string())),
            Value::Bool(b) => vec![u16::from(*b)],
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => {
                let bits = *n as i64 as u64;
                (0..self.process_width.max(1))
                    .map(|i| match i {
                        0..=3 => ((bits >> (16 * u32::from(i))) & 0xFFFF) as u16,
                        _ => 0,
                    })
                    .collect()
            }
            Value::Number(n) => {
                let bits = (*n as f32).to_bits();
                vec![(bits & 0xFFFF) as u16, (bits >> 16) as u16]
            }
            Value::Text(s) => {
                if !s.is_ascii() {
                    return Err(AddressError::UnsupportedValue(s.clone()));
                }
                s.as_bytes()
                    .chunks(2)
                    .map(|pair| {
                        let lo = u16::from(pair[0]);
                        let hi = pair.get(1).copied().map(u16::from).unwrap_or(0);
                        lo | (hi << 8)
                    })
                    .collect()
            }
        };
        words.resize(usize::from(self.register_count), 0);
        Ok(words)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.number)
    }
}

/// Parse a list of concatenated 4-tuples
pub fn parse_addresses(s: &str) -> Result<Vec<DeviceAddress>, AddressError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() % 4 != 0 || parts.iter().any(|p| p.is_empty()) {
        return Err(AddressError::InvalidFormat(s.to_string()));
    }
    parts.chunks_exact(4).map(DeviceAddress::from_parts).collect()
}

/// Pair each address with the value at the same position
pub fn zip_values(
    addresses: &str,
    values: Vec<Value>,
) -> Result<Vec<(DeviceAddress, Value)>, AddressError> {
    let addresses = parse_addresses(addresses)?;
    if addresses.len() != values.len() {
        return Err(AddressError::CountMismatch {
            addresses: addresses.len(),
            values: values.len(),
        });
    }
    Ok(addresses.into_iter().zip(values).collect())
}
