//! Ad size parsing.
//!
//! Hosts hand sizes over in several shapes: `[[300, 250], [728, 90]]`,
//! a single `[300, 250]`, `"300x250"` strings, or arrays of such strings.
//! Everything is normalized into [`Size`] values; unparseable entries are
//! dropped.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

static SIZE_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*[xX]\s*(\d+)\s*$").expect("size regex should compile"));

/// A creative width/height pair in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Serialize for Size {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.width, self.height].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Json::deserialize(deserializer)?;
        parse_single(&value).ok_or_else(|| serde::de::Error::custom("invalid size"))
    }
}

/// Parse a `"300x250"` string.
#[must_use]
pub fn parse_size_str(value: &str) -> Option<Size> {
    let caps = SIZE_STRING.captures(value)?;
    let width = caps.get(1)?.as_str().parse().ok()?;
    let height = caps.get(2)?.as_str().parse().ok()?;
    Some(Size::new(width, height))
}

fn parse_pair(items: &[Json]) -> Option<Size> {
    match items {
        [w, h] => {
            let width = u32::try_from(w.as_u64()?).ok()?;
            let height = u32::try_from(h.as_u64()?).ok()?;
            Some(Size::new(width, height))
        }
        _ => None,
    }
}

fn parse_single(value: &Json) -> Option<Size> {
    match value {
        Json::String(s) => parse_size_str(s),
        Json::Array(items) => parse_pair(items),
        _ => None,
    }
}

/// Normalize any of the accepted size shapes into a list of sizes.
#[must_use]
pub fn parse_sizes(value: &Json) -> Vec<Size> {
    match value {
        Json::String(s) => s.split(',').filter_map(parse_size_str).collect(),
        Json::Array(items) => {
            if let Some(size) = parse_pair(items) {
                return vec![size];
            }
            items.iter().filter_map(parse_single).collect()
        }
        _ => Vec::new(),
    }
}

/// Serde adapter for fields that hold host-supplied size lists.
///
/// # Errors
///
/// Only fails if the input is not valid JSON-like data.
pub fn deserialize_sizes<'de, D>(deserializer: D) -> Result<Vec<Size>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Json::deserialize(deserializer)?;
    Ok(parse_sizes(&value))
}

/// Join sizes as `300x250,728x90`.
#[must_use]
pub fn format_sizes(sizes: &[Size], separator: &str) -> String {
    sizes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_arrays() {
        let sizes = parse_sizes(&json!([[300, 250], [728, 90]]));
        assert_eq!(sizes, vec![Size::new(300, 250), Size::new(728, 90)]);
    }

    #[test]
    fn parses_single_pair() {
        assert_eq!(parse_sizes(&json!([640, 480])), vec![Size::new(640, 480)]);
    }

    #[test]
    fn parses_strings() {
        assert_eq!(
            parse_sizes(&json!(["300x250", "160X600", "junk"])),
            vec![Size::new(300, 250), Size::new(160, 600)]
        );
        assert_eq!(
            parse_sizes(&json!("300x250,728x90")),
            vec![Size::new(300, 250), Size::new(728, 90)]
        );
    }

    #[test]
    fn drops_malformed_entries() {
        assert!(parse_sizes(&json!([[300], [-1, 5]])).is_empty());
        assert!(parse_sizes(&json!({ "w": 300 })).is_empty());
        assert!(parse_size_str("300 by 250").is_none());
    }

    #[test]
    fn deserializes_size_from_pair_or_string() {
        let size: Size = serde_json::from_value(json!([970, 250])).expect("should parse pair");
        assert_eq!(size, Size::new(970, 250));
        let size: Size = serde_json::from_value(json!("320x50")).expect("should parse string");
        assert_eq!(size, Size::new(320, 50));
        assert_eq!(
            serde_json::to_value(size).expect("should serialize"),
            json!([320, 50])
        );
    }

    #[test]
    fn formats_sizes() {
        let sizes = [Size::new(300, 250), Size::new(728, 90)];
        assert_eq!(format_sizes(&sizes, ","), "300x250,728x90");
        assert_eq!(format_sizes(&[], ","), "");
    }
}
