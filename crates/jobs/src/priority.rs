//! Priority encoding.
//!
//! Priorities are signed integers; higher runs first among due jobs. Callers may
//! also use one of five named levels.

use serde::{Deserialize, Serialize};

pub const LOWEST: i32 = -20;
pub const LOW: i32 = -10;
pub const NORMAL: i32 = 0;
pub const HIGH: i32 = 10;
pub const HIGHEST: i32 = 20;

/// Priority as supplied by a caller: either a number or a level name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriorityValue {
    Number(i32),
    Name(String),
}

impl From<i32> for PriorityValue {
    fn from(value: i32) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for PriorityValue {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for PriorityValue {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

/// Resolve a priority value.
///
/// Numbers pass through unchanged; the five level names map to their numbers;
/// anything else is `None`.
pub fn parse_priority(value: &PriorityValue) -> Option<i32> {
    match value {
        PriorityValue::Number(n) => Some(*n),
        PriorityValue::Name(name) => match name.as_str() {
            "lowest" => Some(LOWEST),
            "low" => Some(LOW),
            "normal" => Some(NORMAL),
            "high" => Some(HIGH),
            "highest" => Some(HIGHEST),
            _ => None,
        },
    }
}

/// Resolve a priority, defaulting absent or unrecognized input to `0`.
pub fn normalize_priority(value: Option<&PriorityValue>) -> i32 {
    value.and_then(parse_priority).unwrap_or(NORMAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn named_levels_map_to_documented_numbers() {
        let cases = [
            ("lowest", -20),
            ("low", -10),
            ("normal", 0),
            ("high", 10),
            ("highest", 20),
        ];
        for (name, expected) in cases {
            assert_eq!(normalize_priority(Some(&name.into())), expected, "{name}");
        }
    }

    #[test]
    fn unknown_names_and_absence_default_to_zero() {
        assert_eq!(parse_priority(&"urgent".into()), None);
        assert_eq!(normalize_priority(Some(&"urgent".into())), 0);
        assert_eq!(normalize_priority(Some(&"HIGH".into())), 0);
        assert_eq!(normalize_priority(None), 0);
    }

    #[test]
    fn deserializes_numbers_and_names() {
        let n: PriorityValue = serde_json::from_str("-5").unwrap();
        let s: PriorityValue = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(n, PriorityValue::Number(-5));
        assert_eq!(s, PriorityValue::Name("high".to_string()));
    }

    proptest! {
        /// Property: numeric input is never altered.
        #[test]
        fn numbers_pass_through(n in any::<i32>()) {
            prop_assert_eq!(normalize_priority(Some(&PriorityValue::Number(n))), n);
        }

        /// Property: strings outside the named set resolve to zero.
        #[test]
        fn other_strings_resolve_to_zero(s in "[a-zA-Z]{0,12}") {
            prop_assume!(!["lowest", "low", "normal", "high", "highest"].contains(&s.as_str()));
            prop_assert_eq!(normalize_priority(Some(&PriorityValue::Name(s))), 0);
        }
    }
}
