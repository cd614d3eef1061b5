/*!
This module defines `Value`, the scalar used for category values, class labels, predicate literals, and scores.
*/

use std::{
	fmt,
	hash::{Hash, Hasher},
};

/// A `Value` is an integer, a double, or a string. Doubles compare and hash by their canonical bit pattern, so `Value` can be used as a key in hash sets, which is what predicate interning needs.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
	Integer(i64),
	Double(f64),
	String(String),
}

/// Open-ended continuous ranges are written with this literal instead of a numeric infinity.
pub const INFINITY_LITERAL: &str = "INF";

impl Value {
	pub fn string(value: impl Into<String>) -> Self {
		Self::String(value.into())
	}

	/// Read the value as a number. The `INF` literal reads as positive infinity.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Integer(value) => Some(*value as f64),
			Self::Double(value) => Some(*value),
			Self::String(value) => match value.as_str() {
				INFINITY_LITERAL => Some(f64::INFINITY),
				"-INF" => Some(f64::NEG_INFINITY),
				value => value.parse().ok(),
			},
		}
	}

	/// Two values match if they are structurally equal, or if both are numbers with the same numeric value. This is the comparison used when evaluating `EQ`, `NE`, and set membership.
	pub fn matches(&self, other: &Value) -> bool {
		if self == other {
			return true;
		}
		match (self, other) {
			(Self::String(_), Self::String(_)) => false,
			(Self::String(_), _) | (_, Self::String(_)) => false,
			_ => match (self.as_f64(), other.as_f64()) {
				(Some(a), Some(b)) => a == b,
				_ => false,
			},
		}
	}
}

fn canonical_bits(value: f64) -> u64 {
	if value == 0.0 {
		0.0f64.to_bits()
	} else if value.is_nan() {
		f64::NAN.to_bits()
	} else {
		value.to_bits()
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Integer(a), Self::Integer(b)) => a == b,
			(Self::Double(a), Self::Double(b)) => canonical_bits(*a) == canonical_bits(*b),
			(Self::String(a), Self::String(b)) => a == b,
			_ => false,
		}
	}
}

impl Eq for Value {}

impl Hash for Value {
	fn hash<H: Hasher>(&self, state: &mut H) {
		match self {
			Self::Integer(value) => {
				0u8.hash(state);
				value.hash(state);
			}
			Self::Double(value) => {
				1u8.hash(state);
				canonical_bits(*value).hash(state);
			}
			Self::String(value) => {
				2u8.hash(state);
				value.hash(state);
			}
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Integer(value) => write!(f, "{}", value),
			Self::Double(value) => write!(f, "{}", value),
			Self::String(value) => write!(f, "{}", value),
		}
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Self::Integer(value)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Self::Double(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::String(value.to_owned())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

#[test]
fn test_double_equality_is_canonical() {
	assert_eq!(Value::Double(0.0), Value::Double(-0.0));
	assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
	assert_ne!(Value::Double(1.0), Value::Integer(1));
	assert!(Value::Double(1.0).matches(&Value::Integer(1)));
	assert!(!Value::from("1").matches(&Value::Integer(1)));
}

#[test]
fn test_infinity_literal() {
	assert_eq!(Value::from(INFINITY_LITERAL).as_f64(), Some(f64::INFINITY));
	assert_eq!(Value::from("2.5").as_f64(), Some(2.5));
	assert_eq!(Value::from("red").as_f64(), None);
}

#[test]
fn test_deserialize_untagged() {
	let values: Vec<Value> = serde_json::from_str(r#"[1, 1.5, "a"]"#).unwrap();
	assert_eq!(
		values,
		vec![Value::Integer(1), Value::Double(1.5), Value::from("a")]
	);
}
