/*!
This module contains the typed feature schema that the decoder resolves feature indexes against, and the field references that predicates point at.
*/

use crate::Value;
use std::{fmt, sync::Arc};

/// The cast applied to an input field before a continuous split compares it with its threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cast {
	/// The raw input value is compared.
	None,
	/// The input is read as a 64 bit float.
	Double,
	/// The input is first narrowed to a 32 bit float and then widened back to a 64 bit float. Trees trained on inputs that were downcast to `f32` have thresholds that only reproduce bit for bit with this cast.
	FloatThenDouble,
}

impl Cast {
	pub fn apply(self, value: f64) -> f64 {
		match self {
			Cast::None | Cast::Double => value,
			Cast::FloatThenDouble => f64::from(value as f32),
		}
	}
}

/// A reference to an input field, together with the cast the document assembler must emit as a derived field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
	pub name: Arc<str>,
	pub cast: Cast,
}

impl FieldRef {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self {
			name: name.into(),
			cast: Cast::None,
		}
	}

	pub fn with_cast(name: impl Into<Arc<str>>, cast: Cast) -> Self {
		Self {
			name: name.into(),
			cast,
		}
	}
}

impl fmt::Display for FieldRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.cast {
			Cast::None => write!(f, "{}", self.name),
			Cast::Double => write!(f, "double({})", self.name),
			Cast::FloatThenDouble => write!(f, "double(float({}))", self.name),
		}
	}
}

/// A `Feature` describes what the schema provider knows about one column of the flat tree's input.
#[derive(Clone, Debug, PartialEq)]
pub enum Feature {
	/// A number feature split with `<=` and `>`.
	Continuous { name: Arc<str> },
	/// A one-hot indicator for `name == value`. Splits on it always use the threshold `0.5`.
	Binary { name: Arc<str>, value: Value },
	/// A pseudo-feature that is `1` when `name` is missing. Splits on it always use the threshold `0.5`.
	MissingIndicator { name: Arc<str> },
	/// An enum feature with its full ordered list of categories. The position of a category in `values` is its bit in a category bitset and its ordinal in a threshold split.
	Categorical { name: Arc<str>, values: Vec<Value> },
}

impl Feature {
	pub fn continuous(name: &str) -> Self {
		Self::Continuous { name: name.into() }
	}

	pub fn binary(name: &str, value: impl Into<Value>) -> Self {
		Self::Binary {
			name: name.into(),
			value: value.into(),
		}
	}

	pub fn missing_indicator(name: &str) -> Self {
		Self::MissingIndicator { name: name.into() }
	}

	pub fn categorical(name: &str, values: Vec<Value>) -> Self {
		Self::Categorical {
			name: name.into(),
			values,
		}
	}

	pub fn name(&self) -> &Arc<str> {
		match self {
			Self::Continuous { name }
			| Self::Binary { name, .. }
			| Self::MissingIndicator { name }
			| Self::Categorical { name, .. } => name,
		}
	}

	pub fn kind_name(&self) -> &'static str {
		match self {
			Self::Continuous { .. } => "continuous",
			Self::Binary { .. } => "binary",
			Self::MissingIndicator { .. } => "missing indicator",
			Self::Categorical { .. } => "categorical",
		}
	}

	/// Normalize the feature to the field reference that a split on it compares. Only continuous features are cast, the other kinds compare their raw values.
	pub fn field_ref(&self, cast: Cast) -> FieldRef {
		match self {
			Self::Continuous { name } => FieldRef::with_cast(name.clone(), cast),
			Self::Binary { name, .. }
			| Self::MissingIndicator { name }
			| Self::Categorical { name, .. } => FieldRef::new(name.clone()),
		}
	}
}

/// The schema lists the features of the flat trees in feature index order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
	pub features: Vec<Feature>,
}

impl Schema {
	pub fn new(features: Vec<Feature>) -> Self {
		Self { features }
	}

	pub fn feature(&self, index: usize) -> Option<&Feature> {
		self.features.get(index)
	}

	pub fn len(&self) -> usize {
		self.features.len()
	}

	pub fn is_empty(&self) -> bool {
		self.features.is_empty()
	}
}

#[test]
fn test_float_then_double_cast() {
	let value = 0.1f64;
	let cast = Cast::FloatThenDouble.apply(value);
	assert_ne!(cast, value);
	assert_eq!(cast, f64::from(0.1f32));
	assert_eq!(Cast::Double.apply(value), value);
}

#[test]
fn test_field_ref_display() {
	let feature = Feature::continuous("x");
	assert_eq!(
		feature.field_ref(Cast::FloatThenDouble).to_string(),
		"double(float(x))"
	);
	let feature = Feature::binary("color", "red");
	assert_eq!(feature.field_ref(Cast::FloatThenDouble).to_string(), "color");
}
