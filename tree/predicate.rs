/*!
This module defines the predicates that guard tree nodes and the `PredicateCache` that interns them.
*/

use crate::{schema::FieldRef, Value};
use fnv::FnvHashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// The comparison operators a `Compare` predicate can use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
	Equal,
	NotEqual,
	LessOrEqual,
	GreaterThan,
	IsMissing,
	IsNotMissing,
}

/// A `Predicate` decides whether a record is routed to a node. Two predicates are equal if and only if they are structurally identical.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Predicate {
	Always,
	Never,
	Compare {
		field: FieldRef,
		operator: Operator,
		/// `IS_MISSING` and `IS_NOT_MISSING` have no literal.
		literal: Option<Value>,
	},
	SetMembership {
		field: FieldRef,
		values: Vec<Value>,
	},
}

impl Predicate {
	pub fn compare(field: FieldRef, operator: Operator, literal: Value) -> Self {
		Self::Compare {
			field,
			operator,
			literal: Some(literal),
		}
	}

	pub fn missing(field: FieldRef, operator: Operator) -> Self {
		Self::Compare {
			field,
			operator,
			literal: None,
		}
	}

	/// Create the predicate for one side of a categorical partition. An empty side can never be selected, a single value is an equality test, and anything else is a set membership test.
	pub fn membership(field: FieldRef, mut values: Vec<Value>) -> Self {
		match values.len() {
			0 => Self::Never,
			1 => Self::compare(field, Operator::Equal, values.remove(0)),
			_ => Self::SetMembership { field, values },
		}
	}

	pub fn field(&self) -> Option<&FieldRef> {
		match self {
			Self::Always | Self::Never => None,
			Self::Compare { field, .. } | Self::SetMembership { field, .. } => Some(field),
		}
	}

	pub fn operator(&self) -> Option<Operator> {
		match self {
			Self::Compare { operator, .. } => Some(*operator),
			_ => None,
		}
	}

	pub fn is_always(&self) -> bool {
		matches!(self, Self::Always)
	}

	/// Evaluate the predicate against the value of its field. `None` means the result is unknown, which happens when the value is missing and the operator is not a missing value test.
	pub fn evaluate(&self, value: Option<&Value>) -> Option<bool> {
		match self {
			Self::Always => Some(true),
			Self::Never => Some(false),
			Self::Compare {
				field,
				operator,
				literal,
			} => match (operator, value) {
				(Operator::IsMissing, value) => Some(value.is_none()),
				(Operator::IsNotMissing, value) => Some(value.is_some()),
				(_, None) => None,
				(Operator::Equal, Some(value)) => literal.as_ref().map(|l| value.matches(l)),
				(Operator::NotEqual, Some(value)) => literal.as_ref().map(|l| !value.matches(l)),
				(Operator::LessOrEqual, Some(value)) => {
					compare_numbers(field, value, literal.as_ref()).map(|(v, t)| v <= t)
				}
				(Operator::GreaterThan, Some(value)) => {
					compare_numbers(field, value, literal.as_ref()).map(|(v, t)| v > t)
				}
			},
			Self::SetMembership { values, .. } => {
				value.map(|value| values.iter().any(|v| value.matches(v)))
			}
		}
	}
}

fn compare_numbers(field: &FieldRef, value: &Value, literal: Option<&Value>) -> Option<(f64, f64)> {
	let value = field.cast.apply(value.as_f64()?);
	let threshold = literal?.as_f64()?;
	Some((value, threshold))
}

/// The `PredicateCache` interns predicates, so a split condition that recurs across the members of an ensemble is represented by a single shared instance. It is safe to share between threads decoding trees in parallel.
#[derive(Debug, Default)]
pub struct PredicateCache {
	predicates: Mutex<FnvHashSet<Arc<Predicate>>>,
}

impl PredicateCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Return the stored predicate that is structurally equal to `predicate`, storing `predicate` first if there is none.
	pub fn intern(&self, predicate: Predicate) -> Arc<Predicate> {
		let mut predicates = self.lock();
		if let Some(interned) = predicates.get(&predicate) {
			return interned.clone();
		}
		let interned = Arc::new(predicate);
		predicates.insert(interned.clone());
		interned
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn lock(&self) -> MutexGuard<'_, FnvHashSet<Arc<Predicate>>> {
		match self.predicates.lock() {
			Ok(predicates) => predicates,
			// Interning never leaves the set half updated, so a poisoned lock is still consistent.
			Err(poisoned) => poisoned.into_inner(),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::schema::Cast;

	#[test]
	fn test_interning_returns_same_instance() {
		let cache = PredicateCache::new();
		let field = FieldRef::with_cast("x", Cast::FloatThenDouble);
		let a = cache.intern(Predicate::compare(
			field.clone(),
			Operator::LessOrEqual,
			Value::Double(3.5),
		));
		let b = cache.intern(Predicate::compare(
			field.clone(),
			Operator::LessOrEqual,
			Value::Double(3.5),
		));
		let c = cache.intern(Predicate::compare(
			field,
			Operator::GreaterThan,
			Value::Double(3.5),
		));
		assert!(Arc::ptr_eq(&a, &b));
		assert!(!Arc::ptr_eq(&a, &c));
		assert_eq!(cache.len(), 2);
	}

	#[test]
	fn test_poisoned_cache_keeps_its_predicates() {
		let cache = Arc::new(PredicateCache::new());
		cache.intern(Predicate::Always);
		let poisoner = cache.clone();
		let _ = std::thread::spawn(move || {
			let _predicates = poisoner.predicates.lock();
			panic!("poisoning the cache");
		})
		.join();
		assert!(cache.predicates.is_poisoned());
		assert_eq!(cache.len(), 1);
		assert!(Arc::ptr_eq(
			&cache.intern(Predicate::Always),
			&cache.intern(Predicate::Always)
		));
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn test_membership_shapes() {
		let field = FieldRef::new("color");
		assert_eq!(Predicate::membership(field.clone(), vec![]), Predicate::Never);
		assert_eq!(
			Predicate::membership(field.clone(), vec!["red".into()]),
			Predicate::compare(field.clone(), Operator::Equal, "red".into())
		);
		assert!(matches!(
			Predicate::membership(field, vec!["red".into(), "blue".into()]),
			Predicate::SetMembership { .. }
		));
	}

	#[test]
	fn test_evaluate_missing() {
		let field = FieldRef::new("x");
		let le = Predicate::compare(field.clone(), Operator::LessOrEqual, Value::Double(1.0));
		assert_eq!(le.evaluate(None), None);
		assert_eq!(le.evaluate(Some(&Value::Double(1.0))), Some(true));
		let is_missing = Predicate::missing(field, Operator::IsMissing);
		assert_eq!(is_missing.evaluate(None), Some(true));
		assert_eq!(is_missing.evaluate(Some(&Value::Double(1.0))), Some(false));
	}

	#[test]
	fn test_evaluate_infinity_literal() {
		let field = FieldRef::new("x");
		let le = Predicate::compare(field, Operator::LessOrEqual, Value::from("INF"));
		assert_eq!(le.evaluate(Some(&Value::Double(1e300))), Some(true));
	}
}
