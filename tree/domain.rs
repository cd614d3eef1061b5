use crate::Value;
use std::sync::Arc;

/// A `CategoryDomain` tracks, per categorical field, which categories can still reach the current node. The root domain is full: every category of every field is reachable.
///
/// Domains are persistent. `fork` pushes a single override for one field in front of the receiver and shares everything else, so sibling branches never observe each other's narrowing and no domain is ever copied wholesale.
#[derive(Clone, Debug, Default)]
pub struct CategoryDomain {
	head: Option<Arc<Restriction>>,
}

#[derive(Debug)]
struct Restriction {
	field: Arc<str>,
	values: Arc<[Value]>,
	next: Option<Arc<Restriction>>,
}

impl CategoryDomain {
	/// Create a full domain.
	pub fn new() -> Self {
		Self::default()
	}

	/// Return a domain identical to this one except that `field` can only take the values in `subset`.
	pub fn fork(&self, field: &Arc<str>, subset: Vec<Value>) -> Self {
		Self {
			head: Some(Arc::new(Restriction {
				field: field.clone(),
				values: subset.into(),
				next: self.head.clone(),
			})),
		}
	}

	/// Return `true` if `value` is still reachable for `field`.
	pub fn member(&self, field: &str, value: &Value) -> bool {
		match self.restriction(field) {
			Some(values) => values.contains(value),
			None => true,
		}
	}

	/// Return the reachable values of `field`, or `None` if no ancestor split has narrowed it.
	pub fn restriction(&self, field: &str) -> Option<&[Value]> {
		let mut current = self.head.as_deref();
		while let Some(restriction) = current {
			if &*restriction.field == field {
				return Some(&restriction.values);
			}
			current = restriction.next.as_deref();
		}
		None
	}
}

impl Drop for CategoryDomain {
	fn drop(&mut self) {
		// Unlink restrictions nobody else holds one at a time, so a long chain of forks does not drop recursively.
		let mut head = self.head.take();
		while let Some(restriction) = head {
			head = match Arc::try_unwrap(restriction) {
				Ok(mut restriction) => restriction.next.take(),
				Err(_) => None,
			};
		}
	}
}

#[test]
fn test_fork_does_not_touch_receiver() {
	let color: Arc<str> = "color".into();
	let root = CategoryDomain::new();
	let red = Value::from("red");
	let green = Value::from("green");
	let left = root.fork(&color, vec![red.clone()]);
	let right = root.fork(&color, vec![green.clone()]);
	assert!(root.member("color", &red));
	assert!(root.member("color", &green));
	assert!(left.member("color", &red));
	assert!(!left.member("color", &green));
	assert!(!right.member("color", &red));
	assert!(right.member("color", &green));
	assert!(left.member("shape", &Value::from("square")));
}

#[test]
fn test_nested_fork_shadows_ancestor() {
	let color: Arc<str> = "color".into();
	let size: Arc<str> = "size".into();
	let domain = CategoryDomain::new()
		.fork(&color, vec!["red".into(), "green".into(), "blue".into()])
		.fork(&size, vec!["small".into()])
		.fork(&color, vec!["blue".into()]);
	assert_eq!(domain.restriction("color"), Some(&[Value::from("blue")][..]));
	assert_eq!(domain.restriction("size"), Some(&[Value::from("small")][..]));
	assert_eq!(domain.restriction("shape"), None);
}

#[test]
fn test_long_fork_chain() {
	let color: Arc<str> = "color".into();
	let mut domain = CategoryDomain::new();
	for _ in 0..100_000 {
		domain = domain.fork(&color, vec!["red".into()]);
	}
	let sibling = domain.fork(&color, vec!["blue".into()]);
	drop(domain);
	assert!(sibling.member("color", &Value::from("blue")));
	assert!(!sibling.member("color", &Value::from("red")));
}
