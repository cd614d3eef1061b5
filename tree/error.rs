use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every error is fatal. A malformed artifact means an unsupported model format variant, and converting it anyway would produce a scorer that silently disagrees with the native model.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
	#[error("malformed tree arrays: {0}")]
	MalformedArrays(String),
	#[error("node {node}: feature {feature:?} does not support this split: {reason}")]
	FeatureKindMismatch {
		node: usize,
		feature: String,
		reason: String,
	},
	#[error("node {node}: categorical split has no category bitset row")]
	MissingBitsetRow { node: usize },
	#[error("ensemble shape mismatch: {0}")]
	EnsembleShapeMismatch(String),
	#[error("tree {tree}: expected a {expected} tree, got a {actual} tree")]
	TreeKindMismatch {
		tree: usize,
		expected: &'static str,
		actual: &'static str,
	},
	#[error("conflicting tree model options: {0}")]
	ConflictingOptions(String),
	#[error("{pass}: unsupported tree structure: {reason}")]
	UnsupportedStructure { pass: &'static str, reason: String },
}

impl Error {
	pub(crate) fn malformed(message: impl Into<String>) -> Self {
		Self::MalformedArrays(message.into())
	}

	pub(crate) fn unsupported(pass: &'static str, reason: impl Into<String>) -> Self {
		Self::UnsupportedStructure {
			pass,
			reason: reason.into(),
		}
	}
}
