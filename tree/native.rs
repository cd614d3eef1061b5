/*!
This module contains the flat, index aligned arrays that the artifact reader extracts from a serialized model, and the ensemble metadata that accompanies them.
*/

use crate::{
	error::{Error, Result},
	schema::Cast,
	Value,
};

/// Words per row in the category bitset side table. Eight 32 bit words cover 256 categories.
pub const BITSET_WORDS: usize = 8;

/// A row of bits, one per category, marking the categories that go left at a categorical split.
pub type CategoryBitset = [u32; BITSET_WORDS];

/// A binary tree encoded as parallel arrays indexed by node number. Node 0 is the root.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NativeTreeArrays {
	/// If present, marks leaves. If absent, a node is a leaf when its feature index is negative.
	pub is_leaf: Option<Vec<bool>>,
	pub left: Vec<i64>,
	pub right: Vec<i64>,
	pub feature_index: Vec<i64>,
	/// If present, marks the branches that split with a category bitset.
	pub is_categorical: Option<Vec<bool>>,
	pub threshold: Vec<f64>,
	/// For categorical branches, the row of `category_bitsets` to use.
	pub category_bitset_row: Option<Vec<i64>>,
	pub category_bitsets: Vec<CategoryBitset>,
	/// If present, the direction missing values take at each branch.
	pub missing_goes_left: Option<Vec<bool>>,
	/// Regression: one value per node. Classification: one row of per-class values per node, row major.
	pub leaf_value: Vec<f64>,
	/// The importance of each schema feature for this tree, if recorded.
	pub feature_importances: Option<Vec<f64>>,
}

impl NativeTreeArrays {
	pub fn n_nodes(&self) -> usize {
		self.left.len()
	}

	/// Check that every array has one entry per node, and that every branch points at valid children.
	pub fn validate(&self, n_outputs: usize) -> Result<()> {
		let n_nodes = self.n_nodes();
		if n_nodes == 0 {
			return Err(Error::malformed("tree has no nodes"));
		}
		check_len("right", self.right.len(), n_nodes)?;
		check_len("feature_index", self.feature_index.len(), n_nodes)?;
		check_len("threshold", self.threshold.len(), n_nodes)?;
		if let Some(is_leaf) = &self.is_leaf {
			check_len("is_leaf", is_leaf.len(), n_nodes)?;
		}
		if let Some(is_categorical) = &self.is_categorical {
			check_len("is_categorical", is_categorical.len(), n_nodes)?;
		}
		if let Some(category_bitset_row) = &self.category_bitset_row {
			check_len("category_bitset_row", category_bitset_row.len(), n_nodes)?;
		}
		if let Some(missing_goes_left) = &self.missing_goes_left {
			check_len("missing_goes_left", missing_goes_left.len(), n_nodes)?;
		}
		check_len("leaf_value", self.leaf_value.len(), n_nodes * n_outputs)?;
		for node in 0..n_nodes {
			if self.is_leaf(node) {
				continue;
			}
			if self.feature_index[node] < 0 {
				return Err(Error::malformed(format!(
					"branch {} has negative feature index {}",
					node, self.feature_index[node]
				)));
			}
			for (side, child) in [("left", self.left[node]), ("right", self.right[node])].iter() {
				if *child <= 0 || *child as usize >= n_nodes {
					return Err(Error::malformed(format!(
						"branch {} has {} child {}, expected an index in 1..{}",
						node, side, child, n_nodes
					)));
				}
			}
		}
		Ok(())
	}

	pub fn is_leaf(&self, node: usize) -> bool {
		match &self.is_leaf {
			Some(is_leaf) => is_leaf[node],
			None => self.feature_index[node] < 0,
		}
	}

	pub fn is_categorical(&self, node: usize) -> bool {
		self.is_categorical
			.as_ref()
			.map(|is_categorical| is_categorical[node])
			.unwrap_or(false)
	}
}

fn check_len(name: &str, len: usize, expected: usize) -> Result<()> {
	if len != expected {
		return Err(Error::malformed(format!(
			"expected {} element(s) in {}, got {}",
			expected, name, len
		)));
	}
	Ok(())
}

/// How an ensemble combines the outputs of its member trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Combination {
	Sum,
	Average,
	MajorityVote,
}

/// The model family the arrays came from. The family fixes the conventions the decoder has to reproduce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
	/// A single decision tree.
	DecisionTree,
	/// Bagged decision trees whose outputs are averaged.
	Forest,
	/// Bagged decision trees that vote for a class.
	Voting,
	/// Gradient boosted regression trees with a value stored at every node.
	GradientBoosting,
	/// Histogram gradient boosted regression trees with explicit leaf flags, category bitsets, and missing value directions.
	HistGradientBoosting,
}

impl Family {
	/// The cast continuous split fields get. Every family that trains on inputs downcast to `f32` needs the float then double cast to reproduce its thresholds. Histogram gradient boosting bins the raw `f64` inputs.
	pub fn split_cast(self) -> Cast {
		match self {
			Family::DecisionTree | Family::Forest | Family::Voting | Family::GradientBoosting => {
				Cast::FloatThenDouble
			}
			Family::HistGradientBoosting => Cast::Double,
		}
	}

	/// Whether regression branches carry the running value stored for them in `leaf_value`.
	pub fn has_branch_scores(self) -> bool {
		match self {
			Family::DecisionTree | Family::Forest | Family::Voting | Family::GradientBoosting => true,
			Family::HistGradientBoosting => false,
		}
	}

	/// Whether the family accepts tree options. Families that do not are handed to the document assembler untransformed.
	pub fn has_tree_options(self) -> bool {
		match self {
			Family::DecisionTree | Family::Forest | Family::Voting | Family::GradientBoosting => true,
			Family::HistGradientBoosting => false,
		}
	}

	pub fn combination(self) -> Option<Combination> {
		match self {
			Family::DecisionTree => None,
			Family::Forest => Some(Combination::Average),
			Family::Voting => Some(Combination::MajorityVote),
			Family::GradientBoosting | Family::HistGradientBoosting => Some(Combination::Sum),
		}
	}
}

/// The value the model predicts.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
	Regression,
	Classification { classes: Vec<Value> },
}

/// A `NativeModel` bundles the flat trees of a model with the ensemble metadata the artifact reader extracted alongside them.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeModel {
	pub family: Family,
	/// Boosted trees are stored round major: tree `round * trees_per_round + class`.
	pub trees: Vec<NativeTreeArrays>,
	pub target: Target,
	/// The number of trees trained per boosting round. One for regression and binary classification, the number of classes otherwise.
	pub trees_per_round: usize,
	/// The initial predictions of a boosted model, one per tree group. Binary classification may give two, in which case their difference is used.
	pub baselines: Vec<f64>,
	/// The factor a boosted model scales the sum of its trees by.
	pub learning_rate: f64,
	/// The factor the logistic link scales the decision function by, `2` for the half logit link.
	pub logit_coefficient: f64,
}

impl NativeModel {
	pub fn new(family: Family, trees: Vec<NativeTreeArrays>, target: Target) -> Self {
		Self {
			family,
			trees,
			target,
			trees_per_round: 1,
			baselines: Vec::new(),
			learning_rate: 1.0,
			logit_coefficient: 1.0,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn stump() -> NativeTreeArrays {
		NativeTreeArrays {
			left: vec![1, -1, -1],
			right: vec![2, -1, -1],
			feature_index: vec![0, -2, -2],
			threshold: vec![0.5, -2.0, -2.0],
			leaf_value: vec![0.0, 1.0, 2.0],
			..Default::default()
		}
	}

	#[test]
	fn test_validate_accepts_stump() {
		assert_eq!(stump().validate(1), Ok(()));
		assert!(stump().is_leaf(1));
		assert!(!stump().is_leaf(0));
	}

	#[test]
	fn test_validate_rejects_length_mismatch() {
		let mut arrays = stump();
		arrays.threshold.pop();
		assert!(matches!(
			arrays.validate(1),
			Err(Error::MalformedArrays(_))
		));
		assert!(matches!(stump().validate(2), Err(Error::MalformedArrays(_))));
	}

	#[test]
	fn test_validate_rejects_dangling_child() {
		let mut arrays = stump();
		arrays.right[0] = 7;
		assert!(matches!(
			arrays.validate(1),
			Err(Error::MalformedArrays(_))
		));
	}

	#[test]
	fn test_explicit_leaf_flags() {
		let mut arrays = stump();
		arrays.is_leaf = Some(vec![false, true, true]);
		arrays.feature_index = vec![0, 0, 0];
		assert_eq!(arrays.validate(1), Ok(()));
		assert!(arrays.is_leaf(2));
	}
}
