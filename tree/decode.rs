/*!
This module rebuilds a structured tree from flat tree arrays.

Decoding walks the arrays from node 0 with an explicit work stack, so degenerate trees thousands of levels deep decode without exhausting the thread's stack. Every branch is turned into a pair of predicates, one for each child, according to the kind of feature it splits on:

| Feature kind        | Left predicate              | Right predicate          | Default child |
|---------------------|-----------------------------|--------------------------|---------------|
| continuous          | `x <= t`                    | `x > t`                  | per flag      |
| binary indicator    | `x != v`                    | `x == v`                 | always left   |
| missing indicator   | `x is not missing`          | `x is missing`           | none          |
| categorical bitset  | `x in left categories`      | `x in right categories`  | per flag      |
| categorical ordinal | `x in categories <= t`      | `x in categories > t`    | per flag      |

Categorical partitions only ever contain categories that are still reachable from the root, which the decoder tracks with a `CategoryDomain` that is forked for each child.
*/

use crate::{
	domain::CategoryDomain,
	error::{Error, Result},
	feature_importances::tree_feature_importances,
	native::{CategoryBitset, NativeTreeArrays, Target, BITSET_WORDS},
	predicate::{Operator, Predicate, PredicateCache},
	schema::{Cast, Feature, Schema},
	types::{BranchNode, EncodedTree, LeafNode, MissingValueStrategy, ScoreDistribution, Side, TreeKind, TreeNode},
	value::INFINITY_LITERAL,
	Value,
};
use ndarray::prelude::*;
use std::sync::Arc;

/// These options carry the conventions of the model family the arrays came from.
#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
	/// The cast applied to continuous split fields.
	pub cast: Cast,
	/// Whether regression branches get the running value stored for them in `leaf_value`.
	pub branch_scores: bool,
}

impl Default for DecodeOptions {
	fn default() -> Self {
		Self {
			cast: Cast::FloatThenDouble,
			branch_scores: true,
		}
	}
}

/// Decode a single tree with a full category domain.
pub fn decode_tree(
	arrays: &NativeTreeArrays,
	schema: &Schema,
	target: &Target,
	cache: &PredicateCache,
	options: DecodeOptions,
) -> Result<EncodedTree> {
	TreeDecoder::new(arrays, schema, target, cache, options)?.decode(CategoryDomain::new())
}

/// A `TreeDecoder` holds the state of one decoding run. It is consumed by `decode`.
pub struct TreeDecoder<'a> {
	arrays: &'a NativeTreeArrays,
	schema: &'a Schema,
	cache: &'a PredicateCache,
	kind: TreeKind,
	classes: &'a [Value],
	options: DecodeOptions,
	/// (n_nodes, n_outputs)
	values: ArrayView2<'a, f64>,
	visited: Vec<bool>,
}

/// A unit of work for the decoder.
enum Step {
	/// Decode the node at `index`, which is reached through `predicate`.
	Enter {
		index: usize,
		predicate: Arc<Predicate>,
		domain: CategoryDomain,
	},
	/// Assemble the branch at `index` from the last two decoded nodes.
	Exit {
		index: usize,
		predicate: Arc<Predicate>,
		default_child: Option<Side>,
	},
}

/// The two sides of a decoded split.
struct Split {
	left: Predicate,
	right: Predicate,
	left_domain: CategoryDomain,
	right_domain: CategoryDomain,
	default_child: Option<Side>,
}

impl<'a> TreeDecoder<'a> {
	pub fn new(
		arrays: &'a NativeTreeArrays,
		schema: &'a Schema,
		target: &'a Target,
		cache: &'a PredicateCache,
		options: DecodeOptions,
	) -> Result<Self> {
		let (kind, classes) = match target {
			Target::Regression => (TreeKind::Regression, &[][..]),
			Target::Classification { classes } => {
				if classes.is_empty() {
					return Err(Error::malformed("classification target has no classes"));
				}
				(TreeKind::Classification, classes.as_slice())
			}
		};
		let n_outputs = classes.len().max(1);
		arrays.validate(n_outputs)?;
		let n_nodes = arrays.n_nodes();
		let values = ArrayView2::from_shape((n_nodes, n_outputs), &arrays.leaf_value)
			.map_err(|error| Error::malformed(error.to_string()))?;
		Ok(Self {
			arrays,
			schema,
			cache,
			kind,
			classes,
			options,
			values,
			visited: vec![false; n_nodes],
		})
	}

	/// Decode the tree, starting from node 0 with an `Always` predicate and the given domain.
	pub fn decode(mut self, domain: CategoryDomain) -> Result<EncodedTree> {
		let root_predicate = self.cache.intern(Predicate::Always);
		let root = self.decode_nodes(root_predicate, domain)?;
		let mut tree = EncodedTree::new(root, self.kind);
		if self.arrays.missing_goes_left.is_some() {
			tree.missing_value_strategy = MissingValueStrategy::DefaultChild;
		}
		tree.feature_importances = self
			.arrays
			.feature_importances
			.as_ref()
			.map(|importances| {
				tree_feature_importances(importances, self.schema, self.options.cast)
			})
			.transpose()?;
		log::debug!(
			"decoded {} tree with {} nodes",
			self.kind.name(),
			self.arrays.n_nodes()
		);
		Ok(tree)
	}

	fn decode_nodes(
		&mut self,
		predicate: Arc<Predicate>,
		domain: CategoryDomain,
	) -> Result<TreeNode> {
		let mut steps = vec![Step::Enter {
			index: 0,
			predicate,
			domain,
		}];
		let mut decoded: Vec<TreeNode> = Vec::new();
		while let Some(step) = steps.pop() {
			match step {
				Step::Enter {
					index,
					predicate,
					domain,
				} => {
					if self.visited[index] {
						return Err(Error::malformed(format!(
							"node {} is reachable along more than one path",
							index
						)));
					}
					self.visited[index] = true;
					if self.arrays.is_leaf(index) {
						decoded.push(TreeNode::Leaf(self.decode_leaf(index, predicate)));
						continue;
					}
					let split = self.decode_split(index, &domain)?;
					let left_predicate = self.cache.intern(split.left);
					let right_predicate = self.cache.intern(split.right);
					// The left child is decoded first, then the right one, then the branch itself.
					steps.push(Step::Exit {
						index,
						predicate,
						default_child: split.default_child,
					});
					steps.push(Step::Enter {
						index: self.arrays.right[index] as usize,
						predicate: right_predicate,
						domain: split.right_domain,
					});
					steps.push(Step::Enter {
						index: self.arrays.left[index] as usize,
						predicate: left_predicate,
						domain: split.left_domain,
					});
				}
				Step::Exit {
					index,
					predicate,
					default_child,
				} => {
					let right_child = decoded.pop();
					let left_child = decoded.pop();
					let (left_child, right_child) = match (left_child, right_child) {
						(Some(left_child), Some(right_child)) => (left_child, right_child),
						_ => {
							return Err(Error::malformed(format!(
								"branch {} is missing a child",
								index
							)))
						}
					};
					let score = match self.kind {
						TreeKind::Regression if self.options.branch_scores => {
							Some(Value::Double(self.values[(index, 0)]))
						}
						_ => None,
					};
					decoded.push(TreeNode::Branch(BranchNode {
						id: Some(index),
						predicate,
						score,
						default_child,
						children: vec![left_child, right_child].into(),
						extensions: None,
					}));
				}
			}
		}
		decoded
			.pop()
			.ok_or_else(|| Error::malformed("tree has no root"))
	}

	fn decode_leaf(&self, index: usize, predicate: Arc<Predicate>) -> LeafNode {
		match self.kind {
			TreeKind::Regression => LeafNode {
				id: Some(index),
				predicate,
				score: Value::Double(self.values[(index, 0)]),
				record_count: None,
				score_distributions: Vec::new(),
				extensions: None,
			},
			TreeKind::Classification => {
				let row = self.values.row(index);
				let total: f64 = row.sum();
				// Ties go to the lowest class index.
				let mut winner = 0;
				for (class_index, count) in row.iter().enumerate() {
					if *count > row[winner] {
						winner = class_index;
					}
				}
				let score_distributions = self
					.classes
					.iter()
					.zip(row.iter())
					.map(|(class, count)| ScoreDistribution {
						value: class.clone(),
						record_count: *count,
						// Left to the consumer, which derives it from the counts.
						probability: None,
					})
					.collect();
				LeafNode {
					id: Some(index),
					predicate,
					score: self.classes[winner].clone(),
					record_count: Some(total),
					score_distributions,
					extensions: None,
				}
			}
		}
	}

	fn decode_split(&self, index: usize, domain: &CategoryDomain) -> Result<Split> {
		let feature_index = self.arrays.feature_index[index] as usize;
		let feature = self.schema.feature(feature_index).ok_or_else(|| {
			Error::malformed(format!(
				"node {} splits on feature {}, but the schema has {} feature(s)",
				index,
				feature_index,
				self.schema.len()
			))
		})?;
		let flagged_default = self.arrays.missing_goes_left.as_ref().map(|missing_goes_left| {
			if missing_goes_left[index] {
				Side::Left
			} else {
				Side::Right
			}
		});
		if self.arrays.is_categorical(index) {
			let values = match feature {
				Feature::Categorical { values, .. } => values,
				_ => {
					return Err(kind_mismatch(
						index,
						feature,
						"categorical split on a non-categorical feature",
					))
				}
			};
			let bitset = self.bitset(index)?;
			let (left, right) = partition(feature, values, domain, |category_index, _| {
				goes_left(bitset, category_index)
			});
			return Ok(self.categorical_split(feature, domain, left, right, flagged_default));
		}
		let threshold = self.arrays.threshold[index];
		if threshold.is_nan() {
			return Err(Error::malformed(format!("node {} has a NaN threshold", index)));
		}
		match feature {
			Feature::Continuous { .. } => {
				let field = feature.field_ref(self.options.cast);
				let literal = if threshold == f64::INFINITY {
					Value::from(INFINITY_LITERAL)
				} else {
					Value::Double(threshold)
				};
				Ok(Split {
					left: Predicate::compare(field.clone(), Operator::LessOrEqual, literal.clone()),
					right: Predicate::compare(field, Operator::GreaterThan, literal),
					left_domain: domain.clone(),
					right_domain: domain.clone(),
					default_child: flagged_default,
				})
			}
			Feature::Binary { value, .. } => {
				check_indicator_threshold(index, feature, threshold)?;
				let field = feature.field_ref(self.options.cast);
				Ok(Split {
					left: Predicate::compare(field.clone(), Operator::NotEqual, value.clone()),
					right: Predicate::compare(field, Operator::Equal, value.clone()),
					left_domain: domain.clone(),
					right_domain: domain.clone(),
					// Missing values of a binary indicator always go left, whatever the stored flag says.
					default_child: flagged_default.map(|_| Side::Left),
				})
			}
			Feature::MissingIndicator { .. } => {
				check_indicator_threshold(index, feature, threshold)?;
				let field = feature.field_ref(self.options.cast);
				Ok(Split {
					left: Predicate::missing(field.clone(), Operator::IsNotMissing),
					right: Predicate::missing(field, Operator::IsMissing),
					left_domain: domain.clone(),
					right_domain: domain.clone(),
					default_child: None,
				})
			}
			Feature::Categorical { values, .. } => {
				// An ordinal encoded categorical feature. The ordinals were compared as f32.
				let (left, right) = partition(feature, values, domain, |category_index, _| {
					f64::from(category_index as f32) <= threshold
				});
				Ok(self.categorical_split(feature, domain, left, right, flagged_default))
			}
		}
	}

	fn categorical_split(
		&self,
		feature: &Feature,
		domain: &CategoryDomain,
		left: Vec<Value>,
		right: Vec<Value>,
		default_child: Option<Side>,
	) -> Split {
		let name = feature.name();
		let field = feature.field_ref(self.options.cast);
		let left_domain = domain.fork(name, left.clone());
		let right_domain = domain.fork(name, right.clone());
		Split {
			left: Predicate::membership(field.clone(), left),
			right: Predicate::membership(field, right),
			left_domain,
			right_domain,
			default_child,
		}
	}

	fn bitset(&self, index: usize) -> Result<&'a CategoryBitset> {
		let row = self
			.arrays
			.category_bitset_row
			.as_ref()
			.map(|rows| rows[index])
			.ok_or(Error::MissingBitsetRow { node: index })?;
		if row < 0 {
			return Err(Error::MissingBitsetRow { node: index });
		}
		self.arrays
			.category_bitsets
			.get(row as usize)
			.ok_or(Error::MissingBitsetRow { node: index })
	}
}

/// Split the categories still reachable in `domain` into those that go left and those that go right.
fn partition(
	feature: &Feature,
	values: &[Value],
	domain: &CategoryDomain,
	goes_left: impl Fn(usize, &Value) -> bool,
) -> (Vec<Value>, Vec<Value>) {
	let name = feature.name();
	let mut left = Vec::new();
	let mut right = Vec::new();
	for (category_index, value) in values.iter().enumerate() {
		if !domain.member(name, value) {
			continue;
		}
		if goes_left(category_index, value) {
			left.push(value.clone());
		} else {
			right.push(value.clone());
		}
	}
	log::trace!(
		"partitioned {}: {} left, {} right",
		name,
		left.len(),
		right.len()
	);
	(left, right)
}

fn goes_left(bitset: &CategoryBitset, category_index: usize) -> bool {
	let word = category_index / 32;
	word < BITSET_WORDS && (bitset[word] >> (category_index % 32)) & 1 == 1
}

fn check_indicator_threshold(index: usize, feature: &Feature, threshold: f64) -> Result<()> {
	if threshold != 0.5 {
		return Err(kind_mismatch(
			index,
			feature,
			&format!("expected threshold 0.5, got {}", threshold),
		));
	}
	Ok(())
}

fn kind_mismatch(index: usize, feature: &Feature, reason: &str) -> Error {
	Error::FeatureKindMismatch {
		node: index,
		feature: format!("{} ({})", feature.name(), feature.kind_name()),
		reason: reason.to_owned(),
	}
}
