/*!
This module scores records with converted models, following the tree model semantics the document assembler emits: a record is routed to the first child whose predicate is true, predicates on missing values are resolved by the tree's missing value strategy, and a branch without a matching child is resolved by its no true child strategy.
*/

use crate::{
	combine::{ConvertedModel, Ensemble},
	native::Combination,
	predicate::Predicate,
	types::{EncodedTree, MissingValueStrategy, NoTrueChildStrategy, TreeKind, TreeNode},
	Value,
};
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use std::{
	collections::{BTreeMap, HashMap},
	hash::BuildHasher,
};

/// A `Record` supplies input values by field name. A field that is absent is missing.
pub trait Record {
	fn value(&self, field: &str) -> Option<&Value>;
}

impl<S: BuildHasher> Record for HashMap<String, Value, S> {
	fn value(&self, field: &str) -> Option<&Value> {
		self.get(field)
	}
}

impl Record for BTreeMap<String, Value> {
	fn value(&self, field: &str) -> Option<&Value> {
		self.get(field)
	}
}

/// The output of a model for one record.
#[derive(Clone, Debug, PartialEq)]
pub enum Prediction {
	Regression(f64),
	Classification {
		class: Value,
		/// One probability per class, in class order.
		probabilities: Vec<(Value, f64)>,
	},
}

impl EncodedTree {
	/// Route `record` through the tree and return the node whose score is the prediction, or `None` for a null prediction.
	pub fn evaluate<R: Record + ?Sized>(&self, record: &R) -> Option<&TreeNode> {
		if decide(self.root.predicate(), record) != Some(true) {
			return None;
		}
		let mut node = &self.root;
		loop {
			let branch = match node {
				TreeNode::Leaf(_) => return Some(node),
				TreeNode::Branch(branch) => branch,
			};
			let mut next = None;
			for child in branch.children.iter() {
				match decide(child.predicate(), record) {
					Some(true) => {
						next = Some(child);
						break;
					}
					Some(false) => {}
					None => match self.missing_value_strategy {
						MissingValueStrategy::None => {}
						MissingValueStrategy::NullPrediction => return None,
						MissingValueStrategy::DefaultChild => {
							next = branch.default_child.and_then(|side| branch.child(side));
							if next.is_none() {
								return None;
							}
							break;
						}
					},
				}
			}
			node = match next {
				Some(child) => child,
				None => {
					return match self.no_true_child_strategy {
						NoTrueChildStrategy::ReturnNullPrediction => None,
						NoTrueChildStrategy::ReturnLastPrediction => node.score().map(|_| node),
					}
				}
			};
		}
	}

	/// The output of a regression tree.
	pub fn predict_value<R: Record + ?Sized>(&self, record: &R) -> Option<f64> {
		self.evaluate(record)?.score()?.as_f64()
	}

	/// The winning class and class probabilities of a classification tree.
	pub fn predict_distribution<R: Record + ?Sized>(
		&self,
		record: &R,
	) -> Option<(Value, Vec<(Value, f64)>)> {
		let leaf = match self.evaluate(record)? {
			TreeNode::Leaf(leaf) if !leaf.score_distributions.is_empty() => leaf,
			_ => return None,
		};
		let total: f64 = leaf
			.score_distributions
			.iter()
			.map(|distribution| distribution.record_count)
			.sum();
		let probabilities = leaf
			.score_distributions
			.iter()
			.map(|distribution| {
				let probability = distribution.probability.unwrap_or(if total > 0.0 {
					distribution.record_count / total
				} else {
					0.0
				});
				(distribution.value.clone(), probability)
			})
			.collect();
		Some((leaf.score.clone(), probabilities))
	}
}

fn decide<R: Record + ?Sized>(predicate: &Predicate, record: &R) -> Option<bool> {
	let value = predicate
		.field()
		.and_then(|field| record.value(&field.name))
		// NaN inputs are missing.
		.filter(|value| !matches!(value, Value::Double(value) if value.is_nan()));
	predicate.evaluate(value)
}

impl Ensemble {
	/// The scaled sum of the members plus the baseline. Only meaningful for summing ensembles.
	pub fn decision<R: Record + ?Sized>(&self, record: &R) -> Option<f64> {
		let mut sum = 0.0;
		for tree in self.trees.iter() {
			sum += tree.predict_value(record)?;
		}
		Some(self.baseline.unwrap_or(0.0) + self.rescale_factor * sum)
	}

	pub fn predict<R: Record + ?Sized>(&self, record: &R) -> Option<Prediction> {
		let n_trees = self.trees.len().to_f64()?;
		let kind = self.trees.first()?.kind;
		match (self.combination, kind) {
			(Combination::Sum, _) => self.decision(record).map(Prediction::Regression),
			(Combination::Average, TreeKind::Regression) => {
				let mut sum = 0.0;
				for tree in self.trees.iter() {
					sum += tree.predict_value(record)?;
				}
				Some(Prediction::Regression(sum / n_trees))
			}
			(Combination::Average, TreeKind::Classification) => {
				let mut classes: Vec<Value> = Vec::new();
				let mut probabilities: Array1<f64> = Array1::zeros(0);
				for tree in self.trees.iter() {
					let (_, distribution) = tree.predict_distribution(record)?;
					if classes.is_empty() {
						classes = distribution.iter().map(|(class, _)| class.clone()).collect();
						probabilities = Array1::zeros(classes.len());
					}
					if distribution.len() != classes.len() {
						return None;
					}
					for (probability, (_, tree_probability)) in
						probabilities.iter_mut().zip(distribution.iter())
					{
						*probability += tree_probability;
					}
				}
				probabilities /= n_trees;
				Some(classification(classes, probabilities.to_vec()))
			}
			(Combination::MajorityVote, _) => {
				let mut classes: Vec<Value> = Vec::new();
				let mut votes: Vec<f64> = Vec::new();
				for tree in self.trees.iter() {
					let (winner, distribution) = tree.predict_distribution(record)?;
					if classes.is_empty() {
						classes = distribution.into_iter().map(|(class, _)| class).collect();
						votes = vec![0.0; classes.len()];
					}
					let class_index = classes.iter().position(|class| *class == winner)?;
					votes[class_index] += 1.0;
				}
				let probabilities = votes.into_iter().map(|votes| votes / n_trees).collect();
				Some(classification(classes, probabilities))
			}
		}
	}
}

impl ConvertedModel {
	pub fn predict<R: Record + ?Sized>(&self, record: &R) -> Option<Prediction> {
		match self {
			ConvertedModel::Tree(tree) => match tree.kind {
				TreeKind::Regression => tree.predict_value(record).map(Prediction::Regression),
				TreeKind::Classification => {
					let (class, probabilities) = tree.predict_distribution(record)?;
					Some(Prediction::Classification {
						class,
						probabilities,
					})
				}
			},
			ConvertedModel::Ensemble(ensemble) => ensemble.predict(record),
			ConvertedModel::BinaryLogistic {
				ensemble,
				coefficient,
				classes,
			} => {
				let decision = ensemble.decision(record)?;
				let probability = 1.0 / ((-coefficient * decision).exp() + 1.0);
				Some(classification(
					classes.clone(),
					vec![1.0 - probability, probability],
				))
			}
			ConvertedModel::Softmax { ensembles, classes } => {
				let mut logits = ensembles
					.iter()
					.map(|ensemble| ensemble.decision(record))
					.collect::<Option<Array1<f64>>>()?;
				softmax(logits.view_mut());
				Some(classification(classes.clone(), logits.to_vec()))
			}
		}
	}
}

/// Pair classes with probabilities. The winner is the most probable class, ties going to the first.
fn classification(classes: Vec<Value>, probabilities: Vec<f64>) -> Prediction {
	let mut winner = 0;
	for (class_index, probability) in probabilities.iter().enumerate() {
		if *probability > probabilities[winner] {
			winner = class_index;
		}
	}
	let class = classes.get(winner).cloned().unwrap_or(Value::Integer(0));
	Prediction::Classification {
		class,
		probabilities: classes.into_iter().zip(probabilities).collect(),
	}
}

fn softmax(mut logits: ArrayViewMut1<f64>) {
	let max = logits.iter().fold(std::f64::MIN, |a, &b| a.max(b));
	for logit in logits.iter_mut() {
		*logit = (*logit - max).exp();
	}
	let sum = logits.iter().sum::<f64>();
	logits /= sum;
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		combine::{combine, decode_members},
		decode::{decode_tree, DecodeOptions},
		native::{Family, NativeModel, NativeTreeArrays, Target},
		predicate::PredicateCache,
		schema::{Cast, Feature, Schema},
	};
	use maplit::hashmap;

	fn stump(threshold: f64, leaf_value: Vec<f64>) -> NativeTreeArrays {
		NativeTreeArrays {
			left: vec![1, -1, -1],
			right: vec![2, -1, -1],
			feature_index: vec![0, -1, -1],
			threshold: vec![threshold, -1.0, -1.0],
			leaf_value,
			..Default::default()
		}
	}

	fn record(x0: f64) -> HashMap<String, Value> {
		hashmap! { "x0".to_owned() => Value::Double(x0) }
	}

	fn convert(model: &NativeModel, schema: &Schema) -> ConvertedModel {
		let cache = PredicateCache::new();
		let trees = decode_members(model, schema, &cache).unwrap();
		combine(model, trees).unwrap()
	}

	#[test]
	fn test_float_precision_is_reproduced() {
		// 0.1 is not representable in f32, and rounds up across a threshold of 0.1.
		let threshold = 0.1;
		assert!(f64::from(0.1f32) > threshold);
		let arrays = stump(threshold, vec![0.0, 1.0, 2.0]);
		let schema = Schema::new(vec![Feature::continuous("x0")]);
		let cache = PredicateCache::new();
		let tree = decode_tree(
			&arrays,
			&schema,
			&Target::Regression,
			&cache,
			DecodeOptions::default(),
		)
		.unwrap();
		assert_eq!(tree.predict_value(&record(0.1)), Some(2.0));
		let options = DecodeOptions {
			cast: Cast::Double,
			branch_scores: true,
		};
		let tree = decode_tree(&arrays, &schema, &Target::Regression, &cache, options).unwrap();
		assert_eq!(tree.predict_value(&record(0.1)), Some(1.0));
	}

	#[test]
	fn test_binary_indicator_missing_goes_left() {
		let mut arrays = stump(0.5, vec![0.0, 1.0, 2.0]);
		arrays.missing_goes_left = Some(vec![false, false, false]);
		let schema = Schema::new(vec![Feature::binary("color", "red")]);
		let cache = PredicateCache::new();
		let tree = decode_tree(
			&arrays,
			&schema,
			&Target::Regression,
			&cache,
			DecodeOptions::default(),
		)
		.unwrap();
		let missing: HashMap<String, Value> = HashMap::new();
		assert_eq!(tree.predict_value(&missing), Some(1.0));
		let red = hashmap! { "color".to_owned() => Value::from("red") };
		assert_eq!(tree.predict_value(&red), Some(2.0));
		let blue = hashmap! { "color".to_owned() => Value::from("blue") };
		assert_eq!(tree.predict_value(&blue), Some(1.0));
	}

	#[test]
	fn test_continuous_missing_follows_flag() {
		let mut arrays = stump(3.5, vec![0.0, 1.0, 2.0]);
		arrays.missing_goes_left = Some(vec![false, false, false]);
		let schema = Schema::new(vec![Feature::continuous("x0")]);
		let model = NativeModel::new(Family::DecisionTree, vec![arrays], Target::Regression);
		let converted = convert(&model, &schema);
		let nan = record(f64::NAN);
		assert_eq!(converted.predict(&nan), Some(Prediction::Regression(2.0)));
	}

	#[test]
	fn test_classification_tree() {
		let arrays = stump(3.5, vec![9.0, 10.0, 7.0, 1.0, 2.0, 9.0]);
		let schema = Schema::new(vec![Feature::continuous("x0")]);
		let model = NativeModel::new(
			Family::DecisionTree,
			vec![arrays],
			Target::Classification {
				classes: vec!["a".into(), "b".into()],
			},
		);
		let converted = convert(&model, &schema);
		assert_eq!(
			converted.predict(&record(1.0)),
			Some(Prediction::Classification {
				class: "a".into(),
				probabilities: vec![("a".into(), 7.0 / 8.0), ("b".into(), 1.0 / 8.0)],
			})
		);
	}

	#[test]
	fn test_forest_averages_distributions() {
		let classes = Target::Classification {
			classes: vec![Value::Integer(0), Value::Integer(1)],
		};
		let model = NativeModel::new(
			Family::Forest,
			vec![
				stump(3.5, vec![0.0, 0.0, 3.0, 1.0, 0.0, 4.0]),
				stump(0.5, vec![0.0, 0.0, 4.0, 0.0, 1.0, 3.0]),
			],
			classes,
		);
		let schema = Schema::new(vec![Feature::continuous("x0")]);
		let converted = convert(&model, &schema);
		// The first tree says [0.75, 0.25], the second [0.25, 0.75].
		match converted.predict(&record(1.0)) {
			Some(Prediction::Classification {
				class,
				probabilities,
			}) => {
				assert_eq!(class, Value::Integer(0));
				assert_eq!(probabilities[0].1, 0.5);
				assert_eq!(probabilities[1].1, 0.5);
			}
			prediction => panic!("unexpected prediction {:?}", prediction),
		}
	}

	#[test]
	fn test_voting_counts_winners() {
		let classes = Target::Classification {
			classes: vec!["a".into(), "b".into()],
		};
		let model = NativeModel::new(
			Family::Voting,
			vec![
				stump(3.5, vec![0.0, 0.0, 3.0, 1.0, 0.0, 4.0]),
				stump(0.5, vec![0.0, 0.0, 4.0, 0.0, 1.0, 3.0]),
				stump(5.5, vec![0.0, 0.0, 0.0, 2.0, 2.0, 0.0]),
			],
			classes,
		);
		let schema = Schema::new(vec![Feature::continuous("x0")]);
		let converted = convert(&model, &schema);
		match converted.predict(&record(1.0)) {
			Some(Prediction::Classification {
				class,
				probabilities,
			}) => {
				assert_eq!(class, Value::from("b"));
				assert_eq!(probabilities[1].1, 2.0 / 3.0);
			}
			prediction => panic!("unexpected prediction {:?}", prediction),
		}
	}

	#[test]
	fn test_boosted_models() {
		let schema = Schema::new(vec![Feature::continuous("x0")]);
		let mut model = NativeModel::new(
			Family::GradientBoosting,
			vec![
				stump(3.5, vec![0.0, -1.0, 1.0]),
				stump(1.5, vec![0.0, -2.0, 2.0]),
			],
			Target::Regression,
		);
		model.baselines = vec![10.0];
		model.learning_rate = 0.5;
		assert_eq!(
			convert(&model, &schema).predict(&record(2.0)),
			Some(Prediction::Regression(10.5))
		);
		model.target = Target::Classification {
			classes: vec!["no".into(), "yes".into()],
		};
		model.baselines = vec![0.0];
		model.logit_coefficient = 2.0;
		match convert(&model, &schema).predict(&record(4.0)) {
			Some(Prediction::Classification {
				class,
				probabilities,
			}) => {
				assert_eq!(class, Value::from("yes"));
				let expected = 1.0 / ((-2.0f64 * 1.5).exp() + 1.0);
				assert!((probabilities[1].1 - expected).abs() < 1e-12);
			}
			prediction => panic!("unexpected prediction {:?}", prediction),
		}
	}

	#[test]
	fn test_softmax() {
		let schema = Schema::new(vec![Feature::continuous("x0")]);
		let mut model = NativeModel::new(
			Family::GradientBoosting,
			vec![
				stump(3.5, vec![0.0, 1.0, 0.0]),
				stump(3.5, vec![0.0, 0.0, 1.0]),
				stump(3.5, vec![0.0, 0.0, 0.0]),
			],
			Target::Classification {
				classes: vec!["a".into(), "b".into(), "c".into()],
			},
		);
		model.trees_per_round = 3;
		model.baselines = vec![0.0, 0.0, 0.0];
		match convert(&model, &schema).predict(&record(5.0)) {
			Some(Prediction::Classification {
				class,
				probabilities,
			}) => {
				assert_eq!(class, Value::from("b"));
				let total: f64 = probabilities.iter().map(|(_, p)| p).sum();
				assert!((total - 1.0).abs() < 1e-12);
				assert_eq!(probabilities[0].1, probabilities[2].1);
			}
			prediction => panic!("unexpected prediction {:?}", prediction),
		}
	}
}
