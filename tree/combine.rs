/*!
This module decodes the members of a model and combines them according to the model's family.

| Family                  | Members        | Result                                               |
|-------------------------|----------------|------------------------------------------------------|
| decision tree           | one tree       | `ConvertedModel::Tree`                               |
| forest                  | target kind    | `Ensemble` that averages scores or distributions     |
| voting                  | classification | `Ensemble` that takes a majority vote                |
| boosting, regression    | regression     | `Ensemble` that sums                                 |
| boosting, two classes   | regression     | `BinaryLogistic` over one summing `Ensemble`         |
| boosting, K > 2 classes | regression     | `Softmax` over K summing `Ensemble`s, one per class  |
*/

use crate::{
	decode::{decode_tree, DecodeOptions},
	error::{Error, Result},
	feature_importances::average_feature_importances,
	native::{Combination, NativeModel, Target},
	predicate::PredicateCache,
	schema::Schema,
	types::{EncodedTree, FieldImportance, TreeKind},
	Value,
};
use rayon::prelude::*;

/// An `Ensemble` is a set of member trees and the rule that combines their outputs.
#[derive(Clone, Debug, PartialEq)]
pub struct Ensemble {
	pub trees: Vec<EncodedTree>,
	pub combination: Combination,
	/// Added to the combined output of a summing ensemble.
	pub baseline: Option<f64>,
	/// The factor the sum of a summing ensemble is scaled by before the baseline is added.
	pub rescale_factor: f64,
	/// The averaged importances of the members, if every member recorded them.
	pub feature_importances: Option<Vec<FieldImportance>>,
}

impl Ensemble {
	fn new(trees: Vec<EncodedTree>, combination: Combination) -> Self {
		let feature_importances = average_feature_importances(&trees);
		Self {
			trees,
			combination,
			baseline: None,
			rescale_factor: 1.0,
			feature_importances,
		}
	}

	pub fn map_trees(
		mut self,
		f: &mut dyn FnMut(EncodedTree) -> Result<EncodedTree>,
	) -> Result<Self> {
		self.trees = self.trees.into_iter().map(|tree| f(tree)).collect::<Result<_>>()?;
		Ok(self)
	}
}

/// The result of a conversion, handed to the document assembler.
#[derive(Clone, Debug, PartialEq)]
pub enum ConvertedModel {
	Tree(EncodedTree),
	Ensemble(Ensemble),
	/// A two class boosted model. The probability of the second class is `1 / (1 + exp(-coefficient * decision))`.
	BinaryLogistic {
		ensemble: Ensemble,
		coefficient: f64,
		classes: Vec<Value>,
	},
	/// A boosted model with one summing ensemble per class, combined with softmax.
	Softmax {
		ensembles: Vec<Ensemble>,
		classes: Vec<Value>,
	},
}

impl ConvertedModel {
	/// Rebuild the model with every member tree passed through `f`.
	pub fn map_trees(self, f: &mut dyn FnMut(EncodedTree) -> Result<EncodedTree>) -> Result<Self> {
		Ok(match self {
			ConvertedModel::Tree(tree) => ConvertedModel::Tree(f(tree)?),
			ConvertedModel::Ensemble(ensemble) => ConvertedModel::Ensemble(ensemble.map_trees(f)?),
			ConvertedModel::BinaryLogistic {
				ensemble,
				coefficient,
				classes,
			} => ConvertedModel::BinaryLogistic {
				ensemble: ensemble.map_trees(f)?,
				coefficient,
				classes,
			},
			ConvertedModel::Softmax { ensembles, classes } => ConvertedModel::Softmax {
				ensembles: ensembles
					.into_iter()
					.map(|ensemble| ensemble.map_trees(&mut *f))
					.collect::<Result<_>>()?,
				classes,
			},
		})
	}

	/// Call `f` on every member tree.
	pub fn for_each_tree<'a>(&'a self, f: &mut dyn FnMut(&'a EncodedTree)) {
		match self {
			ConvertedModel::Tree(tree) => f(tree),
			ConvertedModel::Ensemble(ensemble) | ConvertedModel::BinaryLogistic { ensemble, .. } => {
				ensemble.trees.iter().for_each(|tree| f(tree))
			}
			ConvertedModel::Softmax { ensembles, .. } => ensembles
				.iter()
				.flat_map(|ensemble| ensemble.trees.iter())
				.for_each(|tree| f(tree)),
		}
	}
}

/// Decode every member of `model` in parallel against one shared predicate cache.
pub fn decode_members(
	model: &NativeModel,
	schema: &Schema,
	cache: &PredicateCache,
) -> Result<Vec<EncodedTree>> {
	let options = DecodeOptions {
		cast: model.family.split_cast(),
		branch_scores: model.family.has_branch_scores(),
	};
	// Boosted members are regression trees whatever the model predicts.
	let member_target = match model.family.combination() {
		Some(Combination::Sum) => Target::Regression,
		_ => model.target.clone(),
	};
	model
		.trees
		.par_iter()
		.map(|arrays| decode_tree(arrays, schema, &member_target, cache, options))
		.collect()
}

/// Combine decoded members according to the family and target of `model`.
pub fn combine(model: &NativeModel, mut trees: Vec<EncodedTree>) -> Result<ConvertedModel> {
	if trees.is_empty() {
		return Err(Error::EnsembleShapeMismatch("model has no trees".to_owned()));
	}
	let combination = match model.family.combination() {
		Some(combination) => combination,
		None => {
			if trees.len() != 1 {
				return Err(Error::EnsembleShapeMismatch(format!(
					"a decision tree has exactly one tree, got {}",
					trees.len()
				)));
			}
			let kind = target_kind(&model.target);
			check_kinds(&trees, kind)?;
			return Ok(ConvertedModel::Tree(trees.remove(0)));
		}
	};
	log::debug!(
		"combining {} trees with {:?}",
		trees.len(),
		combination
	);
	match combination {
		Combination::Average => {
			check_kinds(&trees, target_kind(&model.target))?;
			Ok(ConvertedModel::Ensemble(Ensemble::new(
				trees,
				Combination::Average,
			)))
		}
		Combination::MajorityVote => {
			check_kinds(&trees, TreeKind::Classification)?;
			Ok(ConvertedModel::Ensemble(Ensemble::new(
				trees,
				Combination::MajorityVote,
			)))
		}
		Combination::Sum => {
			check_kinds(&trees, TreeKind::Regression)?;
			combine_boosted(model, trees)
		}
	}
}

fn combine_boosted(model: &NativeModel, trees: Vec<EncodedTree>) -> Result<ConvertedModel> {
	let classes = match &model.target {
		Target::Regression => {
			check_trees_per_round(model, 1)?;
			let baseline = single_baseline(model)?;
			return Ok(ConvertedModel::Ensemble(boosted(model, trees, baseline)));
		}
		Target::Classification { classes } => classes,
	};
	let n_classes = classes.len();
	match n_classes {
		0 | 1 => Err(Error::EnsembleShapeMismatch(format!(
			"a classifier needs at least two classes, got {}",
			n_classes
		))),
		2 => {
			check_trees_per_round(model, 1)?;
			let baseline = match model.baselines.as_slice() {
				[first, second] => Some(second - first),
				_ => single_baseline(model)?,
			};
			Ok(ConvertedModel::BinaryLogistic {
				ensemble: boosted(model, trees, baseline),
				coefficient: model.logit_coefficient,
				classes: classes.clone(),
			})
		}
		_ => {
			check_trees_per_round(model, n_classes)?;
			if trees.len() % n_classes != 0 {
				return Err(Error::EnsembleShapeMismatch(format!(
					"{} trees do not form whole rounds of {}",
					trees.len(),
					n_classes
				)));
			}
			if model.baselines.len() != n_classes {
				return Err(Error::EnsembleShapeMismatch(format!(
					"expected {} baselines, got {}",
					n_classes,
					model.baselines.len()
				)));
			}
			// Trees are stored round major, so tree `round * n_classes + class` belongs to `class`.
			let mut groups: Vec<Vec<EncodedTree>> = (0..n_classes).map(|_| Vec::new()).collect();
			for (index, tree) in trees.into_iter().enumerate() {
				groups[index % n_classes].push(tree);
			}
			let ensembles = groups
				.into_iter()
				.zip(model.baselines.iter())
				.map(|(group, baseline)| boosted(model, group, Some(*baseline)))
				.collect();
			Ok(ConvertedModel::Softmax {
				ensembles,
				classes: classes.clone(),
			})
		}
	}
}

fn boosted(model: &NativeModel, trees: Vec<EncodedTree>, baseline: Option<f64>) -> Ensemble {
	let mut ensemble = Ensemble::new(trees, Combination::Sum);
	ensemble.baseline = baseline;
	ensemble.rescale_factor = model.learning_rate;
	ensemble
}

fn single_baseline(model: &NativeModel) -> Result<Option<f64>> {
	match model.baselines.as_slice() {
		[] => Ok(None),
		[baseline] => Ok(Some(*baseline)),
		baselines => Err(Error::EnsembleShapeMismatch(format!(
			"expected at most one baseline, got {}",
			baselines.len()
		))),
	}
}

fn check_trees_per_round(model: &NativeModel, expected: usize) -> Result<()> {
	if model.trees_per_round != expected {
		return Err(Error::EnsembleShapeMismatch(format!(
			"expected {} tree(s) per round, got {}",
			expected, model.trees_per_round
		)));
	}
	Ok(())
}

fn check_kinds(trees: &[EncodedTree], expected: TreeKind) -> Result<()> {
	for (index, tree) in trees.iter().enumerate() {
		if tree.kind != expected {
			return Err(Error::TreeKindMismatch {
				tree: index,
				expected: expected.name(),
				actual: tree.kind.name(),
			});
		}
	}
	Ok(())
}

fn target_kind(target: &Target) -> TreeKind {
	match target {
		Target::Regression => TreeKind::Regression,
		Target::Classification { .. } => TreeKind::Classification,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		native::{Family, NativeTreeArrays},
		predicate::Predicate,
		schema::Feature,
		types::TreeNode,
	};
	use std::sync::Arc;

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

	fn schema() -> Schema {
		Schema::new(vec![Feature::continuous("x0")])
	}

	fn two_classes() -> Target {
		Target::Classification {
			classes: vec![Value::Integer(0), Value::Integer(1)],
		}
	}

	fn three_classes() -> Target {
		Target::Classification {
			classes: vec!["a".into(), "b".into(), "c".into()],
		}
	}

	fn convert(model: &NativeModel) -> Result<ConvertedModel> {
		let cache = PredicateCache::new();
		let trees = decode_members(model, &schema(), &cache)?;
		combine(model, trees)
	}

	#[test]
	fn test_interning_across_members() {
		let model = NativeModel::new(
			Family::Forest,
			vec![
				stump(3.5, vec![0.0, 1.0, 2.0]),
				stump(3.5, vec![0.0, 5.0, 6.0]),
			],
			Target::Regression,
		);
		let cache = PredicateCache::new();
		let trees = decode_members(&model, &schema(), &cache).unwrap();
		let first: &Arc<Predicate> = trees[0].root.children()[0].predicate();
		let second: &Arc<Predicate> = trees[1].root.children()[0].predicate();
		assert!(Arc::ptr_eq(first, second));
		// Always, LE 3.5, and GT 3.5.
		assert_eq!(cache.len(), 3);
	}

	#[test]
	fn test_decision_tree_needs_one_tree() {
		let tree = stump(3.5, vec![0.0, 1.0, 2.0]);
		let model = NativeModel::new(Family::DecisionTree, vec![tree.clone()], Target::Regression);
		assert!(matches!(convert(&model), Ok(ConvertedModel::Tree(_))));
		let model = NativeModel::new(
			Family::DecisionTree,
			vec![tree.clone(), tree],
			Target::Regression,
		);
		assert!(matches!(
			convert(&model),
			Err(Error::EnsembleShapeMismatch(_))
		));
	}

	#[test]
	fn test_forest_classification() {
		let model = NativeModel::new(
			Family::Forest,
			vec![
				stump(3.5, vec![5.0, 5.0, 4.0, 1.0, 1.0, 4.0]),
				stump(2.5, vec![5.0, 5.0, 3.0, 2.0, 2.0, 3.0]),
			],
			two_classes(),
		);
		match convert(&model).unwrap() {
			ConvertedModel::Ensemble(ensemble) => {
				assert_eq!(ensemble.combination, Combination::Average);
				assert_eq!(ensemble.trees.len(), 2);
				assert!(ensemble
					.trees
					.iter()
					.all(|tree| tree.kind == TreeKind::Classification));
			}
			model => panic!("unexpected model {:?}", model),
		}
	}

	#[test]
	fn test_voting_requires_classification() {
		let model = NativeModel::new(
			Family::Voting,
			vec![stump(3.5, vec![0.0, 1.0, 2.0])],
			Target::Regression,
		);
		assert_eq!(
			convert(&model).unwrap_err(),
			Error::TreeKindMismatch {
				tree: 0,
				expected: "classification",
				actual: "regression",
			}
		);
	}

	#[test]
	fn test_sum_rejects_classification_members() {
		let model = NativeModel::new(
			Family::GradientBoosting,
			vec![stump(3.5, vec![0.0, 1.0, 2.0])],
			Target::Regression,
		);
		let cache = PredicateCache::new();
		let classifier = decode_tree(
			&stump(3.5, vec![1.0, 1.0, 1.0, 0.0, 0.0, 1.0]),
			&schema(),
			&two_classes(),
			&cache,
			DecodeOptions::default(),
		)
		.unwrap();
		let result = combine(&model, vec![classifier]);
		assert!(matches!(
			result,
			Err(Error::TreeKindMismatch { tree: 0, .. })
		));
	}

	#[test]
	fn test_boosted_regression() {
		let mut model = NativeModel::new(
			Family::GradientBoosting,
			vec![
				stump(3.5, vec![0.0, 1.0, 2.0]),
				stump(1.5, vec![0.0, -1.0, 1.0]),
			],
			Target::Regression,
		);
		model.baselines = vec![10.0];
		model.learning_rate = 0.1;
		match convert(&model).unwrap() {
			ConvertedModel::Ensemble(ensemble) => {
				assert_eq!(ensemble.combination, Combination::Sum);
				assert_eq!(ensemble.baseline, Some(10.0));
				assert_eq!(ensemble.rescale_factor, 0.1);
			}
			model => panic!("unexpected model {:?}", model),
		}
	}

	#[test]
	fn test_boosted_binary_uses_baseline_difference() {
		let mut model = NativeModel::new(
			Family::GradientBoosting,
			vec![stump(3.5, vec![0.0, -1.0, 1.0])],
			two_classes(),
		);
		model.baselines = vec![0.25, 1.0];
		model.logit_coefficient = 2.0;
		match convert(&model).unwrap() {
			ConvertedModel::BinaryLogistic {
				ensemble,
				coefficient,
				classes,
			} => {
				assert_eq!(ensemble.baseline, Some(0.75));
				assert_eq!(coefficient, 2.0);
				assert_eq!(classes.len(), 2);
				assert_eq!(ensemble.trees[0].kind, TreeKind::Regression);
			}
			model => panic!("unexpected model {:?}", model),
		}
		model.trees_per_round = 2;
		assert!(matches!(
			convert(&model),
			Err(Error::EnsembleShapeMismatch(_))
		));
	}

	#[test]
	fn test_boosted_multiclass_groups_round_major() {
		let trees = (0..6)
			.map(|index| stump(3.5, vec![0.0, index as f64, index as f64]))
			.collect();
		let mut model = NativeModel::new(Family::GradientBoosting, trees, three_classes());
		model.trees_per_round = 3;
		model.baselines = vec![0.1, 0.2, 0.3];
		match convert(&model).unwrap() {
			ConvertedModel::Softmax { ensembles, classes } => {
				assert_eq!(classes.len(), 3);
				let leaf_scores: Vec<Vec<Option<Value>>> = ensembles
					.iter()
					.map(|ensemble| {
						ensemble
							.trees
							.iter()
							.map(|tree| tree.root.children()[0].score().cloned())
							.collect()
					})
					.collect();
				assert_eq!(
					leaf_scores,
					vec![
						vec![Some(Value::Double(0.0)), Some(Value::Double(3.0))],
						vec![Some(Value::Double(1.0)), Some(Value::Double(4.0))],
						vec![Some(Value::Double(2.0)), Some(Value::Double(5.0))],
					]
				);
				assert_eq!(ensembles[2].baseline, Some(0.3));
			}
			model => panic!("unexpected model {:?}", model),
		}
	}

	#[test]
	fn test_boosted_multiclass_shape_errors() {
		let trees: Vec<_> = (0..6)
			.map(|_| stump(3.5, vec![0.0, 1.0, 2.0]))
			.collect();
		let mut model = NativeModel::new(Family::GradientBoosting, trees.clone(), three_classes());
		model.trees_per_round = 2;
		model.baselines = vec![0.1, 0.2, 0.3];
		assert!(matches!(
			convert(&model),
			Err(Error::EnsembleShapeMismatch(_))
		));
		model.trees_per_round = 3;
		model.baselines = vec![0.1, 0.2];
		assert!(matches!(
			convert(&model),
			Err(Error::EnsembleShapeMismatch(_))
		));
		model.baselines = vec![0.1, 0.2, 0.3];
		model.trees = trees[..5].to_vec();
		assert!(matches!(
			convert(&model),
			Err(Error::EnsembleShapeMismatch(_))
		));
	}

	#[test]
	fn test_members_with_importances_are_averaged() {
		let mut first = stump(3.5, vec![0.0, 1.0, 2.0]);
		first.feature_importances = Some(vec![1.0]);
		let mut second = stump(2.5, vec![0.0, 1.0, 2.0]);
		second.feature_importances = Some(vec![0.5]);
		let model = NativeModel::new(Family::Forest, vec![first, second], Target::Regression);
		match convert(&model).unwrap() {
			ConvertedModel::Ensemble(ensemble) => {
				let importances = ensemble.feature_importances.unwrap();
				assert_eq!(importances.len(), 1);
				assert_eq!(importances[0].importance, 0.75);
				assert_eq!(importances[0].field.to_string(), "double(float(x0))");
			}
			model => panic!("unexpected model {:?}", model),
		}
	}

	#[test]
	fn test_tree_visitor_reaches_every_member() {
		let trees = (0..6).map(|_| stump(3.5, vec![0.0, 1.0, 2.0])).collect();
		let mut model = NativeModel::new(Family::GradientBoosting, trees, three_classes());
		model.trees_per_round = 3;
		model.baselines = vec![0.0; 3];
		let converted = convert(&model).unwrap();
		let mut n_trees = 0;
		converted.for_each_tree(&mut |tree| {
			assert!(matches!(tree.root, TreeNode::Branch(_)));
			n_trees += 1;
		});
		assert_eq!(n_trees, 6);
	}
}
