use crate::{
	error::{Error, Result},
	schema::{Cast, Schema},
	types::{EncodedTree, FieldImportance},
};
use itertools::izip;

/// Attach a tree's importances to the fields its splits compare. Continuous features are keyed by the same cast field the splits use, because the importances were measured on those comparisons. Zero importances are kept so the result lines up with the schema.
pub fn tree_feature_importances(
	importances: &[f64],
	schema: &Schema,
	cast: Cast,
) -> Result<Vec<FieldImportance>> {
	if importances.len() != schema.len() {
		return Err(Error::malformed(format!(
			"expected {} feature importance(s), got {}",
			schema.len(),
			importances.len()
		)));
	}
	Ok(izip!(schema.features.iter(), importances.iter())
		.map(|(feature, importance)| FieldImportance {
			field: feature.field_ref(cast),
			importance: *importance,
		})
		.collect())
}

/// This function averages the importances of the members of an ensemble. It returns `None` unless every member recorded importances.
pub fn average_feature_importances(trees: &[EncodedTree]) -> Option<Vec<FieldImportance>> {
	let first = trees.first()?.feature_importances.as_ref()?;
	let mut averaged = first.clone();
	for tree in trees[1..].iter() {
		let importances = tree.feature_importances.as_ref()?;
		if importances.len() != averaged.len() {
			return None;
		}
		for (average, importance) in averaged.iter_mut().zip(importances.iter()) {
			average.importance += importance.importance;
		}
	}
	let n_trees = trees.len() as f64;
	for average in averaged.iter_mut() {
		average.importance /= n_trees;
	}
	Some(averaged)
}
