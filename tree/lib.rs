/*!
This crate converts fitted decision trees and tree ensembles from the flat, index based arrays they are stored as into trees of typed predicates, ready to be written out as a model interchange document.

A conversion has four steps:

1. [`RawOptions::resolve`](struct.RawOptions.html#method.resolve) checks the caller's tree options and resolves them into a `PipelineConfig`.
2. [`decode_members`](fn.decode_members.html) decodes every tree of the model in parallel, interning predicates in one shared `PredicateCache`.
3. [`combine`](fn.combine.html) assembles the trees into a single tree, an averaging, voting, or summing ensemble, or a logistic or softmax classifier over summing ensembles.
4. The transform [`Pipeline`](transform/struct.Pipeline.html) prunes, compacts, flattens, and decorates every member tree.

[`convert`](fn.convert.html) runs all four. Converted models can score records with [`ConvertedModel::predict`](enum.ConvertedModel.html#method.predict), which is how tests confirm that a conversion reproduces the native model.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod combine;
mod decode;
mod domain;
mod error;
mod feature_importances;
mod native;
mod options;
mod predicate;
mod predict;
mod schema;
pub mod transform;
mod types;
mod value;

pub use self::{
	combine::{combine, decode_members, ConvertedModel, Ensemble},
	decode::{decode_tree, DecodeOptions, TreeDecoder},
	domain::CategoryDomain,
	error::{Error, Result},
	feature_importances::{average_feature_importances, tree_feature_importances},
	native::{
		CategoryBitset, Combination, Family, NativeModel, NativeTreeArrays, Target, BITSET_WORDS,
	},
	options::{PipelineConfig, RawOptions},
	predicate::{Operator, Predicate, PredicateCache},
	predict::{Prediction, Record},
	schema::{Cast, Feature, FieldRef, Schema},
	types::{
		BranchNode, Children, EncodedTree, Extension, FieldImportance, LeafNode, MissingValueStrategy,
		NoTrueChildStrategy, NodeId, ScoreDistribution, Side, SplitCharacteristic, TreeKind,
		TreeNode,
	},
	value::{Value, INFINITY_LITERAL},
};

/// Convert `model` into trees of predicates.
///
/// The options are always resolved, so conflicting options are reported for every family. Families that do not take tree options, see [`Family::has_tree_options`](enum.Family.html#method.has_tree_options), are returned as decoded.
pub fn convert(
	model: &NativeModel,
	schema: &Schema,
	options: &RawOptions,
) -> Result<ConvertedModel> {
	let config = options.resolve()?;
	let cache = PredicateCache::new();
	let trees = decode_members(model, schema, &cache)?;
	log::debug!(
		"decoded {} tree(s) with {} distinct predicate(s)",
		trees.len(),
		cache.len()
	);
	let converted = combine(model, trees)?;
	if !model.family.has_tree_options() {
		return Ok(converted);
	}
	transform::Pipeline::new(&config).run_model(converted)
}
