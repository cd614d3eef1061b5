/*!
This module defines `RawOptions`, the tree model options a caller supplies, and `PipelineConfig`, the resolved settings the transform pipeline runs with.
*/

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// The options a caller may set. Every option is optional. Unset options are resolved to defaults that depend on which of the other options are set.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct RawOptions {
	/// If true, default children are kept so records with missing values can be routed.
	pub allow_missing: Option<bool>,
	pub compact: Option<bool>,
	pub flat: Option<bool>,
	pub prune: Option<bool>,
	/// If true, node ids are kept in the output.
	pub node_id: Option<bool>,
	/// If true, branch scores are kept in the output.
	pub node_score: Option<bool>,
	/// Extension name to a map from node id to the value to attach to that node.
	pub node_extensions: Option<BTreeMap<String, BTreeMap<usize, serde_json::Value>>>,
	/// If true, the id of the winning node is part of the model's output.
	pub winner_id: Option<bool>,
}

/// The resolved configuration of the transform pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineConfig {
	pub strip_default_child: bool,
	pub prune: bool,
	pub compact: bool,
	pub flatten: bool,
	pub extensions: Option<BTreeMap<String, BTreeMap<usize, serde_json::Value>>>,
	pub strip_node_id: bool,
	pub strip_node_score: bool,
	/// Passed through to the document assembler, which outputs the id of the winning node.
	pub winner_id: bool,
}

impl RawOptions {
	/// Resolve the options.
	///
	/// Asking for node ids, node scores, or extensions "fixes" the tree structure, because the structural passes (prune, compact, flatten) rewrite the nodes those options refer to. A fixed structure turns the structural passes off by default, and turning one of them on explicitly is a `ConflictingOptions` error.
	pub fn resolve(&self) -> Result<PipelineConfig> {
		let allow_missing = self.allow_missing.unwrap_or(false);
		let winner_id = self.winner_id.unwrap_or(false);
		let mut extensions = self.node_extensions.clone();
		let mut node_id = self.node_id.unwrap_or(winner_id);
		let mut node_score = self
			.node_score
			.or_else(|| if winner_id { Some(true) } else { None });
		let fixed = extensions.is_some() || node_id || node_score == Some(true);
		let compact = self.compact.unwrap_or(!fixed);
		let flatten = self.flat.unwrap_or(false);
		let prune = self.prune.unwrap_or(!fixed);
		if compact || flatten || prune {
			if fixed {
				let passes = [("compact", compact), ("flat", flatten), ("prune", prune)]
					.iter()
					.filter(|(_, enabled)| *enabled)
					.map(|(name, _)| *name)
					.collect::<Vec<_>>()
					.join(", ");
				return Err(Error::ConflictingOptions(format!(
					"{} cannot be combined with node_id, node_score, or node_extensions",
					passes
				)));
			}
			extensions = None;
			node_id = winner_id || allow_missing;
			node_score = if winner_id { Some(true) } else { None };
		}
		Ok(PipelineConfig {
			strip_default_child: !allow_missing,
			prune,
			compact,
			flatten,
			extensions,
			strip_node_id: !node_id,
			strip_node_score: node_score == Some(false),
			winner_id,
		})
	}
}
