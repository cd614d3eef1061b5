use super::Pass;
use crate::{
	error::Result,
	types::{EncodedTree, TreeNode},
};

/// The `NodeIdStripper` removes the id of every node.
pub struct NodeIdStripper;

impl Pass for NodeIdStripper {
	fn name(&self) -> &'static str {
		"node_id_stripper"
	}

	fn apply(&self, mut tree: EncodedTree) -> Result<EncodedTree> {
		tree.root.for_each_mut(&mut |node| node.set_id(None));
		Ok(tree)
	}
}

/// The `ScoreStripper` removes the running scores of branches. Leaves keep their scores and score distributions, which are the tree's output.
pub struct ScoreStripper;

impl Pass for ScoreStripper {
	fn name(&self) -> &'static str {
		"score_stripper"
	}

	fn apply(&self, mut tree: EncodedTree) -> Result<EncodedTree> {
		tree.root.for_each_mut(&mut |node| {
			if let TreeNode::Branch(branch) = node {
				branch.score = None;
			}
		});
		Ok(tree)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::transform::test;

	#[test]
	fn test_node_ids() {
		let tree = NodeIdStripper.apply(test::regression_tree()).unwrap();
		tree.root.for_each(&mut |node| assert_eq!(node.id(), None));
	}

	#[test]
	fn test_scores_only_leave_branches() {
		let original = test::regression_tree();
		let tree = ScoreStripper.apply(original.clone()).unwrap();
		assert_eq!(tree.root.score(), None);
		assert_eq!(tree.root.leaf_count(), 3);
		assert_eq!(test::outputs(&tree), test::outputs(&original));
		let tree = ScoreStripper.apply(test::classification_tree()).unwrap();
		tree.root.for_each(&mut |node| {
			if let TreeNode::Leaf(leaf) = node {
				assert_eq!(leaf.score_distributions.len(), 2);
			}
		});
	}
}
