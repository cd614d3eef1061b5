use super::{rewrite, settle, Pass};
use crate::{
	error::Result,
	types::{EncodedTree, TreeNode},
	Value,
};

/// The `Pruner` collapses every branch whose children are leaves with the same score and no score distributions. It works bottom up, so a collapse can enable another one in the parent, and running it again changes nothing.
pub struct Pruner;

impl Pass for Pruner {
	fn name(&self) -> &'static str {
		"pruner"
	}

	fn apply(&self, mut tree: EncodedTree) -> Result<EncodedTree> {
		tree.root = rewrite(tree.root, &mut |_| Ok(()), &mut |node| Ok(prune(node)))?;
		Ok(tree)
	}
}

/// Collapse a branch whose children have already been pruned.
fn prune(node: TreeNode) -> TreeNode {
	let mut branch = match node {
		TreeNode::Leaf(leaf) => return TreeNode::Leaf(leaf),
		TreeNode::Branch(branch) => branch,
	};
	if let Some(score) = constant_score(&branch.children) {
		let score = score.clone();
		let branch_score = branch.score.get_or_insert_with(|| score.clone());
		if *branch_score == score {
			branch.children.clear();
			return settle(branch);
		}
	}
	TreeNode::Branch(branch)
}

/// The score every child outputs, if the children are all plain leaves that agree.
fn constant_score(children: &[TreeNode]) -> Option<&Value> {
	let mut result = None;
	for child in children {
		let score = match child {
			TreeNode::Leaf(leaf) if leaf.score_distributions.is_empty() => &leaf.score,
			_ => return None,
		};
		if result.map_or(false, |result| result != score) {
			return None;
		}
		result = Some(score);
	}
	result
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{native::Target, transform::test};

	#[test]
	fn test_equal_leaves_collapse_bottom_up() {
		// Node 1's leaves agree, and then so do the root's children.
		let tree = test::decode(
			test::two_level_arrays(vec![2.0, 2.0, 2.0, 2.0, 2.0]),
			&Target::Regression,
		);
		let pruned = Pruner.apply(tree).unwrap();
		match &pruned.root {
			TreeNode::Leaf(leaf) => {
				assert_eq!(leaf.score, Value::Double(2.0));
				assert_eq!(leaf.id, Some(0));
			}
			TreeNode::Branch(_) => panic!("expected the root to collapse"),
		}
	}

	#[test]
	fn test_branch_with_a_different_score_is_kept() {
		// Node 1's leaves agree on 1.0, but node 1 itself outputs 1.5.
		let tree = test::decode(
			test::two_level_arrays(vec![3.0, 1.5, 5.0, 1.0, 1.0]),
			&Target::Regression,
		);
		let pruned = Pruner.apply(tree.clone()).unwrap();
		assert_eq!(pruned, tree);
	}

	#[test]
	fn test_classification_leaves_are_left_alone() {
		let tree = test::classification_tree();
		assert_eq!(Pruner.apply(tree.clone()).unwrap(), tree);
	}

	#[test]
	fn test_idempotent() {
		let trees = vec![
			test::decode(
				test::two_level_arrays(vec![3.0, 1.0, 5.0, 1.0, 1.0]),
				&Target::Regression,
			),
			test::regression_tree(),
			test::classification_tree(),
		];
		for tree in trees {
			let once = Pruner.apply(tree).unwrap();
			let twice = Pruner.apply(once.clone()).unwrap();
			assert_eq!(once, twice);
		}
	}

	#[test]
	fn test_deep_chain_collapses() {
		let mut arrays = test::chain_arrays(5000);
		arrays.leaf_value = vec![1.0; arrays.leaf_value.len()];
		let pruned = Pruner.apply(test::decode(arrays, &Target::Regression)).unwrap();
		assert_eq!(pruned.root.node_count(), 1);
		assert_eq!(pruned.root.score(), Some(&Value::Double(1.0)));
	}
}
