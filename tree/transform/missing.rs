use super::Pass;
use crate::{
	error::Result,
	types::{EncodedTree, MissingValueStrategy, TreeNode},
};

/// The `MissingBranchCleaner` removes every default child, for callers that do not allow missing values.
pub struct MissingBranchCleaner;

impl Pass for MissingBranchCleaner {
	fn name(&self) -> &'static str {
		"missing_branch_cleaner"
	}

	fn apply(&self, mut tree: EncodedTree) -> Result<EncodedTree> {
		tree.root.for_each_mut(&mut |node| {
			if let TreeNode::Branch(branch) = node {
				branch.default_child = None;
			}
		});
		tree.missing_value_strategy = MissingValueStrategy::None;
		Ok(tree)
	}
}

#[test]
fn test_default_children_are_removed() {
	use crate::native::Target;
	let mut arrays = super::test::two_level_arrays(vec![3.0, 1.5, 5.0, 1.0, 2.0]);
	arrays.missing_goes_left = Some(vec![true, false, false, false, false]);
	let tree = super::test::decode(arrays, &Target::Regression);
	assert_eq!(tree.missing_value_strategy, MissingValueStrategy::DefaultChild);
	let tree = MissingBranchCleaner.apply(tree).unwrap();
	assert_eq!(tree.missing_value_strategy, MissingValueStrategy::None);
	tree.root.for_each(&mut |node| {
		if let TreeNode::Branch(branch) = node {
			assert_eq!(branch.default_child, None);
		}
	});
}
