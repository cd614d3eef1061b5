use super::{rewrite, settle, Pass};
use crate::{
	error::Result,
	predicate::{Operator, Predicate},
	types::{BranchNode, EncodedTree, LeafNode, SplitCharacteristic, TreeKind, TreeNode},
};

/// The `Flattener` hoists nested `<=` splits into their parent. A child `x <= a` whose own children start with a run of `x <= b` splits gives up that run, which is inserted in front of it. Runs on a compacted tree, where it turns chains of thresholds on one field into a single multi-way branch.
pub struct Flattener;

impl Pass for Flattener {
	fn name(&self) -> &'static str {
		"flattener"
	}

	fn apply(&self, mut tree: EncodedTree) -> Result<EncodedTree> {
		let kind = tree.kind;
		tree.root = rewrite(
			tree.root,
			&mut |branch| {
				hoist(&mut branch.children);
				Ok(())
			},
			&mut |node| {
				Ok(match node {
					TreeNode::Branch(branch) => absorb_lone_fallback(branch, kind),
					leaf => leaf,
				})
			},
		)?;
		tree.split_characteristic = SplitCharacteristic::MultiSplit;
		Ok(tree)
	}
}

fn hoist(children: &mut Vec<TreeNode>) {
	while let Some((position, n_hoisted)) = children
		.iter()
		.enumerate()
		.find_map(|(position, child)| hoistable(child).map(|n_hoisted| (position, n_hoisted)))
	{
		let mut hoisted: Vec<TreeNode> = match &mut children[position] {
			TreeNode::Branch(child) => child.children.drain(..n_hoisted).collect(),
			TreeNode::Leaf(_) => break,
		};
		hoisted.push(match children.remove(position) {
			TreeNode::Branch(child) => settle(child),
			leaf => leaf,
		});
		children.splice(position..position, hoisted);
	}
}

/// The number of leading children of `node` that can be hoisted into its parent.
fn hoistable(node: &TreeNode) -> Option<usize> {
	let field = match (&**node.predicate(), node) {
		(
			Predicate::Compare {
				field,
				operator: Operator::LessOrEqual,
				..
			},
			TreeNode::Branch(_),
		) => field,
		_ => return None,
	};
	let n_hoisted = node
		.children()
		.iter()
		.take_while(|child| {
			child.predicate().field() == Some(field)
				&& child.predicate().operator() == Some(Operator::LessOrEqual)
		})
		.count();
	if n_hoisted > 0 {
		Some(n_hoisted)
	} else {
		None
	}
}

/// A branch whose only child is an `Always` leaf takes over that leaf's output.
fn absorb_lone_fallback(mut branch: BranchNode, kind: TreeKind) -> TreeNode {
	if branch.children.len() != 1 || !branch.children[0].predicate().is_always() {
		return TreeNode::Branch(branch);
	}
	let fallback = match branch.children.pop() {
		Some(TreeNode::Leaf(fallback)) => fallback,
		Some(child) => {
			branch.children.push(child);
			return TreeNode::Branch(branch);
		}
		None => return TreeNode::Branch(branch),
	};
	match kind {
		TreeKind::Regression => {
			branch.score = Some(fallback.score);
			settle(branch)
		}
		TreeKind::Classification => TreeNode::Leaf(LeafNode {
			id: branch.id,
			predicate: branch.predicate,
			score: fallback.score,
			record_count: fallback.record_count,
			score_distributions: fallback.score_distributions,
			extensions: branch.extensions,
		}),
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		transform::{test, Compactor},
		Value,
	};

	#[test]
	fn test_regression() {
		let compacted = Compactor.apply(test::regression_tree()).unwrap();
		let tree = Flattener.apply(compacted.clone()).unwrap();
		// The root now tests `x0 <= 1.5` and then `x0 <= 3.5`, and falls back to 5.
		let children = tree.root.children();
		assert_eq!(children.len(), 2);
		assert_eq!(children[0].score(), Some(&Value::Double(1.0)));
		assert_eq!(children[1].score(), Some(&Value::Double(2.0)));
		assert!(matches!(children[1], TreeNode::Leaf(_)));
		assert_eq!(tree.root.score(), Some(&Value::Double(5.0)));
		assert_eq!(test::outputs(&tree), test::outputs(&compacted));
	}

	#[test]
	fn test_classification() {
		let compacted = Compactor.apply(test::classification_tree()).unwrap();
		let tree = Flattener.apply(compacted.clone()).unwrap();
		let children = tree.root.children();
		assert_eq!(children.len(), 3);
		assert!(children.iter().all(|child| child.has_score_distributions()));
		assert!(children[2].predicate().is_always());
		assert_eq!(tree.split_characteristic, SplitCharacteristic::MultiSplit);
		assert_eq!(test::outputs(&tree), test::outputs(&compacted));
	}

	#[test]
	fn test_binary_tree_keeps_predictions() {
		// `x0 <= 1.5` moves up to the root, ahead of node 1 and its remaining `x0 > 1.5` child.
		let tree = test::regression_tree();
		let flattened = Flattener.apply(tree.clone()).unwrap();
		assert_eq!(test::outputs(&flattened), test::outputs(&tree));
	}
}
