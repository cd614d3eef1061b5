use super::{rewrite, settle, Pass};
use crate::{
	error::{Error, Result},
	predicate::{Operator, Predicate},
	types::{
		BranchNode, EncodedTree, MissingValueStrategy, NoTrueChildStrategy, Side,
		SplitCharacteristic, TreeKind, TreeNode,
	},
};
use std::sync::Arc;

const NAME: &str = "compactor";

/**
The `Compactor` rewrites every binary branch `[a, b]` so that `b` is the fallback: `b`'s predicate becomes `Always` and records that fail `a` end up there. A fallback that has children of its own is then dissolved into its parent.

- In regression trees every fallback is dissolved. Its score moves up to the parent and its children are spliced in its place, and the tree returns the last matching node's score when no child matches.
- In classification trees only fallbacks with children are dissolved. Terminal fallbacks stay, because they carry the score distributions.

The default child of a branch becomes its fallback, which is how missing values keep their routing. Without a default child, `<=`/`>` splits and `is not missing`/`is missing` splits are kept in order, and `!=`/`==` splits are swapped.
*/
pub struct Compactor;

impl Pass for Compactor {
	fn name(&self) -> &'static str {
		NAME
	}

	fn apply(&self, mut tree: EncodedTree) -> Result<EncodedTree> {
		tree.missing_value_strategy = match tree.missing_value_strategy {
			// Missing values were not allowed, so they still get no prediction.
			MissingValueStrategy::None => MissingValueStrategy::NullPrediction,
			// Missing values make predicates false and fall through to the fallback.
			MissingValueStrategy::DefaultChild => MissingValueStrategy::None,
			MissingValueStrategy::NullPrediction => {
				return Err(Error::unsupported(
					NAME,
					"tree already uses the null prediction missing value strategy",
				))
			}
		};
		if tree.no_true_child_strategy != NoTrueChildStrategy::ReturnNullPrediction {
			return Err(Error::unsupported(NAME, "tree already returns the last prediction"));
		}
		if tree.split_characteristic != SplitCharacteristic::BinarySplit {
			return Err(Error::unsupported(NAME, "tree is not a binary tree"));
		}
		let always = Arc::new(Predicate::Always);
		let kind = tree.kind;
		tree.root = rewrite(
			tree.root,
			&mut |branch| make_fallback(branch, &always),
			&mut |node| dissolve(node, kind),
		)?;
		tree.split_characteristic = SplitCharacteristic::MultiSplit;
		if tree.kind == TreeKind::Regression {
			tree.no_true_child_strategy = NoTrueChildStrategy::ReturnLastPrediction;
		}
		Ok(tree)
	}
}

/// Dissolve the fallbacks among the children of a branch whose children are already compacted, and clear the ids of leaves.
fn dissolve(node: TreeNode, kind: TreeKind) -> Result<TreeNode> {
	let mut branch = match node {
		TreeNode::Leaf(mut leaf) => {
			if leaf.id.is_none() {
				return Err(Error::unsupported(NAME, "leaf has no id"));
			}
			leaf.id = None;
			return Ok(TreeNode::Leaf(leaf));
		}
		TreeNode::Branch(branch) => branch,
	};
	let children = std::mem::take(&mut branch.children);
	for child in children {
		if !child.predicate().is_always() {
			branch.children.push(child);
			continue;
		}
		match (kind, child) {
			(TreeKind::Regression, TreeNode::Leaf(leaf)) => {
				branch.score = Some(leaf.score);
			}
			(TreeKind::Regression, TreeNode::Branch(fallback)) => {
				branch.score = fallback.score;
				branch.children.extend(fallback.children);
			}
			(TreeKind::Classification, TreeNode::Branch(fallback)) => {
				branch.children.extend(fallback.children);
			}
			(TreeKind::Classification, leaf) => branch.children.push(leaf),
		}
	}
	Ok(settle(branch))
}

/// Check that the branch is a pair of complementary comparisons, order it, and turn the second child into the fallback.
fn make_fallback(branch: &mut BranchNode, always: &Arc<Predicate>) -> Result<()> {
	let id = branch.id.take().ok_or_else(|| Error::unsupported(NAME, "branch has no id"))?;
	if branch.children.len() != 2 {
		return Err(Error::unsupported(
			NAME,
			format!("branch {} has {} children", id, branch.children.len()),
		));
	}
	let (first, second) = comparison_pair(id, &branch.children[0], &branch.children[1])?;
	let swap = match branch.default_child.take() {
		Some(Side::Left) => true,
		Some(Side::Right) => false,
		None => match (first, second) {
			(Operator::NotEqual, Operator::Equal) => true,
			(Operator::LessOrEqual, Operator::GreaterThan) => false,
			// Neither test is ever unknown, so the second one can become the fallback.
			(Operator::IsNotMissing, Operator::IsMissing) => false,
			_ => {
				return Err(Error::unsupported(
					NAME,
					format!("branch {} compares with {:?} and {:?}", id, first, second),
				))
			}
		},
	};
	if swap {
		branch.children.swap(0, 1);
	}
	branch.children[1].set_predicate(always.clone());
	Ok(())
}

/// Return the operators of the two children, which must compare the same field with the same literal.
fn comparison_pair(id: usize, first: &TreeNode, second: &TreeNode) -> Result<(Operator, Operator)> {
	match (&**first.predicate(), &**second.predicate()) {
		(
			Predicate::Compare {
				field: first_field,
				operator: first_operator,
				literal: first_literal,
			},
			Predicate::Compare {
				field: second_field,
				operator: second_operator,
				literal: second_literal,
			},
		) if first_field == second_field && first_literal == second_literal => {
			Ok((*first_operator, *second_operator))
		}
		(first, second) => Err(Error::unsupported(
			NAME,
			format!(
				"the children of branch {} are not a pair of comparisons: {:?}, {:?}",
				id, first, second
			),
		)),
	}
}
