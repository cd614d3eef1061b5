/*!
This module contains the structured tree model that decoding produces and the transform passes rewrite. It is what the document assembler consumes.
*/

use crate::{predicate::Predicate, schema::FieldRef, Value};
use std::{
	fmt,
	iter::FromIterator,
	ops::{Deref, DerefMut},
	sync::Arc,
};

/// A node id is the node's index in the flat arrays it was decoded from. Ids are stable, so they can be used to look nodes up after decoding, for example to attach extensions.
pub type NodeId = usize;

/// The direction a record takes at a binary branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
	Left,
	Right,
}

/// The kind of value a tree's leaves hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeKind {
	/// Leaves hold a number.
	Regression,
	/// Leaves hold the winning class and one record count per class.
	Classification,
}

impl TreeKind {
	pub fn name(self) -> &'static str {
		match self {
			TreeKind::Regression => "regression",
			TreeKind::Classification => "classification",
		}
	}
}

/// What happens when a predicate cannot be evaluated because its field is missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingValueStrategy {
	/// The predicate is treated as false and evaluation continues with the next sibling.
	None,
	/// The tree returns no prediction.
	NullPrediction,
	/// The record follows the branch's default child.
	DefaultChild,
}

/// What happens when none of a branch's children accept a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoTrueChildStrategy {
	ReturnNullPrediction,
	/// The branch's own score is the prediction.
	ReturnLastPrediction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitCharacteristic {
	BinarySplit,
	MultiSplit,
}

/// The record count, and optionally the probability, of one class at a classification leaf.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreDistribution {
	pub value: Value,
	pub record_count: f64,
	pub probability: Option<f64>,
}

/// Opaque caller supplied metadata attached to a node.
#[derive(Clone, Debug, PartialEq)]
pub struct Extension {
	pub name: String,
	pub value: String,
}

/// A node is either a branch or a leaf.
#[derive(Clone, Debug, PartialEq)]
pub enum TreeNode {
	Branch(BranchNode),
	Leaf(LeafNode),
}

/// A `BranchNode` routes a record to the first child whose predicate accepts it. Decoding always produces exactly two children, `left` then `right`. Compaction and flattening may produce more.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchNode {
	pub id: Option<NodeId>,
	/// The predicate that routes records from the parent to this node.
	pub predicate: Arc<Predicate>,
	/// The running score of a regression branch, if the source model records one.
	pub score: Option<Value>,
	/// The child a record with a missing split value follows. Only meaningful while the branch is binary.
	pub default_child: Option<Side>,
	pub children: Children,
	/// `None` for the simple representation, which cannot carry extensions.
	pub extensions: Option<Vec<Extension>>,
}

/// The leaves in a tree hold the score to output for records that get routed to them.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafNode {
	pub id: Option<NodeId>,
	pub predicate: Arc<Predicate>,
	/// The leaf value of a regression tree, or the winning class of a classification tree.
	pub score: Value,
	/// The total number of training records that reached this leaf. Classification only.
	pub record_count: Option<f64>,
	/// One entry per class, in class order, including classes with a zero count. Empty for regression leaves.
	pub score_distributions: Vec<ScoreDistribution>,
	/// `None` for the simple representation, which cannot carry extensions.
	pub extensions: Option<Vec<Extension>>,
}

/// The children of a branch, in the order they are tested. Trees can be thousands of levels deep, so dropping a subtree walks it with an explicit stack instead of recursing.
#[derive(Clone, Default, PartialEq)]
pub struct Children(Vec<TreeNode>);

impl Children {
	pub fn into_vec(mut self) -> Vec<TreeNode> {
		std::mem::take(&mut self.0)
	}
}

impl Drop for Children {
	fn drop(&mut self) {
		let mut pending = std::mem::take(&mut self.0);
		while let Some(node) = pending.pop() {
			if let TreeNode::Branch(mut branch) = node {
				pending.append(&mut branch.children.0);
			}
		}
	}
}

impl Deref for Children {
	type Target = Vec<TreeNode>;
	fn deref(&self) -> &Vec<TreeNode> {
		&self.0
	}
}

impl DerefMut for Children {
	fn deref_mut(&mut self) -> &mut Vec<TreeNode> {
		&mut self.0
	}
}

impl From<Vec<TreeNode>> for Children {
	fn from(children: Vec<TreeNode>) -> Self {
		Self(children)
	}
}

impl FromIterator<TreeNode> for Children {
	fn from_iter<I: IntoIterator<Item = TreeNode>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl IntoIterator for Children {
	type Item = TreeNode;
	type IntoIter = std::vec::IntoIter<TreeNode>;
	fn into_iter(self) -> Self::IntoIter {
		self.into_vec().into_iter()
	}
}

impl<'a> IntoIterator for &'a Children {
	type Item = &'a TreeNode;
	type IntoIter = std::slice::Iter<'a, TreeNode>;
	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

impl fmt::Debug for Children {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.0.iter()).finish()
	}
}

impl BranchNode {
	pub fn left(&self) -> Option<&TreeNode> {
		self.children.first()
	}

	pub fn right(&self) -> Option<&TreeNode> {
		self.children.get(1)
	}

	pub fn child(&self, side: Side) -> Option<&TreeNode> {
		match side {
			Side::Left => self.left(),
			Side::Right => self.right(),
		}
	}
}

impl TreeNode {
	pub fn id(&self) -> Option<NodeId> {
		match self {
			TreeNode::Branch(node) => node.id,
			TreeNode::Leaf(node) => node.id,
		}
	}

	pub fn set_id(&mut self, id: Option<NodeId>) {
		match self {
			TreeNode::Branch(node) => node.id = id,
			TreeNode::Leaf(node) => node.id = id,
		}
	}

	pub fn predicate(&self) -> &Arc<Predicate> {
		match self {
			TreeNode::Branch(node) => &node.predicate,
			TreeNode::Leaf(node) => &node.predicate,
		}
	}

	pub fn set_predicate(&mut self, predicate: Arc<Predicate>) {
		match self {
			TreeNode::Branch(node) => node.predicate = predicate,
			TreeNode::Leaf(node) => node.predicate = predicate,
		}
	}

	pub fn score(&self) -> Option<&Value> {
		match self {
			TreeNode::Branch(node) => node.score.as_ref(),
			TreeNode::Leaf(node) => Some(&node.score),
		}
	}

	pub fn children(&self) -> &[TreeNode] {
		match self {
			TreeNode::Branch(node) => node.children.as_slice(),
			TreeNode::Leaf(_) => &[],
		}
	}

	pub fn has_score_distributions(&self) -> bool {
		match self {
			TreeNode::Branch(_) => false,
			TreeNode::Leaf(node) => !node.score_distributions.is_empty(),
		}
	}

	pub fn extensions(&self) -> Option<&[Extension]> {
		match self {
			TreeNode::Branch(node) => node.extensions.as_deref(),
			TreeNode::Leaf(node) => node.extensions.as_deref(),
		}
	}

	/// Upgrade the node to the representation that can carry extensions, and return its extension list.
	pub fn ensure_extensible(&mut self) -> &mut Vec<Extension> {
		let extensions = match self {
			TreeNode::Branch(node) => &mut node.extensions,
			TreeNode::Leaf(node) => &mut node.extensions,
		};
		extensions.get_or_insert_with(Vec::new)
	}

	/// Count the nodes in this subtree, including this one.
	pub fn node_count(&self) -> usize {
		let mut count = 0;
		self.for_each(&mut |_| count += 1);
		count
	}

	pub fn leaf_count(&self) -> usize {
		let mut count = 0;
		self.for_each(&mut |node| {
			if let TreeNode::Leaf(_) = node {
				count += 1;
			}
		});
		count
	}

	/// The number of nodes on the longest path from this node to a leaf, counting both ends.
	pub fn depth(&self) -> usize {
		let mut depth = 0;
		let mut stack = vec![(self, 1)];
		while let Some((node, level)) = stack.pop() {
			depth = depth.max(level);
			stack.extend(node.children().iter().map(|child| (child, level + 1)));
		}
		depth
	}

	/// Call `f` on every node of this subtree in pre-order.
	pub fn for_each<'a>(&'a self, f: &mut dyn FnMut(&'a TreeNode)) {
		let mut stack = vec![self];
		while let Some(node) = stack.pop() {
			f(node);
			stack.extend(node.children().iter().rev());
		}
	}

	/// Call `f` on every node of this subtree in pre-order, allowing the node to be modified before its children are visited.
	pub fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut TreeNode)) {
		let mut stack = vec![self];
		while let Some(node) = stack.pop() {
			f(node);
			if let TreeNode::Branch(branch) = node {
				stack.extend(branch.children.iter_mut().rev());
			}
		}
	}

	/// Find the first node in pre-order with the given id in this subtree.
	pub fn find(&self, id: NodeId) -> Option<&TreeNode> {
		let mut stack = vec![self];
		while let Some(node) = stack.pop() {
			if node.id() == Some(id) {
				return Some(node);
			}
			stack.extend(node.children().iter().rev());
		}
		None
	}
}

/// An `EncodedTree` is one decoded tree together with the tree level settings the document assembler needs to score it.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedTree {
	pub root: TreeNode,
	pub kind: TreeKind,
	pub missing_value_strategy: MissingValueStrategy,
	pub no_true_child_strategy: NoTrueChildStrategy,
	pub split_characteristic: SplitCharacteristic,
	/// The importance of each input field, if the source model recorded one for this tree.
	pub feature_importances: Option<Vec<FieldImportance>>,
}

impl EncodedTree {
	pub fn new(root: TreeNode, kind: TreeKind) -> Self {
		Self {
			root,
			kind,
			missing_value_strategy: MissingValueStrategy::None,
			no_true_child_strategy: NoTrueChildStrategy::ReturnNullPrediction,
			split_characteristic: SplitCharacteristic::BinarySplit,
			feature_importances: None,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldImportance {
	pub field: FieldRef,
	pub importance: f64,
}
