/*!
This module contains the passes that rewrite decoded trees before they are handed to the document assembler, and the `Pipeline` that runs them in order.

1. [`MissingBranchCleaner`](struct.MissingBranchCleaner.html) removes default children.
2. [`Pruner`](struct.Pruner.html) collapses branches whose leaves all output the same score.
3. [`Compactor`](struct.Compactor.html) turns binary branches into multi-way branches whose last child is the fallback.
4. [`Flattener`](struct.Flattener.html) hoists nested `<=` splits into their parent.
5. [`ExtensionInjector`](struct.ExtensionInjector.html) attaches caller supplied metadata to nodes.
6. [`NodeIdStripper`](struct.NodeIdStripper.html) and [`ScoreStripper`](struct.ScoreStripper.html) remove decorations the caller did not ask for.
*/

use crate::{
	error::Result,
	options::PipelineConfig,
	types::{BranchNode, EncodedTree, LeafNode, TreeNode},
	ConvertedModel,
};

mod compact;
mod extend;
mod flatten;
mod missing;
mod prune;
mod strip;

pub use compact::Compactor;
pub use extend::ExtensionInjector;
pub use flatten::Flattener;
pub use missing::MissingBranchCleaner;
pub use prune::Pruner;
pub use strip::{NodeIdStripper, ScoreStripper};

/// A `Pass` is a whole tree rewrite.
pub trait Pass: Send + Sync {
	fn name(&self) -> &'static str;
	fn apply(&self, tree: EncodedTree) -> Result<EncodedTree>;
}

/// The `Pipeline` holds the passes a `PipelineConfig` turns on, in the order they have to run.
pub struct Pipeline {
	passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
	pub fn new(config: &PipelineConfig) -> Self {
		let mut passes: Vec<Box<dyn Pass>> = Vec::new();
		if config.strip_default_child {
			passes.push(Box::new(MissingBranchCleaner));
		}
		// Prune first, so the passes after it have less to do.
		if config.prune {
			passes.push(Box::new(Pruner));
		}
		if config.compact {
			passes.push(Box::new(Compactor));
		}
		if config.flatten {
			passes.push(Box::new(Flattener));
		}
		if let Some(extensions) = &config.extensions {
			passes.push(Box::new(ExtensionInjector::new(extensions.clone())));
		}
		if config.strip_node_id {
			passes.push(Box::new(NodeIdStripper));
		}
		if config.strip_node_score {
			passes.push(Box::new(ScoreStripper));
		}
		Self { passes }
	}

	pub fn pass_names(&self) -> Vec<&'static str> {
		self.passes.iter().map(|pass| pass.name()).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.passes.is_empty()
	}

	pub fn run(&self, mut tree: EncodedTree) -> Result<EncodedTree> {
		for pass in self.passes.iter() {
			tree = pass.apply(tree)?;
			log::debug!(
				"{}: tree has {} nodes",
				pass.name(),
				tree.root.node_count()
			);
		}
		Ok(tree)
	}

	/// Run the pipeline over every member tree of `model`.
	pub fn run_model(&self, model: ConvertedModel) -> Result<ConvertedModel> {
		model.map_trees(&mut |tree| self.run(tree))
	}
}

/// A branch whose children are still being rebuilt by `rewrite`.
struct Frame {
	branch: BranchNode,
	pending: std::vec::IntoIter<TreeNode>,
	done: Vec<TreeNode>,
}

/// Rebuild the subtree under `root` bottom up. `enter` sees every branch before its children are rebuilt, and `exit` sees every node once its children are. The walk keeps its own stack, so the depth of the tree is only limited by memory.
pub(crate) fn rewrite(
	root: TreeNode,
	enter: &mut dyn FnMut(&mut BranchNode) -> Result<()>,
	exit: &mut dyn FnMut(TreeNode) -> Result<TreeNode>,
) -> Result<TreeNode> {
	let mut stack: Vec<Frame> = Vec::new();
	let mut node = root;
	loop {
		// Descend through first children until a node has nothing left to rebuild.
		let mut finished = loop {
			let mut branch = match node {
				TreeNode::Branch(branch) => branch,
				leaf => break exit(leaf)?,
			};
			enter(&mut branch)?;
			let mut pending = std::mem::take(&mut branch.children).into_iter();
			match pending.next() {
				Some(first) => {
					stack.push(Frame {
						done: Vec::with_capacity(pending.len() + 1),
						branch,
						pending,
					});
					node = first;
				}
				None => break exit(TreeNode::Branch(branch))?,
			}
		};
		// Climb until an ancestor still has a child to rebuild.
		loop {
			let mut frame = match stack.pop() {
				Some(frame) => frame,
				None => return Ok(finished),
			};
			frame.done.push(finished);
			match frame.pending.next() {
				Some(child) => {
					stack.push(frame);
					node = child;
					break;
				}
				None => {
					let mut branch = frame.branch;
					branch.children = frame.done.into();
					finished = exit(TreeNode::Branch(branch))?;
				}
			}
		}
	}
}

/// A branch that has lost all of its children becomes a leaf, if it has a score to output.
pub(crate) fn settle(mut branch: BranchNode) -> TreeNode {
	if !branch.children.is_empty() {
		return TreeNode::Branch(branch);
	}
	match branch.score.take() {
		Some(score) => TreeNode::Leaf(LeafNode {
			id: branch.id,
			predicate: branch.predicate,
			score,
			record_count: None,
			score_distributions: Vec::new(),
			extensions: branch.extensions,
		}),
		None => TreeNode::Branch(branch),
	}
}
