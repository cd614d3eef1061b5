use super::Pass;
use crate::{
	error::Result,
	types::{EncodedTree, Extension},
};
use std::collections::BTreeMap;

/// The `ExtensionInjector` attaches caller supplied values to nodes by node id. Each entry of the map is an extension name and the values to attach under that name, keyed by node id. Nodes that get a value are upgraded to the representation that can carry extensions.
pub struct ExtensionInjector {
	extensions: BTreeMap<String, BTreeMap<usize, serde_json::Value>>,
}

impl ExtensionInjector {
	pub fn new(extensions: BTreeMap<String, BTreeMap<usize, serde_json::Value>>) -> Self {
		Self { extensions }
	}
}

impl Pass for ExtensionInjector {
	fn name(&self) -> &'static str {
		"extension_injector"
	}

	fn apply(&self, mut tree: EncodedTree) -> Result<EncodedTree> {
		for (name, values) in self.extensions.iter() {
			tree.root.for_each_mut(&mut |node| {
				let value = node
					.id()
					.and_then(|id| values.get(&id))
					.and_then(render);
				if let Some(value) = value {
					node.ensure_extensible().push(Extension {
						name: name.clone(),
						value,
					});
				}
			});
		}
		Ok(tree)
	}
}

/// Extension values are written as strings. `null` means no extension.
fn render(value: &serde_json::Value) -> Option<String> {
	match value {
		serde_json::Value::Null => None,
		serde_json::Value::String(value) => Some(value.clone()),
		value => Some(value.to_string()),
	}
}
