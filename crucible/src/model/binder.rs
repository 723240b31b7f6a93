use fxhash::FxHashMap;

use crate::model::function::FunctionDefinition;

/// Maps canonical signature strings to function definitions. Definitions are
/// unique per signature; redefinition is rejected.
#[derive(Debug, Default)]
pub struct Binder<'l> {
	function_table: FxHashMap<String, &'l FunctionDefinition<'l>>,
}

impl<'l> Binder<'l> {
	pub fn new() -> Self {
		Binder { function_table: FxHashMap::default() }
	}

	/// Defines the given function. Returns false if the signature is taken.
	pub fn define(&mut self, signature: String, definition: &'l FunctionDefinition<'l>) -> bool {
		if self.function_table.contains_key(&signature) {
			return false;
		}

		self.function_table.insert(signature, definition);
		true
	}

	pub fn is_defined(&self, signature: &str) -> bool {
		self.function_table.contains_key(signature)
	}

	pub fn get_function(&self, signature: &str) -> Option<&'l FunctionDefinition<'l>> {
		self.function_table.get(signature).copied()
	}

	pub fn functions(&self) -> impl Iterator<Item = (&str, &'l FunctionDefinition<'l>)> + '_ {
		self.function_table.iter().map(|(signature, definition)| (signature.as_str(), *definition))
	}
}

#[cfg(test)]
mod tests {
	use bumpalo::Bump;

	use super::*;
	use crate::model::classes::ClassProvider;
	use crate::model::types::TypeProvider;

	#[test]
	fn definitions_are_unique() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let classes = ClassProvider::new();
		let int = types.make_type("Int", &classes, &bump).unwrap();

		let mut binder = Binder::new();
		let definition = &*bump.alloc(FunctionDefinition::external("f", &[], int, 0x1 as *const u8));

		assert!(binder.define("f()".to_string(), definition));
		assert!(!binder.define("f()".to_string(), definition));
		assert!(binder.is_defined("f()"));
		assert!(binder.get_function("g()").is_none());
	}
}
