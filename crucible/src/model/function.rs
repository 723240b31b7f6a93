use std::cell::{Cell, RefCell};
use std::fmt::Write;
use std::ptr;

use bitflags::bitflags;
use derivative::Derivative;

use crate::model::classes::AccessModifier;
use crate::model::instruction::Instruction;
use crate::model::types::Type;

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct FunctionFlags: u8 {
		/// Implemented in bytecode rather than native code.
		const MANAGED = 0x1;
		const MEMBER = 0x2;
		const CONSTRUCTOR = 0x4;
		const VIRTUAL = 0x8;
	}
}

/// The definition of a callable function: name, parameter and return types,
/// attribute flags and (once known) the native entry point.
///
/// Member functions carry their full `Class::name` as the name and the
/// receiver prepended as the first parameter.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FunctionDefinition<'l> {
	name: &'l str,
	parameters: &'l [&'l Type<'l>],
	return_type: &'l Type<'l>,
	class_type: Option<&'l Type<'l>>,
	access_modifier: AccessModifier,
	flags: FunctionFlags,
	#[derivative(Debug = "ignore")]
	entry_point: Cell<*const u8>,
}

impl<'l> FunctionDefinition<'l> {
	/// Creates the definition of a managed function.
	pub fn managed(
		name: &'l str,
		parameters: &'l [&'l Type<'l>],
		return_type: &'l Type<'l>,
		class_type: Option<&'l Type<'l>>,
		access_modifier: AccessModifier,
		flags: FunctionFlags,
	) -> Self {
		FunctionDefinition {
			name,
			parameters,
			return_type,
			class_type,
			access_modifier,
			flags: flags | FunctionFlags::MANAGED,
			entry_point: Cell::new(ptr::null()),
		}
	}

	/// Creates the definition of an external function with a known native
	/// entry point.
	pub fn external(
		name: &'l str,
		parameters: &'l [&'l Type<'l>],
		return_type: &'l Type<'l>,
		entry_point: *const u8,
	) -> Self {
		FunctionDefinition {
			name,
			parameters,
			return_type,
			class_type: None,
			access_modifier: AccessModifier::default(),
			flags: FunctionFlags::empty(),
			entry_point: Cell::new(entry_point),
		}
	}

	#[inline]
	pub fn name(&self) -> &'l str {
		self.name
	}

	#[inline]
	pub fn parameters(&self) -> &'l [&'l Type<'l>] {
		self.parameters
	}

	/// The bare member name for member functions (`name` of `Class::name`).
	pub fn member_name(&self) -> &'l str {
		self.name.split_once("::").map_or(self.name, |(_, name)| name)
	}

	#[inline]
	pub fn num_parameters(&self) -> usize {
		self.parameters.len()
	}

	#[inline]
	pub fn return_type(&self) -> &'l Type<'l> {
		self.return_type
	}

	#[inline]
	pub fn class_type(&self) -> Option<&'l Type<'l>> {
		self.class_type
	}

	#[inline]
	pub fn access_modifier(&self) -> AccessModifier {
		self.access_modifier
	}

	#[inline]
	pub fn is_managed(&self) -> bool {
		self.flags.contains(FunctionFlags::MANAGED)
	}

	#[inline]
	pub fn is_member_function(&self) -> bool {
		self.flags.contains(FunctionFlags::MEMBER)
	}

	#[inline]
	pub fn is_constructor(&self) -> bool {
		self.flags.contains(FunctionFlags::CONSTRUCTOR)
	}

	#[inline]
	pub fn is_virtual(&self) -> bool {
		self.flags.contains(FunctionFlags::VIRTUAL)
	}

	#[inline]
	pub fn entry_point(&self) -> *const u8 {
		self.entry_point.get()
	}

	pub fn set_entry_point(&self, entry_point: *const u8) {
		self.entry_point.set(entry_point);
	}
}

impl std::fmt::Display for FunctionDefinition<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&FunctionSignature::from_definition(self))
	}
}

/// A function implemented in bytecode: its definition, instructions, local
/// types (inferred by the verifier when not declared) and the maximum operand
/// stack depth.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ManagedFunction<'l> {
	definition: &'l FunctionDefinition<'l>,
	#[derivative(Debug = "ignore")]
	instructions: Vec<Instruction<'l>>,
	locals: RefCell<Vec<Option<&'l Type<'l>>>>,
	operand_stack_size: Cell<usize>,
}

impl<'l> ManagedFunction<'l> {
	pub fn new(
		definition: &'l FunctionDefinition<'l>,
		instructions: Vec<Instruction<'l>>,
		locals: Vec<Option<&'l Type<'l>>>,
	) -> Self {
		ManagedFunction {
			definition,
			instructions,
			locals: RefCell::new(locals),
			operand_stack_size: Cell::new(0),
		}
	}

	#[inline]
	pub fn definition(&self) -> &'l FunctionDefinition<'l> {
		self.definition
	}

	#[inline]
	pub fn instructions(&self) -> &[Instruction<'l>] {
		&self.instructions
	}

	#[inline]
	pub fn num_locals(&self) -> usize {
		self.locals.borrow().len()
	}

	pub fn local(&self, index: usize) -> Option<&'l Type<'l>> {
		self.locals.borrow().get(index).copied().flatten()
	}

	pub fn set_local(&self, index: usize, ty: &'l Type<'l>) {
		self.locals.borrow_mut()[index] = Some(ty);
	}

	#[inline]
	pub fn operand_stack_size(&self) -> usize {
		self.operand_stack_size.get()
	}

	pub fn set_operand_stack_size(&self, size: usize) {
		self.operand_stack_size.set(size);
	}
}

/// Builds the canonical signature strings that key the binder:
/// `name(T1 T2 ...)` for free functions and `Class::name(Ref.Class T1 ...)`
/// for member functions.
pub struct FunctionSignature;

impl FunctionSignature {
	pub fn function(name: &str, parameters: &[&Type]) -> String {
		let mut signature = String::with_capacity(name.len() + 2 + parameters.len() * 8);
		signature.push_str(name);
		signature.push('(');

		for (i, parameter) in parameters.iter().enumerate() {
			if i > 0 {
				signature.push(' ');
			}
			let _ = write!(signature, "{}", parameter);
		}

		signature.push(')');
		signature
	}

	pub fn member_function<'a>(class_type: &Type<'a>, name: &str, parameters: &[&Type<'a>]) -> String {
		let class_name = class_type.metadata().map_or("", |metadata| metadata.name());
		let mut all_parameters = Vec::with_capacity(parameters.len() + 1);
		all_parameters.push(class_type);
		all_parameters.extend_from_slice(parameters);
		Self::function(&format!("{}::{}", class_name, name), &all_parameters)
	}

	pub fn from_definition(definition: &FunctionDefinition) -> String {
		Self::function(definition.name(), definition.parameters())
	}
}

#[cfg(test)]
mod tests {
	use bumpalo::Bump;

	use super::*;
	use crate::model::classes::{ClassMetadata, ClassProvider};
	use crate::model::types::TypeProvider;

	#[test]
	fn signatures() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let mut classes = ClassProvider::new();
		classes.add("Point", ClassMetadata::new(bump.alloc_str("Point")), &bump);

		let int = types.make_type("Int", &classes, &bump).unwrap();
		let float = types.make_type("Float", &classes, &bump).unwrap();
		let point = types.make_type("Ref.Point", &classes, &bump).unwrap();

		assert_eq!(FunctionSignature::function("main", &[]), "main()");
		assert_eq!(FunctionSignature::function("add", &[int, float]), "add(Int Float)");
		assert_eq!(
			FunctionSignature::member_function(point, "length", &[int]),
			"Point::length(Ref.Point Int)"
		);
	}

	#[test]
	fn definition_flags() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let classes = ClassProvider::new();
		let int = types.make_type("Int", &classes, &bump).unwrap();

		let managed = FunctionDefinition::managed("f", &[], int, None, AccessModifier::Public, FunctionFlags::empty());
		assert!(managed.is_managed());
		assert!(managed.entry_point().is_null());

		let external = FunctionDefinition::external("g", &[], int, 0x42 as *const u8);
		assert!(!external.is_managed());
		assert_eq!(external.entry_point(), 0x42 as *const u8);
	}
}
