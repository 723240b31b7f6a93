use std::cell::RefCell;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

use bumpalo::Bump;
use fxhash::FxHashMap;

use crate::model::classes::{ClassMetadata, ClassProvider};
use crate::REGISTER_SIZE;

/// The primitive types.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Primitive {
	#[default]
	Void,
	Int,
	Float,
	Bool,
	Char,
}

impl Primitive {
	pub fn from_name(name: &str) -> Option<Primitive> {
		match name {
			"Void" => Some(Primitive::Void),
			"Int" => Some(Primitive::Int),
			"Float" => Some(Primitive::Float),
			"Bool" => Some(Primitive::Bool),
			"Char" => Some(Primitive::Char),
			_ => None,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Primitive::Void => "Void",
			Primitive::Int => "Int",
			Primitive::Float => "Float",
			Primitive::Bool => "Bool",
			Primitive::Char => "Char",
		}
	}

	/// The size of a value of this type in bytes.
	pub fn size(&self) -> usize {
		match self {
			Primitive::Void => 0,
			Primitive::Int | Primitive::Float => 4,
			Primitive::Bool | Primitive::Char => 1,
		}
	}
}

impl Display for Primitive {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name())
	}
}

#[derive(Copy, Clone)]
pub enum TypeKind<'l> {
	Primitive(Primitive),
	/// The null reference, assignable to any reference type.
	Null,
	/// An array reference, carrying its element type.
	Array(&'l Type<'l>),
	/// A class reference, carrying a non-owning link to its metadata.
	Class(&'l ClassMetadata<'l>),
}

/// A type, interned by the [`TypeProvider`]: two types are interchangeable
/// iff their canonical names match, which the interner turns into pointer
/// identity.
pub struct Type<'l> {
	name: &'l str,
	kind: TypeKind<'l>,
}

impl<'l> Type<'l> {
	#[inline]
	pub fn name(&self) -> &'l str {
		self.name
	}

	#[inline]
	pub fn kind(&self) -> TypeKind<'l> {
		self.kind
	}

	pub fn is_primitive(&self, primitive: Primitive) -> bool {
		matches!(self.kind, TypeKind::Primitive(p) if p == primitive)
	}

	pub fn is_reference(&self) -> bool {
		!matches!(self.kind, TypeKind::Primitive(_))
	}

	pub fn is_null(&self) -> bool {
		matches!(self.kind, TypeKind::Null)
	}

	pub fn is_array(&self) -> bool {
		matches!(self.kind, TypeKind::Array(_))
	}

	pub fn is_class(&self) -> bool {
		matches!(self.kind, TypeKind::Class(_))
	}

	pub fn element_type(&self) -> Option<&'l Type<'l>> {
		match self.kind {
			TypeKind::Array(element) => Some(element),
			_ => None,
		}
	}

	pub fn metadata(&self) -> Option<&'l ClassMetadata<'l>> {
		match self.kind {
			TypeKind::Class(metadata) => Some(metadata),
			_ => None,
		}
	}

	/// The size of a value of this type in bytes.
	pub fn size(&self) -> usize {
		match self.kind {
			TypeKind::Primitive(primitive) => primitive.size(),
			_ => REGISTER_SIZE,
		}
	}
}

impl Eq for Type<'_> {}

impl PartialEq<Self> for Type<'_> {
	#[inline]
	fn eq(&self, other: &Self) -> bool {
		std::ptr::eq(self, other)
	}
}

impl Hash for Type<'_> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		(self as *const Self).hash(state)
	}
}

impl Display for Type<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name)
	}
}

impl Debug for Type<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name)
	}
}

pub const STRING_CLASS_NAME: &str = "std.String";
pub const STRING_TYPE_NAME: &str = "Ref.std.String";
pub const NULL_TYPE_NAME: &str = "Ref.Null";

/// The canonical name of an array of the given element type.
pub fn array_type_name(element_type: &Type) -> String {
	format!("Ref.Array[{}]", element_type.name())
}

/// The canonical name of a reference to the given class.
pub fn class_type_name(class_name: &str) -> String {
	format!("Ref.{}", class_name)
}

/// Checks whether `actual` may be used where `expected` is required: the
/// types are the same, `actual` is the null reference and `expected` any
/// reference, or `actual` is a subclass of `expected`.
pub fn is_assignable_to<'l>(expected: &'l Type<'l>, actual: &'l Type<'l>) -> bool {
	expected == actual
		|| (expected.is_reference() && actual.is_null())
		|| is_subtype_of(expected, actual)
}

/// Checks whether the class type `sub` inherits from the class type `base`.
pub fn is_subtype_of<'l>(base: &'l Type<'l>, sub: &'l Type<'l>) -> bool {
	let (Some(base_metadata), Some(sub_metadata)) = (base.metadata(), sub.metadata()) else {
		return false;
	};

	let mut current = sub_metadata.parent();
	while let Some(parent) = current {
		if std::ptr::eq(parent, base_metadata) {
			return true;
		}
		current = parent.parent();
	}

	false
}

//Splits a type name on '.', respecting bracket nesting.
fn split_type_name(name: &str) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut depth = 0usize;
	let mut start = 0usize;

	for (i, c) in name.char_indices() {
		match c {
			'[' => depth += 1,
			']' => depth = depth.saturating_sub(1),
			'.' if depth == 0 => {
				parts.push(&name[start..i]);
				start = i + 1;
			}
			_ => {}
		}
	}

	parts.push(&name[start..]);
	parts
}

//Extracts the element type name from an 'Array[...]' part.
fn extract_element_type(part: &str) -> Option<&str> {
	let inner = part.strip_prefix("Array[")?;
	let mut depth = 1usize;

	for (i, c) in inner.char_indices() {
		match c {
			'[' => depth += 1,
			']' => {
				depth -= 1;
				if depth == 0 {
					return (i == inner.len() - 1).then_some(&inner[..i]);
				}
			}
			_ => {}
		}
	}

	None
}

/// A process-wide name → type cache. Constructs types by parsing their
/// canonical names, recursively materializing array element types, and never
/// produces two objects for the same name.
pub struct TypeProvider<'l> {
	types: RefCell<FxHashMap<String, &'l Type<'l>>>,
}

impl<'l> TypeProvider<'l> {
	pub fn new() -> Self {
		TypeProvider { types: RefCell::new(FxHashMap::default()) }
	}

	/// Finds or constructs the type with the given name. Returns `None` when
	/// the name does not parse or references an undefined class.
	pub fn make_type(&self, name: &str, classes: &ClassProvider<'l>, bump: &'l Bump) -> Option<&'l Type<'l>> {
		if let Some(ty) = self.types.borrow().get(name) {
			return Some(ty);
		}

		let parts = split_type_name(name);
		let kind = if let Some(primitive) = Primitive::from_name(parts[0]) {
			if parts.len() > 1 {
				return None;
			}
			TypeKind::Primitive(primitive)
		} else if parts[0] == "Ref" && parts.len() >= 2 {
			if let Some(element_name) = extract_element_type(parts[1]) {
				if parts.len() > 2 {
					return None;
				}
				let element = self.make_type(element_name, classes, bump)?;
				TypeKind::Array(element)
			} else if parts[1] == "Null" {
				TypeKind::Null
			} else {
				let class_name = parts[1..].join(".");
				TypeKind::Class(classes.get(&class_name)?)
			}
		} else {
			return None;
		};

		let ty = &*bump.alloc(Type { name: bump.alloc_str(name), kind });
		self.types.borrow_mut().insert(name.to_string(), ty);
		Some(ty)
	}

	/// Returns the type with the given name, without constructing it.
	pub fn get_type(&self, name: &str) -> Option<&'l Type<'l>> {
		self.types.borrow().get(name).copied()
	}
}
