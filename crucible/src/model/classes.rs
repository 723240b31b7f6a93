use std::cell::Cell;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ptr;

use bumpalo::Bump;
use fxhash::FxHashMap;

use crate::model::types::Type;

/// The access modifiers.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AccessModifier {
	#[default]
	Public,
	Private,
}

impl AccessModifier {
	pub fn from_name(name: &str) -> Option<AccessModifier> {
		match name {
			"public" => Some(AccessModifier::Public),
			"private" => Some(AccessModifier::Private),
			_ => None,
		}
	}
}

impl Display for AccessModifier {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			AccessModifier::Public => f.write_str("public"),
			AccessModifier::Private => f.write_str("private"),
		}
	}
}

/// A finalized field: type, offset inside the object, access and whether the
/// field is declared by the class itself or inherited.
#[derive(Debug, Copy, Clone)]
pub struct Field<'l> {
	name: &'l str,
	ty: &'l Type<'l>,
	offset: usize,
	access_modifier: AccessModifier,
	declared_here: bool,
}

impl<'l> Field<'l> {
	#[inline]
	pub fn name(&self) -> &'l str {
		self.name
	}

	#[inline]
	pub fn field_type(&self) -> &'l Type<'l> {
		self.ty
	}

	#[inline]
	pub fn offset(&self) -> usize {
		self.offset
	}

	#[inline]
	pub fn access_modifier(&self) -> AccessModifier {
		self.access_modifier
	}

	#[inline]
	pub fn is_declared_here(&self) -> bool {
		self.declared_here
	}
}

/// A field as declared in an assembly, before layout.
#[derive(Debug, Copy, Clone)]
pub struct FieldDefinition<'l> {
	pub name: &'l str,
	pub ty: &'l Type<'l>,
	pub access_modifier: AccessModifier,
}

/// A virtual function slot. The slot position is assigned by the
/// root-defining class; an override keeps the position and replaces the
/// implementing signature. `parameters` excludes the receiver, so overrides
/// in subclasses match their root slot.
#[derive(Debug, Copy, Clone)]
pub struct VirtualFunction<'l> {
	pub name: &'l str,
	pub parameters: &'l [&'l Type<'l>],
	pub signature: &'l str,
}

impl<'l> VirtualFunction<'l> {
	fn matches(&self, name: &str, parameters: &[&'l Type<'l>]) -> bool {
		self.name == name
			&& self.parameters.len() == parameters.len()
			&& self.parameters.iter().zip(parameters).all(|(a, b)| a == b)
	}
}

/// Metadata for a class: parent link, finalized fields, object size, virtual
/// function slots and the virtual function table.
///
/// The graph is built in two passes: all classes are declared first, then
/// parents, fields and virtual slots are linked through the `Cell`s, which
/// lets mutually referencing classes resolve each other.
pub struct ClassMetadata<'l> {
	name: &'l str,
	parent: Cell<Option<&'l Type<'l>>>,
	fields: Cell<&'l [Field<'l>]>,
	size: Cell<usize>,
	virtual_functions: Cell<&'l [VirtualFunction<'l>]>,
	virtual_function_table: Cell<&'l [Cell<*const u8>]>,
}

// Implemented by hand rather than via `#[derive(Derivative)]`: derivative's
// `format_with` codegen mis-tracks lifetime usage when a formatted field's
// own type doesn't mention the struct's lifetime (e.g. `size: Cell<usize>`
// here), which trips rustc's unused-lifetime-parameter check on the struct.
impl<'l> std::fmt::Debug for ClassMetadata<'l> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		struct DebugCell<'a, T: Copy + std::fmt::Debug>(&'a Cell<T>);
		impl<T: Copy + std::fmt::Debug> std::fmt::Debug for DebugCell<'_, T> {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				crate::utilities::fmt_debug_cell(self.0, f)
			}
		}

		f.debug_struct("ClassMetadata")
			.field("name", &self.name)
			.field("parent", &DebugCell(&self.parent))
			.field("fields", &DebugCell(&self.fields))
			.field("size", &DebugCell(&self.size))
			.field("virtual_functions", &DebugCell(&self.virtual_functions))
			.finish()
	}
}

impl<'l> ClassMetadata<'l> {
	pub fn new(name: &'l str) -> Self {
		ClassMetadata {
			name,
			parent: Cell::new(None),
			fields: Cell::new(&[]),
			size: Cell::new(0),
			virtual_functions: Cell::new(&[]),
			virtual_function_table: Cell::new(&[]),
		}
	}

	#[inline]
	pub fn name(&self) -> &'l str {
		self.name
	}

	/// The total size of an instance in bytes.
	#[inline]
	pub fn size(&self) -> usize {
		self.size.get()
	}

	#[inline]
	pub fn parent_type(&self) -> Option<&'l Type<'l>> {
		self.parent.get()
	}

	#[inline]
	pub fn parent(&self) -> Option<&'l ClassMetadata<'l>> {
		self.parent.get().and_then(Type::metadata)
	}

	pub fn set_parent(&self, parent: &'l Type<'l>) {
		self.parent.set(Some(parent));
	}

	#[inline]
	pub fn fields(&self) -> &'l [Field<'l>] {
		self.fields.get()
	}

	pub fn field(&self, name: &str) -> Option<&'l Field<'l>> {
		self.fields.get().iter().find(|field| field.name == name)
	}

	pub fn field_exists(&self, name: &str) -> bool {
		self.field(name).is_some()
	}

	/// Finalizes the field layout: inherited fields are prepended, then the
	/// class's own declarations follow in declaration order with cumulative
	/// offsets. The parent must already be finalized.
	pub fn make_fields(&self, definitions: &[FieldDefinition<'l>], bump: &'l Bump) {
		let mut fields = bumpalo::vec![in bump];

		if let Some(parent) = self.parent() {
			fields.reserve(parent.fields().len() + definitions.len());
			for field in parent.fields() {
				fields.push(Field { declared_here: false, ..*field });
			}
		}

		let mut size = self.parent().map_or(0, ClassMetadata::size);
		for definition in definitions {
			fields.push(Field {
				name: definition.name,
				ty: definition.ty,
				offset: size,
				access_modifier: definition.access_modifier,
				declared_here: true,
			});
			size += definition.ty.size();
		}

		self.fields.set(fields.into_bump_slice());
		self.size.set(size);
	}

	/// Installs the virtual function slots: the parent's slots are copied,
	/// own declarations override a matching slot in place or append a new
	/// one. The parent's slots must already be installed.
	pub fn make_virtual_functions(&self, own: &[VirtualFunction<'l>], bump: &'l Bump) {
		let mut slots = bumpalo::vec![in bump];
		if let Some(parent) = self.parent() {
			slots.extend_from_slice(parent.virtual_functions());
		}

		for function in own {
			match slots.iter().position(|slot: &VirtualFunction| slot.matches(function.name, function.parameters)) {
				Some(index) => slots[index] = *function,
				None => slots.push(*function),
			}
		}

		self.virtual_functions.set(slots.into_bump_slice());
	}

	#[inline]
	pub fn virtual_functions(&self) -> &'l [VirtualFunction<'l>] {
		self.virtual_functions.get()
	}

	/// The slot index of the given virtual function, stable across overrides.
	pub fn virtual_function_index(&self, name: &str, parameters: &[&'l Type<'l>]) -> Option<usize> {
		self.virtual_functions
			.get()
			.iter()
			.position(|slot| slot.matches(name, parameters))
	}

	/// The signature implementing the given slot for this class.
	pub fn virtual_function_signature(&self, index: usize) -> &'l str {
		self.virtual_functions.get()[index].signature
	}

	/// Creates the virtual function table, one null entry per slot.
	pub fn make_virtual_function_table(&self, bump: &'l Bump) {
		let slots = self.virtual_functions.get();
		if self.virtual_function_table.get().is_empty() && !slots.is_empty() {
			let table = bump.alloc_slice_fill_with(slots.len(), |_| Cell::new(ptr::null()));
			self.virtual_function_table.set(table);
		}
	}

	#[inline]
	pub fn virtual_function_table(&self) -> &'l [Cell<*const u8>] {
		self.virtual_function_table.get()
	}

	pub fn bind_virtual_function(&self, index: usize, entry_point: *const u8) {
		self.virtual_function_table.get()[index].set(entry_point);
	}
}

impl Eq for ClassMetadata<'_> {}

impl PartialEq<Self> for ClassMetadata<'_> {
	#[inline]
	fn eq(&self, other: &Self) -> bool {
		ptr::eq(self, other)
	}
}

impl Hash for ClassMetadata<'_> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		(self as *const Self).hash(state)
	}
}

impl Display for ClassMetadata<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name)
	}
}

/// Owns the metadata of every loaded class, keyed by class name.
#[derive(Debug, Default)]
pub struct ClassProvider<'l> {
	classes: FxHashMap<String, &'l ClassMetadata<'l>>,
}

impl<'l> ClassProvider<'l> {
	pub fn new() -> Self {
		ClassProvider { classes: FxHashMap::default() }
	}

	pub fn add(&mut self, name: &str, metadata: ClassMetadata<'l>, bump: &'l Bump) -> &'l ClassMetadata<'l> {
		let metadata = &*bump.alloc(metadata);
		self.classes.insert(name.to_string(), metadata);
		metadata
	}

	pub fn is_defined(&self, name: &str) -> bool {
		self.classes.contains_key(name)
	}

	pub fn get(&self, name: &str) -> Option<&'l ClassMetadata<'l>> {
		self.classes.get(name).copied()
	}

	pub fn classes(&self) -> impl Iterator<Item = &'l ClassMetadata<'l>> + '_ {
		self.classes.values().copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::types::TypeProvider;

	#[test]
	fn field_layout() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let mut classes = ClassProvider::new();

		let point = classes.add("Point", ClassMetadata::new(bump.alloc_str("Point")), &bump);
		let int = types.make_type("Int", &classes, &bump).unwrap();

		point.make_fields(
			&[
				FieldDefinition { name: "x", ty: int, access_modifier: AccessModifier::Public },
				FieldDefinition { name: "y", ty: int, access_modifier: AccessModifier::Public },
			],
			&bump,
		);

		assert_eq!(point.size(), 8);
		assert_eq!(point.field("x").unwrap().offset(), 0);
		assert_eq!(point.field("y").unwrap().offset(), 4);
		assert!(!point.field_exists("z"));
	}

	#[test]
	fn inherited_fields_are_prepended() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let mut classes = ClassProvider::new();

		let base = classes.add("Base", ClassMetadata::new(bump.alloc_str("Base")), &bump);
		let derived = classes.add("Derived", ClassMetadata::new(bump.alloc_str("Derived")), &bump);

		let int = types.make_type("Int", &classes, &bump).unwrap();
		let base_type = types.make_type("Ref.Base", &classes, &bump).unwrap();
		derived.set_parent(base_type);

		base.make_fields(&[FieldDefinition { name: "a", ty: int, access_modifier: AccessModifier::Public }], &bump);
		derived.make_fields(&[FieldDefinition { name: "b", ty: int, access_modifier: AccessModifier::Private }], &bump);

		assert_eq!(derived.size(), 8);
		let fields = derived.fields();
		assert_eq!(fields[0].name(), "a");
		assert!(!fields[0].is_declared_here());
		assert_eq!(fields[1].name(), "b");
		assert_eq!(fields[1].offset(), 4);
		assert!(fields[1].is_declared_here());
	}

	#[test]
	fn virtual_slots_are_stable_across_overrides() {
		let bump = Bump::new();
		let types = TypeProvider::new();
		let mut classes = ClassProvider::new();

		let base = classes.add("Base", ClassMetadata::new(bump.alloc_str("Base")), &bump);
		let derived = classes.add("Derived", ClassMetadata::new(bump.alloc_str("Derived")), &bump);
		let base_type = types.make_type("Ref.Base", &classes, &bump).unwrap();
		derived.set_parent(base_type);

		base.make_virtual_functions(
			&[
				VirtualFunction { name: "name", parameters: &[], signature: "Base::name(Ref.Base)" },
				VirtualFunction { name: "area", parameters: &[], signature: "Base::area(Ref.Base)" },
			],
			&bump,
		);
		derived.make_virtual_functions(
			&[VirtualFunction { name: "name", parameters: &[], signature: "Derived::name(Ref.Derived)" }],
			&bump,
		);

		assert_eq!(base.virtual_function_index("name", &[]), Some(0));
		assert_eq!(derived.virtual_function_index("name", &[]), Some(0));
		assert_eq!(derived.virtual_function_index("area", &[]), Some(1));
		assert_eq!(derived.virtual_function_signature(0), "Derived::name(Ref.Derived)");
		assert_eq!(derived.virtual_function_signature(1), "Base::area(Ref.Base)");
	}

	#[test]
	fn virtual_function_table_binding() {
		let bump = Bump::new();
		let mut classes = ClassProvider::new();
		let class = classes.add("A", ClassMetadata::new(bump.alloc_str("A")), &bump);

		class.make_virtual_functions(
			&[VirtualFunction { name: "f", parameters: &[], signature: "A::f(Ref.A)" }],
			&bump,
		);
		class.make_virtual_function_table(&bump);

		let table = class.virtual_function_table();
		assert_eq!(table.len(), 1);
		assert!(table[0].get().is_null());

		class.bind_virtual_function(0, 0x1234 as *const u8);
		assert_eq!(table[0].get(), 0x1234 as *const u8);
	}
}
