use bumpalo::Bump;
use fxhash::FxHashMap;

use crate::errors::LoadError;
use crate::loader::assembly::{AttributeContainer, ParsedAssembly};
use crate::model::{
	class_type_name, is_subtype_of, AccessModifier, ClassMetadata, ClassProvider, FieldDefinition, Type, TypeProvider,
};

/// Resolves a type name or reports it as undefined.
pub(crate) fn resolve_type<'l>(
	name: &str,
	types: &TypeProvider<'l>,
	classes: &ClassProvider<'l>,
	bump: &'l Bump,
) -> Result<&'l Type<'l>, LoadError> {
	types
		.make_type(name, classes, bump)
		.ok_or_else(|| LoadError::UndefinedType(name.to_string()))
}

/// Resolves the reference type of a defined class.
pub(crate) fn resolve_class_type<'l>(
	class_name: &str,
	types: &TypeProvider<'l>,
	classes: &ClassProvider<'l>,
	bump: &'l Bump,
) -> Result<&'l Type<'l>, LoadError> {
	if !classes.is_defined(class_name) {
		return Err(LoadError::UndefinedClass(class_name.to_string()));
	}

	resolve_type(&class_type_name(class_name), types, classes, bump)
}

/// Reads an `@AccessModifier(value=...)` attribute, defaulting to public.
pub(crate) fn attribute_access_modifier(attributes: &AttributeContainer) -> Result<AccessModifier, LoadError> {
	let Some(attribute) = attributes.get("AccessModifier") else {
		return Ok(AccessModifier::default());
	};

	match attribute.values.get("value") {
		None => Ok(AccessModifier::default()),
		Some(value) => AccessModifier::from_name(value)
			.ok_or_else(|| LoadError::InvalidAttributeValue("AccessModifier".to_string(), value.clone())),
	}
}

/// Reads a `@Virtual(value=true|false)` attribute.
pub(crate) fn attribute_is_virtual(attributes: &AttributeContainer) -> Result<bool, LoadError> {
	let Some(attribute) = attributes.get("Virtual") else {
		return Ok(false);
	};

	match attribute.values.get("value").map(String::as_str) {
		None => Ok(false),
		Some("true") => Ok(true),
		Some("false") => Ok(false),
		Some(value) => Err(LoadError::InvalidAttributeValue("Virtual".to_string(), value.to_string())),
	}
}

/// Loads the classes of a parsed assembly: declares every class, links the
/// inheritance graph (rejecting self and mutual inheritance), then finalizes
/// field layouts parents first so inherited fields are prepended.
pub fn load_classes<'l>(
	assembly: &ParsedAssembly,
	classes: &mut ClassProvider<'l>,
	types: &TypeProvider<'l>,
	bump: &'l Bump,
) -> Result<(), LoadError> {
	//Declare all the classes
	for class in &assembly.classes {
		if classes.is_defined(&class.name) {
			return Err(LoadError::AlreadyDefinedClass(class.name.clone()));
		}

		classes.add(&class.name, ClassMetadata::new(bump.alloc_str(&class.name)), bump);
	}

	//Link the inheritance graph, rejecting a cycle as soon as it forms so no
	//later pass ever walks an unterminated parent chain
	for class in &assembly.classes {
		let Some(parent_name) = &class.parent_class_name else {
			continue;
		};

		if *parent_name == class.name {
			return Err(LoadError::SelfInheritance(class.name.clone()));
		}

		let parent_type = resolve_class_type(parent_name, types, classes, bump)?;
		let this_type = resolve_class_type(&class.name, types, classes, bump)?;
		classes.get(&class.name).unwrap().set_parent(parent_type);

		if is_subtype_of(parent_type, this_type) && is_subtype_of(this_type, parent_type) {
			let (mut first, mut second) = (parent_name.clone(), class.name.clone());
			if first > second {
				std::mem::swap(&mut first, &mut second);
			}
			return Err(LoadError::MutualInheritance(first, second));
		}
	}

	//Resolve the field definitions
	let mut field_definitions = FxHashMap::default();
	for class in &assembly.classes {
		let mut definitions = Vec::with_capacity(class.fields.len());

		for field in &class.fields {
			definitions.push(FieldDefinition {
				name: bump.alloc_str(&field.name),
				ty: resolve_type(&field.type_name, types, classes, bump)?,
				access_modifier: attribute_access_modifier(&field.attributes)?,
			});
		}

		field_definitions.insert(class.name.as_str(), definitions);
	}

	//Finalize the layouts, parents before children
	let mut finalized = FxHashMap::default();
	for class in &assembly.classes {
		finalize_fields(&class.name, classes, &field_definitions, &mut finalized, bump);
	}

	Ok(())
}

fn finalize_fields<'l>(
	name: &str,
	classes: &ClassProvider<'l>,
	field_definitions: &FxHashMap<&str, Vec<FieldDefinition<'l>>>,
	finalized: &mut FxHashMap<String, bool>,
	bump: &'l Bump,
) {
	if finalized.contains_key(name) {
		return;
	}
	finalized.insert(name.to_string(), true);

	let metadata = classes.get(name).unwrap();
	if let Some(parent) = metadata.parent() {
		//Parents from an earlier assembly are already laid out
		if field_definitions.contains_key(parent.name()) {
			finalize_fields(parent.name(), classes, field_definitions, finalized, bump);
		}
	}

	if let Some(definitions) = field_definitions.get(name) {
		metadata.make_fields(definitions, bump);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::loader::parser::parse_assembly;

	fn load(text: &str) -> Result<(), LoadError> {
		let bump = Bump::new();
		let assembly = parse_assembly(text)?;
		let mut classes = ClassProvider::new();
		let types = TypeProvider::new();
		load_classes(&assembly, &mut classes, &types, &bump)
	}

	#[test]
	fn loads_a_class_graph() {
		let bump = Bump::new();
		let assembly = parse_assembly(
			"class Point { x Int y Int }\n\
			 class Point3 extends Point { z Int }",
		)
		.unwrap();

		let mut classes = ClassProvider::new();
		let types = TypeProvider::new();
		load_classes(&assembly, &mut classes, &types, &bump).unwrap();

		let point3 = classes.get("Point3").unwrap();
		assert_eq!(point3.size(), 12);
		assert_eq!(point3.field("z").unwrap().offset(), 8);
		assert_eq!(point3.parent().unwrap().name(), "Point");
	}

	#[test]
	fn mutually_referencing_fields() {
		let bump = Bump::new();
		let assembly = parse_assembly(
			"class A { other Ref.B }\n\
			 class B { other Ref.A }",
		)
		.unwrap();

		let mut classes = ClassProvider::new();
		let types = TypeProvider::new();
		load_classes(&assembly, &mut classes, &types, &bump).unwrap();

		let a = classes.get("A").unwrap();
		assert_eq!(a.field("other").unwrap().field_type().name(), "Ref.B");
	}

	#[test]
	fn rejects_bad_inheritance() {
		assert!(matches!(load("class A extends A { }"), Err(LoadError::SelfInheritance(_))));
		assert!(matches!(
			load("class A extends B { } class B extends A { }"),
			Err(LoadError::MutualInheritance(..))
		));
		assert!(matches!(load("class A { } class A { }"), Err(LoadError::AlreadyDefinedClass(_))));
		assert!(matches!(load("class A extends Missing { }"), Err(LoadError::UndefinedClass(_))));
	}
}
