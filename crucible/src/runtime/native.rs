use bumpalo::Bump;

use crate::errors::LoadError;
use crate::gc::array_length;
use crate::model::{Binder, ClassProvider, FunctionDefinition, FunctionSignature, Type, TypeProvider};
use crate::ARRAY_LENGTH_SIZE;

/// The runtime library assembly loaded before user code: the classes the
/// native helpers depend on.
pub const RUNTIME_LIBRARY: &str = "\
class std.String
{
	chars Ref.Array[Char] @AccessModifier(value=private)
}
";

extern "C" fn native_print_int(value: i32) {
	print!("{}", value);
}

extern "C" fn native_println_int(value: i32) {
	println!("{}", value);
}

extern "C" fn native_print_float(value: f32) {
	print!("{}", value);
}

extern "C" fn native_println_float(value: f32) {
	println!("{}", value);
}

extern "C" fn native_print_bool(value: i32) {
	print!("{}", value != 0);
}

extern "C" fn native_println_bool(value: i32) {
	println!("{}", value != 0);
}

extern "C" fn native_print_char(value: u32) {
	print!("{}", char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
}

extern "C" fn native_println_char(value: u32) {
	println!("{}", char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
}

//The string layout is fixed by the runtime library: the character array
//reference is the first field.
extern "C" fn native_println_string(string: *const u8) {
	if string.is_null() {
		crate::runtime::fatal_runtime_error("Null reference.");
	}

	unsafe {
		let chars = *(string as *const *const u8);
		if chars.is_null() {
			println!();
			return;
		}

		let length = array_length(chars) as usize;
		let bytes = std::slice::from_raw_parts(chars.add(ARRAY_LENGTH_SIZE), length);
		let text: String = bytes.iter().map(|&b| b as char).collect();
		println!("{}", text);
	}
}

extern "C" fn native_abs_int(value: i32) -> i32 {
	value.wrapping_abs()
}

extern "C" fn native_sqrt(value: f32) -> f32 {
	value.sqrt()
}

extern "C" fn native_sin(value: f32) -> f32 {
	value.sin()
}

extern "C" fn native_cos(value: f32) -> f32 {
	value.cos()
}

extern "C" fn native_pow(base: f32, exponent: f32) -> f32 {
	base.powf(exponent)
}

/// Registers the native library in the binder: printing over the primitive
/// types and strings, plus a small math library. Must run after the runtime
/// library classes are loaded.
pub fn register_native_library<'l>(
	binder: &mut Binder<'l>,
	types: &TypeProvider<'l>,
	classes: &ClassProvider<'l>,
	bump: &'l Bump,
) -> Result<(), LoadError> {
	let resolve = |name: &str| -> Result<&'l Type<'l>, LoadError> {
		types.make_type(name, classes, bump).ok_or_else(|| LoadError::UndefinedType(name.to_string()))
	};

	let int = resolve("Int")?;
	let float = resolve("Float")?;
	let bool_type = resolve("Bool")?;
	let char_type = resolve("Char")?;
	let void = resolve("Void")?;

	let mut register = |name: &str, parameters: &[&'l Type<'l>], return_type: &'l Type<'l>, entry_point: *const u8| {
		let definition = FunctionDefinition::external(
			bump.alloc_str(name),
			bump.alloc_slice_copy(parameters),
			return_type,
			entry_point,
		);
		let signature = FunctionSignature::from_definition(&definition);
		binder.define(signature, bump.alloc(definition));
	};

	register("std.print", &[int], void, native_print_int as *const u8);
	register("std.println", &[int], void, native_println_int as *const u8);
	register("std.print", &[float], void, native_print_float as *const u8);
	register("std.println", &[float], void, native_println_float as *const u8);
	register("std.print", &[bool_type], void, native_print_bool as *const u8);
	register("std.println", &[bool_type], void, native_println_bool as *const u8);
	register("std.print", &[char_type], void, native_print_char as *const u8);
	register("std.println", &[char_type], void, native_println_char as *const u8);

	//The string helpers only exist when the runtime library is loaded
	if let Some(string) = types.make_type(crate::model::STRING_TYPE_NAME, classes, bump) {
		register("std.println", &[string], void, native_println_string as *const u8);
	}

	register("std.math.abs", &[int], int, native_abs_int as *const u8);
	register("std.math.sqrt", &[float], float, native_sqrt as *const u8);
	register("std.math.sin", &[float], float, native_sin as *const u8);
	register("std.math.cos", &[float], float, native_cos as *const u8);
	register("std.math.pow", &[float, float], float, native_pow as *const u8);

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::loader::{load_classes, parse_assembly};

	#[test]
	fn registration_provides_overloads() {
		let bump = Bump::new();
		let mut classes = ClassProvider::new();
		let types = TypeProvider::new();
		let mut binder = Binder::new();

		let rtlib = parse_assembly(RUNTIME_LIBRARY).unwrap();
		load_classes(&rtlib, &mut classes, &types, &bump).unwrap();
		register_native_library(&mut binder, &types, &classes, &bump).unwrap();

		assert!(binder.is_defined("std.println(Int)"));
		assert!(binder.is_defined("std.println(Float)"));
		assert!(binder.is_defined("std.println(Ref.std.String)"));
		assert!(binder.is_defined("std.math.pow(Float Float)"));

		let println_int = binder.get_function("std.println(Int)").unwrap();
		assert!(!println_int.is_managed());
		assert!(!println_int.entry_point().is_null());
	}

	#[test]
	fn runtime_library_defines_the_string_class() {
		let bump = Bump::new();
		let mut classes = ClassProvider::new();
		let types = TypeProvider::new();

		let rtlib = parse_assembly(RUNTIME_LIBRARY).unwrap();
		load_classes(&rtlib, &mut classes, &types, &bump).unwrap();

		let string = classes.get("std.String").unwrap();
		let chars = string.field("chars").unwrap();
		assert_eq!(chars.offset(), 0);
		assert_eq!(chars.field_type().name(), "Ref.Array[Char]");
	}
}
