use bumpalo::Bump;
use fxhash::FxHashMap;

use crate::errors::LoadError;
use crate::loader::assembly::{ParsedAssembly, ParsedFunction, ParsedInstruction};
use crate::loader::classes::{attribute_access_modifier, attribute_is_virtual, resolve_class_type, resolve_type};
use crate::model::{
	Binder, CallSite, ClassProvider, FieldReference, FunctionDefinition, FunctionFlags, FunctionSignature, Instruction,
	ManagedFunction, OpCode, Type, TypeProvider, VirtualFunction,
};

pub const CONSTRUCTOR_NAME: &str = ".constructor";

fn resolve_parameters<'l>(
	names: &[String],
	types: &TypeProvider<'l>,
	classes: &ClassProvider<'l>,
	bump: &'l Bump,
) -> Result<Vec<&'l Type<'l>>, LoadError> {
	names.iter().map(|name| resolve_type(name, types, classes, bump)).collect()
}

/// Builds the definition of a parsed function. Member functions get their
/// receiver prepended as the first parameter and carry the class type.
fn generate_definition<'l>(
	function: &ParsedFunction,
	types: &TypeProvider<'l>,
	classes: &ClassProvider<'l>,
	bump: &'l Bump,
) -> Result<FunctionDefinition<'l>, LoadError> {
	let return_type = resolve_type(&function.return_type, types, classes, bump)?;
	let mut parameters = resolve_parameters(&function.parameters, types, classes, bump)?;

	let mut class_type = None;
	let mut access_modifier = Default::default();
	let mut flags = FunctionFlags::empty();

	if function.is_member_function {
		let class = resolve_class_type(&function.class_name, types, classes, bump)?;
		parameters.insert(0, class);

		class_type = Some(class);
		access_modifier = attribute_access_modifier(&function.attributes)?;
		flags |= FunctionFlags::MEMBER;

		if function.member_function_name == CONSTRUCTOR_NAME {
			flags |= FunctionFlags::CONSTRUCTOR;
		}
		if attribute_is_virtual(&function.attributes)? {
			flags |= FunctionFlags::VIRTUAL;
		}
	}

	Ok(FunctionDefinition::managed(
		bump.alloc_str(&function.name),
		bump.alloc_slice_copy(&parameters),
		return_type,
		class_type,
		access_modifier,
		flags,
	))
}

/// Defines every function of a parsed assembly in the binder. External
/// declarations must already be registered (by the native library); managed
/// definitions must be new. Virtual member functions are installed into
/// their class's slot table, parents first.
pub fn define_functions<'l>(
	assembly: &ParsedAssembly,
	binder: &mut Binder<'l>,
	classes: &ClassProvider<'l>,
	types: &TypeProvider<'l>,
	bump: &'l Bump,
) -> Result<(), LoadError> {
	let mut virtual_functions: FxHashMap<&str, Vec<VirtualFunction<'l>>> = FxHashMap::default();

	for function in &assembly.functions {
		let definition = generate_definition(function, types, classes, bump)?;
		let signature = FunctionSignature::from_definition(&definition);

		if function.is_external {
			//External functions bind at registration; the declaration only
			//re-checks that the native side provided them
			if !binder.is_defined(&signature) {
				return Err(LoadError::UndefinedFunction(signature));
			}
			continue;
		}

		if definition.is_virtual() {
			virtual_functions.entry(bump.alloc_str(&function.class_name)).or_default().push(VirtualFunction {
				name: bump.alloc_str(&function.member_function_name),
				parameters: &definition.parameters()[1..],
				signature: bump.alloc_str(&signature),
			});
		}

		let definition = &*bump.alloc(definition);
		if !binder.define(signature, definition) {
			return Err(LoadError::AlreadyDefinedFunction(FunctionSignature::from_definition(definition)));
		}
	}

	//Install the virtual slots of the newly loaded classes, parents first
	let mut installed = FxHashMap::default();
	for class in &assembly.classes {
		install_virtual_functions(&class.name, assembly, classes, &virtual_functions, &mut installed, bump);
	}

	Ok(())
}

fn install_virtual_functions<'l>(
	name: &str,
	assembly: &ParsedAssembly,
	classes: &ClassProvider<'l>,
	virtual_functions: &FxHashMap<&str, Vec<VirtualFunction<'l>>>,
	installed: &mut FxHashMap<String, bool>,
	bump: &'l Bump,
) {
	if installed.contains_key(name) {
		return;
	}
	installed.insert(name.to_string(), true);

	let metadata = classes.get(name).unwrap();
	if let Some(parent) = metadata.parent() {
		if assembly.classes.iter().any(|class| class.name == parent.name()) {
			install_virtual_functions(parent.name(), assembly, classes, virtual_functions, installed, bump);
		}
	}

	let own = virtual_functions.get(name).map(Vec::as_slice).unwrap_or(&[]);
	metadata.make_virtual_functions(own, bump);
}

fn load_instruction<'l>(
	parsed: &ParsedInstruction,
	types: &TypeProvider<'l>,
	classes: &ClassProvider<'l>,
	bump: &'l Bump,
) -> Result<Instruction<'l>, LoadError> {
	let make_call_site = |class_name: &str, name: &str, parameters: &[String]| -> Result<CallSite<'l>, LoadError> {
		let class_type = resolve_class_type(class_name, types, classes, bump)?;
		let parameters = resolve_parameters(parameters, types, classes, bump)?;
		Ok(CallSite::member(class_type, bump.alloc_str(name), bump.alloc_slice_copy(&parameters)))
	};

	let field_reference = |reference: &str| -> Result<FieldReference<'l>, LoadError> {
		match reference.split_once("::") {
			Some((class_name, field_name)) => Ok(FieldReference {
				class_name: bump.alloc_str(class_name),
				field_name: bump.alloc_str(field_name),
			}),
			None => Err(LoadError::Parse(format!("Invalid field reference '{}'.", reference))),
		}
	};

	let opcode = match parsed {
		ParsedInstruction::Nop => OpCode::Nop,
		ParsedInstruction::Pop => OpCode::Pop,
		ParsedInstruction::Duplicate => OpCode::Duplicate,

		ParsedInstruction::LoadInt(value) => OpCode::LoadInt(*value),
		ParsedInstruction::LoadFloat(value) => OpCode::LoadFloat(*value),
		ParsedInstruction::LoadChar(value) => OpCode::LoadChar(*value),
		ParsedInstruction::LoadTrue => OpCode::LoadTrue,
		ParsedInstruction::LoadFalse => OpCode::LoadFalse,
		ParsedInstruction::LoadNull => OpCode::LoadNull,
		ParsedInstruction::LoadString(value) => OpCode::LoadString(bump.alloc_str(value)),

		ParsedInstruction::Add => OpCode::Add,
		ParsedInstruction::Sub => OpCode::Sub,
		ParsedInstruction::Mul => OpCode::Mul,
		ParsedInstruction::Div => OpCode::Div,
		ParsedInstruction::And => OpCode::And,
		ParsedInstruction::Or => OpCode::Or,
		ParsedInstruction::Not => OpCode::Not,

		ParsedInstruction::ConvertIntToFloat => OpCode::ConvertIntToFloat,
		ParsedInstruction::ConvertFloatToInt => OpCode::ConvertFloatToInt,

		ParsedInstruction::CompareEqual => OpCode::CompareEqual,
		ParsedInstruction::CompareNotEqual => OpCode::CompareNotEqual,
		ParsedInstruction::CompareGreater => OpCode::CompareGreater,
		ParsedInstruction::CompareGreaterOrEqual => OpCode::CompareGreaterOrEqual,
		ParsedInstruction::CompareLess => OpCode::CompareLess,
		ParsedInstruction::CompareLessOrEqual => OpCode::CompareLessOrEqual,

		ParsedInstruction::LoadLocal(index) => OpCode::LoadLocal(*index),
		ParsedInstruction::StoreLocal(index) => OpCode::StoreLocal(*index),
		ParsedInstruction::LoadArg(index) => OpCode::LoadArg(*index),

		ParsedInstruction::Branch(target) => OpCode::Branch(*target),
		ParsedInstruction::BranchTrue(target) => OpCode::BranchTrue(*target),
		ParsedInstruction::BranchFalse(target) => OpCode::BranchFalse(*target),
		ParsedInstruction::BranchEqual(target) => OpCode::BranchEqual(*target),
		ParsedInstruction::BranchNotEqual(target) => OpCode::BranchNotEqual(*target),
		ParsedInstruction::BranchGreater(target) => OpCode::BranchGreater(*target),
		ParsedInstruction::BranchGreaterOrEqual(target) => OpCode::BranchGreaterOrEqual(*target),
		ParsedInstruction::BranchLess(target) => OpCode::BranchLess(*target),
		ParsedInstruction::BranchLessOrEqual(target) => OpCode::BranchLessOrEqual(*target),
		ParsedInstruction::Ret => OpCode::Ret,

		ParsedInstruction::Call { name, parameters } => {
			let parameters = resolve_parameters(parameters, types, classes, bump)?;
			OpCode::Call(CallSite::function(bump.alloc_str(name), bump.alloc_slice_copy(&parameters)))
		}
		ParsedInstruction::CallInstance { class_name, name, parameters } => {
			OpCode::CallInstance(make_call_site(class_name, name, parameters)?)
		}
		ParsedInstruction::CallVirtual { class_name, name, parameters } => {
			OpCode::CallVirtual(make_call_site(class_name, name, parameters)?)
		}
		ParsedInstruction::NewObject { class_name, parameters } => {
			OpCode::NewObject(make_call_site(class_name, CONSTRUCTOR_NAME, parameters)?)
		}

		ParsedInstruction::NewArray(element) => OpCode::NewArray(resolve_type(element, types, classes, bump)?),
		ParsedInstruction::LoadElement(element) => OpCode::LoadElement(resolve_type(element, types, classes, bump)?),
		ParsedInstruction::StoreElement(element) => OpCode::StoreElement(resolve_type(element, types, classes, bump)?),
		ParsedInstruction::LoadArrayLength => OpCode::LoadArrayLength,
		ParsedInstruction::LoadField(reference) => OpCode::LoadField(field_reference(reference)?),
		ParsedInstruction::StoreField(reference) => OpCode::StoreField(field_reference(reference)?),
	};

	Ok(Instruction::new(opcode))
}

/// Loads the managed function bodies of a parsed assembly. The definitions
/// must already be bound. Returns each function with its signature.
pub fn load_managed_functions<'l>(
	assembly: &ParsedAssembly,
	binder: &Binder<'l>,
	classes: &ClassProvider<'l>,
	types: &TypeProvider<'l>,
	bump: &'l Bump,
) -> Result<Vec<(String, ManagedFunction<'l>)>, LoadError> {
	let mut functions = Vec::new();

	for function in &assembly.functions {
		if function.is_external {
			continue;
		}

		let definition = generate_definition(function, types, classes, bump)?;
		let signature = FunctionSignature::from_definition(&definition);
		let definition = binder.get_function(&signature).unwrap();

		let mut locals = Vec::with_capacity(function.locals.len());
		for local in &function.locals {
			locals.push(match local {
				Some(name) => Some(resolve_type(name, types, classes, bump)?),
				None => None,
			});
		}

		let mut instructions = Vec::with_capacity(function.instructions.len());
		for instruction in &function.instructions {
			instructions.push(load_instruction(instruction, types, classes, bump)?);
		}

		functions.push((signature, ManagedFunction::new(definition, instructions, locals)));
	}

	Ok(functions)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::loader::classes::load_classes;
	use crate::loader::parser::parse_assembly;

	#[test]
	fn defines_and_loads_functions() {
		let bump = Bump::new();
		let assembly = parse_assembly(
			"class Counter { count Int }\n\
			 member Counter::.constructor(Int) Void { .locals 0 ldarg 0 ldarg 1 stfield Counter::count ret }\n\
			 member Counter::value() Int { @Virtual(value=true) .locals 0 ldarg 0 ldfield Counter::count ret }\n\
			 func main() Int { .locals 0 ldint 1 newobj Counter::.constructor(Int) callvirt Counter::value() ret }",
		)
		.unwrap();

		let mut classes = ClassProvider::new();
		let types = TypeProvider::new();
		let mut binder = Binder::new();

		load_classes(&assembly, &mut classes, &types, &bump).unwrap();
		define_functions(&assembly, &mut binder, &classes, &types, &bump).unwrap();

		let constructor = binder.get_function("Counter::.constructor(Ref.Counter Int)").unwrap();
		assert!(constructor.is_constructor());
		assert!(constructor.is_member_function());

		let value = binder.get_function("Counter::value(Ref.Counter)").unwrap();
		assert!(value.is_virtual());
		assert_eq!(classes.get("Counter").unwrap().virtual_function_index("value", &[]), Some(0));

		let functions = load_managed_functions(&assembly, &binder, &classes, &types, &bump).unwrap();
		assert_eq!(functions.len(), 3);

		let main = &functions.iter().find(|(signature, _)| signature == "main()").unwrap().1;
		assert_eq!(main.instructions().len(), 4);
		assert!(matches!(main.instructions()[1].opcode(), OpCode::NewObject(_)));
	}

	#[test]
	fn external_functions_must_be_registered() {
		let bump = Bump::new();
		let assembly = parse_assembly("extern std.missing(Int) Void").unwrap();

		let classes = ClassProvider::new();
		let types = TypeProvider::new();
		let mut binder = Binder::new();

		let result = define_functions(&assembly, &mut binder, &classes, &types, &bump);
		assert!(matches!(result, Err(LoadError::UndefinedFunction(_))));
	}

	#[test]
	fn managed_functions_are_unique() {
		let bump = Bump::new();
		let assembly = parse_assembly("func f() Void { ret } func f() Void { ret }").unwrap();

		let classes = ClassProvider::new();
		let types = TypeProvider::new();
		let mut binder = Binder::new();

		let result = define_functions(&assembly, &mut binder, &classes, &types, &bump);
		assert!(matches!(result, Err(LoadError::AlreadyDefinedFunction(_))));
	}
}
