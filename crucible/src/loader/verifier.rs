use bumpalo::Bump;

use crate::errors::VerifyError;
use crate::model::{
	array_type_name, class_type_name, is_assignable_to, is_subtype_of, AccessModifier, Binder, CallSite,
	ClassMetadata, ClassProvider, FieldReference, FunctionDefinition, FunctionSignature, Instruction, ManagedFunction,
	OpCode, Primitive, Type, TypeProvider, NULL_TYPE_NAME, STRING_TYPE_NAME,
};

//A deferred branch compatibility check: the operand stack as it was after
//the branch instruction's pops, to be compared against the snapshot at the
//branch target.
struct BranchCheck<'l> {
	source: usize,
	target: usize,
	stack: Vec<&'l Type<'l>>,
}

/// Verifies managed functions: computes the per-instruction operand type
/// snapshots, infers local types, determines the maximum operand stack depth
/// and rejects ill-typed bytecode with a precise error.
pub struct Verifier<'v, 'l> {
	binder: &'v Binder<'l>,
	classes: &'v ClassProvider<'l>,
	types: &'v TypeProvider<'l>,
	bump: &'l Bump,

	int_type: &'l Type<'l>,
	float_type: &'l Type<'l>,
	bool_type: &'l Type<'l>,
	char_type: &'l Type<'l>,
	void_type: &'l Type<'l>,
	null_type: &'l Type<'l>,
	string_type: Option<&'l Type<'l>>,
}

fn check_type<'l>(expected: &'l Type<'l>, actual: &'l Type<'l>) -> Result<(), String> {
	match is_assignable_to(expected, actual) {
		true => Ok(()),
		false => Err(format!("Expected type '{}' but got type '{}'.", expected, actual)),
	}
}

impl<'v, 'l> Verifier<'v, 'l> {
	pub fn new(
		binder: &'v Binder<'l>,
		classes: &'v ClassProvider<'l>,
		types: &'v TypeProvider<'l>,
		bump: &'l Bump,
	) -> Self {
		let primitive = |p: Primitive| types.make_type(p.name(), classes, bump).unwrap();

		Verifier {
			binder,
			classes,
			types,
			bump,
			int_type: primitive(Primitive::Int),
			float_type: primitive(Primitive::Float),
			bool_type: primitive(Primitive::Bool),
			char_type: primitive(Primitive::Char),
			void_type: primitive(Primitive::Void),
			null_type: types.make_type(NULL_TYPE_NAME, classes, bump).unwrap(),
			string_type: types.make_type(STRING_TYPE_NAME, classes, bump),
		}
	}

	/// Verifies the given function, attaching operand type snapshots to its
	/// instructions and inferred types to its locals.
	pub fn verify_function(&self, function: &ManagedFunction<'l>) -> Result<(), VerifyError> {
		let signature = FunctionSignature::from_definition(function.definition());
		let num_instructions = function.instructions().len();

		if num_instructions == 0 {
			return Err(VerifyError::new(signature, 0, "Empty functions are not allowed."));
		}

		self.pre_check_local_types(function, &signature)?;
		self.verify_definition(function.definition(), &signature)?;

		let mut operand_stack: Vec<&'l Type<'l>> = Vec::new();
		let mut branches = Vec::new();

		for (index, instruction) in function.instructions().iter().enumerate() {
			//Snapshot the stack before the instruction, topmost operand first
			let snapshot = self.bump.alloc_slice_fill_iter(operand_stack.iter().rev().copied());
			instruction.set_operand_types(snapshot);

			if snapshot.len() > function.operand_stack_size() {
				function.set_operand_stack_size(snapshot.len());
			}

			self.verify_instruction(function, &signature, instruction, index, &mut operand_stack, &mut branches)?;

			if index == num_instructions - 1 && !matches!(instruction.opcode(), OpCode::Ret) {
				return Err(VerifyError::new(signature, index, "Functions must end with the 'RET' instruction."));
			}
		}

		self.verify_branches(function, &signature, &branches)?;
		self.post_check_local_types(function, &signature)
	}

	fn verify_definition(&self, definition: &FunctionDefinition<'l>, signature: &str) -> Result<(), VerifyError> {
		if definition.is_constructor() && !definition.return_type().is_primitive(Primitive::Void) {
			return Err(VerifyError::new(signature, 0, "Constructors must have return type 'Void'."));
		}

		for (i, parameter) in definition.parameters().iter().enumerate() {
			if parameter.is_primitive(Primitive::Void) {
				return Err(VerifyError::new(
					signature,
					0,
					format!("Parameter {} in function '{}' cannot be of type 'Void'.", i, definition.name()),
				));
			}
		}

		Ok(())
	}

	fn pre_check_local_types(&self, function: &ManagedFunction<'l>, signature: &str) -> Result<(), VerifyError> {
		for i in 0..function.num_locals() {
			if function.local(i) == Some(self.void_type) {
				return Err(VerifyError::new(signature, 0, "Locals of 'Void' type are not allowed."));
			}
		}

		Ok(())
	}

	fn post_check_local_types(&self, function: &ManagedFunction<'l>, signature: &str) -> Result<(), VerifyError> {
		for i in 0..function.num_locals() {
			if function.local(i).is_none() {
				return Err(VerifyError::new(signature, 0, format!("Local {} is not typed.", i)));
			}
		}

		Ok(())
	}

	fn verify_branches(
		&self,
		function: &ManagedFunction<'l>,
		signature: &str,
		branches: &[BranchCheck<'l>],
	) -> Result<(), VerifyError> {
		for branch in branches {
			let target_types = function.instructions()[branch.target].operand_types();

			if branch.stack.len() != target_types.len() {
				return Err(VerifyError::new(
					signature,
					branch.source,
					"Expected the number of types before and after branch to be the same.",
				));
			}

			//Both sequences topmost first
			for (post, pre) in branch.stack.iter().rev().zip(target_types) {
				check_type(post, pre).map_err(|error| VerifyError::new(signature, branch.source, error))?;
			}
		}

		Ok(())
	}

	fn assert_operand_count(
		&self,
		signature: &str,
		index: usize,
		stack: &[&'l Type<'l>],
		count: usize,
	) -> Result<(), VerifyError> {
		match stack.len() >= count {
			true => Ok(()),
			false => Err(VerifyError::new(
				signature,
				index,
				format!("Expected {} operand(s) on the stack.", count),
			)),
		}
	}

	//Walks the parent chain for an inherited member function implementation.
	//Returns the first defined signature, or the initial one for the error
	//message when nothing matches.
	fn find_inherited_member_function(
		&self,
		class_type: &'l Type<'l>,
		name: &str,
		parameters: &[&'l Type<'l>],
	) -> String {
		let initial = FunctionSignature::member_function(class_type, name, parameters);

		let mut current = Some(class_type);
		while let Some(class) = current {
			let signature = FunctionSignature::member_function(class, name, parameters);
			if self.binder.is_defined(&signature) {
				return signature;
			}

			current = class.metadata().and_then(ClassMetadata::parent_type);
		}

		initial
	}

	fn can_call_member_function(caller: &FunctionDefinition<'l>, callee: &FunctionDefinition<'l>) -> bool {
		match callee.access_modifier() {
			AccessModifier::Public => true,
			AccessModifier::Private => caller.class_type() == callee.class_type() && caller.class_type().is_some(),
		}
	}

	fn can_access_field(caller: &FunctionDefinition<'l>, class_type: &'l Type<'l>, field_access: AccessModifier) -> bool {
		match field_access {
			AccessModifier::Public => true,
			AccessModifier::Private => caller.class_type() == Some(class_type),
		}
	}

	//Resolves a Class::field reference, checking existence and access.
	fn resolve_field(
		&self,
		function: &ManagedFunction<'l>,
		signature: &str,
		index: usize,
		reference: &FieldReference<'l>,
		writing: bool,
	) -> Result<(&'l Type<'l>, &'l Type<'l>), VerifyError> {
		let Some(metadata) = self.classes.get(reference.class_name) else {
			return Err(VerifyError::new(
				signature,
				index,
				format!("'{}' is not a class type.", reference.class_name),
			));
		};

		let class_type = self
			.types
			.make_type(&class_type_name(reference.class_name), self.classes, self.bump)
			.unwrap();

		let Some(field) = metadata.field(reference.field_name) else {
			return Err(VerifyError::new(
				signature,
				index,
				format!("There exists no field '{}' in the class '{}'.", reference.field_name, reference.class_name),
			));
		};

		if !Self::can_access_field(function.definition(), class_type, field.access_modifier()) {
			let action = if writing { "write to" } else { "read from" };
			return Err(VerifyError::new(
				signature,
				index,
				format!(
					"Cannot {} private field '{}' of class '{}'.",
					action, reference.field_name, reference.class_name
				),
			));
		}

		Ok((class_type, field.field_type()))
	}

	fn verify_call(
		&self,
		function: &ManagedFunction<'l>,
		signature: &str,
		index: usize,
		call_site: &CallSite<'l>,
		is_instance: bool,
		is_virtual: bool,
		operand_stack: &mut Vec<&'l Type<'l>>,
	) -> Result<(), VerifyError> {
		let called_signature = if !is_instance {
			FunctionSignature::function(call_site.name, call_site.parameters)
		} else {
			self.find_inherited_member_function(call_site.class_type.get().unwrap(), call_site.name, call_site.parameters)
		};

		let Some(func_to_call) = self.binder.get_function(&called_signature) else {
			return Err(VerifyError::new(
				signature,
				index,
				format!("The function '{}' is not defined.", called_signature),
			));
		};

		//Rebind the call site, since the call may resolve to an inherited
		//implementation declared by a parent class
		if is_instance {
			call_site.class_type.set(func_to_call.class_type());
		}

		if !is_instance && func_to_call.is_member_function() {
			return Err(VerifyError::new(
				signature,
				index,
				"Member functions must be called with the 'CALLINST' instruction.",
			));
		}

		if is_instance && func_to_call.is_member_function() {
			if !is_virtual && func_to_call.is_virtual() {
				return Err(VerifyError::new(
					signature,
					index,
					"Virtual member functions must be called with the 'CALLVIRT' instruction.",
				));
			}
			if is_virtual && !func_to_call.is_virtual() {
				return Err(VerifyError::new(
					signature,
					index,
					"Non virtual member functions must be called with the 'CALLINST' instruction.",
				));
			}
		}

		//Constructors may only be chained from a constructor of the same
		//class or of a subclass; anything else goes through NEWOBJ
		if func_to_call.is_constructor() {
			let definition = function.definition();
			let chainable = is_instance
				&& definition.is_constructor()
				&& match (func_to_call.class_type(), definition.class_type()) {
					(Some(callee_class), Some(caller_class)) => {
						callee_class == caller_class || is_subtype_of(callee_class, caller_class)
					}
					_ => false,
				};

			if !chainable {
				return Err(VerifyError::new(
					signature,
					index,
					format!("Cannot call constructor '{}'.", called_signature),
				));
			}
		}

		if is_instance && !Self::can_call_member_function(function.definition(), func_to_call) {
			return Err(VerifyError::new(
				signature,
				index,
				format!("Cannot call private function '{}'.", called_signature),
			));
		}

		let num_arguments = func_to_call.num_parameters();
		self.assert_operand_count(signature, index, operand_stack, num_arguments)?;

		for i in (0..num_arguments).rev() {
			let argument = operand_stack.pop().unwrap();
			check_type(func_to_call.parameters()[i], argument)
				.map_err(|error| VerifyError::new(signature, index, error))?;
		}

		if !func_to_call.return_type().is_primitive(Primitive::Void) {
			operand_stack.push(func_to_call.return_type());
		}

		Ok(())
	}

	fn verify_instruction(
		&self,
		function: &ManagedFunction<'l>,
		signature: &str,
		instruction: &Instruction<'l>,
		index: usize,
		operand_stack: &mut Vec<&'l Type<'l>>,
		branches: &mut Vec<BranchCheck<'l>>,
	) -> Result<(), VerifyError> {
		let num_instructions = function.instructions().len();

		let check_branch_target = |target: u32| -> Result<usize, VerifyError> {
			match (target as usize) < num_instructions {
				true => Ok(target as usize),
				false => Err(VerifyError::new(signature, index, format!("Invalid jump target ({}).", target))),
			}
		};

		match instruction.opcode() {
			OpCode::Nop => {}
			OpCode::LoadInt(_) => operand_stack.push(self.int_type),
			OpCode::LoadFloat(_) => operand_stack.push(self.float_type),
			OpCode::LoadChar(_) => operand_stack.push(self.char_type),
			OpCode::LoadTrue | OpCode::LoadFalse => operand_stack.push(self.bool_type),
			OpCode::LoadNull => operand_stack.push(self.null_type),
			OpCode::LoadString(_) => match self.string_type {
				Some(string_type) => operand_stack.push(string_type),
				None => {
					return Err(VerifyError::new(
						signature,
						index,
						"The 'LDSTR' instruction requires the runtime library to be loaded.",
					));
				}
			},
			OpCode::Pop => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				operand_stack.pop();
			}
			OpCode::Duplicate => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				operand_stack.push(operand_stack.last().unwrap());
			}
			OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
				self.assert_operand_count(signature, index, operand_stack, 2)?;
				let op1 = operand_stack.pop().unwrap();
				let op2 = operand_stack.pop().unwrap();

				if op1 == self.int_type && op2 == self.int_type {
					operand_stack.push(self.int_type);
				} else if op1 == self.float_type && op2 == self.float_type {
					operand_stack.push(self.float_type);
				} else {
					return Err(VerifyError::new(
						signature,
						index,
						"Expected 2 operands of type Int or Float on the stack.",
					));
				}
			}
			OpCode::And | OpCode::Or => {
				self.assert_operand_count(signature, index, operand_stack, 2)?;
				let op1 = operand_stack.pop().unwrap();
				let op2 = operand_stack.pop().unwrap();

				if op1 == self.bool_type && op2 == self.bool_type {
					operand_stack.push(self.bool_type);
				} else {
					return Err(VerifyError::new(signature, index, "Expected 2 operands of type Bool on the stack."));
				}
			}
			OpCode::Not => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				let op = operand_stack.pop().unwrap();

				if op != self.bool_type {
					return Err(VerifyError::new(signature, index, "Expected 1 operand of type Bool on the stack."));
				}
				operand_stack.push(self.bool_type);
			}
			OpCode::ConvertIntToFloat => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				let op = operand_stack.pop().unwrap();

				if op != self.int_type {
					return Err(VerifyError::new(signature, index, "Expected 1 operand of type Int on the stack."));
				}
				operand_stack.push(self.float_type);
			}
			OpCode::ConvertFloatToInt => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				let op = operand_stack.pop().unwrap();

				if op != self.float_type {
					return Err(VerifyError::new(signature, index, "Expected 1 operand of type Float on the stack."));
				}
				operand_stack.push(self.int_type);
			}
			OpCode::CompareEqual
			| OpCode::CompareNotEqual
			| OpCode::CompareGreater
			| OpCode::CompareGreaterOrEqual
			| OpCode::CompareLess
			| OpCode::CompareLessOrEqual => {
				self.assert_operand_count(signature, index, operand_stack, 2)?;
				let op1 = operand_stack.pop().unwrap();
				let op2 = operand_stack.pop().unwrap();

				let is_equality = matches!(instruction.opcode(), OpCode::CompareEqual | OpCode::CompareNotEqual);

				//Unlike their branch forms, the ordering comparisons do not
				//order booleans
				let equality_types = [self.int_type, self.bool_type, self.float_type, self.char_type];
				let ordering_types = [self.int_type, self.float_type, self.char_type];
				let comparable: &[&'l Type<'l>] = match is_equality {
					true => &equality_types,
					false => &ordering_types,
				};

				self.check_comparable(signature, index, op1, op2, comparable, is_equality)?;
				operand_stack.push(self.bool_type);
			}
			OpCode::LoadLocal(local_index) => match function.local(*local_index as usize) {
				Some(local_type) => operand_stack.push(local_type),
				None => {
					return Err(VerifyError::new(
						signature,
						index,
						format!("Cannot load untyped local ({}).", local_index),
					));
				}
			},
			OpCode::StoreLocal(local_index) => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				if *local_index as usize >= function.num_locals() {
					return Err(VerifyError::new(signature, index, "The local index is out of range."));
				}

				let value_type = operand_stack.pop().unwrap();

				//Locals without a declared type take the type of the first
				//value stored into them
				match function.local(*local_index as usize) {
					Some(local_type) => {
						check_type(local_type, value_type).map_err(|error| VerifyError::new(signature, index, error))?;
					}
					None => function.set_local(*local_index as usize, value_type),
				}
			}
			OpCode::LoadArg(argument) => {
				let parameters = function.definition().parameters();
				match parameters.get(*argument as usize) {
					Some(parameter) => operand_stack.push(parameter),
					None => return Err(VerifyError::new(signature, index, "The argument index is out of range.")),
				}
			}
			OpCode::Branch(target) => {
				let target = check_branch_target(*target)?;
				branches.push(BranchCheck { source: index, target, stack: operand_stack.clone() });
			}
			OpCode::BranchTrue(target) | OpCode::BranchFalse(target) => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				let target = check_branch_target(*target)?;

				let condition = operand_stack.pop().unwrap();
				if condition != self.bool_type {
					return Err(VerifyError::new(signature, index, "Expected 1 operand of type Bool on the stack."));
				}

				branches.push(BranchCheck { source: index, target, stack: operand_stack.clone() });
			}
			OpCode::BranchEqual(target)
			| OpCode::BranchNotEqual(target)
			| OpCode::BranchGreater(target)
			| OpCode::BranchGreaterOrEqual(target)
			| OpCode::BranchLess(target)
			| OpCode::BranchLessOrEqual(target) => {
				self.assert_operand_count(signature, index, operand_stack, 2)?;
				let target = check_branch_target(*target)?;

				let op1 = operand_stack.pop().unwrap();
				let op2 = operand_stack.pop().unwrap();

				let is_equality = matches!(instruction.opcode(), OpCode::BranchEqual(_) | OpCode::BranchNotEqual(_));
				let comparable = [self.int_type, self.bool_type, self.float_type, self.char_type];
				self.check_comparable(signature, index, op1, op2, &comparable, is_equality)?;

				branches.push(BranchCheck { source: index, target, stack: operand_stack.clone() });
			}
			OpCode::Ret => {
				let return_type = function.definition().return_type();
				let return_count = match return_type.is_primitive(Primitive::Void) {
					true => 0,
					false => 1,
				};

				if operand_stack.len() != return_count {
					return Err(VerifyError::new(
						signature,
						index,
						format!(
							"Expected {} operand(s) on the stack but got {} when returning.",
							return_count,
							operand_stack.len()
						),
					));
				}

				if return_count > 0 && operand_stack.pop().unwrap() != return_type {
					return Err(VerifyError::new(
						signature,
						index,
						format!("Expected '{}' as the return type.", return_type),
					));
				}
			}
			OpCode::Call(call_site) => {
				self.verify_call(function, signature, index, call_site, false, false, operand_stack)?;
			}
			OpCode::CallInstance(call_site) => {
				self.verify_call(function, signature, index, call_site, true, false, operand_stack)?;
			}
			OpCode::CallVirtual(call_site) => {
				self.verify_call(function, signature, index, call_site, true, true, operand_stack)?;
			}
			OpCode::NewObject(call_site) => {
				let constructor_signature = FunctionSignature::member_function(
					call_site.class_type.get().unwrap(),
					call_site.name,
					call_site.parameters,
				);

				let Some(constructor) = self.binder.get_function(&constructor_signature) else {
					return Err(VerifyError::new(
						signature,
						index,
						format!("The constructor '{}' is not defined.", constructor_signature),
					));
				};

				let num_arguments = constructor.num_parameters() - 1;
				self.assert_operand_count(signature, index, operand_stack, num_arguments)?;

				for i in (1..=num_arguments).rev() {
					let argument = operand_stack.pop().unwrap();
					check_type(constructor.parameters()[i], argument)
						.map_err(|error| VerifyError::new(signature, index, error))?;
				}

				operand_stack.push(call_site.class_type.get().unwrap());
			}
			OpCode::NewArray(element_type) => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				let length_type = operand_stack.pop().unwrap();
				check_type(self.int_type, length_type).map_err(|error| VerifyError::new(signature, index, error))?;

				if *element_type == self.void_type {
					return Err(VerifyError::new(signature, index, "Arrays of type 'Void' are not allowed."));
				}

				let array_type = self
					.types
					.make_type(&array_type_name(element_type), self.classes, self.bump)
					.unwrap();
				operand_stack.push(array_type);
			}
			OpCode::StoreElement(element_type) => {
				self.assert_operand_count(signature, index, operand_stack, 3)?;
				let value_type = operand_stack.pop().unwrap();
				let index_type = operand_stack.pop().unwrap();
				let array_ref_type = operand_stack.pop().unwrap();

				self.check_array_reference(signature, index, array_ref_type, index_type, element_type)?;

				check_type(element_type, value_type).map_err(|_| {
					VerifyError::new(
						signature,
						index,
						format!("Expected third operand to be of type {}.", element_type),
					)
				})?;
			}
			OpCode::LoadElement(element_type) => {
				self.assert_operand_count(signature, index, operand_stack, 2)?;
				let index_type = operand_stack.pop().unwrap();
				let array_ref_type = operand_stack.pop().unwrap();

				self.check_array_reference(signature, index, array_ref_type, index_type, element_type)?;
				operand_stack.push(element_type);
			}
			OpCode::LoadArrayLength => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				let array_ref_type = operand_stack.pop().unwrap();

				if !array_ref_type.is_array() && !array_ref_type.is_null() {
					return Err(VerifyError::new(signature, index, "Expected operand to be an array reference."));
				}

				operand_stack.push(self.int_type);
			}
			OpCode::LoadField(reference) => {
				self.assert_operand_count(signature, index, operand_stack, 1)?;
				let class_ref_type = operand_stack.pop().unwrap();

				if !class_ref_type.is_class() && !class_ref_type.is_null() {
					return Err(VerifyError::new(
						signature,
						index,
						format!("Expected first operand to be a class reference, but got type: {}.", class_ref_type),
					));
				}

				let (class_type, field_type) = self.resolve_field(function, signature, index, reference, false)?;
				if !class_ref_type.is_null() {
					check_type(class_type, class_ref_type).map_err(|error| VerifyError::new(signature, index, error))?;
				}

				operand_stack.push(field_type);
			}
			OpCode::StoreField(reference) => {
				self.assert_operand_count(signature, index, operand_stack, 2)?;
				let value_type = operand_stack.pop().unwrap();
				let class_ref_type = operand_stack.pop().unwrap();

				if !class_ref_type.is_class() && !class_ref_type.is_null() {
					return Err(VerifyError::new(
						signature,
						index,
						format!("Expected first operand to be a class reference, but got type: {}.", class_ref_type),
					));
				}

				let (class_type, field_type) = self.resolve_field(function, signature, index, reference, true)?;
				if !class_ref_type.is_null() {
					check_type(class_type, class_ref_type).map_err(|error| VerifyError::new(signature, index, error))?;
				}

				check_type(field_type, value_type).map_err(|_| {
					VerifyError::new(signature, index, format!("Expected the second operand to be of type {}.", field_type))
				})?;
			}
		}

		Ok(())
	}

	//Comparisons accept matched pairs of the given primitive types; equality
	//additionally accepts two references of the same type. The call sites
	//pass different sets: the non-branch ordering forms leave Bool out.
	fn check_comparable(
		&self,
		signature: &str,
		index: usize,
		op1: &'l Type<'l>,
		op2: &'l Type<'l>,
		comparable: &[&'l Type<'l>],
		is_equality: bool,
	) -> Result<(), VerifyError> {
		for &primitive in comparable {
			if op1 == primitive {
				return match op2 == primitive {
					true => Ok(()),
					false => Err(VerifyError::new(
						signature,
						index,
						format!("Expected 2 operands of type {} on the stack.", primitive),
					)),
				};
			}
		}

		if is_equality && op1.is_reference() && op2.is_reference() && same_reference_type(op1, op2) {
			return Ok(());
		}

		Err(VerifyError::new(signature, index, "Expected 2 operands of comparable type on the stack."))
	}

	fn check_array_reference(
		&self,
		signature: &str,
		index: usize,
		array_ref_type: &'l Type<'l>,
		index_type: &'l Type<'l>,
		element_type: &'l Type<'l>,
	) -> Result<(), VerifyError> {
		if !array_ref_type.is_array() && !array_ref_type.is_null() {
			return Err(VerifyError::new(
				signature,
				index,
				format!("Expected first operand to be an array reference, but got type: {}.", array_ref_type),
			));
		}

		if index_type != self.int_type {
			return Err(VerifyError::new(
				signature,
				index,
				format!("Expected second operand to be of type Int but got type: {}.", index_type),
			));
		}

		if element_type.is_primitive(Primitive::Void) {
			return Err(VerifyError::new(signature, index, "Void type not allowed."));
		}

		if let Some(array_element) = array_ref_type.element_type() {
			check_type(array_element, element_type).map_err(|error| VerifyError::new(signature, index, error))?;
		}

		Ok(())
	}
}

//Two reference values are comparable when either is null or their types
//match exactly.
fn same_reference_type<'l>(op1: &'l Type<'l>, op2: &'l Type<'l>) -> bool {
	op1 == op2 || op1.is_null() || op2.is_null()
}
