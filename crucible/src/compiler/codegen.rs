use fxhash::FxHashMap;

use crate::compiler::assembler::{
	Assembler, DataSize, FloatRegister, JumpCondition, MemoryOperand, Register, CONDITIONAL_JUMP_SIZE, JUMP_SIZE,
};
use crate::compiler::calling::CallingConvention;
use crate::compiler::exceptions::ExceptionHandling;
use crate::compiler::operands::OperandStack;
use crate::compiler::{BranchTarget, FunctionCallType, FunctionCompilationData, UnresolvedFunctionCall};
use crate::model::{
	array_type_name, Binder, CallSite, ClassProvider, FieldReference, FunctionDefinition, FunctionSignature, Instruction,
	ManagedFunction, OpCode, Primitive, Type, TypeProvider,
};
use crate::runtime;
use crate::utilities::set_int;
use crate::{ARRAY_LENGTH_SIZE, REGISTER_SIZE};

/// The size of one call stack entry: a function pointer and a call point.
pub const CALL_STACK_ENTRY_SIZE: usize = 2 * REGISTER_SIZE;

/// Where emitted code finds the call stack: the address of the top pointer
/// slot and the address one past the last entry.
#[derive(Debug, Copy, Clone)]
pub struct CallStackLayout {
	pub top_pointer: usize,
	pub end: usize,
}

/// Where emitted reference stores find the old generation for card marking.
#[derive(Debug, Copy, Clone)]
pub struct WriteBarrierLayout {
	pub heap_start: usize,
	pub heap_end: usize,
	pub card_table: usize,
	pub card_size: usize,
}

/// Everything the code generator consults while emitting one function.
pub struct CompilationEnvironment<'v, 'l> {
	pub binder: &'v Binder<'l>,
	pub types: &'v TypeProvider<'l>,
	pub classes: &'v ClassProvider<'l>,
	pub lazy_compilation: bool,
	pub gc_enabled: bool,
	pub print_stack_frames: bool,
	pub call_stack: CallStackLayout,
	pub write_barrier: Option<WriteBarrierLayout>,
}

/// A macro function expands a call site inline instead of emitting a call.
pub type MacroFunction = for<'l> fn(&CodeGenerator, &mut FunctionCompilationData<'l>, usize);

//The register the resolved virtual call target is held in between the
//resolution helper and the indirect call. Caller saved, never touched by the
//argument moves in between.
const VIRTUAL_CALL_TARGET: Register = Register::R11;

/// Translates verified instructions into AMD64 machine code, recording
/// everything the linker later patches: internal branch targets, calls to
/// not-yet-placed functions and jumps to the error handler thunks.
pub struct CodeGenerator {
	calling_convention: Box<dyn CallingConvention>,
	exception_handling: ExceptionHandling,
	macros: FxHashMap<String, MacroFunction>,
}

impl CodeGenerator {
	pub fn new(calling_convention: Box<dyn CallingConvention>, exception_handling: ExceptionHandling) -> Self {
		CodeGenerator { calling_convention, exception_handling, macros: FxHashMap::default() }
	}

	pub fn calling_convention(&self) -> &dyn CallingConvention {
		&*self.calling_convention
	}

	/// Registers a macro for the given signature.
	pub fn define_macro(&mut self, signature: String, expansion: MacroFunction) {
		self.macros.insert(signature, expansion);
	}

	//mov rax, <address>; call rax, with shadow space when the convention
	//requires it
	fn generate_runtime_call(&self, assembler: &mut Assembler, address: *const u8) {
		let shadow = self.calling_convention.shadow_stack_size();
		if shadow > 0 {
			assembler.sub_int(Register::Sp, shadow);
		}

		assembler.move_long(Register::Ax, address as i64);
		assembler.call_register(Register::Ax);

		if shadow > 0 {
			assembler.add_int(Register::Sp, shadow);
		}
	}

	/// Emits a garbage collection poll before an allocation: the runtime
	/// saves the call site information and collects when the young
	/// generation is running full.
	pub fn generate_gc_poll(&self, data: &mut FunctionCompilationData, instruction_index: usize) {
		let function = data.function as *const ManagedFunction as i64;
		let mut assembler = Assembler::new(&mut data.code);

		assembler.move_reg(Register::Di, Register::Bp);
		assembler.move_long(Register::Si, function);
		assembler.move_int(Register::Dx, instruction_index as i32);
		self.generate_runtime_call(&mut assembler, runtime::gc_poll as *const u8);
	}

	/// Emits a forced collection of the given generation.
	pub fn generate_forced_collection(
		&self,
		data: &mut FunctionCompilationData,
		instruction_index: usize,
		generation: i32,
	) {
		let function = data.function as *const ManagedFunction as i64;
		let mut assembler = Assembler::new(&mut data.code);

		assembler.move_reg(Register::Di, Register::Bp);
		assembler.move_long(Register::Si, function);
		assembler.move_int(Register::Dx, instruction_index as i32);
		assembler.move_int(Register::Cx, generation);
		self.generate_runtime_call(&mut assembler, runtime::garbage_collect as *const u8);
	}

	/// Emits the function prologue: frame setup, a 16-byte aligned frame
	/// sized for parameters, locals and the operand stack, argument spills
	/// and zeroed locals.
	pub fn generate_initialize_function(&self, data: &mut FunctionCompilationData, _env: &CompilationEnvironment) {
		let function = data.function;
		let needed = (function.definition().num_parameters() + function.num_locals() + function.operand_stack_size())
			* REGISTER_SIZE;
		let stack_size = crate::utilities::round_to_multiple_of::<16>(needed);

		let mut assembler = Assembler::new(&mut data.code);
		assembler.push(Register::Bp);
		assembler.move_reg(Register::Bp, Register::Sp);

		if stack_size > 0 {
			assembler.sub_int(Register::Sp, stack_size as i32);
		}

		self.calling_convention.move_args_to_stack(function, &mut assembler);
		Self::generate_zero_locals(function, &mut assembler);
	}

	fn generate_zero_locals(function: &ManagedFunction, assembler: &mut Assembler) {
		if function.num_locals() == 0 {
			return;
		}

		assembler.bitwise_xor(Register::Ax, Register::Ax, true);
		for i in 0..function.num_locals() {
			let offset = -(REGISTER_SIZE as i32) * (i as i32 + function.definition().num_parameters() as i32 + 1);
			assembler.move_to_memory(MemoryOperand::with_offset(Register::Bp, offset), Register::Ax, DataSize::Size64);
		}
	}

	//Pushes the caller's (function, call point) entry onto the call stack
	//ring before a managed call, with an overflow check.
	fn push_call_stack_frame(&self, data: &mut FunctionCompilationData, env: &CompilationEnvironment, instruction_index: usize) {
		let function = data.function as *const ManagedFunction as i64;
		let FunctionCompilationData { code, unresolved_native_branches, .. } = data;
		let mut assembler = Assembler::new(code);

		assembler.load_absolute(env.call_stack.top_pointer);
		assembler.add_int(Register::Ax, CALL_STACK_ENTRY_SIZE as i32);
		self.exception_handling
			.add_stack_overflow_check(&mut assembler, unresolved_native_branches, env.call_stack.end);

		assembler.move_long(Register::Cx, function);
		assembler.move_to_memory(MemoryOperand::new(Register::Ax), Register::Cx, DataSize::Size64);
		assembler.move_int(Register::Cx, instruction_index as i32);
		assembler.move_to_memory(
			MemoryOperand::with_offset(Register::Ax, REGISTER_SIZE as i32),
			Register::Cx,
			DataSize::Size64,
		);

		assembler.store_absolute(env.call_stack.top_pointer);
	}

	fn pop_call_stack_frame(&self, data: &mut FunctionCompilationData, env: &CompilationEnvironment) {
		let mut assembler = Assembler::new(&mut data.code);
		assembler.load_absolute(env.call_stack.top_pointer);
		assembler.add_int(Register::Ax, -(CALL_STACK_ENTRY_SIZE as i32));
		assembler.store_absolute(env.call_stack.top_pointer);
	}

	//Marks the card of the object in the given register after a reference
	//store, skipping addresses outside the old generation.
	fn add_card_marking(&self, assembler: &mut Assembler, barrier: &WriteBarrierLayout, object: Register) {
		//Skip when the address is below the old generation
		assembler.move_long(Register::Cx, barrier.heap_start as i64);
		assembler.compare(Register::Cx, object, DataSize::Size64);
		let first_jump = assembler.size();
		assembler.jump(JumpCondition::GreaterThan, 0, false);

		//Skip when the address is above it
		assembler.move_long(Register::Cx, barrier.heap_end as i64);
		assembler.compare(Register::Cx, object, DataSize::Size64);
		let second_jump = assembler.size();
		assembler.jump(JumpCondition::LessThan, 0, false);

		//Card index: (address - heap start) / card size
		assembler.move_long(Register::Cx, barrier.heap_start as i64);
		assembler.sub(Register::Ax, Register::Cx, false);
		assembler.move_int(Register::Cx, barrier.card_size as i32);
		assembler.bitwise_xor(Register::Dx, Register::Dx, true);
		assembler.div(Register::Cx, false, true);

		//card_table[index] = 1
		assembler.move_long(Register::Cx, barrier.card_table as i64);
		assembler.add(Register::Ax, Register::Cx, false);
		assembler.move_byte_to_memory(MemoryOperand::new(Register::Ax), 1);

		let end = assembler.size();
		set_int(assembler.data(), first_jump + 2, (end - first_jump - CONDITIONAL_JUMP_SIZE) as i32);
		set_int(assembler.data(), second_jump + 2, (end - second_jump - CONDITIONAL_JUMP_SIZE) as i32);
	}

	//Emits the lazy compilation prefix: a call into the runtime compiler
	//carrying the caller, the (patched-in later) call offset and the bounds
	//of this prefix so the runtime can overwrite it with a jump once the
	//callee exists. Returns the patch site for the call offset.
	fn generate_compile_call(
		&self,
		data: &mut FunctionCompilationData,
		func_to_call: &FunctionDefinition,
	) -> usize {
		let function = data.function as *const ManagedFunction as i64;
		let callee = func_to_call as *const FunctionDefinition as i64;
		let mut assembler = Assembler::new(&mut data.code);
		let check_start = assembler.size();

		#[cfg(windows)]
		let call_offset_index = {
			let shadow = self.calling_convention.shadow_stack_size();
			assembler.move_long(Register::Cx, function);
			assembler.move_int(Register::Dx, 0);
			let call_offset_index = assembler.size() - 4;
			assembler.move_int(Register::R8, check_start as i32);
			assembler.move_int(Register::R9, 0);
			let check_end_index = assembler.size() - 4;

			//The fifth argument goes on the stack, padded for alignment
			assembler.sub_int(Register::Sp, 8);
			assembler.move_long(Register::R10, callee);
			assembler.push(Register::R10);
			assembler.sub_int(Register::Sp, shadow);

			assembler.move_long(Register::Ax, runtime::compile_function as *const u8 as i64);
			assembler.call_register(Register::Ax);
			assembler.add_int(Register::Sp, 16 + shadow);

			let check_end = assembler.size();
			set_int(assembler.data(), check_end_index, check_end as i32);
			call_offset_index
		};

		#[cfg(not(windows))]
		let call_offset_index = {
			assembler.move_long(Register::Di, function);
			assembler.move_int(Register::Si, 0);
			let call_offset_index = assembler.size() - 4;
			assembler.move_int(Register::Dx, check_start as i32);
			assembler.move_int(Register::Cx, 0);
			let check_end_index = assembler.size() - 4;
			assembler.move_long(Register::R8, callee);

			assembler.move_long(Register::Ax, runtime::compile_function as *const u8 as i64);
			assembler.call_register(Register::Ax);

			let check_end = assembler.size();
			set_int(assembler.data(), check_end_index, check_end as i32);
			call_offset_index
		};

		call_offset_index
	}

	/// Emits the native code for one verified instruction.
	#[allow(clippy::too_many_arguments)]
	pub fn generate_instruction<'l>(
		&self,
		data: &mut FunctionCompilationData<'l>,
		operand_stack: &mut OperandStack<'_, 'l>,
		env: &CompilationEnvironment<'_, 'l>,
		compiled: &FxHashMap<String, FunctionCompilationData<'l>>,
		instruction: &Instruction<'l>,
		instruction_index: usize,
	) {
		data.instruction_offsets.push(data.code.len());
		let function = data.function;

		match instruction.opcode() {
			OpCode::Nop => Assembler::new(&mut data.code).nop(),
			OpCode::Pop => operand_stack.pop_register(&mut Assembler::new(&mut data.code), Register::Ax),
			OpCode::Duplicate => operand_stack.duplicate(&mut Assembler::new(&mut data.code)),

			OpCode::LoadInt(value) => operand_stack.push_int(&mut Assembler::new(&mut data.code), *value),
			OpCode::LoadFloat(value) => {
				//The float is pushed as its raw bit pattern
				operand_stack.push_int(&mut Assembler::new(&mut data.code), value.to_bits() as i32);
			}
			OpCode::LoadChar(value) => operand_stack.push_int(&mut Assembler::new(&mut data.code), *value as i32),
			OpCode::LoadTrue => operand_stack.push_int(&mut Assembler::new(&mut data.code), 1),
			OpCode::LoadFalse => operand_stack.push_int(&mut Assembler::new(&mut data.code), 0),
			OpCode::LoadNull => operand_stack.push_int(&mut Assembler::new(&mut data.code), 0),

			OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
				let mut assembler = Assembler::new(&mut data.code);
				let is_float = instruction.operand_types()[0].is_primitive(Primitive::Float);

				if is_float {
					operand_stack.pop_float_register(&mut assembler, FloatRegister::Xmm1);
					operand_stack.pop_float_register(&mut assembler, FloatRegister::Xmm0);

					match instruction.opcode() {
						OpCode::Add => assembler.float_add(FloatRegister::Xmm0, FloatRegister::Xmm1),
						OpCode::Sub => assembler.float_sub(FloatRegister::Xmm0, FloatRegister::Xmm1),
						OpCode::Mul => assembler.float_mult(FloatRegister::Xmm0, FloatRegister::Xmm1),
						_ => assembler.float_div(FloatRegister::Xmm0, FloatRegister::Xmm1),
					}

					operand_stack.push_float_register(&mut assembler, FloatRegister::Xmm0);
				} else {
					operand_stack.pop_register(&mut assembler, Register::Cx);
					operand_stack.pop_register(&mut assembler, Register::Ax);

					match instruction.opcode() {
						OpCode::Add => assembler.add(Register::Ax, Register::Cx, true),
						OpCode::Sub => assembler.sub(Register::Ax, Register::Cx, true),
						OpCode::Mul => assembler.mult(Register::Ax, Register::Cx, true),
						_ => {
							//Truncated signed division: sign extend, then idiv
							assembler.sign_extend_ax(DataSize::Size32);
							assembler.div(Register::Cx, true, false);
						}
					}

					operand_stack.push_register(&mut assembler, Register::Ax);
				}
			}

			OpCode::And | OpCode::Or => {
				let mut assembler = Assembler::new(&mut data.code);
				operand_stack.pop_register(&mut assembler, Register::Cx);
				operand_stack.pop_register(&mut assembler, Register::Ax);

				match instruction.opcode() {
					OpCode::And => assembler.bitwise_and(Register::Ax, Register::Cx, false),
					_ => assembler.bitwise_or(Register::Ax, Register::Cx, false),
				}

				operand_stack.push_register(&mut assembler, Register::Ax);
			}
			OpCode::Not => {
				let mut assembler = Assembler::new(&mut data.code);
				operand_stack.pop_register(&mut assembler, Register::Ax);
				assembler.bitwise_not(Register::Ax, false);
				//Clear the other bits, so that the value is either 0 or 1
				assembler.and_int(Register::Ax, 1);
				operand_stack.push_register(&mut assembler, Register::Ax);
			}

			OpCode::ConvertIntToFloat => {
				let mut assembler = Assembler::new(&mut data.code);
				operand_stack.pop_register(&mut assembler, Register::Ax);
				assembler.convert_int_to_float(FloatRegister::Xmm0, Register::Ax);
				operand_stack.push_float_register(&mut assembler, FloatRegister::Xmm0);
			}
			OpCode::ConvertFloatToInt => {
				let mut assembler = Assembler::new(&mut data.code);
				operand_stack.pop_float_register(&mut assembler, FloatRegister::Xmm0);
				assembler.convert_float_to_int(Register::Ax, FloatRegister::Xmm0);
				operand_stack.push_register(&mut assembler, Register::Ax);
			}

			OpCode::CompareEqual
			| OpCode::CompareNotEqual
			| OpCode::CompareGreater
			| OpCode::CompareGreaterOrEqual
			| OpCode::CompareLess
			| OpCode::CompareLessOrEqual => {
				let mut assembler = Assembler::new(&mut data.code);
				let unsigned = Self::emit_comparison(&mut assembler, operand_stack, instruction);

				let condition = match instruction.opcode() {
					OpCode::CompareEqual => JumpCondition::Equal,
					OpCode::CompareNotEqual => JumpCondition::NotEqual,
					OpCode::CompareGreater => JumpCondition::GreaterThan,
					OpCode::CompareGreaterOrEqual => JumpCondition::GreaterThanOrEqual,
					OpCode::CompareLess => JumpCondition::LessThan,
					_ => JumpCondition::LessThanOrEqual,
				};

				let compare_jump = assembler.size();
				assembler.jump(condition, 0, unsigned);

				//Both branches write the same reserved slot
				operand_stack.reserve_space();

				let false_branch = assembler.size();
				operand_stack.write_int(&mut assembler, 0);
				let skip_jump = assembler.size();
				assembler.jump(JumpCondition::Always, 0, false);

				let true_branch = assembler.size();
				operand_stack.write_int(&mut assembler, 1);

				let end = assembler.size();
				set_int(assembler.data(), skip_jump + 1, (end - true_branch) as i32);
				set_int(assembler.data(), compare_jump + 2, (true_branch - false_branch) as i32);
			}

			OpCode::LoadLocal(index) | OpCode::StoreLocal(index) => {
				let mut assembler = Assembler::new(&mut data.code);
				let offset = -(REGISTER_SIZE as i32)
					* (1 + *index as i32 + function.definition().num_parameters() as i32);
				let slot = MemoryOperand::with_offset(Register::Bp, offset);

				if matches!(instruction.opcode(), OpCode::LoadLocal(_)) {
					assembler.move_from_memory(Register::Ax, slot, DataSize::Size64);
					operand_stack.push_register(&mut assembler, Register::Ax);
				} else {
					operand_stack.pop_register(&mut assembler, Register::Ax);
					assembler.move_to_memory(slot, Register::Ax, DataSize::Size64);
				}
			}
			OpCode::LoadArg(index) => {
				let mut assembler = Assembler::new(&mut data.code);
				let slot = MemoryOperand::with_offset(Register::Bp, -(REGISTER_SIZE as i32) * (1 + *index as i32));
				assembler.move_from_memory(Register::Ax, slot, DataSize::Size64);
				operand_stack.push_register(&mut assembler, Register::Ax);
			}

			OpCode::Branch(target) => {
				let mut assembler = Assembler::new(&mut data.code);
				assembler.jump(JumpCondition::Always, 0, false);

				//The native target is not known yet; the linker patches it
				data.unresolved_branches.insert(
					data.code.len() - JUMP_SIZE,
					BranchTarget { target: *target as usize, instruction_size: JUMP_SIZE },
				);
			}
			OpCode::BranchTrue(target) | OpCode::BranchFalse(target) => {
				let mut assembler = Assembler::new(&mut data.code);
				operand_stack.pop_register(&mut assembler, Register::Ax);
				assembler.compare_int(Register::Ax, 0, true);

				let condition = match instruction.opcode() {
					OpCode::BranchTrue(_) => JumpCondition::NotEqual,
					_ => JumpCondition::Equal,
				};
				assembler.jump(condition, 0, false);

				data.unresolved_branches.insert(
					data.code.len() - CONDITIONAL_JUMP_SIZE,
					BranchTarget { target: *target as usize, instruction_size: CONDITIONAL_JUMP_SIZE },
				);
			}
			OpCode::BranchEqual(target)
			| OpCode::BranchNotEqual(target)
			| OpCode::BranchGreater(target)
			| OpCode::BranchGreaterOrEqual(target)
			| OpCode::BranchLess(target)
			| OpCode::BranchLessOrEqual(target) => {
				let mut assembler = Assembler::new(&mut data.code);
				let unsigned = Self::emit_comparison(&mut assembler, operand_stack, instruction);

				let condition = match instruction.opcode() {
					OpCode::BranchEqual(_) => JumpCondition::Equal,
					OpCode::BranchNotEqual(_) => JumpCondition::NotEqual,
					OpCode::BranchGreater(_) => JumpCondition::GreaterThan,
					OpCode::BranchGreaterOrEqual(_) => JumpCondition::GreaterThanOrEqual,
					OpCode::BranchLess(_) => JumpCondition::LessThan,
					_ => JumpCondition::LessThanOrEqual,
				};

				assembler.jump(condition, 0, unsigned);
				data.unresolved_branches.insert(
					data.code.len() - CONDITIONAL_JUMP_SIZE,
					BranchTarget { target: *target as usize, instruction_size: CONDITIONAL_JUMP_SIZE },
				);
			}

			OpCode::Ret => {
				if env.print_stack_frames {
					let function_address = function as *const ManagedFunction as i64;
					let mut assembler = Assembler::new(&mut data.code);
					assembler.move_reg(Register::Di, Register::Bp);
					assembler.move_long(Register::Si, function_address);
					self.generate_runtime_call(&mut assembler, runtime::print_stack_frame as *const u8);
				}

				let mut assembler = Assembler::new(&mut data.code);
				self.calling_convention.make_return_value(function, operand_stack, &mut assembler);

				assembler.move_reg(Register::Sp, Register::Bp);
				assembler.pop(Register::Bp);
				assembler.ret();
			}

			OpCode::Call(site) => {
				self.generate_call(data, operand_stack, env, compiled, site, instruction_index, false);
			}
			OpCode::CallInstance(site) | OpCode::CallVirtual(site) => {
				self.generate_call(data, operand_stack, env, compiled, site, instruction_index, true);
			}
			OpCode::NewObject(site) => {
				self.generate_new_object(data, operand_stack, env, compiled, site, instruction_index);
			}

			OpCode::NewArray(element_type) => {
				let array_type = env.types.get_type(&array_type_name(element_type)).unwrap();

				if env.gc_enabled {
					self.generate_gc_poll(data, instruction_index);
				}

				let FunctionCompilationData { code, unresolved_native_branches, .. } = data;
				let mut assembler = Assembler::new(code);

				//The array type pointer and the requested length
				assembler.move_long(Register::Di, array_type as *const Type as i64);
				operand_stack.pop_register(&mut assembler, Register::Si);
				self.exception_handling.add_array_creation_check(&mut assembler, unresolved_native_branches);

				self.generate_runtime_call(&mut assembler, runtime::new_array as *const u8);
				operand_stack.push_register(&mut assembler, Register::Ax);
			}
			OpCode::StoreElement(element_type) => {
				let FunctionCompilationData { code, unresolved_native_branches, .. } = data;
				let mut assembler = Assembler::new(code);

				operand_stack.pop_register(&mut assembler, Register::Dx); //the value
				operand_stack.pop_register(&mut assembler, Register::R10); //the index
				operand_stack.pop_register(&mut assembler, Register::Ax); //the array

				self.exception_handling.add_null_check(&mut assembler, unresolved_native_branches, Register::Ax);
				self.exception_handling.add_array_bounds_check(&mut assembler, unresolved_native_branches);

				//The address of the element
				assembler.mult_int(Register::R10, element_type.size() as i32);
				assembler.add(Register::Ax, Register::R10, false);
				assembler.add_int(Register::Ax, ARRAY_LENGTH_SIZE as i32);

				let size = DataSize::of(element_type.size());
				assembler.move_to_memory(MemoryOperand::new(Register::Ax), Register::Dx, size);

				if element_type.is_reference() {
					if let Some(barrier) = &env.write_barrier {
						self.add_card_marking(&mut assembler, barrier, Register::Ax);
					}
				}
			}
			OpCode::LoadElement(element_type) => {
				let FunctionCompilationData { code, unresolved_native_branches, .. } = data;
				let mut assembler = Assembler::new(code);

				operand_stack.pop_register(&mut assembler, Register::R10); //the index
				operand_stack.pop_register(&mut assembler, Register::Ax); //the array

				self.exception_handling.add_null_check(&mut assembler, unresolved_native_branches, Register::Ax);
				self.exception_handling.add_array_bounds_check(&mut assembler, unresolved_native_branches);

				assembler.mult_int(Register::R10, element_type.size() as i32);
				assembler.add(Register::Ax, Register::R10, false);
				assembler.add_int(Register::Ax, ARRAY_LENGTH_SIZE as i32);

				let size = DataSize::of(element_type.size());
				assembler.move_from_memory(Register::Cx, MemoryOperand::new(Register::Ax), size);
				operand_stack.push_register(&mut assembler, Register::Cx);
			}
			OpCode::LoadArrayLength => {
				let FunctionCompilationData { code, unresolved_native_branches, .. } = data;
				let mut assembler = Assembler::new(code);

				operand_stack.pop_register(&mut assembler, Register::Ax);
				self.exception_handling.add_null_check(&mut assembler, unresolved_native_branches, Register::Ax);

				//The length prefix is a 32-bit value at the array start
				assembler.move_from_memory(Register::Ax, MemoryOperand::new(Register::Ax), DataSize::Size32);
				operand_stack.push_register(&mut assembler, Register::Ax);
			}
			OpCode::LoadField(reference) | OpCode::StoreField(reference) => {
				self.generate_field_access(data, operand_stack, env, reference, matches!(instruction.opcode(), OpCode::StoreField(_)));
			}
			OpCode::LoadString(value) => {
				if env.gc_enabled {
					self.generate_gc_poll(data, instruction_index);
				}

				let mut assembler = Assembler::new(&mut data.code);
				assembler.move_long(Register::Di, value.as_ptr() as i64);
				assembler.move_int(Register::Si, value.len() as i32);
				self.generate_runtime_call(&mut assembler, runtime::new_string as *const u8);
				operand_stack.push_register(&mut assembler, Register::Ax);
			}
		}
	}

	//Pops and compares the top two operands. Returns whether the following
	//jump must use unsigned condition codes.
	fn emit_comparison(assembler: &mut Assembler, operand_stack: &mut OperandStack, instruction: &Instruction) -> bool {
		let operand_type = instruction.operand_types()[0];

		if operand_type.is_primitive(Primitive::Float) {
			operand_stack.pop_float_register(assembler, FloatRegister::Xmm1);
			operand_stack.pop_float_register(assembler, FloatRegister::Xmm0);
			assembler.float_compare(FloatRegister::Xmm0, FloatRegister::Xmm1);
			return true;
		}

		operand_stack.pop_register(assembler, Register::Cx);
		operand_stack.pop_register(assembler, Register::Ax);

		//References compare the full pointer width; everything else is a
		//32-bit signed comparison
		let size = match operand_type.is_reference() {
			true => DataSize::Size64,
			false => DataSize::Size32,
		};
		assembler.compare(Register::Ax, Register::Cx, size);
		false
	}

	#[allow(clippy::too_many_arguments)]
	fn generate_call<'l>(
		&self,
		data: &mut FunctionCompilationData<'l>,
		operand_stack: &mut OperandStack<'_, 'l>,
		env: &CompilationEnvironment<'_, 'l>,
		compiled: &FxHashMap<String, FunctionCompilationData<'l>>,
		site: &CallSite<'l>,
		instruction_index: usize,
		is_instance: bool,
	) {
		let signature = match is_instance {
			false => FunctionSignature::function(site.name, site.parameters),
			true => FunctionSignature::member_function(site.class_type.get().unwrap(), site.name, site.parameters),
		};

		if let Some(expansion) = self.macros.get(&signature) {
			expansion(self, data, instruction_index);
			return;
		}

		let func_to_call = env.binder.get_function(&signature).unwrap();
		let needs_to_compile =
			env.lazy_compilation && func_to_call.is_managed() && !compiled.contains_key(&signature);

		let mut call_offset_index = 0;
		if needs_to_compile && !func_to_call.is_virtual() {
			call_offset_index = self.generate_compile_call(data, func_to_call);
		}

		self.push_call_stack_frame(data, env, instruction_index);

		let first_argument = MemoryOperand::with_offset(
			Register::Bp,
			operand_stack.operand_offset(operand_stack.top_index() - func_to_call.num_parameters() as i32 + 1),
		);

		let FunctionCompilationData { code, unresolved_native_branches, unresolved_calls, .. } = data;
		let mut assembler = Assembler::new(code);

		if is_instance {
			assembler.move_from_memory(Register::Ax, first_argument, DataSize::Size64);
			self.exception_handling.add_null_check(&mut assembler, unresolved_native_branches, Register::Ax);
		}

		//Virtual targets resolve through the receiver's table at runtime,
		//compiling the slot on first use
		if func_to_call.is_managed() && func_to_call.is_virtual() {
			let class_metadata = func_to_call.class_type().unwrap().metadata().unwrap();
			let slot = class_metadata
				.virtual_function_index(func_to_call.member_name(), &func_to_call.parameters()[1..])
				.unwrap();

			assembler.move_from_memory(Register::Di, first_argument, DataSize::Size64);
			assembler.move_int(Register::Si, slot as i32);
			self.generate_runtime_call(&mut assembler, runtime::get_virtual_function_address as *const u8);
			assembler.move_reg(VIRTUAL_CALL_TARGET, Register::Ax);
		}

		let alignment = self.calling_convention.stack_alignment(func_to_call);
		if alignment > 0 {
			assembler.sub_int(Register::Sp, alignment);
		}

		self.calling_convention.call_function_arguments(operand_stack, func_to_call, &mut assembler);

		let shadow = self.calling_convention.shadow_stack_size();
		if shadow > 0 {
			assembler.sub_int(Register::Sp, shadow);
		}

		if func_to_call.is_managed() && !func_to_call.is_virtual() {
			if !needs_to_compile {
				//Patched with the callee entry point by the linker
				unresolved_calls.push(UnresolvedFunctionCall {
					call_type: FunctionCallType::Relative,
					offset: assembler.size(),
					function: func_to_call,
				});
			} else {
				let call_offset = assembler.size();
				set_int(assembler.data(), call_offset_index, call_offset as i32);
			}

			assembler.call_relative(0);
		} else if func_to_call.is_managed() {
			assembler.call_register(VIRTUAL_CALL_TARGET);
		} else {
			//External functions sit beyond a 32-bit displacement; call
			//through a register, patched later when not yet bound
			if func_to_call.entry_point().is_null() {
				unresolved_calls.push(UnresolvedFunctionCall {
					call_type: FunctionCallType::Absolute,
					offset: assembler.size(),
					function: func_to_call,
				});
			}

			assembler.move_long(Register::Ax, func_to_call.entry_point() as i64);
			assembler.call_register(Register::Ax);
		}

		let mut assembler = Assembler::new(&mut data.code);
		if alignment + shadow > 0 {
			assembler.add_int(Register::Sp, alignment + shadow);
		}

		self.calling_convention.handle_return_value(operand_stack, func_to_call, &mut assembler);
		self.pop_call_stack_frame(data, env);
	}

	fn generate_new_object<'l>(
		&self,
		data: &mut FunctionCompilationData<'l>,
		operand_stack: &mut OperandStack<'_, 'l>,
		env: &CompilationEnvironment<'_, 'l>,
		compiled: &FxHashMap<String, FunctionCompilationData<'l>>,
		site: &CallSite<'l>,
		instruction_index: usize,
	) {
		let class_type = site.class_type.get().unwrap();
		let signature = FunctionSignature::member_function(class_type, site.name, site.parameters);
		let constructor = env.binder.get_function(&signature).unwrap();

		if env.gc_enabled {
			self.generate_gc_poll(data, instruction_index);
		}

		self.push_call_stack_frame(data, env, instruction_index);

		let needs_to_compile = env.lazy_compilation && !compiled.contains_key(&signature);
		let mut call_offset_index = 0;
		if needs_to_compile {
			call_offset_index = self.generate_compile_call(data, constructor);
		}

		let FunctionCompilationData { code, unresolved_calls, .. } = data;
		let mut assembler = Assembler::new(code);

		//Allocate the object
		assembler.move_long(Register::Di, class_type as *const Type as i64);
		self.generate_runtime_call(&mut assembler, runtime::new_class as *const u8);
		assembler.move_reg(Register::R10, Register::Ax);

		let alignment = self.calling_convention.stack_alignment(constructor);
		if alignment > 0 {
			assembler.sub_int(Register::Sp, alignment);
		}

		//The receiver, then the remaining constructor arguments
		assembler.move_reg(Register::Di, Register::Ax);
		for (i, parameter) in site.parameters.iter().enumerate().rev() {
			self.calling_convention.call_function_argument(operand_stack, i + 1, parameter, &mut assembler);
		}

		//The reference becomes an operand before the constructor runs
		assembler.move_reg(Register::Ax, Register::R10);
		operand_stack.push_register(&mut assembler, Register::Ax);

		let shadow = self.calling_convention.shadow_stack_size();
		if shadow > 0 {
			assembler.sub_int(Register::Sp, shadow);
		}

		if !needs_to_compile {
			unresolved_calls.push(UnresolvedFunctionCall {
				call_type: FunctionCallType::Relative,
				offset: assembler.size(),
				function: constructor,
			});
		} else {
			let call_offset = assembler.size();
			set_int(assembler.data(), call_offset_index, call_offset as i32);
		}
		assembler.call_relative(0);

		if alignment + shadow > 0 {
			assembler.add_int(Register::Sp, alignment + shadow);
		}

		self.calling_convention.handle_return_value(operand_stack, constructor, &mut assembler);
		self.pop_call_stack_frame(data, env);
	}

	fn generate_field_access<'l>(
		&self,
		data: &mut FunctionCompilationData<'l>,
		operand_stack: &mut OperandStack<'_, 'l>,
		env: &CompilationEnvironment<'_, 'l>,
		reference: &FieldReference<'l>,
		is_store: bool,
	) {
		let metadata = env.classes.get(reference.class_name).unwrap();
		let field = metadata.field(reference.field_name).unwrap();
		let field_offset = field.offset() as i32;
		let size = DataSize::of(field.field_type().size());

		let FunctionCompilationData { code, unresolved_native_branches, .. } = data;
		let mut assembler = Assembler::new(code);

		if !is_store {
			operand_stack.pop_register(&mut assembler, Register::Ax);
			self.exception_handling.add_null_check(&mut assembler, unresolved_native_branches, Register::Ax);

			assembler.add_int(Register::Ax, field_offset);
			assembler.move_from_memory(Register::Cx, MemoryOperand::new(Register::Ax), size);
			operand_stack.push_register(&mut assembler, Register::Cx);
		} else {
			operand_stack.pop_register(&mut assembler, Register::Dx); //the value
			operand_stack.pop_register(&mut assembler, Register::Ax); //the object
			self.exception_handling.add_null_check(&mut assembler, unresolved_native_branches, Register::Ax);

			assembler.move_to_memory(MemoryOperand::with_offset(Register::Ax, field_offset), Register::Dx, size);

			if field.field_type().is_reference() {
				if let Some(barrier) = &env.write_barrier {
					self.add_card_marking(&mut assembler, barrier, Register::Ax);
				}
			}
		}
	}
}
