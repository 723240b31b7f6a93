use crate::compiler::assembler::{Assembler, DataSize, FloatRegister, MemoryOperand, Register};
use crate::compiler::operands::OperandStack;
use crate::model::{FunctionDefinition, ManagedFunction, Primitive, Type};
use crate::REGISTER_SIZE;

/// How native arguments and return values move between the operand stack and
/// machine registers. One implementation per supported platform ABI,
/// selected when the virtual machine starts.
pub trait CallingConvention {
	/// Spills the incoming argument registers into their frame slots in the
	/// function prologue.
	fn move_args_to_stack(&self, function: &ManagedFunction, assembler: &mut Assembler);

	/// Pops the callee's arguments off the operand stack into the argument
	/// registers, honoring the int/float distinction per parameter.
	fn call_function_arguments(
		&self,
		operand_stack: &mut OperandStack,
		callee: &FunctionDefinition,
		assembler: &mut Assembler,
	);

	/// Pops a single argument into the register for the given position.
	fn call_function_argument(
		&self,
		operand_stack: &mut OperandStack,
		index: usize,
		parameter_type: &Type,
		assembler: &mut Assembler,
	);

	/// Pushes the return register onto the operand stack after a call.
	fn handle_return_value(
		&self,
		operand_stack: &mut OperandStack,
		callee: &FunctionDefinition,
		assembler: &mut Assembler,
	);

	/// Pops the return value into the return register before `ret`.
	fn make_return_value(&self, function: &ManagedFunction, operand_stack: &mut OperandStack, assembler: &mut Assembler);

	/// The shadow space the caller must reserve immediately before a call.
	fn shadow_stack_size(&self) -> i32;

	/// Any extra stack alignment correction required around a call.
	fn stack_alignment(&self, callee: &FunctionDefinition) -> i32;

	/// The number of register-passed arguments this convention supports.
	fn num_register_arguments(&self) -> usize;
}

fn is_float(ty: &Type) -> bool {
	ty.is_primitive(Primitive::Float)
}

fn spill_arguments(
	function: &ManagedFunction,
	assembler: &mut Assembler,
	int_registers: &[Register],
	float_registers: &[FloatRegister],
) {
	let parameters = function.definition().parameters();

	for (i, parameter) in parameters.iter().enumerate().take(int_registers.len()) {
		let slot = MemoryOperand::with_offset(Register::Bp, -(REGISTER_SIZE as i32) * (i as i32 + 1));
		if is_float(parameter) {
			assembler.float_move_to_memory(slot, float_registers[i]);
		} else {
			assembler.move_to_memory(slot, int_registers[i], DataSize::Size64);
		}
	}
}

fn pop_argument(
	operand_stack: &mut OperandStack,
	index: usize,
	parameter_type: &Type,
	assembler: &mut Assembler,
	int_registers: &[Register],
	float_registers: &[FloatRegister],
) {
	if is_float(parameter_type) {
		operand_stack.pop_float_register(assembler, float_registers[index]);
	} else {
		operand_stack.pop_register(assembler, int_registers[index]);
	}
}

/// The System V AMD64 convention: integer arguments in rdi, rsi, rdx, rcx,
/// r8, r9; floats in xmm0-xmm5; no shadow space.
pub struct SystemVCallingConvention;

impl SystemVCallingConvention {
	pub const INT_ARGUMENTS: [Register; 6] =
		[Register::Di, Register::Si, Register::Dx, Register::Cx, Register::R8, Register::R9];
	pub const FLOAT_ARGUMENTS: [FloatRegister; 6] = [
		FloatRegister::Xmm0,
		FloatRegister::Xmm1,
		FloatRegister::Xmm2,
		FloatRegister::Xmm3,
		FloatRegister::Xmm4,
		FloatRegister::Xmm5,
	];
}

impl CallingConvention for SystemVCallingConvention {
	fn move_args_to_stack(&self, function: &ManagedFunction, assembler: &mut Assembler) {
		spill_arguments(function, assembler, &Self::INT_ARGUMENTS, &Self::FLOAT_ARGUMENTS);
	}

	fn call_function_arguments(
		&self,
		operand_stack: &mut OperandStack,
		callee: &FunctionDefinition,
		assembler: &mut Assembler,
	) {
		//The topmost operand is the last argument
		for (i, parameter) in callee.parameters().iter().enumerate().rev() {
			self.call_function_argument(operand_stack, i, parameter, assembler);
		}
	}

	fn call_function_argument(
		&self,
		operand_stack: &mut OperandStack,
		index: usize,
		parameter_type: &Type,
		assembler: &mut Assembler,
	) {
		pop_argument(operand_stack, index, parameter_type, assembler, &Self::INT_ARGUMENTS, &Self::FLOAT_ARGUMENTS);
	}

	fn handle_return_value(
		&self,
		operand_stack: &mut OperandStack,
		callee: &FunctionDefinition,
		assembler: &mut Assembler,
	) {
		let return_type = callee.return_type();
		if return_type.is_primitive(Primitive::Void) {
			return;
		}

		if is_float(return_type) {
			operand_stack.push_float_register(assembler, FloatRegister::Xmm0);
		} else {
			operand_stack.push_register(assembler, Register::Ax);
		}
	}

	fn make_return_value(&self, function: &ManagedFunction, operand_stack: &mut OperandStack, assembler: &mut Assembler) {
		let return_type = function.definition().return_type();
		if return_type.is_primitive(Primitive::Void) {
			return;
		}

		if is_float(return_type) {
			operand_stack.pop_float_register(assembler, FloatRegister::Xmm0);
		} else {
			operand_stack.pop_register(assembler, Register::Ax);
		}
	}

	fn shadow_stack_size(&self) -> i32 {
		0
	}

	fn stack_alignment(&self, _callee: &FunctionDefinition) -> i32 {
		0
	}

	fn num_register_arguments(&self) -> usize {
		Self::INT_ARGUMENTS.len()
	}
}

/// The Windows x64 convention: integer arguments in rcx, rdx, r8, r9; floats
/// in xmm0-xmm3; 32 bytes of shadow space reserved by the caller.
pub struct WindowsCallingConvention;

impl WindowsCallingConvention {
	pub const INT_ARGUMENTS: [Register; 4] = [Register::Cx, Register::Dx, Register::R8, Register::R9];
	pub const FLOAT_ARGUMENTS: [FloatRegister; 4] =
		[FloatRegister::Xmm0, FloatRegister::Xmm1, FloatRegister::Xmm2, FloatRegister::Xmm3];
}

impl CallingConvention for WindowsCallingConvention {
	fn move_args_to_stack(&self, function: &ManagedFunction, assembler: &mut Assembler) {
		spill_arguments(function, assembler, &Self::INT_ARGUMENTS, &Self::FLOAT_ARGUMENTS);
	}

	fn call_function_arguments(
		&self,
		operand_stack: &mut OperandStack,
		callee: &FunctionDefinition,
		assembler: &mut Assembler,
	) {
		for (i, parameter) in callee.parameters().iter().enumerate().rev() {
			self.call_function_argument(operand_stack, i, parameter, assembler);
		}
	}

	fn call_function_argument(
		&self,
		operand_stack: &mut OperandStack,
		index: usize,
		parameter_type: &Type,
		assembler: &mut Assembler,
	) {
		pop_argument(operand_stack, index, parameter_type, assembler, &Self::INT_ARGUMENTS, &Self::FLOAT_ARGUMENTS);
	}

	fn handle_return_value(
		&self,
		operand_stack: &mut OperandStack,
		callee: &FunctionDefinition,
		assembler: &mut Assembler,
	) {
		let return_type = callee.return_type();
		if return_type.is_primitive(Primitive::Void) {
			return;
		}

		if is_float(return_type) {
			operand_stack.push_float_register(assembler, FloatRegister::Xmm0);
		} else {
			operand_stack.push_register(assembler, Register::Ax);
		}
	}

	fn make_return_value(&self, function: &ManagedFunction, operand_stack: &mut OperandStack, assembler: &mut Assembler) {
		let return_type = function.definition().return_type();
		if return_type.is_primitive(Primitive::Void) {
			return;
		}

		if is_float(return_type) {
			operand_stack.pop_float_register(assembler, FloatRegister::Xmm0);
		} else {
			operand_stack.pop_register(assembler, Register::Ax);
		}
	}

	fn shadow_stack_size(&self) -> i32 {
		32
	}

	fn stack_alignment(&self, _callee: &FunctionDefinition) -> i32 {
		0
	}

	fn num_register_arguments(&self) -> usize {
		Self::INT_ARGUMENTS.len()
	}
}

/// The convention for the platform this binary was built for.
pub fn default_calling_convention() -> Box<dyn CallingConvention> {
	#[cfg(windows)]
	{
		Box::new(WindowsCallingConvention)
	}
	#[cfg(not(windows))]
	{
		Box::new(SystemVCallingConvention)
	}
}

#[cfg(test)]
mod tests {
	use bumpalo::Bump;

	use super::*;
	use crate::loader::{define_functions, load_managed_functions, parse_assembly};
	use crate::model::{Binder, ClassProvider, TypeProvider};

	#[test]
	fn spills_mixed_arguments() {
		let bump = Bump::new();
		let assembly = parse_assembly("func f(Int Float Int) Void { .locals 0 ret }").unwrap();

		let classes = ClassProvider::new();
		let types = TypeProvider::new();
		let mut binder = Binder::new();
		define_functions(&assembly, &mut binder, &classes, &types, &bump).unwrap();
		let functions = load_managed_functions(&assembly, &binder, &classes, &types, &bump).unwrap();

		let mut code = Vec::new();
		let mut assembler = Assembler::new(&mut code);
		SystemVCallingConvention.move_args_to_stack(&functions[0].1, &mut assembler);

		assert_eq!(
			code,
			[
				0x48, 0x89, 0x7D, 0xF8, //mov [rbp-8], rdi
				0xF3, 0x0F, 0x11, 0x4D, 0xF0, //movss [rbp-16], xmm1
				0x48, 0x89, 0x55, 0xE8, //mov [rbp-24], rdx
			]
		);
	}

	#[test]
	fn pops_arguments_last_to_first() {
		let bump = Bump::new();
		let assembly = parse_assembly(
			"func f(Int Int) Void { .locals 0 ret }\n\
			 func g() Void { .locals 0 ldint 1 ldint 2 call f(Int Int) ret }",
		)
		.unwrap();

		let classes = ClassProvider::new();
		let types = TypeProvider::new();
		let mut binder = Binder::new();
		define_functions(&assembly, &mut binder, &classes, &types, &bump).unwrap();
		let functions = load_managed_functions(&assembly, &binder, &classes, &types, &bump).unwrap();

		let g = &functions.iter().find(|(signature, _)| signature == "g()").unwrap().1;
		let f = binder.get_function("f(Int Int)").unwrap();

		let mut code = Vec::new();
		let mut assembler = Assembler::new(&mut code);
		let mut operand_stack = OperandStack::new(g);
		operand_stack.reserve_space();
		operand_stack.reserve_space();

		SystemVCallingConvention.call_function_arguments(&mut operand_stack, f, &mut assembler);
		assert_eq!(operand_stack.top_index(), -1);
		assert_eq!(
			code,
			[
				0x48, 0x8B, 0x75, 0xF0, //mov rsi, [rbp-16] (argument 1, topmost)
				0x48, 0x8B, 0x7D, 0xF8, //mov rdi, [rbp-8] (argument 0)
			]
		);
	}
}
