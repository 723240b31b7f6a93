use crate::compiler::assembler::{Assembler, DataSize, FloatRegister, MemoryOperand, Register};
use crate::model::ManagedFunction;
use crate::REGISTER_SIZE;

/// The operand stack of a function being compiled. Operands live in reserved
/// frame slots below the locals, addressed relative to the frame pointer, so
/// the garbage collector can recompute every slot address from the frame
/// pointer and the verifier's snapshot length.
///
/// Slot `i` is `[rbp - 8 * (1 + num_parameters + num_locals + i)]`; pushes
/// and pops move a logical top index and emit plain moves.
pub struct OperandStack<'f, 'l> {
	function: &'f ManagedFunction<'l>,
	top_index: i32,
}

impl<'f, 'l> OperandStack<'f, 'l> {
	pub fn new(function: &'f ManagedFunction<'l>) -> Self {
		OperandStack { function, top_index: -1 }
	}

	#[inline]
	pub fn top_index(&self) -> i32 {
		self.top_index
	}

	/// The frame pointer offset of the operand slot with the given index.
	pub fn operand_offset(&self, index: i32) -> i32 {
		let slot = 1 + self.function.definition().num_parameters() as i32 + self.function.num_locals() as i32 + index;
		-(REGISTER_SIZE as i32) * slot
	}

	fn top_operand(&self) -> MemoryOperand {
		debug_assert!(self.top_index >= 0, "operand stack underflow");
		MemoryOperand::with_offset(Register::Bp, self.operand_offset(self.top_index))
	}

	/// Reserves the next slot without writing it. Used when two emitted
	/// branches each write the same slot.
	pub fn reserve_space(&mut self) {
		self.top_index += 1;
	}

	pub fn duplicate(&mut self, assembler: &mut Assembler) {
		let source = self.top_operand();
		assembler.move_from_memory(Register::Ax, source, DataSize::Size64);
		self.top_index += 1;
		assembler.move_to_memory(self.top_operand(), Register::Ax, DataSize::Size64);
	}

	pub fn push_register(&mut self, assembler: &mut Assembler, register: Register) {
		self.top_index += 1;
		assembler.move_to_memory(self.top_operand(), register, DataSize::Size64);
	}

	pub fn push_float_register(&mut self, assembler: &mut Assembler, register: FloatRegister) {
		self.top_index += 1;
		assembler.float_move_to_memory(self.top_operand(), register);
	}

	pub fn pop_register(&mut self, assembler: &mut Assembler, register: Register) {
		assembler.move_from_memory(register, self.top_operand(), DataSize::Size64);
		self.top_index -= 1;
	}

	pub fn pop_float_register(&mut self, assembler: &mut Assembler, register: FloatRegister) {
		assembler.float_move_from_memory(register, self.top_operand());
		self.top_index -= 1;
	}

	pub fn push_int(&mut self, assembler: &mut Assembler, value: i32) {
		self.top_index += 1;
		self.write_int(assembler, value);
	}

	/// Writes an immediate into the current top slot without moving the top.
	pub fn write_int(&mut self, assembler: &mut Assembler, value: i32) {
		assembler.move_int_to_memory(self.top_operand(), value);
	}
}

#[cfg(test)]
mod tests {
	use bumpalo::Bump;

	use super::*;
	use crate::loader::{define_functions, load_managed_functions, parse_assembly};
	use crate::model::{Binder, ClassProvider, TypeProvider};

	#[test]
	fn slot_addressing() {
		let bump = Bump::new();
		let assembly = parse_assembly("func f(Int Int) Int { .locals 1 .local 0 Int ldarg 0 ret }").unwrap();

		let classes = ClassProvider::new();
		let types = TypeProvider::new();
		let mut binder = Binder::new();
		define_functions(&assembly, &mut binder, &classes, &types, &bump).unwrap();
		let functions = load_managed_functions(&assembly, &binder, &classes, &types, &bump).unwrap();
		let function = &functions[0].1;

		//2 parameters + 1 local: operand slot 0 sits below them
		let stack = OperandStack::new(function);
		assert_eq!(stack.operand_offset(0), -32);
		assert_eq!(stack.operand_offset(1), -40);
	}

	#[test]
	fn pushes_and_pops_move_the_top() {
		let bump = Bump::new();
		let assembly = parse_assembly("func f() Int { .locals 0 ldint 1 ret }").unwrap();

		let classes = ClassProvider::new();
		let types = TypeProvider::new();
		let mut binder = Binder::new();
		define_functions(&assembly, &mut binder, &classes, &types, &bump).unwrap();
		let functions = load_managed_functions(&assembly, &binder, &classes, &types, &bump).unwrap();
		let function = &functions[0].1;

		let mut code = Vec::new();
		let mut assembler = Assembler::new(&mut code);
		let mut stack = OperandStack::new(function);

		stack.push_register(&mut assembler, Register::Ax);
		assert_eq!(stack.top_index(), 0);
		//mov [rbp-8], rax
		assert_eq!(code, [0x48, 0x89, 0x45, 0xF8]);

		let mut assembler = Assembler::new(&mut code);
		stack.pop_register(&mut assembler, Register::Cx);
		assert_eq!(stack.top_index(), -1);
		//mov rcx, [rbp-8]
		assert_eq!(&code[4..], [0x48, 0x8B, 0x4D, 0xF8]);
	}
}
