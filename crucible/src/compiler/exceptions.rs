use std::io;

use nohash_hasher::IntMap;

use crate::compiler::assembler::{Assembler, DataSize, JumpCondition, MemoryOperand, Register, CONDITIONAL_JUMP_SIZE};
use crate::compiler::memory::MemoryManager;

/// The runtime error handler thunks. Each thunk is a short sequence in code
/// memory that calls the corresponding runtime error function; inline checks
/// end in a conditional jump to a thunk, recorded as an unresolved native
/// branch for the linker.
pub struct ExceptionHandling {
	null_check_handler: *const u8,
	array_bounds_check_handler: *const u8,
	array_creation_check_handler: *const u8,
	stack_overflow_check_handler: *const u8,
}

impl ExceptionHandling {
	/// Emits the four handler thunks into code memory.
	pub fn generate_handlers(memory: &mut MemoryManager) -> io::Result<Self> {
		let mut code = Vec::new();
		let mut offsets = [0usize; 4];

		let handlers: [*const u8; 4] = [
			crate::runtime::null_reference_error as *const u8,
			crate::runtime::array_out_of_bounds_error as *const u8,
			crate::runtime::invalid_array_creation_error as *const u8,
			crate::runtime::stack_overflow_error as *const u8,
		];

		let mut assembler = Assembler::new(&mut code);
		for (i, handler) in handlers.iter().enumerate() {
			offsets[i] = assembler.size();
			assembler.move_long(Register::Ax, *handler as i64);
			assembler.call_register(Register::Ax);
		}

		let memory = memory.allocate_writable(code.len())?;
		unsafe {
			std::ptr::copy_nonoverlapping(code.as_ptr(), memory, code.len());
		}

		Ok(ExceptionHandling {
			null_check_handler: unsafe { memory.add(offsets[0]) },
			array_bounds_check_handler: unsafe { memory.add(offsets[1]) },
			array_creation_check_handler: unsafe { memory.add(offsets[2]) },
			stack_overflow_check_handler: unsafe { memory.add(offsets[3]) },
		})
	}

	fn add_check(
		assembler: &mut Assembler,
		native_branches: &mut IntMap<usize, usize>,
		condition: JumpCondition,
		unsigned: bool,
		handler: *const u8,
	) {
		assembler.jump(condition, 0, unsigned);
		native_branches.insert(assembler.size() - CONDITIONAL_JUMP_SIZE, handler as usize);
	}

	/// Jumps to the null handler when the reference register is zero.
	pub fn add_null_check(
		&self,
		assembler: &mut Assembler,
		native_branches: &mut IntMap<usize, usize>,
		reference: Register,
	) {
		assembler.bitwise_xor(Register::Cx, Register::Cx, true);
		assembler.compare(reference, Register::Cx, DataSize::Size64);
		Self::add_check(assembler, native_branches, JumpCondition::Equal, false, self.null_check_handler);
	}

	/// Jumps to the bounds handler unless `0 <= index < length`. The array
	/// address is expected in rax and the index in r10; one unsigned
	/// comparison covers both ends.
	pub fn add_array_bounds_check(&self, assembler: &mut Assembler, native_branches: &mut IntMap<usize, usize>) {
		assembler.move_from_memory(Register::Si, MemoryOperand::new(Register::Ax), DataSize::Size32);
		assembler.compare(Register::R10, Register::Si, DataSize::Size64);
		Self::add_check(
			assembler,
			native_branches,
			JumpCondition::GreaterThanOrEqual,
			true,
			self.array_bounds_check_handler,
		);
	}

	/// Jumps to the creation handler when the requested length (in rsi) is
	/// negative.
	pub fn add_array_creation_check(&self, assembler: &mut Assembler, native_branches: &mut IntMap<usize, usize>) {
		assembler.bitwise_xor(Register::Cx, Register::Cx, true);
		assembler.compare(Register::Cx, Register::Si, DataSize::Size64);
		Self::add_check(assembler, native_branches, JumpCondition::GreaterThan, false, self.array_creation_check_handler);
	}

	/// Jumps to the overflow handler when the new call stack top (in rax)
	/// reaches the end of the call stack.
	pub fn add_stack_overflow_check(
		&self,
		assembler: &mut Assembler,
		native_branches: &mut IntMap<usize, usize>,
		call_stack_end: usize,
	) {
		assembler.move_long(Register::Cx, call_stack_end as i64);
		assembler.compare(Register::Ax, Register::Cx, DataSize::Size64);
		Self::add_check(
			assembler,
			native_branches,
			JumpCondition::GreaterThanOrEqual,
			false,
			self.stack_overflow_check_handler,
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn checks_record_native_branches() {
		let mut memory = MemoryManager::new();
		let handling = ExceptionHandling::generate_handlers(&mut memory).unwrap();

		let mut code = Vec::new();
		let mut branches = IntMap::default();
		let mut assembler = Assembler::new(&mut code);

		handling.add_null_check(&mut assembler, &mut branches, Register::Ax);
		//xor ecx, ecx; cmp rax, rcx; je <handler>
		assert_eq!(&code[..5], [0x31, 0xC9, 0x48, 0x39, 0xC8]);
		assert_eq!(code[5], 0x0F);
		assert_eq!(code[6], 0x84);
		assert_eq!(branches.len(), 1);
		assert!(branches.contains_key(&5));

		let mut assembler = Assembler::new(&mut code);
		handling.add_array_bounds_check(&mut assembler, &mut branches);
		//mov esi, [rax]; cmp r10, rsi; jae <handler>
		assert_eq!(&code[11..16], [0x8B, 0x30, 0x49, 0x39, 0xF2]);
		assert_eq!(code[17], 0x83);
		assert_eq!(branches.len(), 2);
	}
}
