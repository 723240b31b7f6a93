//! The AMD64 emit layer. Every method appends the encoding of one
//! instruction to the code buffer; branch and call displacements are 32-bit
//! PC-relative placeholders patched by the linker.

/// The general purpose registers.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Register {
	Ax = 0,
	Cx = 1,
	Dx = 2,
	Bx = 3,
	Sp = 4,
	Bp = 5,
	Si = 6,
	Di = 7,
	R8 = 8,
	R9 = 9,
	R10 = 10,
	R11 = 11,
	R12 = 12,
	R13 = 13,
	R14 = 14,
	R15 = 15,
}

impl Register {
	#[inline]
	fn low(self) -> u8 {
		self as u8 & 0b111
	}

	#[inline]
	fn is_extended(self) -> bool {
		self as u8 >= 8
	}
}

/// The scalar floating point registers.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FloatRegister {
	Xmm0 = 0,
	Xmm1 = 1,
	Xmm2 = 2,
	Xmm3 = 3,
	Xmm4 = 4,
	Xmm5 = 5,
	Xmm6 = 6,
	Xmm7 = 7,
}

impl FloatRegister {
	#[inline]
	fn low(self) -> u8 {
		self as u8
	}
}

/// The operand sizes the code generator distinguishes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DataSize {
	Size8,
	Size32,
	Size64,
}

impl DataSize {
	pub fn of(size_in_bytes: usize) -> DataSize {
		match size_in_bytes {
			1 => DataSize::Size8,
			4 => DataSize::Size32,
			_ => DataSize::Size64,
		}
	}
}

/// A `[base + offset]` memory operand.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryOperand {
	pub base: Register,
	pub offset: i32,
}

impl MemoryOperand {
	pub fn new(base: Register) -> Self {
		MemoryOperand { base, offset: 0 }
	}

	pub fn with_offset(base: Register, offset: i32) -> Self {
		MemoryOperand { base, offset }
	}
}

/// The jump conditions. Unsigned condition codes are selected for float
/// comparisons (after `ucomiss`) and for bounds checks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JumpCondition {
	Always,
	Equal,
	NotEqual,
	GreaterThan,
	GreaterThanOrEqual,
	LessThan,
	LessThanOrEqual,
}

impl JumpCondition {
	//The second opcode byte of the jcc rel32 form
	fn condition_code(self, unsigned: bool) -> u8 {
		match (self, unsigned) {
			(JumpCondition::Equal, _) => 0x84,
			(JumpCondition::NotEqual, _) => 0x85,
			(JumpCondition::GreaterThan, false) => 0x8F,
			(JumpCondition::GreaterThanOrEqual, false) => 0x8D,
			(JumpCondition::LessThan, false) => 0x8C,
			(JumpCondition::LessThanOrEqual, false) => 0x8E,
			(JumpCondition::GreaterThan, true) => 0x87,
			(JumpCondition::GreaterThanOrEqual, true) => 0x83,
			(JumpCondition::LessThan, true) => 0x82,
			(JumpCondition::LessThanOrEqual, true) => 0x86,
			(JumpCondition::Always, _) => unreachable!("unconditional jumps use a dedicated opcode"),
		}
	}
}

/// The size in bytes of an emitted unconditional jump.
pub const JUMP_SIZE: usize = 5;
/// The size in bytes of an emitted conditional jump.
pub const CONDITIONAL_JUMP_SIZE: usize = 6;
/// The size in bytes of an emitted relative call.
pub const CALL_SIZE: usize = 5;

pub struct Assembler<'c> {
	code: &'c mut Vec<u8>,
}

impl<'c> Assembler<'c> {
	pub fn new(code: &'c mut Vec<u8>) -> Self {
		Assembler { code }
	}

	#[inline]
	pub fn size(&self) -> usize {
		self.code.len()
	}

	#[inline]
	pub fn data(&mut self) -> &mut Vec<u8> {
		self.code
	}

	//REX prefix: 0100WRXB. `reg` extends the ModRM reg field, `rm` the
	//ModRM rm / base field. Emitted only when a bit is set.
	fn rex(&mut self, wide: bool, reg_extended: bool, rm_extended: bool) {
		let rex = 0x40 | (wide as u8) << 3 | (reg_extended as u8) << 2 | rm_extended as u8;
		if rex != 0x40 {
			self.code.push(rex);
		}
	}

	fn modrm_registers(&mut self, reg: u8, rm: u8) {
		self.code.push(0xC0 | (reg & 7) << 3 | (rm & 7));
	}

	//ModRM + SIB + displacement for a [base + offset] operand. rsp/r12
	//bases need a SIB byte; rbp/r13 bases always need a displacement.
	fn modrm_memory(&mut self, reg: u8, memory: MemoryOperand) {
		let base = memory.base.low();
		let needs_displacement = memory.offset != 0 || base == 0b101;
		let fits_byte = i8::try_from(memory.offset).is_ok();

		let mode = match (needs_displacement, fits_byte) {
			(false, _) => 0x00,
			(true, true) => 0x40,
			(true, false) => 0x80,
		};

		self.code.push(mode | (reg & 7) << 3 | base);
		if base == 0b100 {
			self.code.push(0x24);
		}

		if needs_displacement {
			if fits_byte {
				self.code.push(memory.offset as i8 as u8);
			} else {
				self.code.extend_from_slice(&memory.offset.to_le_bytes());
			}
		}
	}

	pub fn push(&mut self, register: Register) {
		self.rex(false, false, register.is_extended());
		self.code.push(0x50 | register.low());
	}

	pub fn pop(&mut self, register: Register) {
		self.rex(false, false, register.is_extended());
		self.code.push(0x58 | register.low());
	}

	/// mov dst, src (64-bit)
	pub fn move_reg(&mut self, destination: Register, source: Register) {
		self.rex(true, source.is_extended(), destination.is_extended());
		self.code.push(0x89);
		self.modrm_registers(source.low(), destination.low());
	}

	/// mov dst, [memory]; byte loads zero extend
	pub fn move_from_memory(&mut self, destination: Register, memory: MemoryOperand, size: DataSize) {
		match size {
			DataSize::Size8 => {
				self.rex(false, destination.is_extended(), memory.base.is_extended());
				self.code.extend_from_slice(&[0x0F, 0xB6]);
			}
			DataSize::Size32 => {
				self.rex(false, destination.is_extended(), memory.base.is_extended());
				self.code.push(0x8B);
			}
			DataSize::Size64 => {
				self.rex(true, destination.is_extended(), memory.base.is_extended());
				self.code.push(0x8B);
			}
		}
		self.modrm_memory(destination.low(), memory);
	}

	/// mov [memory], src
	pub fn move_to_memory(&mut self, memory: MemoryOperand, source: Register, size: DataSize) {
		match size {
			DataSize::Size8 => {
				self.rex(false, source.is_extended(), memory.base.is_extended());
				self.code.push(0x88);
			}
			DataSize::Size32 => {
				self.rex(false, source.is_extended(), memory.base.is_extended());
				self.code.push(0x89);
			}
			DataSize::Size64 => {
				self.rex(true, source.is_extended(), memory.base.is_extended());
				self.code.push(0x89);
			}
		}
		self.modrm_memory(source.low(), memory);
	}

	/// mov dst, imm32 (sign extended to 64 bits)
	pub fn move_int(&mut self, destination: Register, value: i32) {
		self.rex(true, false, destination.is_extended());
		self.code.push(0xC7);
		self.modrm_registers(0, destination.low());
		self.code.extend_from_slice(&value.to_le_bytes());
	}

	/// mov dst, imm64
	pub fn move_long(&mut self, destination: Register, value: i64) {
		self.rex(true, false, destination.is_extended());
		self.code.push(0xB8 | destination.low());
		self.code.extend_from_slice(&value.to_le_bytes());
	}

	/// mov qword [memory], imm32 (sign extended into the full slot)
	pub fn move_int_to_memory(&mut self, memory: MemoryOperand, value: i32) {
		self.rex(true, false, memory.base.is_extended());
		self.code.push(0xC7);
		self.modrm_memory(0, memory);
		self.code.extend_from_slice(&value.to_le_bytes());
	}

	/// mov byte [memory], imm8
	pub fn move_byte_to_memory(&mut self, memory: MemoryOperand, value: u8) {
		self.rex(false, false, memory.base.is_extended());
		self.code.push(0xC6);
		self.modrm_memory(0, memory);
		self.code.push(value);
	}

	/// mov rax, [address]
	pub fn load_absolute(&mut self, address: usize) {
		self.code.extend_from_slice(&[0x48, 0xA1]);
		self.code.extend_from_slice(&(address as u64).to_le_bytes());
	}

	/// mov [address], rax
	pub fn store_absolute(&mut self, address: usize) {
		self.code.extend_from_slice(&[0x48, 0xA3]);
		self.code.extend_from_slice(&(address as u64).to_le_bytes());
	}

	/// movss dst, [memory]
	pub fn float_move_from_memory(&mut self, destination: FloatRegister, memory: MemoryOperand) {
		self.code.push(0xF3);
		self.rex(false, false, memory.base.is_extended());
		self.code.extend_from_slice(&[0x0F, 0x10]);
		self.modrm_memory(destination.low(), memory);
	}

	/// movss [memory], src
	pub fn float_move_to_memory(&mut self, memory: MemoryOperand, source: FloatRegister) {
		self.code.push(0xF3);
		self.rex(false, false, memory.base.is_extended());
		self.code.extend_from_slice(&[0x0F, 0x11]);
		self.modrm_memory(source.low(), memory);
	}

	pub fn add(&mut self, destination: Register, source: Register, is_32_bits: bool) {
		self.rex(!is_32_bits, source.is_extended(), destination.is_extended());
		self.code.push(0x01);
		self.modrm_registers(source.low(), destination.low());
	}

	/// add dst, imm (64-bit)
	pub fn add_int(&mut self, destination: Register, value: i32) {
		self.rex(true, false, destination.is_extended());
		if let Ok(byte) = i8::try_from(value) {
			self.code.push(0x83);
			self.modrm_registers(0, destination.low());
			self.code.push(byte as u8);
		} else {
			self.code.push(0x81);
			self.modrm_registers(0, destination.low());
			self.code.extend_from_slice(&value.to_le_bytes());
		}
	}

	pub fn sub(&mut self, destination: Register, source: Register, is_32_bits: bool) {
		self.rex(!is_32_bits, source.is_extended(), destination.is_extended());
		self.code.push(0x29);
		self.modrm_registers(source.low(), destination.low());
	}

	/// sub dst, imm (64-bit)
	pub fn sub_int(&mut self, destination: Register, value: i32) {
		self.rex(true, false, destination.is_extended());
		if let Ok(byte) = i8::try_from(value) {
			self.code.push(0x83);
			self.modrm_registers(5, destination.low());
			self.code.push(byte as u8);
		} else {
			self.code.push(0x81);
			self.modrm_registers(5, destination.low());
			self.code.extend_from_slice(&value.to_le_bytes());
		}
	}

	/// imul dst, src
	pub fn mult(&mut self, destination: Register, source: Register, is_32_bits: bool) {
		self.rex(!is_32_bits, destination.is_extended(), source.is_extended());
		self.code.extend_from_slice(&[0x0F, 0xAF]);
		self.modrm_registers(destination.low(), source.low());
	}

	/// imul dst, dst, imm32 (64-bit)
	pub fn mult_int(&mut self, destination: Register, value: i32) {
		self.rex(true, destination.is_extended(), destination.is_extended());
		self.code.push(0x69);
		self.modrm_registers(destination.low(), destination.low());
		self.code.extend_from_slice(&value.to_le_bytes());
	}

	/// idiv / div by the given register; the dividend lives in ax (with dx
	/// holding the sign extension or zero)
	pub fn div(&mut self, divisor: Register, is_32_bits: bool, unsigned: bool) {
		self.rex(!is_32_bits, false, divisor.is_extended());
		self.code.push(0xF7);
		self.modrm_registers(if unsigned { 6 } else { 7 }, divisor.low());
	}

	/// cdq / cqo: sign extend ax into dx
	pub fn sign_extend_ax(&mut self, size: DataSize) {
		if size == DataSize::Size64 {
			self.code.push(0x48);
		}
		self.code.push(0x99);
	}

	pub fn bitwise_and(&mut self, destination: Register, source: Register, is_32_bits: bool) {
		self.rex(!is_32_bits, source.is_extended(), destination.is_extended());
		self.code.push(0x21);
		self.modrm_registers(source.low(), destination.low());
	}

	/// and dst, imm8 (64-bit)
	pub fn and_int(&mut self, destination: Register, value: i8) {
		self.rex(true, false, destination.is_extended());
		self.code.push(0x83);
		self.modrm_registers(4, destination.low());
		self.code.push(value as u8);
	}

	pub fn bitwise_or(&mut self, destination: Register, source: Register, is_32_bits: bool) {
		self.rex(!is_32_bits, source.is_extended(), destination.is_extended());
		self.code.push(0x09);
		self.modrm_registers(source.low(), destination.low());
	}

	pub fn bitwise_xor(&mut self, destination: Register, source: Register, is_32_bits: bool) {
		self.rex(!is_32_bits, source.is_extended(), destination.is_extended());
		self.code.push(0x31);
		self.modrm_registers(source.low(), destination.low());
	}

	pub fn bitwise_not(&mut self, destination: Register, is_32_bits: bool) {
		self.rex(!is_32_bits, false, destination.is_extended());
		self.code.push(0xF7);
		self.modrm_registers(2, destination.low());
	}

	/// cmp first, second
	pub fn compare(&mut self, first: Register, second: Register, size: DataSize) {
		self.rex(size == DataSize::Size64, second.is_extended(), first.is_extended());
		self.code.push(0x39);
		self.modrm_registers(second.low(), first.low());
	}

	/// cmp reg, imm8
	pub fn compare_int(&mut self, register: Register, value: i8, is_32_bits: bool) {
		self.rex(!is_32_bits, false, register.is_extended());
		self.code.push(0x83);
		self.modrm_registers(7, register.low());
		self.code.push(value as u8);
	}

	/// ucomiss first, second
	pub fn float_compare(&mut self, first: FloatRegister, second: FloatRegister) {
		self.code.extend_from_slice(&[0x0F, 0x2E]);
		self.modrm_registers(first.low(), second.low());
	}

	/// addss dst, src
	pub fn float_add(&mut self, destination: FloatRegister, source: FloatRegister) {
		self.code.extend_from_slice(&[0xF3, 0x0F, 0x58]);
		self.modrm_registers(destination.low(), source.low());
	}

	/// subss dst, src
	pub fn float_sub(&mut self, destination: FloatRegister, source: FloatRegister) {
		self.code.extend_from_slice(&[0xF3, 0x0F, 0x5C]);
		self.modrm_registers(destination.low(), source.low());
	}

	/// mulss dst, src
	pub fn float_mult(&mut self, destination: FloatRegister, source: FloatRegister) {
		self.code.extend_from_slice(&[0xF3, 0x0F, 0x59]);
		self.modrm_registers(destination.low(), source.low());
	}

	/// divss dst, src
	pub fn float_div(&mut self, destination: FloatRegister, source: FloatRegister) {
		self.code.extend_from_slice(&[0xF3, 0x0F, 0x5E]);
		self.modrm_registers(destination.low(), source.low());
	}

	/// cvtsi2ss dst, src (32-bit source)
	pub fn convert_int_to_float(&mut self, destination: FloatRegister, source: Register) {
		self.code.push(0xF3);
		self.rex(false, false, source.is_extended());
		self.code.extend_from_slice(&[0x0F, 0x2A]);
		self.modrm_registers(destination.low(), source.low());
	}

	/// cvttss2si dst, src (32-bit destination)
	pub fn convert_float_to_int(&mut self, destination: Register, source: FloatRegister) {
		self.code.push(0xF3);
		self.rex(false, destination.is_extended(), false);
		self.code.extend_from_slice(&[0x0F, 0x2C]);
		self.modrm_registers(destination.low(), source.low());
	}

	/// A jump with a 32-bit placeholder displacement: 5 bytes unconditional,
	/// 6 bytes conditional. The displacement occupies the last 4 bytes.
	pub fn jump(&mut self, condition: JumpCondition, target: i32, unsigned: bool) {
		match condition {
			JumpCondition::Always => self.code.push(0xE9),
			_ => {
				self.code.push(0x0F);
				self.code.push(condition.condition_code(unsigned));
			}
		}
		self.code.extend_from_slice(&target.to_le_bytes());
	}

	/// call rel32 with a placeholder displacement
	pub fn call_relative(&mut self, target: i32) {
		self.code.push(0xE8);
		self.code.extend_from_slice(&target.to_le_bytes());
	}

	/// call through a register
	pub fn call_register(&mut self, register: Register) {
		self.rex(false, false, register.is_extended());
		self.code.push(0xFF);
		self.modrm_registers(2, register.low());
	}

	pub fn ret(&mut self) {
		self.code.push(0xC3);
	}

	pub fn nop(&mut self) {
		self.code.push(0x90);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn emit(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
		let mut code = Vec::new();
		f(&mut Assembler::new(&mut code));
		code
	}

	#[test]
	fn push_and_pop() {
		assert_eq!(emit(|a| a.push(Register::Ax)), [0x50]);
		assert_eq!(emit(|a| a.push(Register::Cx)), [0x51]);
		assert_eq!(emit(|a| a.push(Register::R11)), [0x41, 0x53]);
		assert_eq!(emit(|a| a.pop(Register::Ax)), [0x58]);
		assert_eq!(emit(|a| a.pop(Register::Cx)), [0x59]);
	}

	#[test]
	fn register_moves() {
		assert_eq!(emit(|a| a.move_reg(Register::Ax, Register::Ax)), [0x48, 0x89, 0xC0]);
		assert_eq!(emit(|a| a.move_reg(Register::Ax, Register::Cx)), [0x48, 0x89, 0xC8]);
		assert_eq!(emit(|a| a.move_reg(Register::Cx, Register::Cx)), [0x48, 0x89, 0xC9]);
		assert_eq!(emit(|a| a.move_reg(Register::Bp, Register::Sp)), [0x48, 0x89, 0xE5]);
		assert_eq!(emit(|a| a.move_reg(Register::R11, Register::Ax)), [0x49, 0x89, 0xC3]);
	}

	#[test]
	fn memory_moves() {
		let ax = MemoryOperand::new(Register::Ax);
		assert_eq!(emit(|a| a.move_from_memory(Register::Ax, ax, DataSize::Size64)), [0x48, 0x8B, 0x00]);
		assert_eq!(emit(|a| a.move_from_memory(Register::Cx, ax, DataSize::Size64)), [0x48, 0x8B, 0x08]);
		assert_eq!(emit(|a| a.move_from_memory(Register::Si, ax, DataSize::Size32)), [0x8B, 0x30]);

		assert_eq!(
			emit(|a| a.move_to_memory(MemoryOperand::with_offset(Register::Ax, 4), Register::Ax, DataSize::Size64)),
			[0x48, 0x89, 0x40, 0x04]
		);
		assert_eq!(
			emit(|a| a.move_to_memory(MemoryOperand::with_offset(Register::Ax, -4), Register::Ax, DataSize::Size64)),
			[0x48, 0x89, 0x40, 0xFC]
		);
		assert_eq!(
			emit(|a| a.move_to_memory(MemoryOperand::with_offset(Register::Bp, -4), Register::Di, DataSize::Size64)),
			[0x48, 0x89, 0x7D, 0xFC]
		);
		assert_eq!(
			emit(|a| a.move_to_memory(MemoryOperand::with_offset(Register::Bp, -8), Register::Si, DataSize::Size64)),
			[0x48, 0x89, 0x75, 0xF8]
		);
		assert_eq!(
			emit(|a| a.move_to_memory(MemoryOperand::with_offset(Register::Bp, -16), Register::Cx, DataSize::Size64)),
			[0x48, 0x89, 0x4D, 0xF0]
		);
	}

	#[test]
	fn large_displacements_use_four_bytes() {
		assert_eq!(
			emit(|a| a.move_to_memory(MemoryOperand::with_offset(Register::Bp, -256), Register::Ax, DataSize::Size64)),
			[0x48, 0x89, 0x85, 0x00, 0xFF, 0xFF, 0xFF]
		);
	}

	#[test]
	fn stack_pointer_bases_need_a_sib_byte() {
		assert_eq!(
			emit(|a| a.move_to_memory(MemoryOperand::new(Register::Sp), Register::Ax, DataSize::Size64)),
			[0x48, 0x89, 0x04, 0x24]
		);
	}

	#[test]
	fn frame_pointer_base_always_has_a_displacement() {
		//mod 00 with a bp base means rip-relative, so [rbp] encodes as disp8 0
		assert_eq!(
			emit(|a| a.move_from_memory(Register::Ax, MemoryOperand::new(Register::Bp), DataSize::Size64)),
			[0x48, 0x8B, 0x45, 0x00]
		);
	}

	#[test]
	fn immediates() {
		assert_eq!(emit(|a| a.move_int(Register::Ax, 4711)), [0x48, 0xC7, 0xC0, 0x67, 0x12, 0x00, 0x00]);
		assert_eq!(emit(|a| a.move_int(Register::Cx, 4711)), [0x48, 0xC7, 0xC1, 0x67, 0x12, 0x00, 0x00]);
		assert_eq!(
			emit(|a| a.move_long(Register::Ax, 0x118d2cc5a)),
			[0x48, 0xB8, 0x5A, 0xCC, 0xD2, 0x18, 0x01, 0x00, 0x00, 0x00]
		);
		assert_eq!(
			emit(|a| a.move_long(Register::Cx, 0x118d2cc5a)),
			[0x48, 0xB9, 0x5A, 0xCC, 0xD2, 0x18, 0x01, 0x00, 0x00, 0x00]
		);
	}

	#[test]
	fn absolute_moves() {
		assert_eq!(
			emit(|a| a.load_absolute(0xfcdebc03)),
			[0x48, 0xA1, 0x03, 0xBC, 0xDE, 0xFC, 0x00, 0x00, 0x00, 0x00]
		);
		assert_eq!(
			emit(|a| a.store_absolute(0xfcdebc03)),
			[0x48, 0xA3, 0x03, 0xBC, 0xDE, 0xFC, 0x00, 0x00, 0x00, 0x00]
		);
	}

	#[test]
	fn arithmetic() {
		//add eax, ecx / add rax, r10
		assert_eq!(emit(|a| a.add(Register::Ax, Register::Cx, true)), [0x01, 0xC8]);
		assert_eq!(emit(|a| a.add(Register::Ax, Register::R10, false)), [0x4C, 0x01, 0xD0]);
		//add rax, 16 / add rax, -16
		assert_eq!(emit(|a| a.add_int(Register::Ax, 16)), [0x48, 0x83, 0xC0, 0x10]);
		assert_eq!(emit(|a| a.add_int(Register::Ax, -16)), [0x48, 0x83, 0xC0, 0xF0]);
		//sub eax, ecx / sub rsp, 32
		assert_eq!(emit(|a| a.sub(Register::Ax, Register::Cx, true)), [0x29, 0xC8]);
		assert_eq!(emit(|a| a.sub_int(Register::Sp, 32)), [0x48, 0x83, 0xEC, 0x20]);
		//imul eax, ecx / imul r10, r10, 4
		assert_eq!(emit(|a| a.mult(Register::Ax, Register::Cx, true)), [0x0F, 0xAF, 0xC1]);
		assert_eq!(emit(|a| a.mult_int(Register::R10, 4)), [0x4D, 0x69, 0xD2, 0x04, 0x00, 0x00, 0x00]);
		//cdq; idiv ecx
		assert_eq!(emit(|a| a.sign_extend_ax(DataSize::Size32)), [0x99]);
		assert_eq!(emit(|a| a.div(Register::Cx, true, false)), [0xF7, 0xF9]);
		//div rcx (unsigned, 64-bit)
		assert_eq!(emit(|a| a.div(Register::Cx, false, true)), [0x48, 0xF7, 0xF1]);
	}

	#[test]
	fn logic() {
		assert_eq!(emit(|a| a.bitwise_and(Register::Ax, Register::Cx, false)), [0x48, 0x21, 0xC8]);
		assert_eq!(emit(|a| a.bitwise_or(Register::Ax, Register::Cx, false)), [0x48, 0x09, 0xC8]);
		assert_eq!(emit(|a| a.bitwise_xor(Register::Ax, Register::Ax, true)), [0x31, 0xC0]);
		assert_eq!(emit(|a| a.bitwise_not(Register::Ax, false)), [0x48, 0xF7, 0xD0]);
		assert_eq!(emit(|a| a.and_int(Register::Ax, 1)), [0x48, 0x83, 0xE0, 0x01]);
	}

	#[test]
	fn comparisons_and_jumps() {
		//cmp rax, rcx / cmp eax, ecx
		assert_eq!(emit(|a| a.compare(Register::Ax, Register::Cx, DataSize::Size64)), [0x48, 0x39, 0xC8]);
		assert_eq!(emit(|a| a.compare(Register::Ax, Register::Cx, DataSize::Size32)), [0x39, 0xC8]);
		//cmp r10, rsi
		assert_eq!(emit(|a| a.compare(Register::R10, Register::Si, DataSize::Size64)), [0x49, 0x39, 0xF2]);
		//cmp eax, 0
		assert_eq!(emit(|a| a.compare_int(Register::Ax, 0, true)), [0x83, 0xF8, 0x00]);
		//ucomiss xmm0, xmm1
		assert_eq!(emit(|a| a.float_compare(FloatRegister::Xmm0, FloatRegister::Xmm1)), [0x0F, 0x2E, 0xC1]);

		let jump = emit(|a| a.jump(JumpCondition::Always, 0, false));
		assert_eq!(jump, [0xE9, 0x00, 0x00, 0x00, 0x00]);
		assert_eq!(jump.len(), JUMP_SIZE);

		let jump = emit(|a| a.jump(JumpCondition::Equal, 0, false));
		assert_eq!(jump, [0x0F, 0x84, 0x00, 0x00, 0x00, 0x00]);
		assert_eq!(jump.len(), CONDITIONAL_JUMP_SIZE);

		assert_eq!(emit(|a| a.jump(JumpCondition::GreaterThan, 0, false))[1], 0x8F);
		assert_eq!(emit(|a| a.jump(JumpCondition::GreaterThan, 0, true))[1], 0x87);
		assert_eq!(emit(|a| a.jump(JumpCondition::GreaterThanOrEqual, 0, true))[1], 0x83);
		assert_eq!(emit(|a| a.jump(JumpCondition::LessThan, 0, false))[1], 0x8C);
	}

	#[test]
	fn float_operations() {
		let bp = MemoryOperand::with_offset(Register::Bp, -8);
		assert_eq!(emit(|a| a.float_move_from_memory(FloatRegister::Xmm0, bp)), [0xF3, 0x0F, 0x10, 0x45, 0xF8]);
		assert_eq!(emit(|a| a.float_move_to_memory(bp, FloatRegister::Xmm0)), [0xF3, 0x0F, 0x11, 0x45, 0xF8]);
		assert_eq!(emit(|a| a.float_add(FloatRegister::Xmm0, FloatRegister::Xmm1)), [0xF3, 0x0F, 0x58, 0xC1]);
		assert_eq!(emit(|a| a.float_div(FloatRegister::Xmm0, FloatRegister::Xmm1)), [0xF3, 0x0F, 0x5E, 0xC1]);
		//cvtsi2ss xmm0, eax / cvttss2si eax, xmm0
		assert_eq!(emit(|a| a.convert_int_to_float(FloatRegister::Xmm0, Register::Ax)), [0xF3, 0x0F, 0x2A, 0xC0]);
		assert_eq!(emit(|a| a.convert_float_to_int(Register::Ax, FloatRegister::Xmm0)), [0xF3, 0x0F, 0x2C, 0xC0]);
	}

	#[test]
	fn calls() {
		assert_eq!(emit(|a| a.call_register(Register::Ax)), [0xFF, 0xD0]);
		assert_eq!(emit(|a| a.call_register(Register::R11)), [0x41, 0xFF, 0xD3]);
		assert_eq!(emit(|a| a.call_relative(0)), [0xE8, 0x00, 0x00, 0x00, 0x00]);
		assert_eq!(emit(|a| a.ret()), [0xC3]);
	}
}
