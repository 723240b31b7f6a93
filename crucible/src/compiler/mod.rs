pub mod assembler;
pub mod calling;
pub mod codegen;
pub mod exceptions;
pub mod memory;
pub mod operands;

use std::io;

use derivative::Derivative;
use fxhash::FxHashMap;
use nohash_hasher::IntMap;
use tracing::debug;

use crate::compiler::calling::CallingConvention;
use crate::compiler::codegen::{CodeGenerator, CompilationEnvironment, MacroFunction};
use crate::compiler::exceptions::ExceptionHandling;
use crate::compiler::memory::MemoryManager;
use crate::compiler::operands::OperandStack;
use crate::errors::LinkError;
use crate::model::{FunctionDefinition, FunctionSignature, ManagedFunction};
use crate::utilities::{set_int, set_long};

/// A branch whose native displacement is patched after emission.
#[derive(Debug, Copy, Clone)]
pub struct BranchTarget {
	pub target: usize,
	pub instruction_size: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FunctionCallType {
	/// A 32-bit pc-relative call displacement.
	Relative,
	/// A 64-bit address loaded into a register.
	Absolute,
}

/// A call emitted before its target's entry point was known.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct UnresolvedFunctionCall<'l> {
	pub call_type: FunctionCallType,
	pub offset: usize,
	#[derivative(Debug(format_with = "std::fmt::Display::fmt"))]
	pub function: &'l FunctionDefinition<'l>,
}

/// Everything produced while compiling one function: the emitted bytes and
/// the patch tables the linker drains.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FunctionCompilationData<'l> {
	pub function: &'l ManagedFunction<'l>,
	#[derivative(Debug = "ignore")]
	pub code: Vec<u8>,
	/// Byte offset where each instruction's code begins.
	#[derivative(Debug = "ignore")]
	pub instruction_offsets: Vec<usize>,
	/// Branch displacement site → target instruction index.
	#[derivative(Debug = "ignore")]
	pub unresolved_branches: IntMap<usize, BranchTarget>,
	/// Jump site → absolute address of an error handler thunk.
	#[derivative(Debug = "ignore")]
	pub unresolved_native_branches: IntMap<usize, usize>,
	pub unresolved_calls: Vec<UnresolvedFunctionCall<'l>>,
}

impl<'l> FunctionCompilationData<'l> {
	fn new(function: &'l ManagedFunction<'l>) -> Self {
		FunctionCompilationData {
			function,
			code: Vec::new(),
			instruction_offsets: Vec::new(),
			unresolved_branches: IntMap::default(),
			unresolved_native_branches: IntMap::default(),
			unresolved_calls: Vec::new(),
		}
	}
}

/// Compiles verified functions into executable memory and links them:
/// internal branches are patched right after emission, calls and thunk jumps
/// once every entry point is known, after which the pages are frozen.
pub struct JitCompiler<'l> {
	memory: MemoryManager,
	code_generator: CodeGenerator,
	functions: FxHashMap<String, FunctionCompilationData<'l>>,
}

impl<'l> JitCompiler<'l> {
	pub fn new(calling_convention: Box<dyn CallingConvention>) -> io::Result<Self> {
		let mut memory = MemoryManager::new();
		let exception_handling = ExceptionHandling::generate_handlers(&mut memory)?;

		Ok(JitCompiler {
			memory,
			code_generator: CodeGenerator::new(calling_convention, exception_handling),
			functions: FxHashMap::default(),
		})
	}

	pub fn memory_manager_mut(&mut self) -> &mut MemoryManager {
		&mut self.memory
	}

	pub fn define_macro(&mut self, signature: String, expansion: MacroFunction) {
		self.code_generator.define_macro(signature, expansion);
	}

	pub fn has_compiled(&self, signature: &str) -> bool {
		self.functions.contains_key(signature)
	}

	pub fn functions(&self) -> &FxHashMap<String, FunctionCompilationData<'l>> {
		&self.functions
	}

	/// Compiles the given verified function into writable code memory and
	/// publishes its entry point. Calls and native branches stay unresolved
	/// until [`JitCompiler::resolve_symbols`].
	pub fn compile_function(
		&mut self,
		signature: &str,
		function: &'l ManagedFunction<'l>,
		env: &CompilationEnvironment<'_, 'l>,
	) -> io::Result<*const u8> {
		let mut data = FunctionCompilationData::new(function);
		let mut operand_stack = OperandStack::new(function);

		self.code_generator.generate_initialize_function(&mut data, env);
		for (index, instruction) in function.instructions().iter().enumerate() {
			self.code_generator
				.generate_instruction(&mut data, &mut operand_stack, env, &self.functions, instruction, index);
		}

		Self::resolve_branches(&mut data.code, &data.instruction_offsets, &mut data.unresolved_branches);

		let size = data.code.len();
		let memory = self.memory.allocate_writable(size)?;
		unsafe {
			std::ptr::copy_nonoverlapping(data.code.as_ptr(), memory, size);
		}

		function.definition().set_entry_point(memory);
		debug!(signature, size, "generated function");

		self.functions.insert(signature.to_string(), data);
		Ok(memory)
	}

	//Patches branches between instructions of the same function. These only
	//need the instruction offset table, so they resolve before the code
	//leaves its staging buffer.
	fn resolve_branches(code: &mut [u8], instruction_offsets: &[usize], branches: &mut IntMap<usize, BranchTarget>) {
		for (&source, branch) in branches.iter() {
			let native_target = instruction_offsets[branch.target];
			let displacement = native_target as i32 - source as i32 - branch.instruction_size as i32;

			let displacement_offset = source + branch.instruction_size - 4;
			set_int(code, displacement_offset, displacement);
		}

		branches.clear();
	}

	/// Resolves calls and native branches in every compiled function.
	pub fn resolve_symbols(&mut self) {
		let signatures: Vec<String> = self.functions.keys().cloned().collect();
		for signature in signatures {
			self.resolve_symbols_for(&signature);
		}
	}

	/// Resolves calls and native branches in one compiled function.
	pub fn resolve_symbols_for(&mut self, signature: &str) {
		let Some(data) = self.functions.get_mut(signature) else {
			return;
		};

		Self::resolve_call_targets(data);
		Self::resolve_native_branches(data);
	}

	fn resolve_call_targets(data: &mut FunctionCompilationData) {
		let base = data.function.definition().entry_point() as usize;
		let code = unsafe { std::slice::from_raw_parts_mut(base as *mut u8, data.code.len()) };

		//Calls to functions that still lack an entry point stay unresolved;
		//freezing the pages rejects them
		data.unresolved_calls.retain(|call| {
			let target = call.function.entry_point();
			if target.is_null() {
				return true;
			}

			match call.call_type {
				FunctionCallType::Relative => {
					let displacement = target as i64 - (base + call.offset + assembler::CALL_SIZE) as i64;
					set_int(code, call.offset + 1, displacement as i32);
				}
				FunctionCallType::Absolute => {
					set_long(code, call.offset + 2, target as i64);
				}
			}

			false
		});
	}

	fn resolve_native_branches(data: &mut FunctionCompilationData) {
		let base = data.function.definition().entry_point() as usize;
		let code = unsafe { std::slice::from_raw_parts_mut(base as *mut u8, data.code.len()) };

		for (&source, &target) in &data.unresolved_native_branches {
			let displacement = target as i64 - (base + source + assembler::CONDITIONAL_JUMP_SIZE) as i64;
			set_int(code, source + 2, displacement as i32);
		}

		data.unresolved_native_branches.clear();
	}

	/// Patches the call at the given offset of a compiled caller with the
	/// callee's entry point and overwrites the lazy compilation prefix with
	/// a jump past itself. The caller's page is made writable around the
	/// patch.
	pub fn patch_lazy_call(
		&mut self,
		caller: &FunctionDefinition<'l>,
		call_offset: usize,
		check_start: usize,
		check_end: usize,
		callee_entry: *const u8,
	) -> io::Result<()> {
		let signature = FunctionSignature::from_definition(caller);
		let size = self.functions.get(&signature).map_or(check_end + 16, |data| data.code.len());

		let base = caller.entry_point() as *mut u8;
		self.memory.make_writable_containing(base)?;

		unsafe {
			let code = std::slice::from_raw_parts_mut(base, size);
			let displacement = callee_entry as i64 - (base as usize + call_offset + assembler::CALL_SIZE) as i64;
			set_int(code, call_offset + 1, displacement as i32);

			//Skip the compile check on subsequent executions
			code[check_start] = 0xE9;
			set_int(code, check_start + 1, (check_end as i64 - (check_start + assembler::JUMP_SIZE) as i64) as i32);
		}

		self.memory.make_executable_containing(base)
	}

	/// Flips all code pages to read+execute. Any call that is still
	/// unresolved at this point is a link error.
	pub fn make_executable(&mut self) -> Result<(), LinkError> {
		for (signature, data) in &self.functions {
			if let Some(unresolved) = data.unresolved_calls.first() {
				return Err(LinkError::UnresolvedCall(
					signature.clone(),
					FunctionSignature::from_definition(unresolved.function),
				));
			}
		}

		self.memory.make_executable_all().map_err(LinkError::Protection)?;
		debug!(functions = self.functions.len(), "code pages frozen");
		Ok(())
	}

	pub fn code_generator(&self) -> &CodeGenerator {
		&self.code_generator
	}
}
