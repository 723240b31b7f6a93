use std::path::Path;
use std::pin::Pin;

use bumpalo::Bump;
use fxhash::FxHashMap;
use tracing::debug;

use crate::compiler::calling::default_calling_convention;
use crate::compiler::codegen::{CallStackLayout, CodeGenerator, CompilationEnvironment, WriteBarrierLayout};
use crate::compiler::{FunctionCompilationData, JitCompiler};
use crate::errors::{ExecuteError, LoadError};
use crate::gc::{GarbageCollector, GcRuntimeInformation, GcStats};
use crate::loader::{
	define_functions, load_classes, load_managed_functions, parse_assembly, Verifier,
};
use crate::model::{
	Binder, ClassProvider, FunctionDefinition, FunctionFlags, FunctionSignature, ManagedFunction, Primitive, Type,
	TypeProvider, STRING_TYPE_NAME,
};
use crate::runtime::{self, register_native_library, CallStack, StackFrame, RUNTIME_LIBRARY};
use crate::{ARRAY_LENGTH_SIZE, ENTRY_POINT_SIGNATURE};

/// The tunable surface of the virtual machine.
#[derive(Debug, Clone)]
pub struct VmConfig {
	/// Compile functions on first call instead of ahead of time.
	pub lazy_jit: bool,
	/// Never collect garbage (allocation still goes through the collector).
	pub disable_gc: bool,
	/// Load the runtime library before any user assembly.
	pub load_runtime_library: bool,
	/// Print each stack frame as it returns.
	pub print_stack_frames: bool,
	pub young_generation_size: usize,
	pub old_generation_size: usize,
	pub card_size: usize,
	/// The number of call stack ring entries.
	pub call_stack_size: usize,
}

impl Default for VmConfig {
	fn default() -> Self {
		VmConfig {
			lazy_jit: false,
			disable_gc: false,
			load_runtime_library: true,
			print_stack_frames: false,
			young_generation_size: 4 * 1024 * 1024,
			old_generation_size: 8 * 1024 * 1024,
			card_size: 2048,
			call_stack_size: 2000,
		}
	}
}

/// The loaded managed functions and the JIT that compiles them.
pub struct ExecutionEngine<'l> {
	pub(crate) jit: JitCompiler<'l>,
	pub(crate) functions: FxHashMap<String, Box<ManagedFunction<'l>>>,
}

impl<'l> ExecutionEngine<'l> {
	fn new() -> std::io::Result<Self> {
		Ok(ExecutionEngine {
			jit: JitCompiler::new(default_calling_convention())?,
			functions: FxHashMap::default(),
		})
	}

	/// The loaded function with the given signature, with its address-stable
	/// box reborrowed for the machine's lifetime.
	pub(crate) fn function(&self, signature: &str) -> Option<&'l ManagedFunction<'l>> {
		self.functions
			.get(signature)
			.map(|function| unsafe { std::mem::transmute::<&ManagedFunction<'l>, &'l ManagedFunction<'l>>(function.as_ref()) })
	}
}

fn gc_collect_macro(generator: &CodeGenerator, data: &mut FunctionCompilationData, instruction_index: usize) {
	generator.generate_forced_collection(data, instruction_index, 0);
}

fn gc_collect_old_macro(generator: &CodeGenerator, data: &mut FunctionCompilationData, instruction_index: usize) {
	generator.generate_forced_collection(data, instruction_index, 1);
}

/// The virtual machine: owns the arena behind every type, class and
/// definition, the binder, the collector, the call stack and the execution
/// engine, and drives an assembly from text to a callable entry point.
pub struct VirtualMachine<'l> {
	config: VmConfig,
	bump: Pin<Box<Bump>>,
	types: TypeProvider<'l>,
	classes: ClassProvider<'l>,
	binder: Binder<'l>,
	gc: GarbageCollector<'l>,
	call_stack: Box<CallStack<'l>>,
	engine: ExecutionEngine<'l>,
}

impl<'l> VirtualMachine<'l> {
	pub fn new(config: VmConfig) -> Result<Self, LoadError> {
		let mut vm = VirtualMachine {
			gc: GarbageCollector::new(config.young_generation_size, config.old_generation_size, config.card_size)?,
			call_stack: Box::new(CallStack::new(config.call_stack_size)),
			engine: ExecutionEngine::new()?,
			bump: Pin::new(Box::new(Bump::new())),
			types: TypeProvider::new(),
			classes: ClassProvider::new(),
			binder: Binder::new(),
			config,
		};

		if vm.config.load_runtime_library {
			vm.load_assembly_text(RUNTIME_LIBRARY)?;
		}

		let bump = vm.bump();
		register_native_library(&mut vm.binder, &vm.types, &vm.classes, bump)?;
		vm.define_gc_functions();
		Ok(vm)
	}

	#[inline]
	pub(crate) fn bump(&self) -> &'l Bump {
		unsafe { std::mem::transmute(&*self.bump) }
	}

	#[inline]
	pub fn config(&self) -> &VmConfig {
		&self.config
	}

	#[inline]
	pub fn gc_stats(&self) -> GcStats {
		self.gc.stats()
	}

	/// The number of objects the collector currently owns.
	pub fn num_live_objects(&self) -> usize {
		self.gc.num_objects()
	}

	//The gc macro functions look like ordinary calls to the verifier and
	//expand inline during code generation.
	fn define_gc_functions(&mut self) {
		let bump = self.bump();
		let void = self.types.make_type("Void", &self.classes, bump).unwrap();

		for (name, expansion) in [
			("std.gc.collect", gc_collect_macro as crate::compiler::codegen::MacroFunction),
			("std.gc.collectOld", gc_collect_old_macro as crate::compiler::codegen::MacroFunction),
		] {
			let definition = FunctionDefinition::managed(
				bump.alloc_str(name),
				&[],
				void,
				None,
				Default::default(),
				FunctionFlags::empty(),
			);
			let signature = FunctionSignature::from_definition(&definition);

			if self.binder.define(signature.clone(), bump.alloc(definition)) {
				self.engine.jit.define_macro(signature, expansion);
			}
		}
	}

	/// Loads a textual assembly: classes, definitions and managed bodies.
	pub fn load_assembly_text(&mut self, text: &str) -> Result<(), LoadError> {
		let bump = self.bump();
		let assembly = parse_assembly(text)?;

		load_classes(&assembly, &mut self.classes, &self.types, bump)?;
		define_functions(&assembly, &mut self.binder, &self.classes, &self.types, bump)?;

		let functions = load_managed_functions(&assembly, &self.binder, &self.classes, &self.types, bump)?;
		for (signature, function) in functions {
			self.engine.functions.insert(signature, Box::new(function));
		}

		Ok(())
	}

	pub fn load_assembly_file(&mut self, path: impl AsRef<Path>) -> Result<(), LoadError> {
		let text = std::fs::read_to_string(path)?;
		self.load_assembly_text(&text)
	}

	fn verify_functions(&self) -> Result<(), ExecuteError> {
		let bump = self.bump();
		let verifier = Verifier::new(&self.binder, &self.classes, &self.types, bump);

		for function in self.engine.functions.values() {
			verifier.verify_function(function)?;
		}

		Ok(())
	}

	/// Compiles the function with the given signature, leaving its calls for
	/// the linker.
	fn compile_signature(&mut self, signature: &str) -> Result<*const u8, ExecuteError> {
		if self.engine.jit.has_compiled(signature) {
			return Ok(self.binder.get_function(signature).unwrap().entry_point());
		}

		let VirtualMachine { config, types, classes, binder, gc, call_stack, engine, .. } = self;

		let function = engine
			.function(signature)
			.ok_or_else(|| LoadError::UndefinedFunction(signature.to_string()))?;

		let write_barrier = match config.disable_gc {
			true => None,
			false => {
				let old = gc.old_generation();
				Some(WriteBarrierLayout {
					heap_start: old.heap().start(),
					heap_end: old.heap().end(),
					card_table: old.card_table_address(),
					card_size: old.card_size(),
				})
			}
		};

		let environment = CompilationEnvironment {
			binder,
			types,
			classes,
			lazy_compilation: config.lazy_jit,
			gc_enabled: !config.disable_gc,
			print_stack_frames: config.print_stack_frames,
			call_stack: CallStackLayout {
				top_pointer: call_stack.top_pointer_address(),
				end: call_stack.end_address(),
			},
			write_barrier,
		};

		engine
			.jit
			.compile_function(signature, function, &environment)
			.map_err(|error| ExecuteError::Load(LoadError::Io(error)))
	}

	//Compiles a function during execution: resolves its symbols, publishes
	//its virtual table entries and freezes the new code.
	pub(crate) fn compile_at_runtime(&mut self, signature: &str) -> *const u8 {
		let result = self.compile_signature(signature).and_then(|entry| {
			self.engine.jit.resolve_symbols_for(signature);
			self.bind_virtual_entry(signature, entry);
			self.engine.jit.make_executable()?;
			Ok(entry)
		});

		match result {
			Ok(entry) => entry,
			Err(error) => {
				eprintln!("{}", error);
				std::process::exit(1);
			}
		}
	}

	fn make_virtual_function_tables(&self) {
		let bump = self.bump();
		for class in self.classes.classes() {
			class.make_virtual_function_table(bump);
		}
	}

	//Points every virtual table slot at its implementation's entry point.
	//Slots whose implementation is not compiled stay null and resolve (and
	//compile) on first dispatch.
	fn bind_virtual_functions(&self) {
		for class in self.classes.classes() {
			for index in 0..class.virtual_functions().len() {
				let signature = class.virtual_function_signature(index);
				if let Some(definition) = self.binder.get_function(signature) {
					if !definition.entry_point().is_null() {
						class.bind_virtual_function(index, definition.entry_point());
					}
				}
			}
		}
	}

	//Publishes a newly compiled implementation into every table slot it
	//fills, including slots subclasses inherit.
	fn bind_virtual_entry(&self, signature: &str, entry: *const u8) {
		for class in self.classes.classes() {
			if class.virtual_function_table().is_empty() {
				continue;
			}

			for (index, slot) in class.virtual_functions().iter().enumerate() {
				if slot.signature == signature {
					class.bind_virtual_function(index, entry);
				}
			}
		}
	}

	/// Compiles the loaded assemblies (every function ahead of time, or only
	/// the entry point in lazy mode), links, freezes the code pages and
	/// invokes `main() Int`.
	pub fn execute(&mut self) -> Result<i32, ExecuteError> {
		self.verify_functions()?;

		let Some(main) = self.binder.get_function(ENTRY_POINT_SIGNATURE) else {
			return Err(LoadError::MissingEntryPoint.into());
		};
		if !main.is_managed() || !main.return_type().is_primitive(Primitive::Int) {
			return Err(LoadError::InvalidEntryPoint.into());
		}

		runtime::initialize(self as *mut VirtualMachine<'l> as *mut VirtualMachine<'static>);

		if self.config.lazy_jit {
			self.compile_signature(ENTRY_POINT_SIGNATURE)?;
		} else {
			let mut signatures: Vec<String> = self.engine.functions.keys().cloned().collect();
			signatures.sort_unstable();
			for signature in signatures {
				self.compile_signature(&signature)?;
			}
		}

		self.make_virtual_function_tables();
		self.bind_virtual_functions();
		self.engine.jit.resolve_symbols();
		self.engine.jit.make_executable()?;

		let entry = self.binder.get_function(ENTRY_POINT_SIGNATURE).unwrap().entry_point();
		debug!(entry = ?entry, "invoking entry point");

		let result = unsafe {
			let main: extern "C" fn() -> i32 = std::mem::transmute(entry);
			main()
		};

		Ok(result)
	}

	//Runtime services reached through the process-wide handle.

	pub(crate) fn allocate_array(&mut self, array_type: &'l Type<'l>, length: i32) -> *mut u8 {
		let VirtualMachine { gc, call_stack, .. } = self;
		gc.new_array(array_type, length, call_stack)
	}

	pub(crate) fn allocate_class(&mut self, class_type: &'l Type<'l>) -> *mut u8 {
		let VirtualMachine { gc, call_stack, .. } = self;
		gc.new_class(class_type, call_stack)
	}

	pub(crate) fn allocate_string(&mut self, characters: *const u8, length: i32) -> *mut u8 {
		let bump = self.bump();
		let VirtualMachine { types, classes, gc, call_stack, .. } = self;

		let Some(string_type) = types.make_type(STRING_TYPE_NAME, classes, bump) else {
			runtime::fatal_runtime_error("The runtime library is not loaded.");
		};
		let char_array_type = types.make_type("Ref.Array[Char]", classes, bump).unwrap();
		let metadata = string_type.metadata().unwrap();

		//Both parts must allocate without a collection in between
		let length = length.max(0);
		gc.ensure_young_capacity(ARRAY_LENGTH_SIZE + length as usize + metadata.size(), call_stack);

		let chars = gc.new_array(char_array_type, length, call_stack);
		unsafe {
			std::ptr::copy_nonoverlapping(characters, chars.add(ARRAY_LENGTH_SIZE), length as usize);
		}

		let string = gc.new_class(string_type, call_stack);
		let chars_field = metadata.field("chars").unwrap();
		unsafe {
			*(string.add(chars_field.offset()) as *mut u64) = chars as u64;
		}

		string
	}

	pub(crate) fn gc_poll(&mut self, information: GcRuntimeInformation<'l>) {
		if self.config.disable_gc {
			return;
		}

		self.gc.set_runtime_information(information);
		if self.gc.needs_collection() {
			let VirtualMachine { gc, call_stack, .. } = self;
			gc.collect(0, call_stack);
		}
	}

	pub(crate) fn force_collect(&mut self, information: GcRuntimeInformation<'l>, generation: i32) {
		if self.config.disable_gc {
			return;
		}

		self.gc.set_runtime_information(information);
		let VirtualMachine { gc, call_stack, .. } = self;
		gc.collect(generation, call_stack);
	}

	pub(crate) fn resolve_virtual_call(&mut self, receiver: *const u8, index: usize) -> *const u8 {
		let Some(handle) = self.gc.get_handle(receiver) else {
			runtime::fatal_runtime_error("Null reference.");
		};

		let metadata = handle.ty.metadata().expect("virtual dispatch requires a class instance");
		let entry = metadata.virtual_function_table()[index].get();
		if !entry.is_null() {
			return entry;
		}

		let signature = metadata.virtual_function_signature(index).to_string();
		self.compile_at_runtime(&signature)
	}

	pub(crate) fn lazy_compile(
		&mut self,
		caller: &ManagedFunction<'l>,
		call_offset: usize,
		check_start: usize,
		check_end: usize,
		func_to_call: &FunctionDefinition<'l>,
	) {
		let signature = FunctionSignature::from_definition(func_to_call);
		let entry = self.compile_at_runtime(&signature);

		debug!(
			callee = signature.as_str(),
			caller = FunctionSignature::from_definition(caller.definition()).as_str(),
			call_offset,
			"patching lazily compiled call"
		);

		if let Err(error) = self
			.engine
			.jit
			.patch_lazy_call(caller.definition(), call_offset, check_start, check_end, entry)
		{
			eprintln!("{}", error);
			std::process::exit(1);
		}
	}

	pub(crate) fn print_stack_frame(&self, base_ptr: *mut u64, function: &ManagedFunction<'l>) {
		let instruction_index = function.instructions().len() - 1;
		let frame = StackFrame::new(base_ptr, function, instruction_index);
		let definition = function.definition();

		println!("----Start StackFrame----");
		println!("Func: {}", FunctionSignature::from_definition(definition));

		for (i, parameter) in definition.parameters().iter().enumerate() {
			let value = unsafe { *frame.argument_address(i) };
			println!("Arg {}: {}", i, format_value(value, parameter));
		}

		for i in 0..function.num_locals() {
			let ty = function.local(i).unwrap();
			let value = unsafe { *frame.local_address(i) };
			println!("Local {}: {}", i, format_value(value, ty));
		}

		let operand_types = function.instructions()[instruction_index].operand_types();
		for (slot, ty) in operand_types.iter().rev().enumerate() {
			let value = unsafe { *frame.operand_address(slot) };
			println!("Stack {}: {}", slot, format_value(value, ty));
		}

		println!("----End StackFrame----");
	}
}

fn format_value(value: u64, ty: &Type) -> String {
	if ty.is_reference() {
		match value {
			0 => format!("nullref ({})", ty),
			_ => format!("{:#x} ({})", value, ty),
		}
	} else if ty.is_primitive(Primitive::Float) {
		format!("{} ({})", f32::from_bits(value as u32), ty)
	} else {
		format!("{} ({})", value as i64, ty)
	}
}

impl Drop for VirtualMachine<'_> {
	fn drop(&mut self) {
		runtime::clear_if(self as *mut VirtualMachine<'_> as *mut VirtualMachine<'static>);
	}
}
