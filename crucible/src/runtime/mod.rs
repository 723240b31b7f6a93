mod callstack;
mod native;
mod stackframe;

pub use callstack::*;
pub use native::*;
pub use stackframe::*;

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::engine::VirtualMachine;
use crate::gc::GcRuntimeInformation;
use crate::model::{FunctionDefinition, ManagedFunction, Type};

//The process-wide handle emitted code reaches the virtual machine through.
//The machine is single threaded by construction; the atomic only makes the
//global well defined.
static VM_STATE: AtomicPtr<VirtualMachine<'static>> = AtomicPtr::new(std::ptr::null_mut());

/// Installs the given machine as the target of the runtime helper surface.
pub fn initialize(vm: *mut VirtualMachine<'static>) {
	VM_STATE.store(vm, Ordering::Release);
}

pub fn shutdown() {
	VM_STATE.store(std::ptr::null_mut(), Ordering::Release);
}

/// Clears the handle when it still points at the given machine.
pub(crate) fn clear_if(vm: *mut VirtualMachine<'static>) {
	let _ = VM_STATE.compare_exchange(vm, std::ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);
}

fn vm() -> &'static mut VirtualMachine<'static> {
	let state = VM_STATE.load(Ordering::Acquire);
	assert!(!state.is_null(), "the runtime has not been initialized");
	unsafe { &mut *state }
}

/// Prints a runtime error and terminates. None of the runtime errors are
/// recoverable from managed code.
pub fn fatal_runtime_error(message: &str) -> ! {
	eprintln!("Error: {}", message);
	std::process::exit(1);
}

/// Allocates a new array. Called from emitted code.
pub extern "C" fn new_array(array_type: *const Type<'static>, length: i32) -> *mut u8 {
	vm().allocate_array(unsafe { &*array_type }, length)
}

/// Allocates a new class instance. Called from emitted code.
pub extern "C" fn new_class(class_type: *const Type<'static>) -> *mut u8 {
	vm().allocate_class(unsafe { &*class_type })
}

/// Allocates a new string over the given bytes. Called from emitted code.
pub extern "C" fn new_string(characters: *const u8, length: i32) -> *mut u8 {
	vm().allocate_string(characters, length)
}

/// The allocation poll: saves the call site for precise stack walking and
/// collects the young generation when it is running full.
pub extern "C" fn gc_poll(base_ptr: *mut u64, function: *const ManagedFunction<'static>, instruction_index: i32) {
	let information = GcRuntimeInformation {
		base_ptr,
		function: unsafe { &*function },
		instruction_index: instruction_index as usize,
	};
	vm().gc_poll(information);
}

/// A forced collection of the given generation, expanded inline for the
/// `std.gc.collect` macros.
pub extern "C" fn garbage_collect(
	base_ptr: *mut u64,
	function: *const ManagedFunction<'static>,
	instruction_index: i32,
	generation: i32,
) {
	let information = GcRuntimeInformation {
		base_ptr,
		function: unsafe { &*function },
		instruction_index: instruction_index as usize,
	};
	vm().force_collect(information, generation);
}

/// Resolves a virtual call: reads the receiver's table at the given slot,
/// compiling the implementation on first use.
pub extern "C" fn get_virtual_function_address(receiver: *const u8, index: i32) -> *const u8 {
	vm().resolve_virtual_call(receiver, index as usize)
}

/// Compiles a lazily compiled callee and patches the caller's call site and
/// compile check.
pub extern "C" fn compile_function(
	caller: *const ManagedFunction<'static>,
	call_offset: i32,
	check_start: i32,
	check_end: i32,
	func_to_call: *const FunctionDefinition<'static>,
) {
	vm().lazy_compile(
		unsafe { &*caller },
		call_offset as usize,
		check_start as usize,
		check_end as usize,
		unsafe { &*func_to_call },
	);
}

/// Prints the active stack frame. Emitted before returns when frame
/// printing is enabled.
pub extern "C" fn print_stack_frame(base_ptr: *mut u64, function: *const ManagedFunction<'static>) {
	vm().print_stack_frame(base_ptr, unsafe { &*function });
}

pub extern "C" fn null_reference_error() {
	fatal_runtime_error("Null reference.");
}

pub extern "C" fn array_out_of_bounds_error() {
	fatal_runtime_error("Array index is out of bounds.");
}

pub extern "C" fn invalid_array_creation_error() {
	fatal_runtime_error("The length of the array must be >= 0.");
}

pub extern "C" fn stack_overflow_error() {
	fatal_runtime_error("Stack overflow.");
}
