//! End-to-end tests: programs are compiled to native code and executed.
//! The runtime owns process-wide state, so every test serializes on a lock.

#![cfg(all(target_arch = "x86_64", target_os = "linux"))]

use std::sync::Mutex;

use crucible::engine::{VirtualMachine, VmConfig};

static VM_LOCK: Mutex<()> = Mutex::new(());

fn run_with<R>(text: &str, config: VmConfig, check: impl FnOnce(i32, &VirtualMachine) -> R) -> R {
	let _guard = VM_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

	let mut vm = VirtualMachine::new(config).unwrap();
	vm.load_assembly_text(text).unwrap();
	let result = vm.execute().unwrap();
	check(result, &vm)
}

fn run(text: &str) -> i32 {
	run_with(text, VmConfig::default(), |result, _| result)
}

fn verify_error(text: &str) -> String {
	let _guard = VM_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

	let mut vm = VirtualMachine::new(VmConfig::default()).unwrap();
	vm.load_assembly_text(text).unwrap();
	vm.execute().unwrap_err().to_string()
}

#[test]
fn integer_arithmetic() {
	assert_eq!(run("func main() Int { .locals 0 ldint 20 ldint 22 add ret }"), 42);
	assert_eq!(run("func main() Int { .locals 0 ldint 50 ldint 8 sub ret }"), 42);
	assert_eq!(run("func main() Int { .locals 0 ldint 6 ldint 7 mul ret }"), 42);
	assert_eq!(run("func main() Int { .locals 0 ldint 85 ldint 2 div ret }"), 42);
	assert_eq!(run("func main() Int { .locals 0 ldint -85 ldint 2 div ret }"), -42);
}

#[test]
fn locals_and_loops() {
	//Count up to ten
	let program = "func main() Int { .locals 1 .local 0 Int \
		ldint 0 stloc 0 \
		ldloc 0 ldint 10 cmpeq brtrue 11 \
		ldloc 0 ldint 1 add stloc 0 br 2 \
		ldloc 0 ret }";
	assert_eq!(run(program), 10);
}

#[test]
fn conditional_branches() {
	let program = "func main() Int { .locals 0 ldint 3 ldint 4 blt 5 ldint 0 ret ldint 1 ret }";
	assert_eq!(run(program), 1);

	let program = "func main() Int { .locals 0 ldint 4 ldint 4 bge 5 ldint 0 ret ldint 1 ret }";
	assert_eq!(run(program), 1);

	//Signed comparison of negative numbers
	let program = "func main() Int { .locals 0 ldint -5 ldint 3 blt 5 ldint 0 ret ldint 1 ret }";
	assert_eq!(run(program), 1);
}

#[test]
fn function_calls_and_recursion() {
	let program = "func add2(Int Int) Int { .locals 0 ldarg 0 ldarg 1 add ret }\n\
		func main() Int { .locals 0 ldint 20 ldint 22 call add2(Int Int) ret }";
	assert_eq!(run(program), 42);

	let fib = "func fib(Int) Int { .locals 0 \
			ldarg 0 ldint 2 bge 5 \
			ldarg 0 ret \
			ldarg 0 ldint 1 sub call fib(Int) \
			ldarg 0 ldint 2 sub call fib(Int) \
			add ret }\n\
		func main() Int { .locals 0 ldint 10 call fib(Int) ret }";
	assert_eq!(run(fib), 55);
}

#[test]
fn float_arithmetic_and_conversions() {
	assert_eq!(run("func main() Int { .locals 0 ldfloat 1.5 ldfloat 2.75 add convfloattoint ret }"), 4);
	assert_eq!(run("func main() Int { .locals 0 ldint 21 convinttofloat ldfloat 2.0 mul convfloattoint ret }"), 42);
	assert_eq!(run("func main() Int { .locals 0 ldfloat 10.0 ldfloat 4.0 div convfloattoint ret }"), 2);

	let program = "func main() Int { .locals 0 ldfloat 2.0 ldfloat 1.0 cmpgt brtrue 6 ldint 0 ret ldint 1 ret }";
	assert_eq!(run(program), 1);
}

#[test]
fn logic_operations() {
	assert_eq!(run("func main() Int { .locals 0 ldtrue ldfalse or brtrue 6 ldint 0 ret ldint 1 ret }"), 1);
	assert_eq!(run("func main() Int { .locals 0 ldtrue ldfalse and brtrue 6 ldint 0 ret ldint 1 ret }"), 0);
	assert_eq!(run("func main() Int { .locals 0 ldfalse not brtrue 5 ldint 0 ret ldint 1 ret }"), 1);
}

#[test]
fn ordering_comparisons_reject_bools() {
	//cmpgt on two booleans fails verification; the branch form is accepted
	let program = "func main() Int { .locals 0 ldtrue ldfalse cmpgt brtrue 5 ldint 0 ret ldint 1 ret }";
	let error = verify_error(program);
	assert!(error.contains("main() @ 2"));
	assert!(error.contains("comparable"));

	let program = "func main() Int { .locals 0 ldtrue ldfalse bgt 5 ldint 0 ret ldint 1 ret }";
	assert_eq!(run(program), 1);
}

#[test]
fn arrays() {
	let program = "func main() Int { .locals 1 .local 0 Ref.Array[Int] \
		ldint 5 newarr Int stloc 0 \
		ldloc 0 ldint 2 ldint 7 stelem Int \
		ldloc 0 ldint 2 ldelem Int \
		ldloc 0 ldlen \
		add ret }";
	assert_eq!(run(program), 12);
}

#[test]
fn char_arrays() {
	//Store and reload a byte-sized element
	let program = "func main() Int { .locals 1 .local 0 Ref.Array[Char] \
		ldint 3 newarr Char stloc 0 \
		ldloc 0 ldint 1 ldchar 65 stelem Char \
		ldloc 0 ldint 1 ldelem Char \
		pop ldint 1 ret }";
	assert_eq!(run(program), 1);
}

#[test]
fn objects_and_fields() {
	let program = "class Point { x Int y Int }\n\
		member Point::.constructor(Int Int) Void { .locals 0 \
			ldarg 0 ldarg 1 stfield Point::x \
			ldarg 0 ldarg 2 stfield Point::y ret }\n\
		member Point::sum() Int { .locals 0 \
			ldarg 0 ldfield Point::x ldarg 0 ldfield Point::y add ret }\n\
		func main() Int { .locals 0 \
			ldint 20 ldint 22 newobj Point::.constructor(Int Int) \
			callinst Point::sum() ret }";
	assert_eq!(run(program), 42);
}

#[test]
fn virtual_dispatch_selects_the_runtime_type() {
	let program = "class A { }\n\
		class B extends A { }\n\
		member A::.constructor() Void { .locals 0 ret }\n\
		member B::.constructor() Void { .locals 0 ret }\n\
		member A::name() Int { @Virtual(value=true) .locals 0 ldint 1 ret }\n\
		member B::name() Int { @Virtual(value=true) .locals 0 ldint 2 ret }\n\
		func main() Int { .locals 1 .local 0 Ref.A \
			newobj B::.constructor() stloc 0 \
			ldloc 0 callvirt A::name() ret }";
	assert_eq!(run(program), 2);
}

#[test]
fn inherited_member_calls() {
	let program = "class A { }\n\
		class B extends A { }\n\
		member A::.constructor() Void { .locals 0 ret }\n\
		member B::.constructor() Void { .locals 0 ret }\n\
		member A::value() Int { .locals 0 ldint 7 ret }\n\
		func main() Int { .locals 0 newobj B::.constructor() callinst B::value() ret }";
	assert_eq!(run(program), 7);
}

#[test]
fn native_math_library() {
	assert_eq!(run("func main() Int { .locals 0 ldint -42 call std.math.abs(Int) ret }"), 42);
	assert_eq!(run("func main() Int { .locals 0 ldfloat 2.0 call std.math.sqrt(Float) convfloattoint ret }"), 1);
	assert_eq!(
		run("func main() Int { .locals 0 ldfloat 2.0 ldfloat 5.0 call std.math.pow(Float Float) convfloattoint ret }"),
		32
	);
}

#[test]
fn printing_and_strings() {
	let program = "func main() Int { .locals 0 \
		ldint 42 call std.println(Int) \
		ldstr \"hello\" call std.println(Ref.std.String) \
		ldint 0 ret }";
	assert_eq!(run(program), 0);
}

#[test]
fn gc_collects_unreachable_objects() {
	//Allocate a run of arrays, keeping only the last reachable, then force
	//a collection
	let program = "func main() Int { .locals 2 .local 0 Ref.Array[Int] .local 1 Int \
		ldint 0 stloc 1 \
		ldloc 1 ldint 8 cmpeq brtrue 14 \
		ldint 100 newarr Int stloc 0 \
		ldloc 1 ldint 1 add stloc 1 br 2 \
		call std.gc.collect() \
		ldloc 1 ret }";

	run_with(program, VmConfig::default(), |result, vm| {
		assert_eq!(result, 8);
		assert_eq!(vm.num_live_objects(), 1);
		assert_eq!(vm.gc_stats().deallocated_objects, 7);
		assert!(vm.gc_stats().collections >= 1);
	});
}

#[test]
fn gc_moves_survivors_reachable_through_fields() {
	//A holder object keeps an array alive across a collection; the array is
	//read back through the moved reference afterwards
	let program = "class Holder { values Ref.Array[Int] }\n\
		member Holder::.constructor(Ref.Array[Int]) Void { .locals 0 \
			ldarg 0 ldarg 1 stfield Holder::values ret }\n\
		func main() Int { .locals 1 .local 0 Ref.Holder \
			ldint 3 newarr Int \
			newobj Holder::.constructor(Ref.Array[Int]) stloc 0 \
			ldloc 0 ldfield Holder::values ldint 1 ldint 42 stelem Int \
			call std.gc.collect() \
			ldloc 0 ldfield Holder::values ldint 1 ldelem Int ret }";

	run_with(program, VmConfig::default(), |result, vm| {
		assert_eq!(result, 42);
		assert_eq!(vm.num_live_objects(), 2);
	});
}

#[test]
fn lazy_compilation() {
	let config = VmConfig { lazy_jit: true, ..VmConfig::default() };

	let program = "func add2(Int Int) Int { .locals 0 ldarg 0 ldarg 1 add ret }\n\
		func twice(Int) Int { .locals 0 ldarg 0 ldarg 0 call add2(Int Int) ret }\n\
		func main() Int { .locals 0 ldint 21 call twice(Int) ret }";
	assert_eq!(run_with(program, config.clone(), |result, _| result), 42);

	let fib = "func fib(Int) Int { .locals 0 \
			ldarg 0 ldint 2 bge 5 \
			ldarg 0 ret \
			ldarg 0 ldint 1 sub call fib(Int) \
			ldarg 0 ldint 2 sub call fib(Int) \
			add ret }\n\
		func main() Int { .locals 0 ldint 10 call fib(Int) ret }";
	assert_eq!(run_with(fib, config, |result, _| result), 55);
}

#[test]
fn lazy_virtual_dispatch() {
	let config = VmConfig { lazy_jit: true, ..VmConfig::default() };

	let program = "class A { }\n\
		class B extends A { }\n\
		member A::.constructor() Void { .locals 0 ret }\n\
		member B::.constructor() Void { .locals 0 ret }\n\
		member A::name() Int { @Virtual(value=true) .locals 0 ldint 1 ret }\n\
		member B::name() Int { @Virtual(value=true) .locals 0 ldint 2 ret }\n\
		func main() Int { .locals 1 .local 0 Ref.A \
			newobj B::.constructor() stloc 0 \
			ldloc 0 callvirt A::name() ret }";
	assert_eq!(run_with(program, config, |result, _| result), 2);
}

#[test]
fn duplicate_and_pop() {
	let program = "func main() Int { .locals 0 ldint 21 dup add ret }";
	assert_eq!(run(program), 42);

	let program = "func main() Int { .locals 0 ldint 1 ldint 42 pop ret }";
	assert_eq!(run(program), 1);
}

#[test]
fn null_comparisons() {
	let program = "func main() Int { .locals 1 .local 0 Ref.Array[Int] \
		ldint 1 newarr Int stloc 0 \
		ldloc 0 ldnull cmpeq brtrue 9 ldint 1 ret ldint 0 ret }";
	assert_eq!(run(program), 1);
}
