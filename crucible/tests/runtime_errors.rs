//! Runtime error checks terminate the process, so these scenarios run the
//! `crucible` binary against programs written to temporary files.

#![cfg(all(target_arch = "x86_64", target_os = "linux"))]

use std::path::PathBuf;
use std::process::{Command, Output};

fn run_program(name: &str, text: &str) -> Output {
	let path: PathBuf = std::env::temp_dir().join(format!("crucible-test-{}-{}.vmasm", name, std::process::id()));
	std::fs::write(&path, text).unwrap();

	let output = Command::new(env!("CARGO_BIN_EXE_crucible")).arg(&path).output().unwrap();
	let _ = std::fs::remove_file(&path);
	output
}

fn stderr_of(output: &Output) -> String {
	String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn successful_programs_print_their_result() {
	let output = run_program("result", "func main() Int { .locals 0 ldint 20 ldint 22 add ret }");
	assert!(output.status.success());
	assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");
}

#[test]
fn array_bounds_check_fires() {
	let program = "func main() Int { .locals 1 .local 0 Ref.Array[Int] \
		ldint 3 newarr Int stloc 0 \
		ldloc 0 ldint 5 ldelem Int ret }";

	let output = run_program("bounds", program);
	assert!(!output.status.success());
	assert!(stderr_of(&output).contains("Error: Array index is out of bounds."));
}

#[test]
fn negative_indices_are_out_of_bounds() {
	let program = "func main() Int { .locals 1 .local 0 Ref.Array[Int] \
		ldint 3 newarr Int stloc 0 \
		ldloc 0 ldint -1 ldelem Int ret }";

	let output = run_program("negative-index", program);
	assert!(!output.status.success());
	assert!(stderr_of(&output).contains("Error: Array index is out of bounds."));
}

#[test]
fn null_field_access_fires() {
	let program = "class Point { x Int }\n\
		func main() Int { .locals 0 ldnull ldfield Point::x ret }";

	let output = run_program("null-field", program);
	assert!(!output.status.success());
	assert!(stderr_of(&output).contains("Error: Null reference."));
}

#[test]
fn null_member_call_fires() {
	let program = "class A { }\n\
		member A::value() Int { .locals 0 ldint 1 ret }\n\
		member A::.constructor() Void { .locals 0 ret }\n\
		func main() Int { .locals 1 .local 0 Ref.A \
			ldnull stloc 0 ldloc 0 callinst A::value() ret }";

	let output = run_program("null-call", program);
	assert!(!output.status.success());
	assert!(stderr_of(&output).contains("Error: Null reference."));
}

#[test]
fn negative_array_creation_fires() {
	let program = "func main() Int { .locals 0 ldint -1 newarr Int pop ldint 0 ret }";

	let output = run_program("creation", program);
	assert!(!output.status.success());
	assert!(stderr_of(&output).contains("Error: The length of the array must be >= 0."));
}

#[test]
fn runaway_recursion_overflows_the_call_stack() {
	let program = "func forever() Int { .locals 0 call forever() ret }\n\
		func main() Int { .locals 0 call forever() ret }";

	let output = run_program("overflow", program);
	assert!(!output.status.success());
	assert!(stderr_of(&output).contains("Error: Stack overflow."));
}

#[test]
fn verification_failures_are_reported() {
	let program = "func main() Int { .locals 0 ldint 1 ldfloat 2.0 add ret }";

	let output = run_program("verify", program);
	assert!(!output.status.success());
	assert!(stderr_of(&output).contains("main()"));
}
