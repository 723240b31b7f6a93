use std::process::exit;

use crucible::engine::{VirtualMachine, VmConfig};

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let mut config = VmConfig::default();
	let mut path = None;

	for argument in std::env::args().skip(1) {
		match argument.as_str() {
			"--lazy" => config.lazy_jit = true,
			"--no-gc" => config.disable_gc = true,
			"--no-rtlib" => config.load_runtime_library = false,
			"--print-stack-frames" => config.print_stack_frames = true,
			_ => path = Some(argument),
		}
	}

	let Some(path) = path else {
		eprintln!("usage: crucible [--lazy] [--no-gc] [--no-rtlib] [--print-stack-frames] <program>");
		exit(64);
	};

	let mut vm = match VirtualMachine::new(config) {
		Ok(vm) => vm,
		Err(error) => {
			eprintln!("{}", error);
			exit(1);
		}
	};

	if let Err(error) = vm.load_assembly_file(&path) {
		eprintln!("{}", error);
		exit(1);
	}

	match vm.execute() {
		Ok(result) => println!("{}", result),
		Err(error) => {
			eprintln!("{}", error);
			exit(1);
		}
	}
}
