mod types;
mod classes;
mod function;
mod instruction;
mod binder;

pub use types::*;
pub use classes::*;
pub use function::*;
pub use instruction::*;
pub use binder::*;
