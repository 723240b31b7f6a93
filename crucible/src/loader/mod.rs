mod assembly;
mod parser;
mod classes;
mod functions;
mod verifier;

pub use assembly::*;
pub use parser::*;
pub use classes::*;
pub use functions::*;
pub use verifier::*;
