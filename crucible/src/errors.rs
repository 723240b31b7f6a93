use std::fmt::{Display, Formatter};

/// An error raised while loading an assembly: parse failures, unknown types,
/// redefined symbols and invalid attribute values.
#[derive(Debug)]
pub enum LoadError {
	Parse(String),
	UndefinedType(String),
	UndefinedClass(String),
	UndefinedFunction(String),
	AlreadyDefinedClass(String),
	AlreadyDefinedFunction(String),
	SelfInheritance(String),
	MutualInheritance(String, String),
	InvalidAttributeValue(String, String),
	MissingEntryPoint,
	InvalidEntryPoint,
	Io(std::io::Error),
}

impl Display for LoadError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			LoadError::Parse(message) => write!(f, "{}", message),
			LoadError::UndefinedType(name) => write!(f, "There exists no type called '{}'.", name),
			LoadError::UndefinedClass(name) => write!(f, "'{}' is not a defined class.", name),
			LoadError::UndefinedFunction(signature) => write!(f, "The external function '{}' is not defined.", signature),
			LoadError::AlreadyDefinedClass(name) => write!(f, "The class '{}' is already defined.", name),
			LoadError::AlreadyDefinedFunction(signature) => write!(f, "The function '{}' is already defined.", signature),
			LoadError::SelfInheritance(name) => write!(f, "Self inheritance is not allowed ({}).", name),
			LoadError::MutualInheritance(first, second) => write!(f, "Mutual inheritance is not allowed ({}, {}).", first, second),
			LoadError::InvalidAttributeValue(attribute, value) => {
				write!(f, "'{}' is not a valid value for the attribute '{}'.", value, attribute)
			}
			LoadError::MissingEntryPoint => write!(f, "The main function must be defined."),
			LoadError::InvalidEntryPoint => write!(f, "The main function must have the signature 'main() Int'."),
			LoadError::Io(error) => write!(f, "{}", error),
		}
	}
}

impl From<std::io::Error> for LoadError {
	fn from(value: std::io::Error) -> Self {
		LoadError::Io(value)
	}
}

/// A verification error, carrying the signature of the offending function and
/// the index of the instruction that failed to verify.
#[derive(Debug)]
pub struct VerifyError {
	pub signature: String,
	pub instruction: usize,
	pub message: String,
}

impl VerifyError {
	pub fn new(signature: impl Into<String>, instruction: usize, message: impl Into<String>) -> Self {
		VerifyError {
			signature: signature.into(),
			instruction,
			message: message.into(),
		}
	}
}

impl Display for VerifyError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} @ {}: {}", self.signature, self.instruction, self.message)
	}
}

/// An error raised while resolving symbols or freezing code pages.
#[derive(Debug)]
pub enum LinkError {
	UnresolvedCall(String, String),
	Protection(std::io::Error),
}

impl Display for LinkError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			LinkError::UnresolvedCall(function, callee) => {
				write!(f, "The function '{}' has an unresolved call to '{}'.", function, callee)
			}
			LinkError::Protection(error) => write!(f, "Unable to change memory protection: {}", error),
		}
	}
}

impl From<std::io::Error> for LinkError {
	fn from(value: std::io::Error) -> Self {
		LinkError::Protection(value)
	}
}

/// Any failure between loading an assembly and invoking the entry point.
#[derive(Debug)]
pub enum ExecuteError {
	Load(LoadError),
	Verify(VerifyError),
	Link(LinkError),
}

impl Display for ExecuteError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			ExecuteError::Load(error) => write!(f, "{}", error),
			ExecuteError::Verify(error) => write!(f, "{}", error),
			ExecuteError::Link(error) => write!(f, "{}", error),
		}
	}
}

impl From<LoadError> for ExecuteError {
	fn from(value: LoadError) -> Self {
		ExecuteError::Load(value)
	}
}

impl From<VerifyError> for ExecuteError {
	fn from(value: VerifyError) -> Self {
		ExecuteError::Verify(value)
	}
}

impl From<LinkError> for ExecuteError {
	fn from(value: LinkError) -> Self {
		ExecuteError::Link(value)
	}
}

impl std::error::Error for LoadError {}
impl std::error::Error for VerifyError {}
impl std::error::Error for LinkError {}
impl std::error::Error for ExecuteError {}
