use crate::errors::LoadError;
use crate::loader::assembly::*;

/// Splits a textual assembly into tokens. `#` starts a line comment, `"`
/// delimits string literals with `\` escapes, and `( ) @ =` are single
/// character tokens.
pub fn tokenize(text: &str) -> Vec<String> {
	let mut tokens = Vec::new();
	let mut token = String::new();
	let mut is_comment = false;
	let mut is_string = false;
	let mut escape = false;

	for c in text.chars() {
		if !is_comment && c == '#' && !is_string {
			is_comment = true;
			continue;
		}

		if is_comment {
			if c == '\n' {
				is_comment = false;
			}
			continue;
		}

		if !escape {
			if c == '\\' {
				escape = true;
				continue;
			}

			if c == '"' {
				if is_string {
					tokens.push(std::mem::take(&mut token));
				}
				is_string = !is_string;
				continue;
			}
		} else {
			escape = false;
			token.push(c);
			continue;
		}

		if is_string {
			token.push(c);
			continue;
		}

		if c.is_whitespace() {
			if !token.is_empty() {
				tokens.push(std::mem::take(&mut token));
			}
		} else if matches!(c, '(' | ')' | '@' | '=') {
			if !token.is_empty() {
				tokens.push(std::mem::take(&mut token));
			}
			tokens.push(c.to_string());
		} else {
			token.push(c);
		}
	}

	if !token.is_empty() {
		tokens.push(token);
	}

	tokens
}

struct TokenReader<'t> {
	tokens: &'t [String],
	index: usize,
}

impl<'t> TokenReader<'t> {
	fn new(tokens: &'t [String]) -> Self {
		TokenReader { tokens, index: 0 }
	}

	fn at_end(&self) -> bool {
		self.index >= self.tokens.len()
	}

	fn next(&mut self) -> Result<&'t str, LoadError> {
		let token = self.tokens.get(self.index).ok_or_else(|| LoadError::Parse("Reached end of tokens.".to_string()))?;
		self.index += 1;
		Ok(token)
	}

	fn peek(&self) -> Option<&'t str> {
		self.tokens.get(self.index).map(String::as_str)
	}

	fn expect(&mut self, expected: &str, message: &str) -> Result<(), LoadError> {
		match self.next()? {
			token if token == expected => Ok(()),
			_ => Err(LoadError::Parse(message.to_string())),
		}
	}
}

fn parse_int(token: &str) -> Result<i32, LoadError> {
	token.parse().map_err(|_| LoadError::Parse(format!("'{}' is not a valid integer.", token)))
}

fn parse_float(token: &str) -> Result<f32, LoadError> {
	token.parse().map_err(|_| LoadError::Parse(format!("'{}' is not a valid float.", token)))
}

//The instructions without operands.
fn plain_instruction(mnemonic: &str) -> Option<ParsedInstruction> {
	let instruction = match mnemonic {
		"nop" => ParsedInstruction::Nop,
		"pop" => ParsedInstruction::Pop,
		"dup" => ParsedInstruction::Duplicate,
		"add" => ParsedInstruction::Add,
		"sub" => ParsedInstruction::Sub,
		"mul" => ParsedInstruction::Mul,
		"div" => ParsedInstruction::Div,
		"ldtrue" => ParsedInstruction::LoadTrue,
		"ldfalse" => ParsedInstruction::LoadFalse,
		"ldnull" => ParsedInstruction::LoadNull,
		"and" => ParsedInstruction::And,
		"or" => ParsedInstruction::Or,
		"not" => ParsedInstruction::Not,
		"convinttofloat" => ParsedInstruction::ConvertIntToFloat,
		"convfloattoint" => ParsedInstruction::ConvertFloatToInt,
		"cmpeq" => ParsedInstruction::CompareEqual,
		"cmpne" => ParsedInstruction::CompareNotEqual,
		"cmpgt" => ParsedInstruction::CompareGreater,
		"cmpge" => ParsedInstruction::CompareGreaterOrEqual,
		"cmplt" => ParsedInstruction::CompareLess,
		"cmple" => ParsedInstruction::CompareLessOrEqual,
		"ldlen" => ParsedInstruction::LoadArrayLength,
		"ret" => ParsedInstruction::Ret,
		_ => return None,
	};
	Some(instruction)
}

//The branch instructions; the operand is an instruction index.
fn branch_instruction(mnemonic: &str, target: u32) -> Option<ParsedInstruction> {
	let instruction = match mnemonic {
		"br" => ParsedInstruction::Branch(target),
		"brtrue" => ParsedInstruction::BranchTrue(target),
		"brfalse" => ParsedInstruction::BranchFalse(target),
		"beq" => ParsedInstruction::BranchEqual(target),
		"bne" => ParsedInstruction::BranchNotEqual(target),
		"bgt" => ParsedInstruction::BranchGreater(target),
		"bge" => ParsedInstruction::BranchGreaterOrEqual(target),
		"blt" => ParsedInstruction::BranchLess(target),
		"ble" => ParsedInstruction::BranchLessOrEqual(target),
		_ => return None,
	};
	Some(instruction)
}

//The instructions carrying a type name operand.
fn typed_instruction(mnemonic: &str, type_name: String) -> Option<ParsedInstruction> {
	let instruction = match mnemonic {
		"newarr" => ParsedInstruction::NewArray(type_name),
		"ldelem" => ParsedInstruction::LoadElement(type_name),
		"stelem" => ParsedInstruction::StoreElement(type_name),
		"ldfield" => ParsedInstruction::LoadField(type_name),
		"stfield" => ParsedInstruction::StoreField(type_name),
		_ => return None,
	};
	Some(instruction)
}

fn split_member_name(name: &str, context: &str) -> Result<(String, String), LoadError> {
	match name.split_once("::") {
		Some((class_name, member_name)) => Ok((class_name.to_string(), member_name.to_string())),
		None => Err(LoadError::Parse(format!("Expected '::' in {}.", context))),
	}
}

fn parse_attribute(reader: &mut TokenReader, container: &mut AttributeContainer) -> Result<(), LoadError> {
	let name = reader.next()?.to_string();
	reader.expect("(", "Expected '(' after attribute name.")?;

	if container.contains_key(&name) {
		return Err(LoadError::Parse(format!("The attribute '{}' is already defined.", name)));
	}

	let mut attribute = Attribute { name: name.clone(), values: Default::default() };

	loop {
		let key = reader.next()?;
		if key == ")" {
			break;
		}

		reader.expect("=", "Expected '=' after name in attribute.")?;
		let value = reader.next()?;

		if attribute.values.insert(key.to_string(), value.to_string()).is_some() {
			return Err(LoadError::Parse(format!("The key '{}' is already defined in the attribute '{}'.", key, name)));
		}
	}

	container.insert(name, attribute);
	Ok(())
}

fn parse_function_definition(reader: &mut TokenReader) -> Result<ParsedFunction, LoadError> {
	let mut function = ParsedFunction {
		name: reader.next()?.to_string(),
		..Default::default()
	};

	reader.expect("(", "Expected '(' after function name.")?;

	loop {
		let parameter = reader.next()?;
		if parameter == ")" {
			break;
		}
		function.parameters.push(parameter.to_string());
	}

	function.return_type = reader.next()?.to_string();
	Ok(function)
}

fn read_call_parameters(reader: &mut TokenReader) -> Result<Vec<String>, LoadError> {
	let mut parameters = Vec::new();
	loop {
		let parameter = reader.next()?;
		if parameter == ")" {
			break;
		}
		parameters.push(parameter.to_string());
	}
	Ok(parameters)
}

fn parse_function_body(reader: &mut TokenReader, function: &mut ParsedFunction) -> Result<(), LoadError> {
	reader.expect("{", "Expected '{' before the function body.")?;

	let mut locals_set = false;

	loop {
		let token = reader.next()?;
		let mnemonic = token.to_lowercase();

		match mnemonic.as_str() {
			"}" => return Ok(()),
			"@" => parse_attribute(reader, &mut function.attributes)?,
			".locals" => {
				if locals_set {
					return Err(LoadError::Parse("The locals have already been set.".to_string()));
				}

				let count = parse_int(reader.next()?)?;
				if count < 0 {
					return Err(LoadError::Parse("The number of locals must be >= 0.".to_string()));
				}

				function.locals = vec![None; count as usize];
				locals_set = true;
			}
			".local" => {
				if !locals_set {
					return Err(LoadError::Parse("The locals must be set.".to_string()));
				}

				let index = parse_int(reader.next()?)?;
				let type_name = reader.next()?.to_string();

				match function.locals.get_mut(index.max(0) as usize) {
					Some(local) if index >= 0 => *local = Some(type_name),
					_ => return Err(LoadError::Parse("Invalid local index.".to_string())),
				}
			}
			"ldint" => {
				let value = parse_int(reader.next()?)?;
				function.instructions.push(ParsedInstruction::LoadInt(value));
			}
			"ldfloat" => {
				let value = parse_float(reader.next()?)?;
				function.instructions.push(ParsedInstruction::LoadFloat(value));
			}
			"ldchar" => {
				let value = parse_int(reader.next()?)?;
				let value = u32::try_from(value)
					.ok()
					.and_then(char::from_u32)
					.ok_or_else(|| LoadError::Parse("Invalid character value.".to_string()))?;
				function.instructions.push(ParsedInstruction::LoadChar(value));
			}
			"ldstr" => {
				let value = reader.next()?.to_string();
				function.instructions.push(ParsedInstruction::LoadString(value));
			}
			"ldloc" | "stloc" => {
				if !locals_set {
					return Err(LoadError::Parse("The locals must be set.".to_string()));
				}

				let index = parse_int(reader.next()?)?;
				if index < 0 || index as usize >= function.locals.len() {
					return Err(LoadError::Parse("The local index is out of range.".to_string()));
				}

				function.instructions.push(match mnemonic.as_str() {
					"ldloc" => ParsedInstruction::LoadLocal(index as u32),
					_ => ParsedInstruction::StoreLocal(index as u32),
				});
			}
			"ldarg" => {
				let index = parse_int(reader.next()?)?;
				function.instructions.push(ParsedInstruction::LoadArg(index.max(0) as u32));
			}
			"call" | "callinst" | "callvirt" => {
				let name = reader.next()?.to_string();
				reader.expect("(", "Expected '(' after called function.")?;
				let parameters = read_call_parameters(reader)?;

				let instruction = match mnemonic.as_str() {
					"call" => {
						if name.contains("::") {
							return Err(LoadError::Parse("'::' is only allowed in member functions.".to_string()));
						}
						ParsedInstruction::Call { name, parameters }
					}
					"callinst" => {
						let (class_name, name) = split_member_name(&name, "called member function")?;
						ParsedInstruction::CallInstance { class_name, name, parameters }
					}
					_ => {
						let (class_name, name) = split_member_name(&name, "called member function")?;
						ParsedInstruction::CallVirtual { class_name, name, parameters }
					}
				};

				function.instructions.push(instruction);
			}
			"newobj" => {
				let name = reader.next()?.to_string();
				let (class_name, member_name) = split_member_name(&name, "a new object instruction")?;

				if member_name != ".constructor" {
					return Err(LoadError::Parse("Expected call to constructor.".to_string()));
				}

				reader.expect("(", "Expected '(' after called function.")?;
				let parameters = read_call_parameters(reader)?;
				function.instructions.push(ParsedInstruction::NewObject { class_name, parameters });
			}
			"br" | "brtrue" | "brfalse" | "beq" | "bne" | "bgt" | "bge" | "blt" | "ble" => {
				let target = parse_int(reader.next()?)?;
				function.instructions.push(branch_instruction(&mnemonic, target as u32).unwrap());
			}
			"newarr" | "ldelem" | "stelem" | "ldfield" | "stfield" => {
				let type_name = reader.next()?.to_string();
				function.instructions.push(typed_instruction(&mnemonic, type_name).unwrap());
			}
			_ => match plain_instruction(&mnemonic) {
				Some(instruction) => function.instructions.push(instruction),
				None => return Err(LoadError::Parse(format!("'{}' is not a valid instruction.", token))),
			},
		}
	}
}

fn parse_class(reader: &mut TokenReader) -> Result<ParsedClass, LoadError> {
	let mut class = ParsedClass {
		name: reader.next()?.to_string(),
		..Default::default()
	};

	if reader.peek() == Some("extends") {
		reader.next()?;
		class.parent_class_name = Some(reader.next()?.to_string());
	}

	reader.expect("{", "Expected '{' before the class body.")?;

	loop {
		let token = reader.next()?;
		match token {
			"}" => return Ok(class),
			"@" => match class.fields.last_mut() {
				//Attributes before any field attach to the class itself
				Some(field) => parse_attribute(reader, &mut field.attributes)?,
				None => parse_attribute(reader, &mut class.attributes)?,
			},
			_ => {
				let field = ParsedField {
					name: token.to_string(),
					type_name: reader.next()?.to_string(),
					attributes: Default::default(),
				};
				class.fields.push(field);
			}
		}
	}
}

/// Parses a tokenized assembly into its functions and classes.
pub fn parse_tokens(tokens: &[String]) -> Result<ParsedAssembly, LoadError> {
	let mut assembly = ParsedAssembly::default();
	let mut reader = TokenReader::new(tokens);

	while !reader.at_end() {
		let token = reader.next()?;
		match token.to_lowercase().as_str() {
			"func" => {
				let mut function = parse_function_definition(&mut reader)?;
				if function.name.contains("::") {
					return Err(LoadError::Parse("'::' is only allowed in member functions.".to_string()));
				}

				parse_function_body(&mut reader, &mut function)?;
				assembly.functions.push(function);
			}
			"member" => {
				let mut function = parse_function_definition(&mut reader)?;
				let (class_name, member_name) = split_member_name(&function.name, "member function name")?;

				function.class_name = class_name;
				function.member_function_name = member_name;
				function.is_member_function = true;

				parse_function_body(&mut reader, &mut function)?;
				assembly.functions.push(function);
			}
			"extern" => {
				let mut function = parse_function_definition(&mut reader)?;
				function.is_external = true;
				assembly.functions.push(function);
			}
			"class" => assembly.classes.push(parse_class(&mut reader)?),
			_ => return Err(LoadError::Parse(format!("Invalid identifier '{}'.", token))),
		}
	}

	Ok(assembly)
}

/// Tokenizes and parses a textual assembly.
pub fn parse_assembly(text: &str) -> Result<ParsedAssembly, LoadError> {
	parse_tokens(&tokenize(text))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tokenizing() {
		let tokens = tokenize("func main() Int { ldint 42 ret } # trailing comment");
		assert_eq!(tokens, ["func", "main", "(", ")", "Int", "{", "ldint", "42", "ret", "}"]);

		let tokens = tokenize("ldstr \"hello world\"");
		assert_eq!(tokens, ["ldstr", "hello world"]);

		let tokens = tokenize("@AccessModifier(value=private)");
		assert_eq!(tokens, ["@", "AccessModifier", "(", "value", "=", "private", ")"]);
	}

	#[test]
	fn parsing_a_function() {
		let assembly = parse_assembly("func main() Int { .locals 1 .local 0 Int ldint 42 stloc 0 ldloc 0 ret }").unwrap();
		assert_eq!(assembly.functions.len(), 1);

		let function = &assembly.functions[0];
		assert_eq!(function.name, "main");
		assert_eq!(function.return_type, "Int");
		assert_eq!(function.locals, vec![Some("Int".to_string())]);
		assert_eq!(function.instructions.len(), 4);
		assert!(matches!(function.instructions[0], ParsedInstruction::LoadInt(42)));
		assert!(matches!(function.instructions[1], ParsedInstruction::StoreLocal(0)));
	}

	#[test]
	fn parsing_calls() {
		let assembly = parse_assembly(
			"func main() Int { .locals 0 ldint 1 call half(Int) ret } func half(Int) Int { .locals 0 ldarg 0 ret }",
		)
		.unwrap();

		let ParsedInstruction::Call { name, parameters } = &assembly.functions[0].instructions[1] else {
			panic!("expected a call instruction");
		};
		assert_eq!(name, "half");
		assert_eq!(parameters, &["Int".to_string()]);
	}

	#[test]
	fn parsing_a_class() {
		let assembly = parse_assembly(
			"class Point { x Int y Int @AccessModifier(value=private) }\n\
			 member Point::sum() Int { .locals 0 ldarg 0 ldfield Point::x ldarg 0 ldfield Point::y add ret }",
		)
		.unwrap();

		let class = &assembly.classes[0];
		assert_eq!(class.name, "Point");
		assert_eq!(class.fields.len(), 2);
		assert_eq!(class.fields[1].attributes["AccessModifier"].values["value"], "private");

		let member = &assembly.functions[0];
		assert!(member.is_member_function);
		assert_eq!(member.class_name, "Point");
		assert_eq!(member.member_function_name, "sum");
	}

	#[test]
	fn parsing_inheritance_and_virtuals() {
		let assembly = parse_assembly(
			"class A { }\n\
			 class B extends A { }\n\
			 member A::name(Ref.A) Int { @Virtual(value=true) .locals 0 ldint 1 ret }",
		)
		.unwrap();

		assert_eq!(assembly.classes[1].parent_class_name.as_deref(), Some("A"));
		assert_eq!(assembly.functions[0].attributes["Virtual"].values["value"], "true");
	}

	#[test]
	fn rejects_invalid_input() {
		assert!(parse_assembly("func main() Int { unknowable }").is_err());
		assert!(parse_assembly("bogus").is_err());
		assert!(parse_assembly("func main() Int { .local 0 Int }").is_err());
		assert!(parse_assembly("func a::b() Int { ret }").is_err());
	}
}
