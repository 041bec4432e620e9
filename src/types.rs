/// One word of a command line, sliced out of the line buffer.
pub type Token<'a> = &'a [u8];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
	pub args: Vec<Token<'a>>,
	pub input: Option<Token<'a>>,
	pub output: Option<Token<'a>>,
}

impl<'a> ParsedCommand<'a> {
	pub fn program(&self) -> Option<Token<'a>> {
		self.args.first().cloned()
	}
}

/// A non-empty chain of commands joined by `|`.
#[derive(Debug, PartialEq, Eq)]
pub struct Pipeline<'a> {
	commands: Vec<ParsedCommand<'a>>,
}

impl<'a> Pipeline<'a> {
	pub fn new(commands: Vec<ParsedCommand<'a>>) -> Option<Pipeline<'a>> {
		if commands.is_empty() {
			None
		} else {
			Some(Pipeline { commands: commands })
		}
	}

	pub fn commands(&self) -> &[ParsedCommand<'a>] {
		&self.commands
	}

	pub fn len(&self) -> usize {
		self.commands.len()
	}
}
