use crate::types::*;

pub struct Tokens<'a> {
	line: &'a [u8],
	i: usize,
}

impl<'a> Tokens<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.line.get(self.i) {
			if !f(*c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		match c {
			b' ' | b'\t' | b'\n' => true,
			_ => false,
		}
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Tokens::is_whitespace);
	}

	fn read_word(&mut self) -> Token<'a> {
		let orig = self.i;
		self.proceed_while(|c| !Tokens::is_whitespace(c));
		&self.line[orig .. self.i]
	}
}

impl<'a> Iterator for Tokens<'a> {
	type Item = Token<'a>;

	fn next(&mut self) -> Option<Token<'a>> {
		self.skip_whitespaces();
		if self.i == self.line.len() {
			None
		} else {
			Some(self.read_word())
		}
	}
}

pub fn tokenize<'a>(line: &'a [u8]) -> Tokens<'a> {
	Tokens { line: line, i: 0 }
}

/// Pads `<` and `>` with spaces. The result stays below `capacity` bytes.
pub fn normalize_redirects(line: &[u8], capacity: usize) -> Vec<u8> {
	let mut out = Vec::with_capacity(capacity);
	for &c in line {
		if out.len() + 3 >= capacity {
			break;
		}
		match c {
			b'<' | b'>' => {
				out.push(b' ');
				out.push(c);
				out.push(b' ');
			},
			_ => out.push(c),
		}
	}
	out
}

pub fn parse_command<'a, I>(tokens: I, max_args: usize) -> ParsedCommand<'a>
	where I: IntoIterator<Item = Token<'a>>
{
	let mut command = ParsedCommand::default();
	let mut tokens = tokens.into_iter();
	while let Some(token) = tokens.next() {
		match token {
			b"<" => if let Some(target) = tokens.next() {
				command.input = Some(target);
			},
			b">" => if let Some(target) = tokens.next() {
				command.output = Some(target);
			},
			_ => if command.args.len() < max_args {
				command.args.push(token);
			},
		}
	}
	command
}

pub fn parse_line<'a>(line: &'a [u8], max_args: usize) -> ParsedCommand<'a> {
	parse_command(tokenize(line), max_args)
}

pub fn split_pipeline<'a>(line: &'a [u8], max_stages: usize) -> Vec<&'a [u8]> {
	line.split(|&c| c == b'|')
		.filter(|segment| !segment.is_empty())
		.take(max_stages)
		.collect()
}

pub fn parse_pipeline<'a>(line: &'a [u8], max_stages: usize, max_args: usize) -> Option<Pipeline<'a>> {
	let commands = split_pipeline(line, max_stages)
		.into_iter()
		.map(|segment| parse_line(segment, max_args))
		.collect();
	Pipeline::new(commands)
}
