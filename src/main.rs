mod builtin;
mod config;
mod eval;
mod parser;
mod process;
mod types;

use std::io;
use io::BufRead;
use io::Write;

use env_logger::Env;
use log::debug;

use builtin::Flow;
use config::Config;

/// Reads one line without its terminator, keeping at most `capacity - 1`
/// bytes. `None` at end of input.
fn read_line<R: BufRead>(input: &mut R, capacity: usize) -> io::Result<Option<Vec<u8>>> {
	let mut line: Vec<u8> = vec![];
	if input.read_until(b'\n', &mut line)? == 0 {
		return Ok(None);
	}
	if let Some(end) = line.iter().position(|&c| c == b'\r' || c == b'\n') {
		line.truncate(end);
	}
	line.truncate(capacity.saturating_sub(1));
	Ok(Some(line))
}

fn run_line(config: &Config, line: &[u8]) -> Flow {
	let normalized = parser::normalize_redirects(line, config.scratch_capacity());

	if line.contains(&b'|') {
		if let Some(pipeline) = parser::parse_pipeline(&normalized, config.max_stages, config.max_args) {
			if let Err(e) = eval::run_pipeline(&pipeline, config.pipeline_mode) {
				eprintln!("{}", e);
			}
		}
		return Flow::Continue;
	}

	let command = parser::parse_line(&normalized, config.max_args);
	let program = match command.program() {
		Some(program) => program,
		None => return Flow::Continue,
	};
	if let Some(builtin) = builtin::match_builtin(program) {
		debug!("built-in {}", String::from_utf8_lossy(program));
		return builtin::dispatch(builtin, &command);
	}
	if let Err(e) = eval::run_command(&command) {
		eprintln!("{}", e);
	}
	Flow::Continue
}

fn main() {
	env_logger::Builder::from_env(Env::new().filter_or(config::LOG_KEY, "warn")).init();
	let config = Config::from_env();
	debug!("{:?}", config);

	let mut stdout = io::stdout();
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	loop {
		let _ = stdout.write_all(config.prompt.as_bytes());
		let _ = stdout.flush();
		let line = match read_line(&mut stdin_locked, config.line_capacity) {
			Ok(Some(line)) => line,
			Ok(None) | Err(_) => {
				println!();
				break;
			},
		};
		if line.is_empty() {
			continue;
		}
		if run_line(&config, &line) == Flow::Exit {
			break;
		}
	}
}
