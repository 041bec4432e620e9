use std::ffi::{CStr, CString, NulError};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::debug;
use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::WaitStatus;
use nix::unistd;
use thiserror::Error;

use crate::builtin;
use crate::config::PipelineMode;
use crate::process::{syscall, ProcessHandle};
use crate::types::{ParsedCommand, Pipeline};

pub const EXIT_REDIRECT_FAILED: i32 = 1;
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Debug, Error)]
pub enum ExecError {
	#[error("fork: {}", .0.desc())]
	Spawn(#[source] nix::Error),
	#[error("pipe: {}", .0.desc())]
	Pipe(#[source] nix::Error),
	#[error("wait: {}", .0.desc())]
	Wait(#[source] nix::Error),
	#[error("argument contains a nul byte: {0}")]
	Nul(#[from] NulError),
}

/// A command converted for execvp before forking, so that the child does
/// not allocate.
#[derive(Debug)]
struct Prepared {
	argv: Vec<CString>,
	input: Option<CString>,
	output: Option<CString>,
}

impl Prepared {
	fn new(command: &ParsedCommand, keep_input: bool, keep_output: bool) -> Result<Prepared, ExecError> {
		let argv = command.args.iter()
			.map(|&arg| CString::new(arg))
			.collect::<Result<Vec<_>, _>>()?;
		let input = match command.input {
			Some(path) if keep_input => Some(CString::new(path)?),
			_ => None,
		};
		let output = match command.output {
			Some(path) if keep_output => Some(CString::new(path)?),
			_ => None,
		};
		Ok(Prepared { argv: argv, input: input, output: output })
	}
}

fn report(context: &[u8], errno: Errno) {
	let stderr = io::stderr();
	let mut stderr = stderr.lock();
	let _ = stderr.write_all(context);
	let _ = writeln!(stderr, ": {}", errno.desc());
}

/// Opens `path` and installs it as `target`, closing the temporary descriptor.
fn redirect(path: &CStr, flags: OFlag, target: RawFd) -> nix::Result<()> {
	let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
	let fd = fcntl::open(path, flags, mode)?;
	if fd == target {
		return Ok(());
	}
	let installed = syscall(|| unistd::dup2(fd, target));
	let _ = unistd::close(fd);
	installed.map(drop)
}

/// Connects the child's stdin to the previous stage and its stdout to the
/// next one, then closes every pipe descriptor it was handed.
fn wire(input: Option<&OwnedFd>, pipe: Option<&(OwnedFd, OwnedFd)>) -> nix::Result<()> {
	if let Some(read) = input {
		syscall(|| unistd::dup2(read.as_raw_fd(), libc::STDIN_FILENO))?;
		unistd::close(read.as_raw_fd())?;
	}
	if let Some(&(ref read, ref write)) = pipe {
		syscall(|| unistd::dup2(write.as_raw_fd(), libc::STDOUT_FILENO))?;
		unistd::close(read.as_raw_fd())?;
		unistd::close(write.as_raw_fd())?;
	}
	Ok(())
}

/// Runs in the forked child: applies file redirections, then runs a
/// built-in in place or replaces the process image. Returns the status to
/// exit with when no image replacement happened.
fn exec_child(prepared: &Prepared) -> i32 {
	// A stage without a program is a no-op, redirections included.
	let program = match prepared.argv.first() {
		Some(program) => program,
		None => return 0,
	};

	if let Some(ref path) = prepared.input {
		if let Err(errno) = redirect(path, OFlag::O_RDONLY, libc::STDIN_FILENO) {
			report(b"open input file", errno);
			return EXIT_REDIRECT_FAILED;
		}
	}
	if let Some(ref path) = prepared.output {
		let flags = OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC;
		if let Err(errno) = redirect(path, flags, libc::STDOUT_FILENO) {
			report(b"open output file", errno);
			return EXIT_REDIRECT_FAILED;
		}
	}

	if let Some(func) = builtin::match_builtin(program.as_bytes()) {
		let args: Vec<&[u8]> = prepared.argv.iter().map(|arg| arg.as_bytes()).collect();
		let stdout = io::stdout();
		let mut out = stdout.lock();
		return builtin::run(func, &args, &mut out).1;
	}

	// The Rust runtime ignores SIGPIPE, and an ignored disposition survives exec.
	let _ = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) };
	let errno = match unistd::execvp(program, &prepared.argv) {
		Ok(never) => match never {},
		Err(errno) => errno,
	};
	report(program.as_bytes(), errno);
	match errno {
		Errno::ENOENT | Errno::ENOTDIR => EXIT_NOT_FOUND,
		_ => EXIT_NOT_EXECUTABLE,
	}
}

/// Runs one command with its redirections and waits for it. A command
/// without a program name is a no-op and yields `None`.
pub fn run_command(command: &ParsedCommand) -> Result<Option<WaitStatus>, ExecError> {
	let program = match command.program() {
		Some(program) => program,
		None => return Ok(None),
	};
	debug!("running {}", String::from_utf8_lossy(program));
	let prepared = Prepared::new(command, true, true)?;
	let handle = ProcessHandle::spawn(|| exec_child(&prepared)).map_err(ExecError::Spawn)?;
	handle.wait().map(Some).map_err(ExecError::Wait)
}

fn spawn_stage(prepared: &Prepared, input: Option<&OwnedFd>, pipe: Option<&(OwnedFd, OwnedFd)>)
               -> Result<ProcessHandle, ExecError> {
	ProcessHandle::spawn(|| {
		if let Err(errno) = wire(input, pipe) {
			report(b"dup2", errno);
			return EXIT_REDIRECT_FAILED;
		}
		exec_child(prepared)
	}).map_err(ExecError::Spawn)
}

fn open_pipe(is_last: bool) -> Result<Option<(OwnedFd, OwnedFd)>, ExecError> {
	if is_last {
		Ok(None)
	} else {
		unistd::pipe2(OFlag::O_CLOEXEC).map(Some).map_err(ExecError::Pipe)
	}
}

/// Each stage exits before the next one is forked; its output waits in the
/// pipe buffer.
fn run_sequential(stages: &[Prepared]) -> Result<Vec<WaitStatus>, ExecError> {
	let mut statuses = Vec::with_capacity(stages.len());
	let mut carried: Option<OwnedFd> = None;
	for (i, prepared) in stages.iter().enumerate() {
		let pipe = open_pipe(i + 1 == stages.len())?;
		let handle = spawn_stage(prepared, carried.as_ref(), pipe.as_ref())?;
		statuses.push(handle.wait().map_err(ExecError::Wait)?);
		// Drops the write end and the previous read end.
		carried = pipe.map(|(read, _write)| read);
	}
	Ok(statuses)
}

/// Every stage is forked before any is waited for. Stages already running
/// are still reaped when a later pipe or fork fails.
fn run_concurrent(stages: &[Prepared]) -> Result<Vec<WaitStatus>, ExecError> {
	let mut handles = Vec::with_capacity(stages.len());
	let mut carried: Option<OwnedFd> = None;
	let mut failure = None;
	for (i, prepared) in stages.iter().enumerate() {
		let spawned = open_pipe(i + 1 == stages.len()).and_then(|pipe| {
			let handle = spawn_stage(prepared, carried.as_ref(), pipe.as_ref())?;
			Ok((handle, pipe))
		});
		match spawned {
			Ok((handle, pipe)) => {
				handles.push(handle);
				carried = pipe.map(|(read, _write)| read);
			},
			Err(e) => {
				failure = Some(e);
				break;
			},
		}
	}
	// A writer must not block on a reader that was never spawned.
	drop(carried);

	let mut statuses = Vec::with_capacity(handles.len());
	for handle in handles {
		match handle.wait() {
			Ok(status) => statuses.push(status),
			Err(e) => if failure.is_none() {
				failure = Some(ExecError::Wait(e));
			},
		}
	}
	match failure {
		Some(e) => Err(e),
		None => Ok(statuses),
	}
}

/// Runs a pipeline. Only the first stage's input file and the last stage's
/// output file are applied; redirections elsewhere are ignored.
pub fn run_pipeline(pipeline: &Pipeline, mode: PipelineMode) -> Result<Vec<WaitStatus>, ExecError> {
	let last = pipeline.len() - 1;
	let stages = pipeline.commands().iter()
		.enumerate()
		.map(|(i, command)| Prepared::new(command, i == 0, i == last))
		.collect::<Result<Vec<_>, _>>()?;
	debug!("running {} stage(s) in {:?} mode", stages.len(), mode);
	match mode {
		PipelineMode::Sequential => run_sequential(&stages),
		PipelineMode::Concurrent => run_concurrent(&stages),
	}
}
