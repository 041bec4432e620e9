use std::{env, fmt, fs, io};
use std::ffi::OsStr;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt};
use std::path::Path;

use chrono::{Local, TimeZone};
use nix::errno::Errno;
use nix::unistd::{Gid, Group, Uid, User};
use thiserror::Error;

use crate::types::ParsedCommand;

/// Whether the prompt loop keeps going after a built-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow { Continue, Exit }

#[derive(Debug, Error)]
pub enum BuiltinError {
	#[error("cd: expected argument")]
	CdMissingArgument,
	#[error("{0}: missing operand")]
	MissingOperand(&'static str),
	#[error("cp: missing source or destination file operand")]
	CpMissingOperand,
	#[error("{context}: {}", describe(.source))]
	Io {
		context: String,
		#[source]
		source: io::Error,
	},
}

/// perror-style text for OS errors, without the "(os error N)" suffix.
fn describe(e: &io::Error) -> String {
	match e.raw_os_error() {
		Some(code) => Errno::from_raw(code).desc().to_string(),
		None => e.to_string(),
	}
}

trait IoContext<T> {
	fn context<D: fmt::Display>(self, what: D) -> Result<T, BuiltinError>;
}

impl<T> IoContext<T> for io::Result<T> {
	fn context<D: fmt::Display>(self, what: D) -> Result<T, BuiltinError> {
		self.map_err(|source| BuiltinError::Io { context: what.to_string(), source: source })
	}
}

/// A built-in gets the whole argument list, its own name included.
pub type Builtin = fn(&[&[u8]], &mut dyn Write) -> Result<Flow, BuiltinError>;

fn path(arg: &[u8]) -> &Path {
	Path::new(OsStr::from_bytes(arg))
}

fn builtin_exit(_: &[&[u8]], _: &mut dyn Write) -> Result<Flow, BuiltinError> {
	Ok(Flow::Exit)
}

fn builtin_cd(args: &[&[u8]], _: &mut dyn Write) -> Result<Flow, BuiltinError> {
	let dir = args.get(1).ok_or(BuiltinError::CdMissingArgument)?;
	env::set_current_dir(path(dir)).context("cd")?;
	Ok(Flow::Continue)
}

fn builtin_pwd(_: &[&[u8]], out: &mut dyn Write) -> Result<Flow, BuiltinError> {
	let cwd = env::current_dir().context("pwd")?;
	out.write_all(cwd.as_os_str().as_bytes()).context("pwd")?;
	out.write_all(b"\n").context("pwd")?;
	Ok(Flow::Continue)
}

fn builtin_mkdir(args: &[&[u8]], _: &mut dyn Write) -> Result<Flow, BuiltinError> {
	let dir = args.get(1).ok_or(BuiltinError::MissingOperand("mkdir"))?;
	fs::DirBuilder::new().mode(0o755).create(path(dir)).context("mkdir")?;
	Ok(Flow::Continue)
}

fn builtin_rmdir(args: &[&[u8]], _: &mut dyn Write) -> Result<Flow, BuiltinError> {
	let dir = args.get(1).ok_or(BuiltinError::MissingOperand("rmdir"))?;
	fs::remove_dir(path(dir)).context("rmdir")?;
	Ok(Flow::Continue)
}

fn builtin_ls(args: &[&[u8]], out: &mut dyn Write) -> Result<Flow, BuiltinError> {
	let long = args.get(1).map_or(false, |&arg| arg == b"-l");
	list_directory(Path::new("."), long, out).context("ls")?;
	Ok(Flow::Continue)
}

fn builtin_cp(args: &[&[u8]], out: &mut dyn Write) -> Result<Flow, BuiltinError> {
	match (args.get(1), args.get(2)) {
		(Some(src), Some(dst)) => copy_if_newer(path(src), path(dst), out)?,
		_ => return Err(BuiltinError::CpMissingOperand),
	}
	Ok(Flow::Continue)
}

pub fn match_builtin(name: &[u8]) -> Option<Builtin> {
	match name {
		b"exit" => Some(builtin_exit),
		b"cd" => Some(builtin_cd),
		b"pwd" => Some(builtin_pwd),
		b"mkdir" => Some(builtin_mkdir),
		b"rmdir" => Some(builtin_rmdir),
		b"ls" => Some(builtin_ls),
		b"cp" => Some(builtin_cp),
		_ => None,
	}
}

/// Runs a built-in, printing its error if any, and returns the exit status
/// a child running it should leave with.
pub fn run(builtin: Builtin, args: &[&[u8]], out: &mut dyn Write) -> (Flow, i32) {
	let result = builtin(args, out).and_then(|flow| out.flush().context("write").map(|_| flow));
	match result {
		Ok(flow) => (flow, 0),
		Err(e) => {
			eprintln!("{}", e);
			(Flow::Continue, 1)
		},
	}
}

/// Runs a built-in inside the shell itself. Output redirection is honored;
/// input redirection is ignored since no built-in reads stdin.
pub fn dispatch(builtin: Builtin, command: &ParsedCommand) -> Flow {
	match command.output {
		Some(target) => {
			let opened = fs::OpenOptions::new()
				.write(true)
				.create(true)
				.truncate(true)
				.mode(0o644)
				.open(path(target));
			match opened {
				Ok(mut file) => run(builtin, &command.args, &mut file).0,
				Err(e) => {
					eprintln!("open output file: {}", describe(&e));
					Flow::Continue
				},
			}
		},
		None => {
			let stdout = io::stdout();
			let mut out = stdout.lock();
			run(builtin, &command.args, &mut out).0
		},
	}
}

/// Lists the non-hidden entries of `dir`, sorted by name.
pub fn list_directory(dir: &Path, long: bool, out: &mut dyn Write) -> io::Result<()> {
	let mut names = vec![];
	for entry in fs::read_dir(dir)? {
		let name = entry?.file_name();
		if name.as_bytes().first() == Some(&b'.') {
			continue;
		}
		names.push(name);
	}
	names.sort();

	for name in names {
		if !long {
			out.write_all(name.as_bytes())?;
			out.write_all(b"\n")?;
			continue;
		}
		match fs::metadata(dir.join(&name)) {
			Ok(meta) => writeln!(out, "{}", long_entry(&name, &meta))?,
			Err(e) => eprintln!("stat: {}", describe(&e)),
		}
	}
	Ok(())
}

const PERMISSION_BITS: [(u32, char); 9] = [
	(0o400, 'r'), (0o200, 'w'), (0o100, 'x'),
	(0o040, 'r'), (0o020, 'w'), (0o010, 'x'),
	(0o004, 'r'), (0o002, 'w'), (0o001, 'x'),
];

fn long_entry(name: &OsStr, meta: &fs::Metadata) -> String {
	let mut mode = String::with_capacity(10);
	mode.push(if meta.is_dir() { 'd' } else { '-' });
	for &(bit, c) in PERMISSION_BITS.iter() {
		mode.push(if meta.mode() & bit != 0 { c } else { '-' });
	}

	let owner = User::from_uid(Uid::from_raw(meta.uid()))
		.ok()
		.and_then(|user| user)
		.map_or_else(|| meta.uid().to_string(), |user| user.name);
	let group = Group::from_gid(Gid::from_raw(meta.gid()))
		.ok()
		.and_then(|group| group)
		.map_or_else(|| meta.gid().to_string(), |group| group.name);
	let modified = Local.timestamp_opt(meta.mtime(), 0)
		.single()
		.map(|time| time.format("%b %d %H:%M").to_string())
		.unwrap_or_default();

	format!("{} {:2} {} {} {:8} {} {}",
		mode, meta.nlink(), owner, group, meta.size(), modified, name.to_string_lossy())
}

/// Copies `src` over `dst` unless `dst` exists and is at least as new, by
/// whole seconds of modification time.
pub fn copy_if_newer(src: &Path, dst: &Path, out: &mut dyn Write) -> Result<(), BuiltinError> {
	let src_meta = fs::metadata(src).context(src.display())?;
	let newer = match fs::metadata(dst) {
		Ok(dst_meta) => src_meta.mtime() > dst_meta.mtime(),
		Err(_) => true,
	};

	if newer {
		let mut reader = fs::File::open(src).context(src.display())?;
		let mut writer = fs::File::create(dst).context(dst.display())?;
		io::copy(&mut reader, &mut writer).context(dst.display())?;
		writeln!(out, "Copied '{}' to '{}'", src.display(), dst.display()).context("cp")?;
	} else {
		writeln!(out, "'{}' is not newer than '{}'. No copy performed.", src.display(), dst.display())
			.context("cp")?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::os::unix::ffi::OsStringExt;
	use std::time::{Duration, SystemTime};
	use tempfile::TempDir;

	fn bytes(path: &Path) -> &[u8] {
		path.as_os_str().as_bytes()
	}

	fn set_mtime(path: &Path, time: SystemTime) {
		fs::File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
	}

	#[test]
	fn recognizes_builtin_names() {
		for name in [&b"exit"[..], b"cd", b"pwd", b"mkdir", b"rmdir", b"ls", b"cp"] {
			assert!(match_builtin(name).is_some(), "{:?}", name);
		}
		assert!(match_builtin(b"echo").is_none());
		assert!(match_builtin(b"").is_none());
		assert!(match_builtin(b"exit2").is_none());
	}

	#[test]
	fn exit_stops_the_loop() {
		let mut out: Vec<u8> = vec![];
		assert_eq!(run(builtin_exit, &[b"exit"], &mut out), (Flow::Exit, 0));
		assert!(out.is_empty());
	}

	#[test]
	fn pwd_prints_current_dir() {
		let mut out: Vec<u8> = vec![];
		assert_eq!(run(builtin_pwd, &[b"pwd"], &mut out), (Flow::Continue, 0));
		let mut expected = env::current_dir().unwrap().into_os_string().into_vec();
		expected.push(b'\n');
		assert_eq!(out, expected);
	}

	#[test]
	fn missing_operands() {
		let mut out: Vec<u8> = vec![];
		let err = builtin_cd(&[b"cd"], &mut out).unwrap_err();
		assert_eq!(err.to_string(), "cd: expected argument");
		let err = builtin_mkdir(&[b"mkdir"], &mut out).unwrap_err();
		assert_eq!(err.to_string(), "mkdir: missing operand");
		let err = builtin_rmdir(&[b"rmdir"], &mut out).unwrap_err();
		assert_eq!(err.to_string(), "rmdir: missing operand");
		let err = builtin_cp(&[b"cp", b"only-source"], &mut out).unwrap_err();
		assert_eq!(err.to_string(), "cp: missing source or destination file operand");
		assert_eq!(run(builtin_rmdir, &[b"rmdir"], &mut out), (Flow::Continue, 1));
	}

	#[test]
	fn mkdir_then_rmdir() {
		let tmp = TempDir::new().unwrap();
		let dir = tmp.path().join("sub");
		let mut out: Vec<u8> = vec![];

		builtin_mkdir(&[b"mkdir", bytes(&dir)], &mut out).unwrap();
		assert!(dir.is_dir());
		assert_eq!(fs::metadata(&dir).unwrap().mode() & 0o700, 0o700);

		let err = builtin_mkdir(&[b"mkdir", bytes(&dir)], &mut out).unwrap_err();
		assert_eq!(err.to_string(), "mkdir: File exists");

		builtin_rmdir(&[b"rmdir", bytes(&dir)], &mut out).unwrap();
		assert!(!dir.exists());
		let err = builtin_rmdir(&[b"rmdir", bytes(&dir)], &mut out).unwrap_err();
		assert_eq!(err.to_string(), "rmdir: No such file or directory");
	}

	#[test]
	fn errors_carry_no_os_error_suffix() {
		let err = io::Error::from_raw_os_error(libc::ENOENT);
		assert_eq!(describe(&err), "No such file or directory");
		let err = io::Error::new(io::ErrorKind::Other, "short write");
		assert_eq!(describe(&err), "short write");

		let tmp = TempDir::new().unwrap();
		let missing = tmp.path().join("missing");
		let err = builtin_cd(&[b"cd", bytes(&missing)], &mut Vec::<u8>::new()).unwrap_err();
		assert_eq!(err.to_string(), "cd: No such file or directory");
	}

	#[test]
	fn rmdir_refuses_non_empty_directory() {
		let tmp = TempDir::new().unwrap();
		fs::write(tmp.path().join("file"), b"x").unwrap();
		let mut out: Vec<u8> = vec![];
		assert!(builtin_rmdir(&[b"rmdir", bytes(tmp.path())], &mut out).is_err());
		assert!(tmp.path().is_dir());
	}

	#[test]
	fn list_skips_hidden_and_sorts() {
		let tmp = TempDir::new().unwrap();
		fs::write(tmp.path().join("beta"), b"").unwrap();
		fs::write(tmp.path().join("alpha"), b"").unwrap();
		fs::write(tmp.path().join(".hidden"), b"").unwrap();
		fs::create_dir(tmp.path().join("gamma")).unwrap();

		let mut out: Vec<u8> = vec![];
		list_directory(tmp.path(), false, &mut out).unwrap();
		assert_eq!(out, b"alpha\nbeta\ngamma\n");
	}

	#[test]
	fn long_listing_columns() {
		let tmp = TempDir::new().unwrap();
		fs::write(tmp.path().join("data"), b"12345").unwrap();
		fs::create_dir(tmp.path().join("dir")).unwrap();

		let mut out: Vec<u8> = vec![];
		list_directory(tmp.path(), true, &mut out).unwrap();
		let text = String::from_utf8(out).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines.len(), 2);

		assert!(lines[0].starts_with("-rw"), "{}", lines[0]);
		assert!(lines[0].ends_with(" data"), "{}", lines[0]);
		assert!(lines[0].contains("        5 "), "{}", lines[0]);
		assert!(lines[1].starts_with("drwx"), "{}", lines[1]);
		assert!(lines[1].ends_with(" dir"), "{}", lines[1]);
	}

	#[test]
	fn cp_copies_into_missing_destination() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src.txt");
		let dst = tmp.path().join("dst.txt");
		fs::write(&src, b"payload\n").unwrap();

		let mut out: Vec<u8> = vec![];
		builtin_cp(&[b"cp", bytes(&src), bytes(&dst)], &mut out).unwrap();
		assert_eq!(fs::read(&dst).unwrap(), b"payload\n");
		let message = String::from_utf8(out).unwrap();
		assert!(message.starts_with("Copied '"), "{}", message);
	}

	#[test]
	fn cp_skips_when_destination_is_newer() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src.txt");
		let dst = tmp.path().join("dst.txt");
		fs::write(&src, b"new").unwrap();
		fs::write(&dst, b"old").unwrap();
		let now = SystemTime::now();
		set_mtime(&src, now - Duration::from_secs(60));
		set_mtime(&dst, now);

		let mut out: Vec<u8> = vec![];
		copy_if_newer(&src, &dst, &mut out).unwrap();
		assert_eq!(fs::read(&dst).unwrap(), b"old");
		let message = String::from_utf8(out).unwrap();
		assert!(message.ends_with("No copy performed.\n"), "{}", message);
	}

	#[test]
	fn cp_overwrites_older_destination() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src.txt");
		let dst = tmp.path().join("dst.txt");
		fs::write(&src, b"new").unwrap();
		fs::write(&dst, b"old and longer").unwrap();
		let now = SystemTime::now();
		set_mtime(&dst, now - Duration::from_secs(60));
		set_mtime(&src, now);

		let mut out: Vec<u8> = vec![];
		copy_if_newer(&src, &dst, &mut out).unwrap();
		assert_eq!(fs::read(&dst).unwrap(), b"new");
	}

	#[test]
	fn cp_reports_missing_source() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("absent");
		let dst = tmp.path().join("dst");
		let mut out: Vec<u8> = vec![];
		let err = copy_if_newer(&src, &dst, &mut out).unwrap_err();
		assert!(err.to_string().contains("absent"), "{}", err);
		assert!(!dst.exists());
	}
}
