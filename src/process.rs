use log::debug;
use nix::sys::wait::{self, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

pub fn syscall<F, T>(f: F) -> nix::Result<T> where F: Fn() -> nix::Result<T> {
	loop {
		match f() {
			Err(nix::Error::EINTR) => (),
			result => return result,
		}
	}
}

pub trait WaitStatusExt {
	fn code(self) -> Option<i32>;
}

impl WaitStatusExt for WaitStatus {
	fn code(self) -> Option<i32> {
		match self {
			WaitStatus::Exited(_, code) => Some(code),
			WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
			_ => None,
		}
	}
}

#[derive(Debug)]
#[must_use = "a spawned child must be waited for"]
pub struct ProcessHandle {
	pid: Pid,
}

impl ProcessHandle {
	/// Forks. The child runs `body` and leaves with the status it returns,
	/// through `_exit` so that stdio buffers inherited from the shell are not
	/// flushed a second time.
	pub fn spawn<F>(body: F) -> nix::Result<ProcessHandle> where F: FnOnce() -> i32 {
		match unsafe { unistd::fork() }? {
			ForkResult::Parent { child } => {
				debug!("spawned pid {}", child);
				Ok(ProcessHandle { pid: child })
			},
			ForkResult::Child => {
				let status = body();
				unsafe { libc::_exit(status) }
			},
		}
	}

	pub fn wait(self) -> nix::Result<WaitStatus> {
		loop {
			let status = syscall(|| wait::waitpid(self.pid, None))?;
			match status {
				WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
					debug!("pid {} finished with {:?}", self.pid, status.code());
					return Ok(status);
				},
				_ => continue,
			}
		}
	}
}
