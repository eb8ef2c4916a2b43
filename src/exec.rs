use std::ffi::{CStr, CString};
use std::fmt;
use std::io::{self, Cursor, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libc::c_int;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait;
use nix::unistd::{self, ForkResult, Pid};
use tracing::{debug, warn};

use crate::error::{ShellError, ShellResult};
use crate::job::{self, WaitStatusExt};
use crate::types::*;

pub const EXIT_NOT_FOUND: i32 = 127;
pub const EXIT_EXEC_FAILED: i32 = 126;
pub const EXIT_REDIRECT_FAILED: i32 = 1;

const FILE_MODE: libc::c_uint = 0o644;

enum PreparedInput<'a> {
	Path { cpath: CString, path: &'a Path },
	Fd(RawFd),
}

/// Everything a child needs, converted before `fork` so the child itself
/// never allocates.
struct PreparedStage<'a> {
	name: &'a str,
	argv: Vec<CString>,
	input: Option<PreparedInput<'a>>,
	output: Option<(CString, &'a Path, c_int)>,
}

fn cpath(path: &Path) -> ShellResult<CString> {
	Ok(CString::new(path.as_os_str().as_bytes())?)
}

fn prepare(stage: &Stage) -> ShellResult<PreparedStage<'_>> {
	let argv = stage.argv.iter()
		.map(|a| CString::new(a.as_bytes()))
		.collect::<Result<Vec<CString>, _>>()?;
	let input = match stage.redirects.input {
		Some(InputSource::File(ref path)) => Some(PreparedInput::Path { cpath: cpath(path)?, path: path.as_path() }),
		Some(InputSource::Heredoc(ref heredoc)) => Some(PreparedInput::Fd(heredoc.as_file().as_raw_fd())),
		None => None,
	};
	let output = match stage.redirects.output {
		Some(OutputTarget { ref path, mode }) => {
			let flags = libc::O_WRONLY | libc::O_CREAT | match mode {
				OutputMode::Truncate => libc::O_TRUNC,
				OutputMode::Append => libc::O_APPEND,
			};
			Some((cpath(path)?, path.as_path(), flags))
		},
		None => None,
	};
	Ok(PreparedStage {
		name: stage.argv.first().map_or("", |s| s.as_str()),
		argv,
		input,
		output,
	})
}

/// Formats into a stack buffer and writes it to stdout in one go, then
/// leaves without running any destructor.
fn child_exit(code: i32, args: fmt::Arguments) -> ! {
	let mut buf = [0u8; 512];
	let mut cursor = Cursor::new(&mut buf[..]);
	let _ = cursor.write_fmt(args);
	let len = cursor.position() as usize;
	job::write_raw(libc::STDOUT_FILENO, &buf[.. len]);
	unsafe { libc::_exit(code) }
}

fn redirect_path(path: &CStr, flags: c_int, target: RawFd) -> nix::Result<()> {
	let fd = Errno::result(unsafe { libc::open(path.as_ptr(), flags, FILE_MODE) })?;
	if fd != target {
		let r = unistd::dup2(fd, target);
		let _ = unistd::close(fd);
		r?;
	}
	Ok(())
}

/// Explicit redirections are applied after the pipe wiring, so they win.
fn apply_redirects(stage: &PreparedStage) {
	match stage.input {
		Some(PreparedInput::Path { ref cpath, path }) => {
			if let Err(e) = redirect_path(cpath, libc::O_RDONLY, libc::STDIN_FILENO) {
				child_exit(EXIT_REDIRECT_FAILED, format_args!("chainsh: I/O error: {}: {}\n", path.display(), e));
			}
		},
		Some(PreparedInput::Fd(fd)) => {
			if let Err(e) = unistd::dup2(fd, libc::STDIN_FILENO) {
				child_exit(EXIT_REDIRECT_FAILED, format_args!("chainsh: I/O error: here-document: {}\n", e));
			}
		},
		None => {},
	}
	if let Some((ref cpath, path, flags)) = stage.output {
		if let Err(e) = redirect_path(cpath, flags, libc::STDOUT_FILENO) {
			child_exit(EXIT_REDIRECT_FAILED, format_args!("chainsh: I/O error: {}: {}\n", path.display(), e));
		}
	}
}

fn exec_stage(stage: &PreparedStage, stdin: Option<RawFd>, stdout: Option<RawFd>, pipe_fds: &[RawFd]) -> ! {
	job::unblock_sigchld();
	if let Some(fd) = stdin {
		if let Err(e) = unistd::dup2(fd, libc::STDIN_FILENO) {
			child_exit(1, format_args!("chainsh: dup2: {}\n", e));
		}
	}
	if let Some(fd) = stdout {
		if let Err(e) = unistd::dup2(fd, libc::STDOUT_FILENO) {
			child_exit(1, format_args!("chainsh: dup2: {}\n", e));
		}
	}
	for &fd in pipe_fds {
		let _ = unistd::close(fd);
	}
	apply_redirects(stage);

	let program = match stage.argv.first() {
		Some(p) => p,
		// redirections only, like `> file`
		None => unsafe { libc::_exit(0) },
	};
	let e = match unistd::execvp(program, &stage.argv) {
		Err(e) => e,
		Ok(never) => match never {},
	};
	if e == Errno::ENOENT {
		child_exit(EXIT_NOT_FOUND, format_args!("chainsh: command not found: {}\n", stage.name));
	}
	child_exit(EXIT_EXEC_FAILED, format_args!("chainsh: cannot execute {}: {}\n", stage.name, e))
}

/// Forks one child per stage, wired stdout-to-stdin through pipes. Returns
/// the children's pids in stage order without waiting for them.
pub fn launch(unit: &PipelineUnit) -> ShellResult<Vec<Pid>> {
	let stages = unit.stages.iter().map(prepare).collect::<ShellResult<Vec<_>>>()?;
	let n = stages.len();

	let mut pipes: Vec<(OwnedFd, OwnedFd)> = Vec::with_capacity(n.saturating_sub(1));
	for _ in 1 .. n {
		pipes.push(unistd::pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?);
	}
	let pipe_fds: Vec<RawFd> = pipes.iter()
		.flat_map(|(r, w)| [r.as_raw_fd(), w.as_raw_fd()])
		.collect();

	let _ = io::stdout().flush();
	let mut pids: Vec<Pid> = Vec::with_capacity(n);
	for (i, stage) in stages.iter().enumerate() {
		let stdin = if i > 0 { Some(pipes[i - 1].0.as_raw_fd()) } else { None };
		let stdout = if i + 1 < n { Some(pipes[i].1.as_raw_fd()) } else { None };
		match unsafe { unistd::fork() } {
			Ok(ForkResult::Parent { child }) => {
				debug!(pid = %child, stage = i, program = stage.name, "Spawned");
				pids.push(child);
			},
			Ok(ForkResult::Child) => exec_stage(stage, stdin, stdout, &pipe_fds),
			Err(e) => {
				drop(pipes);
				if !unit.is_background {
					wait_all(&pids);
				}
				return Err(ShellError::Fork(e));
			},
		}
	}
	drop(pipes);
	Ok(pids)
}

pub fn wait_pid(pid: Pid) -> i32 {
	loop {
		match wait::waitpid(pid, None) {
			Ok(status) if status.is_terminated() => return status.code(),
			Ok(_) | Err(Errno::EINTR) => continue,
			Err(e) => {
				warn!(pid = %pid, error = %e, "waitpid failed");
				return 1;
			},
		}
	}
}

/// Waits for every pid; the result is the status of the last one.
pub fn wait_all(pids: &[Pid]) -> i32 {
	let mut status = 0;
	for &pid in pids {
		status = wait_pid(pid);
	}
	status
}
