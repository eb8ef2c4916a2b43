use std::cell::UnsafeCell;
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

use libc::c_int;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

pub const JOB_CAPACITY: usize = 64;
pub const MESSAGE_CAPACITY: usize = 1024;

pub trait WaitStatusExt {
	fn is_terminated(self) -> bool;
	fn code(self) -> i32;
}

impl WaitStatusExt for WaitStatus {
	fn is_terminated(self) -> bool {
		matches!(self, WaitStatus::Exited(..) | WaitStatus::Signaled(..))
	}

	/// Exit code for chaining purposes; anything but a normal exit counts as 1.
	fn code(self) -> i32 {
		match self {
			WaitStatus::Exited(_, code) => code,
			_ => 1,
		}
	}
}

/// Blocks SIGCHLD for the calling thread until dropped, then restores the
/// previous mask.
pub struct SigchldMask {
	previous: SigSet,
}

fn sigchld_set() -> SigSet {
	let mut set = SigSet::empty();
	set.add(Signal::SIGCHLD);
	set
}

impl SigchldMask {
	pub fn block() -> SigchldMask {
		let mut previous = SigSet::empty();
		let _ = signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&sigchld_set()), Some(&mut previous));
		SigchldMask { previous }
	}
}

impl Drop for SigchldMask {
	fn drop(&mut self) {
		let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
	}
}

/// Used by forked children, which inherit the parent's mask across exec.
pub fn unblock_sigchld() {
	let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&sigchld_set()), None);
}

struct Slot {
	active: AtomicBool,
	pid: AtomicI32,
	len: AtomicUsize,
	message: UnsafeCell<[u8; MESSAGE_CAPACITY]>,
}

impl Slot {
	const fn new() -> Slot {
		Slot {
			active: AtomicBool::new(false),
			pid: AtomicI32::new(0),
			len: AtomicUsize::new(0),
			message: UnsafeCell::new([0; MESSAGE_CAPACITY]),
		}
	}

	fn message(&self) -> &[u8] {
		let len = self.len.load(Ordering::Relaxed);
		// only read while active, and an active slot's message is never written
		unsafe { &(&*self.message.get())[.. len] }
	}
}

/// Fixed arena of outstanding background jobs.
///
/// The control flow claims slots with SIGCHLD blocked; the signal handler
/// only reads active slots and clears their `active` flag. Neither side
/// allocates inside the table.
pub struct JobTable {
	slots: [Slot; JOB_CAPACITY],
	next_id: AtomicU32,
}

// Cross-context access follows the protocol above: messages are written only
// into inactive slots, and published with a release store of `active`.
unsafe impl Sync for JobTable {}

impl JobTable {
	const fn new() -> JobTable {
		#[allow(clippy::declare_interior_mutable_const)]
		const EMPTY: Slot = Slot::new();
		JobTable { slots: [EMPTY; JOB_CAPACITY], next_id: AtomicU32::new(1) }
	}

	/// Tracks `pid` and prints `[id] pid`. Returns `None` when the table is
	/// full, in which case the job runs untracked.
	pub fn register(&self, pid: Pid, command: &str, out: &mut dyn Write) -> io::Result<Option<u32>> {
		let job_id = {
			let _mask = SigchldMask::block();
			self.claim(pid, command)
		};
		match job_id {
			Some(id) => {
				writeln!(out, "[{}] {}", id, pid)?;
				out.flush()?;
				debug!(job = id, pid = %pid, command, "Registered background job");
			},
			None => warn!(pid = %pid, command, "Job table full; completion will not be reported"),
		}
		Ok(job_id)
	}

	fn claim(&self, pid: Pid, command: &str) -> Option<u32> {
		let slot = self.slots.iter().find(|s| !s.active.load(Ordering::Acquire))?;
		let id = self.next_id.load(Ordering::Relaxed);
		self.next_id.store(id.checked_add(1).unwrap_or(1), Ordering::Relaxed);

		let message = unsafe { &mut *slot.message.get() };
		let mut cursor = Cursor::new(&mut message[..]);
		let formatted = writeln!(cursor, "[{}]  + {} done       {}", id, pid, command);
		let position = cursor.position() as usize;
		let len = match formatted {
			Ok(()) => position,
			Err(_) => {
				message[MESSAGE_CAPACITY - 1] = b'\n';
				MESSAGE_CAPACITY
			},
		};
		slot.pid.store(pid.as_raw(), Ordering::Relaxed);
		slot.len.store(len, Ordering::Relaxed);
		slot.active.store(true, Ordering::Release);
		Some(id)
	}

	/// Emits the completion message of the active job owning `pid` and frees
	/// its slot.
	pub fn finish<F: FnMut(&[u8])>(&self, pid: Pid, mut emit: F) -> bool {
		for slot in self.slots.iter() {
			if slot.active.load(Ordering::Acquire) && slot.pid.load(Ordering::Relaxed) == pid.as_raw() {
				emit(slot.message());
				slot.active.store(false, Ordering::Release);
				return true;
			}
		}
		false
	}

	/// Non-blocking reap of tracked jobs only. Safe in a signal handler, and
	/// never collects a foreground child.
	pub fn reap<F: FnMut(&[u8])>(&self, mut emit: F) {
		for slot in self.slots.iter() {
			if !slot.active.load(Ordering::Acquire) {
				continue;
			}
			let pid = Pid::from_raw(slot.pid.load(Ordering::Relaxed));
			let done = match wait::waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
				Ok(status) => status.is_terminated(),
				Err(Errno::ECHILD) => true,
				Err(_) => false,
			};
			if done {
				emit(slot.message());
				slot.active.store(false, Ordering::Release);
			}
		}
	}

	/// Collects every terminated child, tracked or not. Only for the control
	/// flow, at a point where no foreground child is outstanding.
	pub fn reap_any<F: FnMut(&[u8])>(&self, mut emit: F) {
		let _mask = SigchldMask::block();
		loop {
			match wait::waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
				Ok(WaitStatus::StillAlive) => break,
				Ok(status) => {
					if let Some(pid) = status.pid() {
						if status.is_terminated() && !self.finish(pid, &mut emit) {
							debug!(pid = %pid, "Collected untracked child");
						}
					}
				},
				Err(Errno::EINTR) => continue,
				Err(_) => break,
			}
		}
	}

	pub fn active_count(&self) -> usize {
		self.slots.iter().filter(|s| s.active.load(Ordering::Acquire)).count()
	}
}

/// Process-wide table shared with the SIGCHLD handler.
pub static JOBS: JobTable = JobTable::new();

/// Writes with plain `write(2)` calls, retrying on short writes.
pub fn write_raw(fd: c_int, bytes: &[u8]) {
	let mut written = 0;
	while written < bytes.len() {
		let rest = &bytes[written ..];
		let n = unsafe { libc::write(fd, rest.as_ptr() as *const libc::c_void, rest.len()) };
		if n <= 0 {
			break;
		}
		written += n as usize;
	}
}

extern "C" fn on_sigchld(_: c_int) {
	JOBS.reap(|message| write_raw(libc::STDOUT_FILENO, message));
}

pub fn install_reaper() -> nix::Result<()> {
	let action = SigAction::new(
		SigHandler::Handler(on_sigchld),
		SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
		SigSet::empty(),
	);
	unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
	Ok(())
}
