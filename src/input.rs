use std::io::{self, BufRead};

use nix::errno::Errno;
use nix::unistd;

/// Blocking source of input lines, shared by the command loop and heredoc
/// collection. Returns `None` at end of input.
pub trait LineSource {
	fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Reads standard input one byte at a time so that nothing past the current
/// line is consumed; children inherit the rest of the stream untouched.
#[derive(Debug, Default)]
pub struct StdinLines;

impl LineSource for StdinLines {
	fn read_line(&mut self) -> io::Result<Option<String>> {
		let mut line: Vec<u8> = vec![];
		let mut byte = [0u8; 1];
		loop {
			match unistd::read(libc::STDIN_FILENO, &mut byte) {
				Ok(0) => {
					if line.is_empty() {
						return Ok(None);
					}
					break;
				},
				Ok(_) => {
					if byte[0] == b'\n' {
						break;
					}
					line.push(byte[0]);
				},
				Err(Errno::EINTR) => continue,
				Err(e) => return Err(e.into()),
			}
		}
		Ok(Some(String::from_utf8_lossy(&line).into_owned()))
	}
}

/// Line source over any buffered reader.
#[derive(Debug)]
pub struct BufLines<R> {
	reader: R,
}

impl<R: BufRead> BufLines<R> {
	pub fn new(reader: R) -> BufLines<R> {
		BufLines { reader }
	}
}

impl<R: BufRead> LineSource for BufLines<R> {
	fn read_line(&mut self) -> io::Result<Option<String>> {
		let mut buf: Vec<u8> = vec![];
		if self.reader.read_until(b'\n', &mut buf)? == 0 {
			return Ok(None);
		}
		if buf.last() == Some(&b'\n') {
			buf.pop();
		}
		Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn buf_lines_strip_newline() {
		let mut src = BufLines::new(&b"one\ntwo\nlast"[..]);
		assert_eq!(src.read_line().unwrap().as_deref(), Some("one"));
		assert_eq!(src.read_line().unwrap().as_deref(), Some("two"));
		assert_eq!(src.read_line().unwrap().as_deref(), Some("last"));
		assert_eq!(src.read_line().unwrap(), None);
	}

	#[test]
	fn buf_lines_keep_empty_lines() {
		let mut src = BufLines::new(&b"\n\nx\n"[..]);
		assert_eq!(src.read_line().unwrap().as_deref(), Some(""));
		assert_eq!(src.read_line().unwrap().as_deref(), Some(""));
		assert_eq!(src.read_line().unwrap().as_deref(), Some("x"));
		assert_eq!(src.read_line().unwrap(), None);
	}
}
