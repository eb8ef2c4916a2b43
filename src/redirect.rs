use std::io::{Seek, Write};
use std::path::PathBuf;

use tracing::debug;

use crate::error::{ResourceError, ShellError, ShellResult, SyntaxError};
use crate::input::LineSource;
use crate::types::*;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RedirectOp { Input, Heredoc, Output, Append }

impl RedirectOp {
	fn symbol(self) -> &'static str {
		match self {
			RedirectOp::Input => "<",
			RedirectOp::Heredoc => "<<",
			RedirectOp::Output => ">",
			RedirectOp::Append => ">>",
		}
	}
}

/// Recognizes `[digits](<|<<|>|>>)[target]`. The descriptor prefix is
/// accepted and dropped; only stdin and stdout are ever redirected.
fn parse_redirect(arg: &str) -> Option<(RedirectOp, &str)> {
	let rest = arg.trim_start_matches(|c: char| c.is_ascii_digit());
	let (op, len) = if rest.starts_with("<<") {
		(RedirectOp::Heredoc, 2)
	} else if rest.starts_with(">>") {
		(RedirectOp::Append, 2)
	} else if rest.starts_with('<') {
		(RedirectOp::Input, 1)
	} else if rest.starts_with('>') {
		(RedirectOp::Output, 1)
	} else {
		return None;
	};
	Some((op, &rest[len ..]))
}

fn is_redirect(arg: &str) -> bool {
	parse_redirect(arg).is_some()
}

type Args = std::iter::Peekable<std::vec::IntoIter<String>>;

/// Takes the target of `op`, either glued to the operator or the next
/// argument. A following redirection token is never taken as a target.
fn take_target(op: RedirectOp, glued: &str, iter: &mut Args) -> ShellResult<String> {
	let missing = || -> ShellError { SyntaxError::MissingRedirectionTarget { operator: op.symbol().to_string() }.into() };
	if !glued.is_empty() {
		if is_redirect(glued) {
			return Err(missing());
		}
		return Ok(glued.to_string());
	}
	if iter.peek().map_or(false, |next| !is_redirect(next)) {
		iter.next().ok_or_else(missing)
	} else {
		Err(missing())
	}
}

/// Removes redirection tokens from `args` and returns what they asked for.
/// Heredoc bodies are read from `input` right away. After the first error
/// the remaining heredoc bodies are still read and discarded, so none of
/// their lines reach the command loop.
pub fn extract_redirections(args: Vec<String>, input: &mut dyn LineSource, heredoc_limit: usize)
		-> ShellResult<(Vec<String>, RedirectionSpec)> {
	let mut redirs = RedirectionSpec::default();
	let mut kept: Vec<String> = Vec::with_capacity(args.len());
	let mut failure: Option<ShellError> = None;
	let mut iter = args.into_iter().peekable();

	while let Some(arg) = iter.next() {
		let (op, glued) = match parse_redirect(&arg) {
			Some(r) => r,
			None => {
				kept.push(arg);
				continue;
			},
		};
		let target = match take_target(op, glued, &mut iter) {
			Ok(target) => target,
			Err(e) => {
				failure.get_or_insert(e);
				continue;
			},
		};
		if failure.is_some() {
			if op == RedirectOp::Heredoc {
				skip_heredoc(&target, input);
			}
			continue;
		}
		if let Err(e) = apply(op, target, &mut redirs, input, heredoc_limit) {
			failure = Some(e);
		}
	}
	match failure {
		Some(e) => Err(e),
		None => Ok((kept, redirs)),
	}
}

fn apply(op: RedirectOp, target: String, redirs: &mut RedirectionSpec, input: &mut dyn LineSource, heredoc_limit: usize)
		-> ShellResult<()> {
	match op {
		RedirectOp::Input | RedirectOp::Heredoc => {
			let source = if op == RedirectOp::Heredoc {
				InputSource::Heredoc(collect_heredoc(&target, input, heredoc_limit)?)
			} else {
				InputSource::File(PathBuf::from(target))
			};
			if redirs.input.is_some() {
				return Err(SyntaxError::RedirectionConflict { what: "input" }.into());
			}
			redirs.input = Some(source);
		},
		RedirectOp::Output | RedirectOp::Append => {
			if redirs.output.is_some() {
				return Err(SyntaxError::RedirectionConflict { what: "output" }.into());
			}
			let mode = if op == RedirectOp::Append { OutputMode::Append } else { OutputMode::Truncate };
			redirs.output = Some(OutputTarget { path: PathBuf::from(target), mode });
		},
	}
	Ok(())
}

/// Reads and discards every heredoc body requested in `args`. Used for
/// stages that will not run at all.
pub fn drain_heredocs(args: Vec<String>, input: &mut dyn LineSource) {
	let mut iter = args.into_iter().peekable();
	while let Some(arg) = iter.next() {
		let (op, glued) = match parse_redirect(&arg) {
			Some(r) => r,
			None => continue,
		};
		if let Ok(delimiter) = take_target(op, glued, &mut iter) {
			if op == RedirectOp::Heredoc {
				skip_heredoc(&delimiter, input);
			}
		}
	}
}

fn skip_heredoc(delimiter: &str, input: &mut dyn LineSource) {
	let mut skipped = 0;
	while let Ok(Some(line)) = input.read_line() {
		if line == delimiter {
			break;
		}
		skipped += 1;
	}
	debug!(delimiter, lines = skipped, "Discarded here-document");
}

/// Reads lines until one equals `delimiter` exactly, joins them with `\n`
/// and stores the result in a fresh temporary file rewound to offset 0.
fn collect_heredoc(delimiter: &str, input: &mut dyn LineSource, limit: usize) -> ShellResult<Heredoc> {
	let mut body = String::new();
	let mut first = true;
	loop {
		let line = match input.read_line().map_err(ShellError::Heredoc)? {
			Some(line) => line,
			None => return Err(SyntaxError::UnterminatedHeredoc { delimiter: delimiter.to_string() }.into()),
		};
		if line == delimiter {
			break;
		}
		if !first {
			body.push('\n');
		}
		first = false;
		body.push_str(&line);
	}
	// the whole body is consumed even when too large, so none of it is run
	if body.len() > limit {
		return Err(ResourceError::HeredocTooLarge(limit).into());
	}

	let mut file = tempfile::Builder::new()
		.prefix("chainsh-heredoc-")
		.tempfile()
		.map_err(ShellError::Heredoc)?;
	file.write_all(body.as_bytes()).map_err(ShellError::Heredoc)?;
	file.flush().map_err(ShellError::Heredoc)?;
	file.rewind().map_err(ShellError::Heredoc)?;
	debug!(path = ?file.path(), bytes = body.len(), "Collected here-document");
	Ok(Heredoc { file })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::input::BufLines;
	use std::io::Read;

	fn args(s: &[&str]) -> Vec<String> {
		s.iter().map(|a| a.to_string()).collect()
	}

	fn extract(s: &[&str]) -> ShellResult<(Vec<String>, RedirectionSpec)> {
		let mut input = BufLines::new(&b""[..]);
		extract_redirections(args(s), &mut input, 1024)
	}

	fn input_path(redirs: &RedirectionSpec) -> Option<PathBuf> {
		match redirs.input {
			Some(InputSource::File(ref p)) => Some(p.clone()),
			_ => None,
		}
	}

	#[test]
	fn separate_and_glued_forms() {
		let (argv, redirs) = extract(&["sort", "<", "in.txt", ">out.txt"]).unwrap();
		assert_eq!(argv, args(&["sort"]));
		assert_eq!(input_path(&redirs), Some(PathBuf::from("in.txt")));
		assert_eq!(redirs.output, Some(OutputTarget { path: "out.txt".into(), mode: OutputMode::Truncate }));

		let (argv, redirs) = extract(&["echo", "hi", ">>", "log"]).unwrap();
		assert_eq!(argv, args(&["echo", "hi"]));
		assert_eq!(redirs.output, Some(OutputTarget { path: "log".into(), mode: OutputMode::Append }));

		let (_, redirs) = extract(&["echo", ">>log"]).unwrap();
		assert_eq!(redirs.output.unwrap().mode, OutputMode::Append);
	}

	#[test]
	fn descriptor_prefix_is_accepted() {
		// the prefix is not honored, so these are two output redirections
		match extract(&["cmd", "2>err.txt", "1>>", "out"]) {
			Err(ShellError::Syntax(SyntaxError::RedirectionConflict { what: "output" })) => {},
			r => panic!("unexpected {:?}", r),
		}

		let (argv, redirs) = extract(&["cmd", "2>err.txt", "0<", "in"]).unwrap();
		assert_eq!(argv, args(&["cmd"]));
		assert_eq!(redirs.output.as_ref().unwrap().path, PathBuf::from("err.txt"));
		assert_eq!(input_path(&redirs), Some(PathBuf::from("in")));
	}

	#[test]
	fn plain_numbers_are_arguments() {
		let (argv, redirs) = extract(&["head", "-n", "10", "42"]).unwrap();
		assert_eq!(argv, args(&["head", "-n", "10", "42"]));
		assert!(redirs.is_empty());
	}

	#[test]
	fn conflicts() {
		match extract(&["cat", "<a", "<b"]) {
			Err(ShellError::Syntax(SyntaxError::RedirectionConflict { what: "input" })) => {},
			r => panic!("unexpected {:?}", r),
		}
		match extract(&["cat", ">a", ">>b"]) {
			Err(ShellError::Syntax(SyntaxError::RedirectionConflict { what: "output" })) => {},
			r => panic!("unexpected {:?}", r),
		}
	}

	#[test]
	fn missing_targets() {
		for case in [&["cat", "<"][..], &["cat", ">", ">>x"][..], &["cat", ">>"][..], &["cat", "<<"][..]].iter() {
			match extract(case) {
				Err(ShellError::Syntax(SyntaxError::MissingRedirectionTarget { .. })) => {},
				r => panic!("unexpected {:?} for {:?}", r, case),
			}
		}
	}

	#[test]
	fn heredoc_is_collected_into_temp_file() {
		let mut input = BufLines::new(&b"line one\nline two\nEOF\nnext command\n"[..]);
		let (argv, redirs) = extract_redirections(args(&["cat", "<<", "EOF"]), &mut input, 1024).unwrap();
		assert_eq!(argv, args(&["cat"]));

		let heredoc = redirs.heredoc().unwrap();
		let path = heredoc.path().to_path_buf();
		let mut body = String::new();
		heredoc.as_file().read_to_string(&mut body).unwrap();
		assert_eq!(body, "line one\nline two");
		assert!(path.exists());

		// the rest of the input is left for the command loop
		assert_eq!(input.read_line().unwrap().as_deref(), Some("next command"));

		drop(redirs);
		assert!(!path.exists());
	}

	#[test]
	fn glued_heredoc_delimiter() {
		let mut input = BufLines::new(&b"x\nEND\n"[..]);
		let (_, redirs) = extract_redirections(args(&["cat", "<<END"]), &mut input, 1024).unwrap();
		assert!(redirs.heredoc().is_some());
	}

	#[test]
	fn heredoc_conflicts_with_input_file() {
		let mut input = BufLines::new(&b"body\nEOF\nafter\n"[..]);
		match extract_redirections(args(&["cat", "<f", "<<EOF"]), &mut input, 1024) {
			Err(ShellError::Syntax(SyntaxError::RedirectionConflict { what: "input" })) => {},
			r => panic!("unexpected {:?}", r),
		}
		assert_eq!(input.read_line().unwrap().as_deref(), Some("after"));
	}

	#[test]
	fn heredoc_after_an_error_is_discarded() {
		let mut input = BufLines::new(&b"touch marker\nEOF\nafter\n"[..]);
		match extract_redirections(args(&["cat", ">a", ">b", "<<EOF"]), &mut input, 1024) {
			Err(ShellError::Syntax(SyntaxError::RedirectionConflict { what: "output" })) => {},
			r => panic!("unexpected {:?}", r),
		}
		assert_eq!(input.read_line().unwrap().as_deref(), Some("after"));

		let mut input = BufLines::new(&b"x\nEND\nafter\n"[..]);
		match extract_redirections(args(&["cat", ">", "<", "<<", "END"]), &mut input, 1024) {
			Err(ShellError::Syntax(SyntaxError::MissingRedirectionTarget { .. })) => {},
			r => panic!("unexpected {:?}", r),
		}
		assert_eq!(input.read_line().unwrap().as_deref(), Some("after"));
	}

	#[test]
	fn drain_reads_every_body() {
		let mut input = BufLines::new(&b"a\nEOF\nb\nEND\nafter\n"[..]);
		drain_heredocs(args(&["cat", "<<EOF", ">", "out", "<<", "END"]), &mut input);
		assert_eq!(input.read_line().unwrap().as_deref(), Some("after"));
	}

	#[test]
	fn unterminated_heredoc() {
		let mut input = BufLines::new(&b"a\nb\n"[..]);
		match extract_redirections(args(&["cat", "<<EOF"]), &mut input, 1024) {
			Err(ShellError::Syntax(SyntaxError::UnterminatedHeredoc { ref delimiter })) if delimiter == "EOF" => {},
			r => panic!("unexpected {:?}", r),
		}
	}

	#[test]
	fn heredoc_size_limit() {
		let mut input = BufLines::new(&b"0123456789\nEOF\n"[..]);
		match extract_redirections(args(&["cat", "<<EOF"]), &mut input, 4) {
			Err(ShellError::Resource(ResourceError::HeredocTooLarge(4))) => {},
			r => panic!("unexpected {:?}", r),
		}
	}
}
