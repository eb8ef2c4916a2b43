use std::mem;

use crate::error::{ResourceError, ShellResult, SyntaxError};
use crate::types::*;

struct Parser<'a> {
	line: &'a [u8],
	i: usize,
}

impl<'a> Parser<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.line.get(self.i) {
			if !f(*c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		matches!(c, b' ' | b'\t')
	}

	fn is_operator(c: u8) -> bool {
		matches!(c, b'&' | b'|' | b';')
	}

	fn peek(&self, offset: usize) -> Option<u8> {
		self.line.get(self.i + offset).copied()
	}

	/// Consumes the operator at the cursor. Two-character operators win over
	/// their one-character prefixes.
	fn read_operator(&mut self) -> ControlOperator {
		let (op, len) = match (self.peek(0), self.peek(1)) {
			(Some(b'&'), Some(b'&')) => (ControlOperator::And, 2),
			(Some(b'|'), Some(b'|')) => (ControlOperator::Or, 2),
			(Some(b'|'), _) => (ControlOperator::Pipe, 1),
			(Some(b';'), _) => (ControlOperator::Sequence, 1),
			(Some(b'&'), _) => (ControlOperator::Background, 1),
			_ => (ControlOperator::None, 0),
		};
		self.i += len;
		op
	}

	fn trimmed(&self, start: usize, end: usize) -> &'a [u8] {
		let mut s = start;
		let mut e = end;
		while s < e && Parser::is_whitespace(self.line[s]) { s += 1; }
		while e > s && Parser::is_whitespace(self.line[e - 1]) { e -= 1; }
		&self.line[s .. e]
	}
}

/// Splits a line into segments at the five control operators. Quotes are
/// ordinary characters here; they only matter to [`split_args`].
pub fn tokenize(line: &str, max_segments: usize) -> ShellResult<Vec<Segment>> {
	let mut parser = Parser { line: line.as_bytes(), i: 0 };
	let mut segments: Vec<Segment> = vec![];
	loop {
		let start = parser.i;
		parser.proceed_while(|c| !Parser::is_operator(c));
		let text = parser.trimmed(start, parser.i);
		let operator = parser.read_operator();

		if text.is_empty() {
			if operator != ControlOperator::None {
				return Err(SyntaxError::EmptySegment { operator }.into());
			}
			if let Some(last) = segments.last() {
				if last.operator.needs_operand() {
					return Err(SyntaxError::MissingOperand { operator: last.operator }.into());
				}
			}
			break;
		}
		if segments.len() == max_segments {
			return Err(ResourceError::TooManySegments(max_segments).into());
		}
		segments.push(Segment {
			text: String::from_utf8_lossy(text).into_owned(),
			operator,
		});
		if operator == ControlOperator::None {
			break;
		}
	}
	Ok(segments)
}

/// Merges pipe-joined segments into groups. Each group carries the operator
/// that follows its last stage.
pub fn group(segments: Vec<Segment>) -> Vec<Group> {
	let mut groups: Vec<Group> = vec![];
	let mut stages: Vec<String> = vec![];
	for segment in segments {
		stages.push(segment.text);
		if segment.operator != ControlOperator::Pipe {
			groups.push(Group { stages: mem::take(&mut stages), operator: segment.operator });
		}
	}
	if !stages.is_empty() {
		groups.push(Group { stages, operator: ControlOperator::None });
	}
	groups
}

/// Quote-aware argument splitting. An unterminated quote is closed by the
/// end of the segment.
pub fn split_args(segment: &str, max_args: usize, max_arg_len: usize) -> ShellResult<Vec<String>> {
	let mut args: Vec<String> = vec![];
	let mut current: Vec<u8> = vec![];
	let mut in_word = false;
	let mut quote: Option<u8> = None;

	fn finish(args: &mut Vec<String>, current: &mut Vec<u8>, max_args: usize) -> ShellResult<()> {
		if args.len() == max_args {
			return Err(ResourceError::TooManyArguments(max_args).into());
		}
		args.push(String::from_utf8_lossy(current).into_owned());
		current.clear();
		Ok(())
	}

	for &c in segment.as_bytes() {
		match quote {
			Some(q) if c == q => { quote = None; },
			Some(_) => current.push(c),
			None => match c {
				b'"' | b'\'' => {
					quote = Some(c);
					in_word = true;
				},
				b' ' | b'\t' => {
					if in_word {
						finish(&mut args, &mut current, max_args)?;
						in_word = false;
					}
				},
				_ => {
					current.push(c);
					in_word = true;
				},
			},
		}
		if current.len() > max_arg_len {
			return Err(ResourceError::ArgumentTooLong(max_arg_len).into());
		}
	}
	if in_word {
		finish(&mut args, &mut current, max_args)?;
	}
	Ok(args)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ShellError;
	use crate::types::ControlOperator::*;

	fn seg(text: &str, operator: ControlOperator) -> Segment {
		Segment { text: text.to_string(), operator }
	}

	#[test]
	fn tokenize_all_operators() {
		let segs = tokenize("a && b || c ; d & e | f", 64).unwrap();
		assert_eq!(segs, vec![
			seg("a", And), seg("b", Or), seg("c", Sequence),
			seg("d", Background), seg("e", Pipe), seg("f", None),
		]);
	}

	#[test]
	fn tokenize_without_spaces() {
		let segs = tokenize("a&&b||c|d;e", 64).unwrap();
		assert_eq!(segs, vec![seg("a", And), seg("b", Or), seg("c", Pipe), seg("d", Sequence), seg("e", None)]);
	}

	#[test]
	fn tokenize_empty_line() {
		assert!(tokenize("", 64).unwrap().is_empty());
		assert!(tokenize(" \t ", 64).unwrap().is_empty());
	}

	#[test]
	fn tokenize_trailing_background_and_sequence() {
		assert_eq!(tokenize("sleep 1 &", 64).unwrap(), vec![seg("sleep 1", Background)]);
		assert_eq!(tokenize("ls ;  ", 64).unwrap(), vec![seg("ls", Sequence)]);
	}

	#[test]
	fn tokenize_rejects_empty_segments() {
		match tokenize("; ls", 64) {
			Err(ShellError::Syntax(SyntaxError::EmptySegment { operator: Sequence })) => {},
			r => panic!("unexpected {:?}", r),
		}
		match tokenize("a && && b", 64) {
			Err(ShellError::Syntax(SyntaxError::EmptySegment { operator: And })) => {},
			r => panic!("unexpected {:?}", r),
		}
		match tokenize("a |", 64) {
			Err(ShellError::Syntax(SyntaxError::MissingOperand { operator: Pipe })) => {},
			r => panic!("unexpected {:?}", r),
		}
		assert!(tokenize("a ||", 64).is_err());
	}

	#[test]
	fn tokenize_ignores_quotes() {
		let segs = tokenize("echo 'a;b'", 64).unwrap();
		assert_eq!(segs, vec![seg("echo 'a", Sequence), seg("b'", None)]);
	}

	#[test]
	fn tokenize_segment_limit() {
		assert!(tokenize("a;b;c", 3).is_ok());
		match tokenize("a;b;c;d", 3) {
			Err(ShellError::Resource(ResourceError::TooManySegments(3))) => {},
			r => panic!("unexpected {:?}", r),
		}
	}

	#[test]
	fn tokenize_round_trips() {
		let lines = ["a && b", "x | y | z ; w", "sleep 1 & echo hi", "p || q & r", "one"];
		for line in lines.iter() {
			let rejoined = tokenize(line, 64).unwrap().iter()
				.map(|s| format!("{} {}", s.text, s.operator))
				.collect::<Vec<_>>()
				.join(" ");
			let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
			assert_eq!(normalize(&rejoined), normalize(line));
		}
	}

	#[test]
	fn group_merges_pipes() {
		let groups = group(tokenize("a | b | c && d ; e | f &", 64).unwrap());
		assert_eq!(groups, vec![
			Group { stages: vec!["a".into(), "b".into(), "c".into()], operator: And },
			Group { stages: vec!["d".into()], operator: Sequence },
			Group { stages: vec!["e".into(), "f".into()], operator: Background },
		]);
		assert!(groups[2].is_background());
	}

	#[test]
	fn split_collapses_whitespace() {
		assert_eq!(split_args("  ls \t -l   /tmp ", 63, 1023).unwrap(), vec!["ls", "-l", "/tmp"]);
		assert!(split_args("   ", 63, 1023).unwrap().is_empty());
	}

	#[test]
	fn split_quotes() {
		assert_eq!(split_args("'a b' \"c d\"", 63, 1023).unwrap(), vec!["a b", "c d"]);
		assert_eq!(split_args("x\"y z\"w", 63, 1023).unwrap(), vec!["xy zw"]);
		assert_eq!(split_args("\"it's\" 'say \"hi\"'", 63, 1023).unwrap(), vec!["it's", "say \"hi\""]);
	}

	#[test]
	fn split_unterminated_quote_is_closed_at_end() {
		assert_eq!(split_args("echo 'a b", 63, 1023).unwrap(), vec!["echo", "a b"]);
	}

	#[test]
	fn split_empty_quotes_give_empty_argument() {
		assert_eq!(split_args("printf '' x", 63, 1023).unwrap(), vec!["printf", "", "x"]);
	}

	#[test]
	fn split_limits() {
		match split_args("a b c", 2, 1023) {
			Err(ShellError::Resource(ResourceError::TooManyArguments(2))) => {},
			r => panic!("unexpected {:?}", r),
		}
		assert!(split_args("a b", 2, 1023).is_ok());
		match split_args("abcdef", 63, 5) {
			Err(ShellError::Resource(ResourceError::ArgumentTooLong(5))) => {},
			r => panic!("unexpected {:?}", r),
		}
		assert!(split_args("abcde", 63, 5).is_ok());
	}
}
