use std::fmt;
use std::fs::File;
use std::path::PathBuf;

use tempfile::NamedTempFile;

/// Operator that follows a segment on the command line.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ControlOperator { None, And, Or, Sequence, Background, Pipe }

impl ControlOperator {
	pub fn symbol(self) -> &'static str {
		match self {
			ControlOperator::None => "",
			ControlOperator::And => "&&",
			ControlOperator::Or => "||",
			ControlOperator::Sequence => ";",
			ControlOperator::Background => "&",
			ControlOperator::Pipe => "|",
		}
	}

	/// Operators that need a command on their right-hand side.
	pub fn needs_operand(self) -> bool {
		matches!(self, ControlOperator::And | ControlOperator::Or | ControlOperator::Pipe)
	}
}

impl fmt::Display for ControlOperator {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.symbol())
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Segment {
	pub text: String,
	pub operator: ControlOperator,
}

/// Pipe-joined segments plus the operator that ends the last of them.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Group {
	pub stages: Vec<String>,
	pub operator: ControlOperator,
}

impl Group {
	pub fn is_background(&self) -> bool {
		self.operator == ControlOperator::Background
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OutputMode { Truncate, Append }

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OutputTarget {
	pub path: PathBuf,
	pub mode: OutputMode,
}

/// Body of a heredoc, already written to an unlinked-on-drop temporary file
/// whose descriptor is positioned at the start.
#[derive(Debug)]
pub struct Heredoc {
	pub file: NamedTempFile,
}

impl Heredoc {
	pub fn path(&self) -> &std::path::Path {
		self.file.path()
	}

	pub fn as_file(&self) -> &File {
		self.file.as_file()
	}
}

#[derive(Debug)]
pub enum InputSource {
	File(PathBuf),
	Heredoc(Heredoc),
}

/// At most one input source and at most one output target, enforced by the
/// shape of the type.
#[derive(Debug, Default)]
pub struct RedirectionSpec {
	pub input: Option<InputSource>,
	pub output: Option<OutputTarget>,
}

impl RedirectionSpec {
	pub fn is_empty(&self) -> bool {
		self.input.is_none() && self.output.is_none()
	}

	pub fn heredoc(&self) -> Option<&Heredoc> {
		match self.input {
			Some(InputSource::Heredoc(ref h)) => Some(h),
			_ => None,
		}
	}
}

/// One command of a pipeline, with redirections already removed from `argv`.
#[derive(Debug)]
pub struct Stage {
	pub argv: Vec<String>,
	pub redirects: RedirectionSpec,
}

#[derive(Debug)]
pub struct PipelineUnit {
	pub stages: Vec<Stage>,
	pub is_background: bool,
}

impl PipelineUnit {
	/// Text shown in job notices: each stage's arguments joined by spaces,
	/// stages joined by ` | `.
	pub fn describe(&self) -> String {
		self.stages.iter()
			.map(|s| s.argv.join(" "))
			.collect::<Vec<_>>()
			.join(" | ")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn describe_joins_stages() {
		let unit = PipelineUnit {
			stages: vec![
				Stage { argv: vec!["ls".into(), "-l".into()], redirects: RedirectionSpec::default() },
				Stage { argv: vec!["wc".into()], redirects: RedirectionSpec::default() },
			],
			is_background: true,
		};
		assert_eq!(unit.describe(), "ls -l | wc");
	}

	#[test]
	fn operand_requirements() {
		assert!(ControlOperator::And.needs_operand());
		assert!(ControlOperator::Pipe.needs_operand());
		assert!(!ControlOperator::Sequence.needs_operand());
		assert!(!ControlOperator::Background.needs_operand());
	}
}
