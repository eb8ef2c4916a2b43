//! Error types for chainsh

use std::{ffi, io};

use thiserror::Error;

use crate::types::ControlOperator;

pub type ShellResult<T> = Result<T, ShellError>;

#[derive(Error, Debug)]
pub enum SyntaxError {
	#[error("missing command before `{operator}`")]
	EmptySegment { operator: ControlOperator },

	#[error("missing command after `{operator}`")]
	MissingOperand { operator: ControlOperator },

	#[error("missing target for `{operator}`")]
	MissingRedirectionTarget { operator: String },

	#[error("conflicting {what} redirections")]
	RedirectionConflict { what: &'static str },

	#[error("here-document delimited by `{delimiter}` was not terminated")]
	UnterminatedHeredoc { delimiter: String },
}

#[derive(Error, Debug)]
pub enum ResourceError {
	#[error("too many command segments (limit {0})")]
	TooManySegments(usize),

	#[error("too many arguments (limit {0})")]
	TooManyArguments(usize),

	#[error("argument too long (limit {0} bytes)")]
	ArgumentTooLong(usize),

	#[error("here-document too large (limit {0} bytes)")]
	HeredocTooLarge(usize),
}

#[derive(Error, Debug)]
pub enum ShellError {
	#[error("syntax error: {0}")]
	Syntax(#[from] SyntaxError),

	#[error("resource exhausted: {0}")]
	Resource(#[from] ResourceError),

	#[error("here-document: {0}")]
	Heredoc(io::Error),

	#[error("fork failed: {0}")]
	Fork(nix::Error),

	#[error("pipe failed: {0}")]
	Pipe(nix::Error),

	#[error("argument contains a NUL byte: {0}")]
	Nul(#[from] ffi::NulError),

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
}
