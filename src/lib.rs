//! chainsh: a small command interpreter.
//!
//! A line is cut into segments at `&&`, `||`, `;`, `&` and `|`, pipe-joined
//! segments are grouped into pipelines, and each group is run as forked
//! processes, gated by the previous group's exit status. Background groups
//! are tracked in a fixed table and reported from a SIGCHLD handler.

pub mod builtin;
pub mod config;
pub mod error;
pub mod eval;
pub mod exec;
pub mod input;
pub mod job;
pub mod parser;
pub mod redirect;
pub mod types;

pub use config::Config;
pub use error::{ShellError, ShellResult};
pub use eval::{EvalResult, Shell};
