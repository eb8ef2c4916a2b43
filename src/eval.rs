use std::io::{self, Write};
use std::time::Instant;

use tracing::{debug, error};

use crate::builtin::{self, Builtin};
use crate::config::Config;
use crate::error::{ShellError, ShellResult};
use crate::exec;
use crate::input::LineSource;
use crate::job::{self, SigchldMask, JOBS};
use crate::parser;
use crate::redirect;
use crate::types::*;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EvalResult {
	/// Line finished; carries the last chain status.
	Continue(i32),
	/// `exit` was reached.
	Exit,
}

/// Whether the group after `previous` runs, given the last status.
pub fn should_run(previous: ControlOperator, status: i32) -> bool {
	match previous {
		ControlOperator::And => status == 0,
		ControlOperator::Or => status != 0,
		ControlOperator::None
		| ControlOperator::Sequence
		| ControlOperator::Background
		| ControlOperator::Pipe => true,
	}
}

fn report(e: &ShellError) {
	let mut stdout = io::stdout();
	let _ = writeln!(stdout, "chainsh: {}", e);
	let _ = stdout.flush();
}

fn emit_completion(message: &[u8]) {
	job::write_raw(libc::STDOUT_FILENO, message);
}

/// Splits and extracts redirections for every stage of a group. Heredoc
/// bodies are read here, in line order, including those of stages after a
/// failing one.
fn prepare_group(group: &Group, config: &Config, input: &mut dyn LineSource) -> ShellResult<PipelineUnit> {
	let mut stages: Vec<Stage> = Vec::with_capacity(group.stages.len());
	for (i, text) in group.stages.iter().enumerate() {
		match prepare_stage(text, config, input) {
			Ok(stage) => stages.push(stage),
			Err(e) => {
				for rest in &group.stages[i + 1 ..] {
					drain_stage(rest, input);
				}
				return Err(e);
			},
		}
	}
	Ok(PipelineUnit { stages, is_background: group.is_background() })
}

fn prepare_stage(text: &str, config: &Config, input: &mut dyn LineSource) -> ShellResult<Stage> {
	let args = match parser::split_args(text, config.max_args, config.max_arg_len) {
		Ok(args) => args,
		Err(e) => {
			drain_stage(text, input);
			return Err(e);
		},
	};
	let (argv, redirects) = redirect::extract_redirections(args, input, config.heredoc_limit)?;
	Ok(Stage { argv, redirects })
}

fn drain_stage(text: &str, input: &mut dyn LineSource) {
	if let Ok(args) = parser::split_args(text, usize::MAX, usize::MAX) {
		redirect::drain_heredocs(args, input);
	}
}

fn builtin_of(unit: &PipelineUnit) -> Option<Builtin> {
	match unit.stages.as_slice() {
		[stage] => stage.argv.first().and_then(|name| builtin::match_builtin(name)),
		_ => None,
	}
}

pub struct Shell<L> {
	config: Config,
	input: L,
	status: i32,
}

impl<L: LineSource> Shell<L> {
	pub fn new(config: Config, input: L) -> Shell<L> {
		Shell { config, input, status: 0 }
	}

	/// Reads and evaluates lines until end of input or `exit`.
	pub fn run(&mut self, interactive: bool) -> i32 {
		loop {
			if interactive {
				let mut stdout = io::stdout();
				let _ = stdout.write_all(self.config.prompt.as_bytes());
				let _ = stdout.flush();
			}
			let line = match self.input.read_line() {
				Ok(Some(line)) => line,
				Ok(None) => return 0,
				Err(e) => {
					error!(error = %e, "Failed to read input");
					return 1;
				},
			};
			if line.trim().is_empty() {
				continue;
			}
			if self.eval_line(&line) == EvalResult::Exit {
				return 0;
			}
			JOBS.reap_any(emit_completion);
		}
	}

	pub fn eval_line(&mut self, line: &str) -> EvalResult {
		let groups = match parser::tokenize(line, self.config.max_segments) {
			Ok(segments) => parser::group(segments),
			Err(e) => {
				report(&e);
				self.status = 1;
				return EvalResult::Continue(self.status);
			},
		};

		let units: Vec<ShellResult<PipelineUnit>> = groups.iter()
			.map(|g| prepare_group(g, &self.config, &mut self.input))
			.collect();

		let mut previous = ControlOperator::None;
		for (group, unit) in groups.iter().zip(units) {
			let run = should_run(previous, self.status);
			previous = group.operator;
			if !run {
				debug!(stages = ?group.stages, "Skipped");
				continue;
			}
			let unit = match unit {
				Ok(unit) => unit,
				Err(e) => {
					report(&e);
					self.status = 1;
					continue;
				},
			};
			if builtin_of(&unit) == Some(Builtin::Exit) {
				return EvalResult::Exit;
			}

			let started = Instant::now();
			self.status = match self.dispatch(&unit) {
				Ok(status) => status,
				Err(e) => {
					report(&e);
					1
				},
			};
			if !unit.is_background {
				self.report_elapsed(started);
			}
		}
		EvalResult::Continue(self.status)
	}

	/// Runs one group. Background groups count as an immediate success.
	fn dispatch(&self, unit: &PipelineUnit) -> ShellResult<i32> {
		debug!(command = %unit.describe(), background = unit.is_background, "Dispatching");
		if unit.is_background {
			// held until registration so an instant exit is not missed
			let _mask = SigchldMask::block();
			let pids = exec::launch(unit)?;
			if let Some(&last) = pids.last() {
				JOBS.register(last, &unit.describe(), &mut io::stdout())?;
			}
			Ok(0)
		} else {
			let pids = exec::launch(unit)?;
			Ok(exec::wait_all(&pids))
		}
	}

	fn report_elapsed(&self, started: Instant) {
		let elapsed = started.elapsed().as_millis();
		if self.config.report_timing && elapsed > 0 {
			let mut stderr = io::stderr();
			let _ = writeln!(stderr, "Execution time: {} ms", elapsed);
			let _ = stderr.flush();
		}
	}
}
