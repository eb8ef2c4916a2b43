use std::io::{self, IsTerminal};
use std::process;

use chainsh::config::{self, Config};
use chainsh::input::StdinLines;
use chainsh::{job, EvalResult, Shell};
use clap::Parser;
use tracing::error;

/// chainsh - a small POSIX-like command interpreter
#[derive(Parser, Debug)]
#[command(name = "chainsh", version, about)]
struct Args {
	/// Execute one command line and exit with its status
	#[arg(short = 'c')]
	command: Option<String>,

	/// Prompt shown when reading from a terminal
	#[arg(long, env = "CHAINSH_PROMPT", default_value = config::DEFAULT_PROMPT)]
	prompt: String,

	/// Maximum number of segments in one line
	#[arg(long, env = "CHAINSH_MAX_SEGMENTS", default_value_t = config::DEFAULT_MAX_SEGMENTS)]
	max_segments: usize,

	/// Maximum number of arguments of one command
	#[arg(long, env = "CHAINSH_MAX_ARGS", default_value_t = config::DEFAULT_MAX_ARGS)]
	max_args: usize,

	/// Maximum length of one argument in bytes
	#[arg(long, env = "CHAINSH_MAX_ARG_LEN", default_value_t = config::DEFAULT_MAX_ARG_LEN)]
	max_arg_len: usize,

	/// Maximum size of a here-document body in bytes
	#[arg(long, env = "CHAINSH_HEREDOC_LIMIT", default_value_t = config::DEFAULT_HEREDOC_LIMIT)]
	heredoc_limit: usize,

	/// Do not report the elapsed time of foreground commands
	#[arg(long)]
	no_timing: bool,

	/// Log level used when RUST_LOG is not set
	#[arg(long, env = "CHAINSH_LOG", default_value = "warn")]
	log_level: String,
}

impl From<&Args> for Config {
	fn from(args: &Args) -> Config {
		Config {
			prompt: args.prompt.clone(),
			max_segments: args.max_segments,
			max_args: args.max_args,
			max_arg_len: args.max_arg_len,
			heredoc_limit: args.heredoc_limit,
			report_timing: !args.no_timing,
			log_level: args.log_level.clone(),
		}
	}
}

fn main() {
	let args = Args::parse();
	let config = Config::from(&args);

	tracing_subscriber::fmt()
		.with_writer(io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
		)
		.init();

	if let Err(e) = job::install_reaper() {
		error!(error = %e, "Failed to install SIGCHLD handler; background jobs will not be reported");
	}

	let mut shell = Shell::new(config, StdinLines);
	let code = match args.command {
		Some(ref line) => match shell.eval_line(line) {
			EvalResult::Continue(status) => status,
			EvalResult::Exit => 0,
		},
		None => shell.run(io::stdin().is_terminal()),
	};
	process::exit(code);
}
