/// Limits and presentation settings for one interpreter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	pub prompt: String,
	pub max_segments: usize,
	pub max_args: usize,
	pub max_arg_len: usize,
	pub heredoc_limit: usize,
	pub report_timing: bool,
	pub log_level: String,
}

pub const DEFAULT_PROMPT: &str = "chainsh> ";
pub const DEFAULT_MAX_SEGMENTS: usize = 64;
pub const DEFAULT_MAX_ARGS: usize = 63;
pub const DEFAULT_MAX_ARG_LEN: usize = 1023;
pub const DEFAULT_HEREDOC_LIMIT: usize = 64 * 1024;

impl Default for Config {
	fn default() -> Config {
		Config {
			prompt: DEFAULT_PROMPT.to_string(),
			max_segments: DEFAULT_MAX_SEGMENTS,
			max_args: DEFAULT_MAX_ARGS,
			max_arg_len: DEFAULT_MAX_ARG_LEN,
			heredoc_limit: DEFAULT_HEREDOC_LIMIT,
			report_timing: true,
			log_level: "warn".to_string(),
		}
	}
}
