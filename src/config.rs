use std::env;
use std::str::FromStr;

use log::warn;
use thiserror::Error;

pub const DEFAULT_PROMPT: &str = "minish) ";
pub const PROMPT_KEY: &str = "MINISH_PROMPT";
pub const PIPELINE_KEY: &str = "MINISH_PIPELINE";
pub const LOG_KEY: &str = "MINISH_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
	#[default]
	Sequential,
	Concurrent,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown pipeline mode '{0}' (expected 'sequential' or 'concurrent')")]
pub struct UnknownPipelineMode(String);

impl FromStr for PipelineMode {
	type Err = UnknownPipelineMode;

	fn from_str(s: &str) -> Result<PipelineMode, UnknownPipelineMode> {
		match s.trim().to_ascii_lowercase().as_str() {
			"sequential" => Ok(PipelineMode::Sequential),
			"concurrent" => Ok(PipelineMode::Concurrent),
			_ => Err(UnknownPipelineMode(s.to_string())),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Config {
	pub prompt: String,
	pub line_capacity: usize,
	pub max_args: usize,
	pub max_stages: usize,
	pub pipeline_mode: PipelineMode,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			prompt: DEFAULT_PROMPT.to_string(),
			line_capacity: 1024,
			max_args: 63,
			max_stages: 5,
			pipeline_mode: PipelineMode::default(),
		}
	}
}

impl Config {
	pub fn from_env() -> Config {
		Config::from_lookup(|key| env::var(key).ok())
	}

	fn from_lookup<F>(lookup: F) -> Config where F: Fn(&str) -> Option<String> {
		let mut config = Config::default();
		if let Some(prompt) = lookup(PROMPT_KEY) {
			config.prompt = prompt;
		}
		if let Some(mode) = lookup(PIPELINE_KEY) {
			match mode.parse() {
				Ok(mode) => config.pipeline_mode = mode,
				Err(e) => warn!("{}: {}", PIPELINE_KEY, e),
			}
		}
		config
	}

	pub fn scratch_capacity(&self) -> usize {
		2 * self.line_capacity
	}
}
