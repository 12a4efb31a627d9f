//! Plumbing shared by the generator binaries.

use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use log::LevelFilter;

/// Verbosity switch common to all generators.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct Verbosity {
	/// Print extra debugging information.
	#[arg(short, long)]
	pub verbose: bool,
}

impl Verbosity {
	/// Whether verbose output was requested, either with `-v` or by setting
	/// `VERBOSE` in the environment.
	pub fn is_verbose(&self) -> bool {
		self.verbose || env::var_os("VERBOSE").is_some()
	}

	/// Installs the stderr logger.
	///
	/// `RUST_LOG` is honoured on top of the level picked here.
	pub fn init_logger(&self) {
		let level = if self.is_verbose() {
			LevelFilter::Debug
		} else {
			LevelFilter::Warn
		};

		// Only fails if a logger is already installed, which then stays in charge
		env_logger::Builder::new()
			.filter_level(level)
			.parse_default_env()
			.format_timestamp(None)
			.format_target(false)
			.try_init()
			.ok();
	}
}

/// Turns the outcome of a generator run into a process exit code.
///
/// Failures are reported as a single line prefixed with the tool name.
pub fn report(tool: &str, result: Result<()>) -> ExitCode {
	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("{tool}: {err:#}");
			ExitCode::FAILURE
		}
	}
}

pub fn read_kernel(path: &Path) -> Result<Vec<u8>> {
	fs::read(path).with_context(|| format!("failed to read kernel image {}", path.display()))
}

/// Replaces the contents of `path` with `contents`.
pub fn write_output(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
	fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
