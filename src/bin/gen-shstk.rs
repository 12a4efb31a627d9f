//! Seeds CET shadow stacks and sizes the IRQ shadow substacks.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use x86_boot_tables::arch::Arch;
use x86_boot_tables::cli::{self, Verbosity};
use x86_boot_tables::kconfig::DotConfig;
use x86_boot_tables::shstk::{header, patch};

#[derive(Parser)]
#[command(
	name = "gen-shstk",
	about = "Patch shadow stack arrays of a kernel image and generate the shadow stack header",
	group(ArgGroup::new("action").required(true).multiple(true).args(["kernel", "output"]))
)]
struct Cli {
	/// Kernel binary whose shadow stack arrays are patched in place.
	#[arg(short, long)]
	kernel: Option<PathBuf>,

	/// Output header file.
	#[arg(short, long, requires = "config")]
	output: Option<PathBuf>,

	/// Kconfig `.config` file.
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Target architecture, inferred from the kernel binary by default.
	#[arg(value_enum, short, long)]
	arch: Option<Arch>,

	#[command(flatten)]
	verbosity: Verbosity,
}

impl Cli {
	fn run(self) -> Result<()> {
		if let Some(kernel) = &self.kernel {
			patch::patch_file(kernel, self.arch)
				.with_context(|| format!("failed to patch {}", kernel.display()))?;
		}

		if let Some(output) = &self.output {
			let config = self
				.config
				.as_deref()
				.context("generating a header requires a .config file")?;
			let config = DotConfig::read(config)
				.with_context(|| format!("failed to read {}", config.display()))?;

			let substack_size = header::SubstackConfig::from_dot_config(&config)?.substack_size()?;
			cli::write_output(output, header::render(substack_size))?;
		}

		Ok(())
	}
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	cli.verbosity.init_logger();
	cli::report("gen-shstk", cli.run())
}
