//! Generates the Global Descriptor Table of a kernel image.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use log::info;
use x86_boot_tables::cli::{self, Verbosity};
use x86_boot_tables::elf::Kernel;
use x86_boot_tables::gdt::Gdt;

#[derive(Parser)]
#[command(name = "gen-gdt", about = "Generate the GDT binary of a kernel image")]
struct Cli {
	/// Input kernel binary.
	#[arg(short, long)]
	kernel: PathBuf,

	/// Output GDT binary.
	#[arg(short, long = "output-gdt")]
	output: PathBuf,

	#[command(flatten)]
	verbosity: Verbosity,
}

impl Cli {
	fn run(self) -> Result<()> {
		let bytes = cli::read_kernel(&self.kernel)?;
		let kernel = Kernel::parse(&bytes)?;
		let gdt = Gdt::from_symbols(&kernel.symbols()?)?;

		info!("writing {} GDT entries", gdt.num_entries());
		cli::write_output(&self.output, gdt.to_bytes())
	}
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	cli.verbosity.init_logger();
	cli::report("gen-gdt", cli.run())
}
