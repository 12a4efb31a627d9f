//! Allocates interrupt vectors and generates the IDT of a kernel image.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use x86_boot_tables::cli::{self, Verbosity};
use x86_boot_tables::elf::Kernel;
use x86_boot_tables::idt::{INTLIST_SECTION, Idt, IntList};

#[derive(Parser)]
#[command(
	name = "gen-idt",
	about = "Generate the IDT, the IRQ to vector map and the free vector bitmap of a kernel image"
)]
struct Cli {
	/// Input kernel binary.
	#[arg(short, long)]
	kernel: PathBuf,

	/// Output IDT binary.
	#[arg(short, long = "output-idt")]
	output: PathBuf,

	/// Output IRQ to vector map binary.
	#[arg(short = 'm', long)]
	vector_map: PathBuf,

	/// Output free vector bitmap binary.
	#[arg(short = 'a', long)]
	output_vectors_alloc: Option<PathBuf>,

	#[command(flatten)]
	verbosity: Verbosity,
}

impl Cli {
	fn run(self) -> Result<()> {
		let bytes = cli::read_kernel(&self.kernel)?;
		let kernel = Kernel::parse(&bytes)?;
		let symbols = kernel.symbols()?;

		let section = kernel.section_by_name(INTLIST_SECTION)?;
		let intlist = IntList::parse(section.data)?;

		let max_irq = usize::try_from(symbols.require("CONFIG_MAX_IRQ_LINES")?)
			.context("CONFIG_MAX_IRQ_LINES does not fit in memory")?;
		let max_vec = usize::try_from(symbols.require("CONFIG_IDT_NUM_VECTORS")?)
			.context("CONFIG_IDT_NUM_VECTORS does not fit in memory")?;

		let idt = Idt::allocate(&intlist, max_vec, max_irq)?;
		info!(
			"{} interrupt entries in {max_vec} vectors, {max_irq} IRQ lines",
			intlist.entries.len()
		);

		cli::write_output(&self.output, idt.to_bytes()?)?;
		cli::write_output(&self.vector_map, idt.irq_map_bytes())?;
		if let Some(output_vectors_alloc) = &self.output_vectors_alloc {
			cli::write_output(output_vectors_alloc, idt.free_vector_bitmap())?;
		}

		Ok(())
	}
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	cli.verbosity.init_logger();
	cli::report("gen-idt", cli.run())
}
