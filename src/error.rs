//! Error kinds shared by the generators.

use thiserror::Error;

/// Everything that can make a generator give up.
///
/// None of these are recovered from; the binaries report the message and
/// exit with a failure status.
#[derive(Error, Debug)]
pub enum Error {
	/// A required symbol is not present in the symbol table.
	#[error("symbol `{0}` not found in kernel image")]
	MissingSymbol(String),

	/// The image carries no `SHT_SYMTAB` section.
	#[error("could not find symbol table")]
	MissingSymbolTable,

	/// A required section is not present in the image.
	#[error("section `{0}` not found in kernel image")]
	MissingSection(String),

	#[error("vector {vector} specified, but size of IDT is only {max_vec} vectors")]
	VectorOutOfRange { vector: u32, max_vec: u32 },

	#[error("IRQ {irq} specified, but CONFIG_MAX_IRQ_LINES is {max_irq}")]
	IrqOutOfRange { irq: u32, max_irq: u32 },

	#[error("multiple assignments for vector {0}")]
	VectorConflict(u32),

	#[error("multiple vector assignments for interrupt line {0}")]
	IrqConflict(u32),

	#[error("can't find a free vector in priority level {0}")]
	NoFreeVector(i32),

	/// An `intList` entry names neither a vector nor a priority level.
	#[error("entry for handler {handler:#x} does not specify vector or priority level")]
	UnderspecifiedEntry { handler: u32 },

	/// A vector carries both a handler and a TSS selector, or neither.
	#[error("vector {vector}: {reason}")]
	MalformedGateEntry { vector: usize, reason: &'static str },

	#[error("{0} not found in configuration")]
	MissingConfig(String),

	#[error("{name} has unusable value {value}")]
	InvalidConfig { name: String, value: String },

	/// The image is readable but does not have the shape the generators expect.
	#[error("malformed kernel image: {0}")]
	MalformedImage(String),

	/// A shadow-stack array does not fit where its symbol says it lives.
	#[error("shadow stack array `{name}`: {reason}")]
	ArrayOutOfBounds { name: String, reason: String },

	#[error(transparent)]
	Elf(#[from] goblin::error::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
