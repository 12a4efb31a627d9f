//! Global Descriptor Table generation.
//!
//! The table is flat: every code and data segment spans the whole 4 GiB
//! address space, and the only segments with a real base are the TSSs.
//!
//! Selector | Descriptor
//! ---------|-----------
//! 0x00     | Pseudo descriptor for `lgdt` (the CPU never reads the null entry)
//! 0x08     | Kernel code
//! 0x10     | Kernel data
//! 0x18     | Main TSS (stack protection or userspace)
//! 0x20     | Double fault TSS (stack protection or userspace)
//! 0x28     | User code (userspace)
//! 0x30     | User data (userspace)
//! last     | Thread-local storage data segment, rewritten at runtime (IA-32 TLS)

use endian_num::{le16, le32};
use log::debug;
use zerocopy::AsBytes;

use crate::elf::Symbols;
use crate::{Error, Result};

/// Size of one descriptor in bytes.
pub const ENTRY_SIZE: usize = 8;

/// Page granularity: the limit counts 4 KiB units.
const FLAGS_GRAN: u8 = 1 << 7;
/// 32-bit protected mode segment.
const FLAGS_SIZE_32: u8 = 1 << 6;

const ACCESS_PRESENT: u8 = 1 << 7;
const ACCESS_DPL_SHIFT: u8 = 5;
/// Code or data segment, as opposed to a system segment.
const ACCESS_DESC_TYPE: u8 = 1 << 4;
const ACCESS_EX: u8 = 1 << 3;
const ACCESS_RW: u8 = 1 << 1;
/// Set up front so the CPU never writes to the table, which may live in ROM.
const ACCESS_ACCESSED: u8 = 1;

/// Available 32-bit TSS.
const TSS_TYPE_AVAILABLE: u8 = 0x9;
/// Size of a 32-bit TSS minus one.
const TSS_LIMIT: u32 = 0x67;
const FLAT_LIMIT: u32 = 0xF_FFFF;

/// Architectural layout of a segment descriptor.
#[derive(
	zerocopy_derive::FromZeroes,
	zerocopy_derive::FromBytes,
	zerocopy_derive::AsBytes
)]
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct GdtEntry {
	pub limit_low: le16,
	pub base_low: le16,
	pub base_mid: u8,
	/// Access byte for code and data, type byte for system segments.
	pub access: u8,
	/// Flags in the high nibble, limit bits 16..20 in the low one.
	pub flags_limit_hi: u8,
	pub base_hi: u8,
}

/// Operand of `lgdt`, padded to the size of a descriptor.
#[derive(
	zerocopy_derive::FromZeroes,
	zerocopy_derive::FromBytes,
	zerocopy_derive::AsBytes
)]
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct PseudoDescriptor {
	pub limit: le16,
	pub base: le32,
	pub padding: le16,
}

impl PseudoDescriptor {
	fn new(base: u32, size: u16) -> Self {
		debug!("create pseudo descriptor: {base:#x} {size:#x}");
		Self {
			limit: le16::from_ne(size - 1),
			base: le32::from_ne(base),
			padding: le16::from_ne(0),
		}
	}
}

/// A single GDT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
	CodeData {
		base: u32,
		/// Segment limit, only the low 20 bits are used.
		limit: u32,
		dpl: u8,
		flags: u8,
		access: u8,
	},
	Tss {
		base: u32,
		limit: u32,
		dpl: u8,
	},
}

impl Descriptor {
	pub const fn flat_code(dpl: u8) -> Self {
		Self::CodeData {
			base: 0,
			limit: FLAT_LIMIT,
			dpl,
			flags: FLAGS_GRAN,
			access: ACCESS_EX | ACCESS_RW,
		}
	}

	pub const fn flat_data(dpl: u8) -> Self {
		Self::CodeData {
			base: 0,
			limit: FLAT_LIMIT,
			dpl,
			flags: FLAGS_GRAN,
			access: ACCESS_RW,
		}
	}

	pub const fn tss(base: u32) -> Self {
		Self::Tss {
			base,
			limit: TSS_LIMIT,
			dpl: 0,
		}
	}

	/// Composes the descriptor's 8-byte architectural layout.
	pub fn encode(&self) -> GdtEntry {
		let (base, limit, type_byte, flags) = match *self {
			Self::CodeData {
				base,
				limit,
				dpl,
				flags,
				access,
			} => {
				debug!(
					"create code or data entry: {base:#x} {limit:#x} {dpl:#x} {flags:#x} {access:#x}"
				);
				let access = access
					| ACCESS_PRESENT
					| (dpl << ACCESS_DPL_SHIFT)
					| ACCESS_DESC_TYPE
					| ACCESS_ACCESSED;
				let flags = flags | FLAGS_SIZE_32 | limit_hi(limit);
				(base, limit, access, flags)
			}
			Self::Tss { base, limit, dpl } => {
				debug!("create TSS entry: {base:#x} {limit:#x} {dpl:#x}");
				let type_byte =
					ACCESS_PRESENT | (dpl << ACCESS_DPL_SHIFT) | TSS_TYPE_AVAILABLE;
				// Byte granularity
				let flags = limit_hi(limit);
				(base, limit, type_byte, flags)
			}
		};

		GdtEntry {
			limit_low: le16::from_ne((limit & 0xFFFF) as u16),
			base_low: le16::from_ne((base & 0xFFFF) as u16),
			base_mid: (base >> 16) as u8,
			access: type_byte,
			flags_limit_hi: flags,
			base_hi: (base >> 24) as u8,
		}
	}
}

fn limit_hi(limit: u32) -> u8 {
	((limit >> 16) & 0xF) as u8
}

/// The GDT for one kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gdt {
	/// Address the table is linked at.
	base: u32,
	/// All entries after the pseudo descriptor.
	entries: Vec<Descriptor>,
}

impl Gdt {
	/// Derives the table layout from the Kconfig pseudo-symbols of an image.
	pub fn from_symbols(symbols: &Symbols<'_>) -> Result<Self> {
		let base = address32(symbols, "_gdt")?;

		let mut entries = vec![Descriptor::flat_code(0), Descriptor::flat_data(0)];

		let userspace = symbols.contains("CONFIG_USERSPACE");
		if userspace || symbols.contains("CONFIG_X86_STACK_PROTECTION") {
			entries.push(Descriptor::tss(address32(symbols, "_main_tss")?));
			entries.push(Descriptor::tss(address32(symbols, "_df_tss")?));
		}

		if userspace {
			entries.push(Descriptor::flat_code(3));
			entries.push(Descriptor::flat_data(3));
		}

		// x86-64 uses FS/GS base registers instead of a descriptor
		if symbols.contains("CONFIG_THREAD_LOCAL_STORAGE") && !symbols.contains("CONFIG_X86_64") {
			entries.push(Descriptor::flat_data(3));
		}

		Ok(Self { base, entries })
	}

	/// Number of entries including the null entry.
	pub fn num_entries(&self) -> usize {
		self.entries.len() + 1
	}

	pub fn entries(&self) -> &[Descriptor] {
		&self.entries
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let size = self.num_entries() * ENTRY_SIZE;
		// At most eight entries, well within the 16-bit limit field
		let pseudo = PseudoDescriptor::new(self.base, size as u16);
		let entries = self
			.entries
			.iter()
			.map(Descriptor::encode)
			.collect::<Vec<_>>();

		let mut bytes = Vec::with_capacity(size);
		bytes.extend_from_slice(pseudo.as_bytes());
		bytes.extend_from_slice(entries.as_bytes());
		debug_assert_eq!(bytes.len(), size);
		bytes
	}
}

fn address32(symbols: &Symbols<'_>, name: &str) -> Result<u32> {
	let value = symbols.require(name)?;
	u32::try_from(value).map_err(|_| {
		Error::MalformedImage(format!("`{name}` at {value:#x} is not a 32-bit address"))
	})
}
