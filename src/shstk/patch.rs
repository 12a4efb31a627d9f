//! Seeding of the shadow stack arrays in `.x86shadowstack.arr`.
//!
//! Every shadow stack array is described by a `__<name>_shstk_arr` symbol.
//! The linker leaves the member count in the first word of the array; the
//! array itself is otherwise zero. This rewrites each array so every member
//! ends with the record the kernel expects to find when it first switches
//! to that shadow stack.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use endian_num::{le32, le64};
use log::{debug, info};
use zerocopy::{AsBytes, FromBytes};

use crate::arch::Arch;
use crate::elf::{Kernel, Section, Symbol, Symbols};
use crate::{Error, Result};

pub const SECTION: &str = ".x86shadowstack.arr";

/// Array holding the IRQ shadow stacks, one group of substacks per CPU.
const IRQ_STACKS: &str = "__z_interrupt_stacks_shstk_arr";

const X86_KERNEL_CS: u64 = 0x18;

pub fn is_shstk_array(name: &str) -> bool {
	name.starts_with("__") && name.ends_with("_shstk_arr")
}

/// IA-32 stack top.
#[derive(
	zerocopy_derive::FromZeroes,
	zerocopy_derive::FromBytes,
	zerocopy_derive::AsBytes
)]
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct X86Token {
	pub ssp: le64,
	pub padding: le32,
	pub entry: le32,
}

/// x86-64 thread stack top.
#[derive(
	zerocopy_derive::FromZeroes,
	zerocopy_derive::FromBytes,
	zerocopy_derive::AsBytes
)]
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct X86_64Token {
	/// Supervisor shadow stack token, busy bit set.
	pub token: le64,
	pub prev_ssp: le64,
	pub entry: le64,
	pub cs: le64,
	pub zero: le64,
}

/// The record written at the top of each shadow stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackTop {
	/// IA-32: supervisor token, padding, thread entry point.
	X86 { entry: u32 },
	/// x86-64 thread stacks: supervisor token, previous SSP, thread entry
	/// point, kernel code selector, zero.
	X86_64 { entry: u64 },
	/// x86-64 IRQ stacks: a lone supervisor token.
	X86_64Irq,
}

impl StackTop {
	pub fn size(&self) -> usize {
		match self {
			Self::X86 { .. } => size_of::<X86Token>(),
			Self::X86_64 { .. } => size_of::<X86_64Token>(),
			Self::X86_64Irq => size_of::<le64>(),
		}
	}

	/// Writes the record into the tail of `buf`, whose last byte sits just
	/// below the address `end`.
	fn write(&self, buf: &mut [u8], end: u64) {
		let top = buf.len() - self.size();
		let tail = &mut buf[top..];
		match *self {
			Self::X86 { entry } => {
				let token = X86Token {
					ssp: le64::from_ne(end - 8),
					padding: le32::from_ne(0),
					entry: le32::from_ne(entry),
				};
				tail.copy_from_slice(token.as_bytes());
			}
			Self::X86_64 { entry } => {
				let token = X86_64Token {
					token: le64::from_ne(end - 32 + 1),
					prev_ssp: le64::from_ne(end - 8),
					entry: le64::from_ne(entry),
					cs: le64::from_ne(X86_KERNEL_CS),
					zero: le64::from_ne(0),
				};
				tail.copy_from_slice(token.as_bytes());
			}
			Self::X86_64Irq => tail.copy_from_slice(le64::from_ne(end - 8).as_bytes()),
		}
	}
}

/// One shadow stack array as laid out by the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowStackArray<'a> {
	pub name: &'a str,
	/// Address of the first member.
	pub addr: u64,
	/// Size of the whole array in bytes.
	pub size: usize,
	/// Number of shadow stacks in the array.
	pub nmemb: u64,
}

impl ShadowStackArray<'_> {
	/// Builds the new contents of the array.
	///
	/// The array is split into `nmemb` equally sized stacks, each topped with
	/// `top`. An empty array (for example a disabled dynamic thread pool) is
	/// left zeroed.
	pub fn patch(&self, top: StackTop) -> Result<Vec<u8>> {
		let mut buf = vec![0; self.size];
		if self.nmemb == 0 {
			debug!("{}: no members", self.name);
			return Ok(buf);
		}

		let out_of_bounds = |reason| Error::ArrayOutOfBounds {
			name: self.name.to_string(),
			reason,
		};

		let nmemb = usize::try_from(self.nmemb)
			.map_err(|_| out_of_bounds(format!("{} members", self.nmemb)))?;
		let stack_size = self.size / nmemb;
		if stack_size < top.size() {
			return Err(out_of_bounds(format!(
				"{nmemb} members of {stack_size} bytes cannot hold a {}-byte stack top",
				top.size()
			)));
		}

		debug!(
			"{}: {nmemb} shadow stacks of {stack_size:#x} bytes at {:#x}",
			self.name, self.addr
		);

		for (i, member) in buf.chunks_exact_mut(stack_size).take(nmemb).enumerate() {
			let end = self.addr + ((i + 1) * stack_size) as u64;
			top.write(member, end);
		}

		Ok(buf)
	}
}

/// Architecture specific inputs to the stack top records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackTops {
	pub thread: StackTop,
	/// `CONFIG_ISR_DEPTH`, only needed for the x86-64 IRQ stacks.
	pub isr_depth: Option<u64>,
}

impl StackTops {
	pub fn from_symbols(arch: Arch, symbols: &Symbols<'_>) -> Result<Self> {
		match arch {
			Arch::X86 => {
				let entry_symbol = if symbols.get("CONFIG_X86_DEBUG_INFO").unwrap_or(0) != 0 {
					"z_x86_thread_entry_wrapper"
				} else {
					"z_thread_entry"
				};
				let entry = symbols.require(entry_symbol)?;
				let entry = u32::try_from(entry).map_err(|_| {
					Error::MalformedImage(format!(
						"`{entry_symbol}` at {entry:#x} is not a 32-bit address"
					))
				})?;

				Ok(Self {
					thread: StackTop::X86 { entry },
					isr_depth: None,
				})
			}
			Arch::X86_64 => Ok(Self {
				thread: StackTop::X86_64 {
					entry: symbols.require("z_thread_entry")?,
				},
				isr_depth: symbols.get("CONFIG_ISR_DEPTH"),
			}),
		}
	}

	/// Picks the record and member count for the array `name`, whose first
	/// word says it holds `nmemb` members.
	fn for_array(&self, arch: Arch, name: &str, nmemb: u64) -> Result<(StackTop, u64)> {
		if arch == Arch::X86_64 && name == IRQ_STACKS {
			let isr_depth = self
				.isr_depth
				.ok_or_else(|| Error::MissingSymbol("CONFIG_ISR_DEPTH".to_string()))?;
			Ok((StackTop::X86_64Irq, nmemb.saturating_mul(isr_depth)))
		} else {
			Ok((self.thread, nmemb))
		}
	}
}

/// Collects the shadow stack arrays of an image, sorted by address.
pub fn arrays<'a>(kernel: &Kernel<'a>, section: &Section<'a>) -> Result<Vec<(Symbol<'a>, u64)>> {
	let mut arrays = kernel
		.iter_symbols()
		.filter(|sym| is_shstk_array(sym.name))
		.map(|sym| -> Result<_> {
			let nmemb = sym
				.section_offset(section)
				.and_then(|offset| le32::read_from_prefix(section.data.get(offset..)?))
				.ok_or_else(|| Error::ArrayOutOfBounds {
					name: sym.name.to_string(),
					reason: format!("{:#x} is not inside {SECTION}", sym.value),
				})?;
			Ok((sym, u64::from(nmemb.to_ne())))
		})
		.collect::<Result<Vec<_>>>()?;

	arrays.sort_by_key(|(sym, _)| sym.value);
	Ok(arrays)
}

/// Computes the new contents of the shadow stack section.
pub fn patch_section<'a>(kernel: &Kernel<'a>, arch: Arch) -> Result<(Section<'a>, Vec<u8>)> {
	let section = kernel.section_by_name(SECTION)?;
	let symbols = kernel.symbols()?;
	let tops = StackTops::from_symbols(arch, &symbols)?;

	let mut contents = section.data.to_vec();
	if contents.len() as u64 != section.size {
		return Err(Error::MalformedImage(format!(
			"{SECTION} has no contents in the file"
		)));
	}

	for (sym, nmemb) in arrays(kernel, &section)? {
		let (top, nmemb) = tops.for_array(arch, sym.name, nmemb)?;
		let array = ShadowStackArray {
			name: sym.name,
			addr: sym.value,
			size: usize::try_from(sym.size).unwrap_or(usize::MAX),
			nmemb,
		};

		let start = sym.section_offset(&section).unwrap_or(contents.len());
		splice(&mut contents, start, &array, top)?;
	}

	Ok((section, contents))
}

/// Overwrites the bytes of `array`, which starts `start` bytes into the
/// section `contents`.
fn splice(
	contents: &mut [u8],
	start: usize,
	array: &ShadowStackArray<'_>,
	top: StackTop,
) -> Result<()> {
	let range = start
		.checked_add(array.size)
		.filter(|end| *end <= contents.len())
		.map(|end| start..end)
		.ok_or_else(|| Error::ArrayOutOfBounds {
			name: array.name.to_string(),
			reason: format!("{:#x} bytes do not fit in {SECTION}", array.size),
		})?;

	contents[range].copy_from_slice(&array.patch(top)?);
	Ok(())
}

/// Patches the shadow stack section of the image at `path` in place.
pub fn patch_file(path: &Path, arch: Option<Arch>) -> Result<()> {
	let mut file = OpenOptions::new().read(true).write(true).open(path)?;
	let mut bytes = Vec::new();
	file.read_to_end(&mut bytes)?;

	let kernel = Kernel::parse(&bytes)?;
	let arch = arch.unwrap_or_else(|| Arch::from_elf_class(kernel.is_64()));
	let (section, contents) = patch_section(&kernel, arch)?;

	info!(
		"patching {} bytes of {SECTION} at file offset {:#x} for {}",
		contents.len(),
		section.offset,
		arch.name()
	);
	file.seek(SeekFrom::Start(section.offset))?;
	file.write_all(&contents)?;
	file.flush()?;

	Ok(())
}
