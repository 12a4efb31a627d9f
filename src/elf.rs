//! Read-only access to a kernel image.
//!
//! This wraps a parsed [`goblin::elf::Elf`] together with the bytes it was
//! parsed from, so section contents can be handed out alongside headers.

use std::collections::HashMap;

use goblin::elf::Elf;
use goblin::elf::section_header::{SHT_NOBITS, SHT_SYMTAB};
use log::debug;

use crate::{Error, Result};

/// A symbol table entry with its name resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol<'a> {
	pub name: &'a str,
	pub value: u64,
	pub size: u64,
	/// Index of the section the symbol is defined in.
	pub section_index: usize,
}

impl Symbol<'_> {
	/// Byte offset of the symbol inside `section`, if it lies within it.
	pub fn section_offset(&self, section: &Section<'_>) -> Option<usize> {
		let offset = self.value.checked_sub(section.addr)?;
		if offset > section.size {
			return None;
		}
		usize::try_from(offset).ok()
	}
}

/// A section header with its name and contents resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section<'a> {
	pub name: &'a str,
	pub addr: u64,
	pub size: u64,
	/// Offset of the section contents in the file.
	pub offset: u64,
	/// Contents; empty for `SHT_NOBITS` sections.
	pub data: &'a [u8],
}

/// Name to value mapping of a symbol table.
///
/// Kconfig options show up in here as `CONFIG_*` pseudo-symbols whose value
/// is the option's value.
#[derive(Debug, Default, Clone)]
pub struct Symbols<'a>(HashMap<&'a str, u64>);

impl Symbols<'_> {
	pub fn get(&self, name: &str) -> Option<u64> {
		self.0.get(name).copied()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	/// Like [`Self::get`], but a missing symbol is an error.
	pub fn require(&self, name: &str) -> Result<u64> {
		self.get(name)
			.ok_or_else(|| Error::MissingSymbol(name.to_string()))
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl<'a> FromIterator<(&'a str, u64)> for Symbols<'a> {
	fn from_iter<T: IntoIterator<Item = (&'a str, u64)>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}

/// A parsed kernel image.
pub struct Kernel<'a> {
	bytes: &'a [u8],
	elf: Elf<'a>,
}

impl<'a> Kernel<'a> {
	/// Parses `bytes` as an ELF image.
	///
	/// Only little-endian images are accepted: every structure the generators
	/// read or write is an x86 one.
	pub fn parse(bytes: &'a [u8]) -> Result<Self> {
		let elf = Elf::parse(bytes)?;
		if !elf.little_endian {
			return Err(Error::MalformedImage(
				"big-endian images are not supported".to_string(),
			));
		}

		debug!(
			"kernel image: ELF{}, {} sections, {} symbols",
			if elf.is_64 { 64 } else { 32 },
			elf.section_headers.len(),
			elf.syms.len()
		);

		Ok(Self { bytes, elf })
	}

	pub fn is_64(&self) -> bool {
		self.elf.is_64
	}

	fn has_symbol_table(&self) -> bool {
		self.elf
			.section_headers
			.iter()
			.any(|shdr| shdr.sh_type == SHT_SYMTAB)
	}

	/// Iterates over all named entries of the symbol table.
	pub fn iter_symbols(&self) -> impl Iterator<Item = Symbol<'a>> + '_ {
		self.elf.syms.iter().filter_map(|sym| {
			let name = self.elf.strtab.get_at(sym.st_name)?;
			(!name.is_empty()).then_some(Symbol {
				name,
				value: sym.st_value,
				size: sym.st_size,
				section_index: sym.st_shndx,
			})
		})
	}

	/// Builds the name to value mapping of the symbol table.
	///
	/// When a name appears more than once, the last entry wins.
	pub fn symbols(&self) -> Result<Symbols<'a>> {
		if !self.has_symbol_table() {
			return Err(Error::MissingSymbolTable);
		}

		Ok(self
			.iter_symbols()
			.map(|sym| (sym.name, sym.value))
			.collect())
	}

	/// Looks up the full symbol table entry for `name`.
	pub fn symbol_full(&self, name: &str) -> Result<Symbol<'a>> {
		if !self.has_symbol_table() {
			return Err(Error::MissingSymbolTable);
		}

		self.iter_symbols()
			.filter(|sym| sym.name == name)
			.last()
			.ok_or_else(|| Error::MissingSymbol(name.to_string()))
	}

	/// Looks up a section by name.
	pub fn section_by_name(&self, name: &str) -> Result<Section<'a>> {
		let (shdr, found) = self
			.elf
			.section_headers
			.iter()
			.find_map(|shdr| {
				let found = self.elf.shdr_strtab.get_at(shdr.sh_name)?;
				(found == name).then_some((shdr, found))
			})
			.ok_or_else(|| Error::MissingSection(name.to_string()))?;

		let data = if shdr.sh_type == SHT_NOBITS {
			&[][..]
		} else {
			let start = usize::try_from(shdr.sh_offset).ok();
			let len = usize::try_from(shdr.sh_size).ok();
			start
				.zip(len)
				.and_then(|(start, len)| self.bytes.get(start..start.checked_add(len)?))
				.ok_or_else(|| {
					Error::MalformedImage(format!("section `{name}` extends past end of file"))
				})?
		};

		Ok(Section {
			name: found,
			addr: shdr.sh_addr,
			size: shdr.sh_size,
			offset: shdr.sh_offset,
			data,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn symbols_require() {
		let symbols: Symbols<'_> = [("_gdt", 0x1000), ("CONFIG_USERSPACE", 1)]
			.into_iter()
			.collect();

		assert_eq!(symbols.require("_gdt").unwrap(), 0x1000);
		assert!(symbols.contains("CONFIG_USERSPACE"));
		assert!(matches!(
			symbols.require("_main_tss"),
			Err(Error::MissingSymbol(name)) if name == "_main_tss"
		));
	}

	#[test]
	fn section_offset() {
		let section = Section {
			name: ".x86shadowstack.arr",
			addr: 0x10_0000,
			size: 0x400,
			offset: 0x2000,
			data: &[],
		};
		let sym = |value| Symbol {
			name: "__t_shstk_arr",
			value,
			size: 0x200,
			section_index: 1,
		};

		assert_eq!(sym(0x10_0200).section_offset(&section), Some(0x200));
		assert_eq!(sym(0xf_ffff).section_offset(&section), None);
		assert_eq!(sym(0x10_0401).section_offset(&section), None);
	}

	#[test]
	fn rejects_garbage() {
		assert!(Kernel::parse(b"not an elf file").is_err());
	}
}
