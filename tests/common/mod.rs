//! Synthetic kernel images for driving the generators.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use anyhow::Result;
use xshell::{Shell, TempDir};

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHF_WRITE_ALLOC: u64 = 0x3;
const SHN_ABS: u16 = 0xfff1;
const STB_GLOBAL_STT_OBJECT: u8 = 0x11;

struct Section {
	name: String,
	addr: u64,
	data: Vec<u8>,
}

struct Symbol {
	name: String,
	value: u64,
	size: u64,
}

/// Writes minimal relocatable-free ELF images with sections and symbols.
pub struct ElfBuilder {
	is_64: bool,
	sections: Vec<Section>,
	symbols: Vec<Symbol>,
}

/// Byte sink honouring the ELF class for address-sized fields.
struct Writer {
	is_64: bool,
	buf: Vec<u8>,
}

impl Writer {
	fn u8(&mut self, value: u8) {
		self.buf.push(value);
	}

	fn u16(&mut self, value: u16) {
		self.buf.extend_from_slice(&value.to_le_bytes());
	}

	fn u32(&mut self, value: u32) {
		self.buf.extend_from_slice(&value.to_le_bytes());
	}

	fn u64(&mut self, value: u64) {
		self.buf.extend_from_slice(&value.to_le_bytes());
	}

	/// An `Elf32_Addr`/`Elf32_Off`/`Elf32_Word` or its 64-bit counterpart.
	fn addr(&mut self, value: u64) {
		if self.is_64 {
			self.u64(value);
		} else {
			self.u32(value as u32);
		}
	}

	fn align(&mut self, align: usize) {
		while self.buf.len() % align != 0 {
			self.buf.push(0);
		}
	}
}

#[derive(Default)]
struct Shdr {
	name: u32,
	sh_type: u32,
	flags: u64,
	addr: u64,
	offset: u64,
	size: u64,
	link: u32,
	info: u32,
	entsize: u64,
}

impl Shdr {
	fn write(&self, out: &mut Writer) {
		out.u32(self.name);
		out.u32(self.sh_type);
		out.addr(self.flags);
		out.addr(self.addr);
		out.addr(self.offset);
		out.addr(self.size);
		out.u32(self.link);
		out.u32(self.info);
		out.addr(if self.sh_type == SHT_SYMTAB { 8 } else { 1 });
		out.addr(self.entsize);
	}
}

struct Strtab(Vec<u8>);

impl Strtab {
	fn new() -> Self {
		Self(vec![0])
	}

	fn add(&mut self, name: &str) -> u32 {
		let offset = self.0.len() as u32;
		self.0.extend_from_slice(name.as_bytes());
		self.0.push(0);
		offset
	}
}

impl ElfBuilder {
	pub fn elf32() -> Self {
		Self {
			is_64: false,
			sections: Vec::new(),
			symbols: Vec::new(),
		}
	}

	pub fn elf64() -> Self {
		Self {
			is_64: true,
			..Self::elf32()
		}
	}

	pub fn section(mut self, name: &str, addr: u64, data: Vec<u8>) -> Self {
		self.sections.push(Section {
			name: name.to_string(),
			addr,
			data,
		});
		self
	}

	pub fn symbol(mut self, name: &str, value: u64, size: u64) -> Self {
		self.symbols.push(Symbol {
			name: name.to_string(),
			value,
			size,
		});
		self
	}

	/// Adds a Kconfig pseudo-symbol.
	pub fn config(self, name: &str, value: u64) -> Self {
		self.symbol(name, value, 0)
	}

	fn section_index(&self, addr: u64) -> u16 {
		self.sections
			.iter()
			.position(|section| {
				section.addr <= addr && addr < section.addr + section.data.len() as u64
			})
			.map_or(SHN_ABS, |i| i as u16 + 1)
	}

	pub fn build(&self) -> Vec<u8> {
		let is_64 = self.is_64;
		let (ehsize, shentsize, symentsize) = if is_64 { (64, 64, 24) } else { (52, 40, 16) };

		let mut out = Writer {
			is_64,
			buf: vec![0; ehsize],
		};

		// Section contents
		let mut offsets = Vec::new();
		for section in &self.sections {
			out.align(8);
			offsets.push(out.buf.len() as u64);
			out.buf.extend_from_slice(&section.data);
		}

		// Symbol table
		let mut strtab = Strtab::new();
		let mut symtab = Writer {
			is_64,
			buf: vec![0; symentsize],
		};
		for symbol in &self.symbols {
			let name = strtab.add(&symbol.name);
			let shndx = self.section_index(symbol.value);
			if is_64 {
				symtab.u32(name);
				symtab.u8(STB_GLOBAL_STT_OBJECT);
				symtab.u8(0);
				symtab.u16(shndx);
				symtab.u64(symbol.value);
				symtab.u64(symbol.size);
			} else {
				symtab.u32(name);
				symtab.u32(symbol.value as u32);
				symtab.u32(symbol.size as u32);
				symtab.u8(STB_GLOBAL_STT_OBJECT);
				symtab.u8(0);
				symtab.u16(shndx);
			}
		}
		out.align(8);
		let symtab_offset = out.buf.len() as u64;
		out.buf.extend_from_slice(&symtab.buf);

		let strtab_offset = out.buf.len() as u64;
		out.buf.extend_from_slice(&strtab.0);

		let mut shstrtab = Strtab::new();
		let names = self
			.sections
			.iter()
			.map(|section| shstrtab.add(&section.name))
			.collect::<Vec<_>>();
		let symtab_name = shstrtab.add(".symtab");
		let strtab_name = shstrtab.add(".strtab");
		let shstrtab_name = shstrtab.add(".shstrtab");
		let shstrtab_offset = out.buf.len() as u64;
		out.buf.extend_from_slice(&shstrtab.0);

		// Section header table
		out.align(8);
		let shoff = out.buf.len() as u64;
		let symtab_index = self.sections.len() as u32 + 1;
		Shdr::default().write(&mut out);
		for ((section, name), offset) in self.sections.iter().zip(&names).zip(&offsets) {
			Shdr {
				name: *name,
				sh_type: SHT_PROGBITS,
				flags: SHF_WRITE_ALLOC,
				addr: section.addr,
				offset: *offset,
				size: section.data.len() as u64,
				..Shdr::default()
			}
			.write(&mut out);
		}
		Shdr {
			name: symtab_name,
			sh_type: SHT_SYMTAB,
			offset: symtab_offset,
			size: symtab.buf.len() as u64,
			link: symtab_index + 1,
			info: 1,
			entsize: symentsize as u64,
			..Shdr::default()
		}
		.write(&mut out);
		Shdr {
			name: strtab_name,
			sh_type: SHT_STRTAB,
			offset: strtab_offset,
			size: strtab.0.len() as u64,
			..Shdr::default()
		}
		.write(&mut out);
		Shdr {
			name: shstrtab_name,
			sh_type: SHT_STRTAB,
			offset: shstrtab_offset,
			size: shstrtab.0.len() as u64,
			..Shdr::default()
		}
		.write(&mut out);
		let shnum = self.sections.len() as u16 + 4;

		// ELF header
		let mut header = Writer {
			is_64,
			buf: Vec::new(),
		};
		header.buf.extend_from_slice(b"\x7fELF");
		header.u8(if is_64 { 2 } else { 1 });
		header.u8(1); // little-endian
		header.u8(1); // EV_CURRENT
		header.buf.resize(16, 0);
		header.u16(2); // ET_EXEC
		header.u16(if is_64 { 62 } else { 3 });
		header.u32(1);
		header.addr(0); // e_entry
		header.addr(0); // e_phoff
		header.addr(shoff);
		header.u32(0);
		header.u16(ehsize as u16);
		header.u16(if is_64 { 56 } else { 32 });
		header.u16(0);
		header.u16(shentsize);
		header.u16(shnum);
		header.u16(shnum - 1);
		assert_eq!(header.buf.len(), ehsize);
		out.buf[..ehsize].copy_from_slice(&header.buf);

		out.buf
	}

	/// File offset at which the contents of section `name` start.
	pub fn section_offset(&self, name: &str) -> usize {
		let ehsize: usize = if self.is_64 { 64 } else { 52 };
		let mut offset = ehsize;
		for section in &self.sections {
			offset = offset.next_multiple_of(8);
			if section.name == name {
				return offset;
			}
			offset += section.data.len();
		}
		panic!("no section {name} in image");
	}
}

/// A scratch directory with a kernel image in it.
pub struct Workspace {
	pub sh: Shell,
	pub dir: TempDir,
}

impl Workspace {
	pub fn new() -> Result<Self> {
		let sh = Shell::new()?;
		let dir = sh.create_temp_dir()?;
		sh.change_dir(dir.path());
		Ok(Self { sh, dir })
	}

	pub fn path(&self, name: &str) -> PathBuf {
		self.dir.path().join(name)
	}

	pub fn write_kernel(&self, image: &ElfBuilder) -> Result<PathBuf> {
		let path = self.path("zephyr_pre.elf");
		self.sh.write_file(&path, image.build())?;
		Ok(path)
	}

	pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
		Ok(self.sh.read_binary_file(path)?)
	}
}

pub fn u32_at(buf: &[u8], offset: usize) -> u32 {
	u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

pub fn u64_at(buf: &[u8], offset: usize) -> u64 {
	u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}
