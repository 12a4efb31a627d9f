//! Interrupt Descriptor Table generation.
//!
//! The kernel declares its interrupt routing requests in the `intList`
//! section. Those are assigned to IDT vectors in three passes:
//!
//! 1. entries naming a vector are placed there,
//! 2. entries naming only a priority level get the lowest free vector of
//!    that level's 16-vector window,
//! 3. every vector still empty gets one of the two spurious handlers.
//!
//! Besides the IDT itself, this produces the IRQ line to vector map and a
//! bitmap of vectors that are free for installing handlers at runtime.

use endian_num::{le16, le32};
use log::debug;
use zerocopy::{AsBytes, Ref};

use crate::{Error, Result};

/// Name of the section carrying the routing requests.
pub const INTLIST_SECTION: &str = "intList";

/// Size of one gate in bytes.
pub const GATE_SIZE: usize = 8;

/// Exceptions that push an error code onto the stack.
pub const ERR_CODE_VECTORS: [usize; 7] = [8, 10, 11, 12, 13, 14, 17];

/// The architecture reserves vectors below this for exceptions.
pub const FIRST_IRQ_VECTOR: usize = 32;
/// Number of vectors in a priority level.
pub const VECTORS_PER_PRIORITY: usize = 16;

/// The IRQ map stores vectors in a byte.
pub const MAX_VECTORS: usize = 256;

const KERNEL_CODE_SEG: u16 = 0x08;

const GATE_PRESENT: u8 = 1 << 7;
const GATE_DPL_SHIFT: u8 = 5;
const GATE_TYPE_INTERRUPT_32: u8 = 0xE;
const GATE_TYPE_TASK: u8 = 0x5;

/// Leading part of the `intList` section.
#[derive(
	zerocopy_derive::FromZeroes,
	zerocopy_derive::FromBytes,
	zerocopy_derive::AsBytes
)]
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct IntListHeader {
	pub spurious_addr: le32,
	pub spurious_no_error_addr: le32,
}

/// One routing request as the kernel lays it out. All words but `isr` are
/// signed, with -1 meaning "unspecified".
#[derive(
	zerocopy_derive::FromZeroes,
	zerocopy_derive::FromBytes,
	zerocopy_derive::AsBytes
)]
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct IntListEntry {
	pub isr: le32,
	pub irq: le32,
	pub priority: le32,
	pub vector: le32,
	pub dpl: le32,
	pub tss: le32,
}

/// Architectural layout of a 32-bit IDT gate.
#[derive(
	zerocopy_derive::FromZeroes,
	zerocopy_derive::FromBytes,
	zerocopy_derive::AsBytes
)]
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct IdtGate {
	pub offset_low: le16,
	pub selector: le16,
	pub reserved: u8,
	pub type_attr: u8,
	pub offset_high: le16,
}

/// One interrupt routing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntSpec {
	/// Handler address, or 0 for a task gate.
	pub isr: u32,
	/// IRQ line, or -1 for exceptions and software interrupts.
	pub irq: i32,
	/// Priority level, or -1 if `vector` is given.
	pub priority: i32,
	/// Fixed vector, or -1 to pick one from the priority level.
	pub vector: i32,
	pub dpl: u8,
	/// TSS selector for task gates, 0 otherwise.
	pub tss: u16,
}

/// The decoded contents of the `intList` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntList {
	/// Spurious handler for exceptions that push an error code.
	pub spur_code: u32,
	/// Spurious handler for everything else.
	pub spur_nocode: u32,
	pub entries: Vec<IntSpec>,
}

impl IntList {
	/// Decodes the section contents. Images are always little-endian.
	pub fn parse(data: &[u8]) -> Result<Self> {
		let malformed =
			|reason: String| Error::MalformedImage(format!("{INTLIST_SECTION}: {reason}"));

		let (header, payload) = Ref::<_, IntListHeader>::new_from_prefix(data)
			.ok_or_else(|| malformed(format!("{} bytes is too short for the header", data.len())))?;
		let raw = Ref::<_, [IntListEntry]>::new_slice(payload).ok_or_else(|| {
			malformed(format!(
				"{} bytes of entries is not a multiple of {}",
				payload.len(),
				size_of::<IntListEntry>()
			))
		})?;

		let spur_code = header.spurious_addr.to_ne();
		let spur_nocode = header.spurious_no_error_addr.to_ne();
		debug!("spurious handlers: {spur_code:#x} {spur_nocode:#x}");

		let entries = raw
			.iter()
			.map(|entry| -> Result<IntSpec> {
				let dpl = entry.dpl.to_ne();
				let dpl = u8::try_from(dpl)
					.ok()
					.filter(|dpl| *dpl <= 3)
					.ok_or_else(|| malformed(format!("invalid DPL {}", dpl as i32)))?;
				let tss = entry.tss.to_ne();
				let tss = u16::try_from(tss)
					.map_err(|_| malformed(format!("invalid TSS selector {tss:#x}")))?;

				Ok(IntSpec {
					isr: entry.isr.to_ne(),
					irq: entry.irq.to_ne() as i32,
					priority: entry.priority.to_ne() as i32,
					vector: entry.vector.to_ne() as i32,
					dpl,
					tss,
				})
			})
			.collect::<Result<Vec<_>>>()?;

		debug!("Configured interrupt routing");
		debug!("handler    irq pri vec dpl");
		debug!("--------------------------");
		for entry in &entries {
			debug!(
				"{:<10} {:<3} {:<3} {:<3} {:<2}",
				format!("{:#x}", entry.isr),
				entry.irq,
				entry.priority,
				entry.vector,
				entry.dpl
			);
		}

		Ok(Self {
			spur_code,
			spur_nocode,
			entries,
		})
	}
}

/// What a populated IDT vector points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vector {
	pub handler: u32,
	pub tss: u16,
	pub dpl: u8,
}

impl Vector {
	/// Composes the vector as an interrupt gate or a task gate.
	fn encode(&self, index: usize) -> Result<IdtGate> {
		let type_attr = |gate_type: u8| gate_type | (self.dpl << GATE_DPL_SHIFT) | GATE_PRESENT;

		match (self.handler, self.tss) {
			(0, 0) => Err(Error::MalformedGateEntry {
				vector: index,
				reason: "entry does not specify either handler or TSS",
			}),
			(handler, 0) => Ok(IdtGate {
				offset_low: le16::from_ne((handler & 0xFFFF) as u16),
				selector: le16::from_ne(KERNEL_CODE_SEG),
				reserved: 0,
				type_attr: type_attr(GATE_TYPE_INTERRUPT_32),
				offset_high: le16::from_ne((handler >> 16) as u16),
			}),
			(0, tss) => Ok(IdtGate {
				offset_low: le16::from_ne(0),
				selector: le16::from_ne(tss),
				reserved: 0,
				type_attr: type_attr(GATE_TYPE_TASK),
				offset_high: le16::from_ne(0),
			}),
			_ => Err(Error::MalformedGateEntry {
				vector: index,
				reason: "entry specifies both handler function and TSS",
			}),
		}
	}
}

/// A fully allocated IDT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Idt {
	spur_code: u32,
	spur_nocode: u32,
	vectors: Vec<Vector>,
	irq_map: Vec<u8>,
}

/// Allocation state while the passes run.
struct Allocator {
	vectors: Vec<Option<Vector>>,
	irq_map: Vec<u8>,
}

impl Allocator {
	fn new(max_vec: usize, max_irq: usize) -> Self {
		Self {
			vectors: vec![None; max_vec],
			irq_map: vec![0; max_irq],
		}
	}

	fn assign(&mut self, vector: usize, spec: &IntSpec) -> Result<()> {
		self.vectors[vector] = Some(Vector {
			handler: spec.isr,
			tss: spec.tss,
			dpl: spec.dpl,
		});
		self.map_irq(spec.irq, vector)
	}

	fn map_irq(&mut self, irq: i32, vector: usize) -> Result<()> {
		// Exception or software interrupt
		if irq == -1 {
			return Ok(());
		}

		let max_irq = self.irq_map.len();
		let slot = usize::try_from(irq)
			.ok()
			.filter(|irq| *irq < max_irq)
			.ok_or(Error::IrqOutOfRange {
				irq: irq as u32,
				max_irq: max_irq as u32,
			})?;

		// Vectors below 32 are exceptions, so 0 can mean "unassigned"
		if self.irq_map[slot] != 0 {
			return Err(Error::IrqConflict(slot as u32));
		}

		debug!("assign IRQ {irq} to vector {vector}");
		self.irq_map[slot] = vector as u8;
		Ok(())
	}

	/// Pass 1: entries with a fixed vector.
	fn place_fixed(&mut self, entries: &[IntSpec]) -> Result<()> {
		for spec in entries {
			if spec.vector == -1 {
				if spec.priority < 0 {
					return Err(Error::UnderspecifiedEntry { handler: spec.isr });
				}
				continue;
			}

			let max_vec = self.vectors.len();
			let vector = usize::try_from(spec.vector)
				.ok()
				.filter(|vector| *vector < max_vec)
				.ok_or(Error::VectorOutOfRange {
					vector: spec.vector as u32,
					max_vec: max_vec as u32,
				})?;

			if self.vectors[vector].is_some() {
				return Err(Error::VectorConflict(vector as u32));
			}

			self.assign(vector, spec)?;
		}

		Ok(())
	}

	/// Pass 2: entries with a priority level.
	fn place_prioritized(&mut self, entries: &[IntSpec]) -> Result<()> {
		for spec in entries.iter().filter(|spec| spec.vector == -1) {
			let vector = priority_range(spec.priority)
				.take_while(|vector| *vector < self.vectors.len())
				.find(|vector| self.vectors[*vector].is_none())
				.ok_or(Error::NoFreeVector(spec.priority))?;

			self.assign(vector, spec)?;
		}

		Ok(())
	}

	/// Pass 3: spurious handlers everywhere else.
	fn fill_spurious(self, spur_code: u32, spur_nocode: u32) -> Idt {
		let vectors = self
			.vectors
			.into_iter()
			.enumerate()
			.map(|(i, vector)| {
				vector.unwrap_or_else(|| {
					let handler = if ERR_CODE_VECTORS.contains(&i) {
						spur_code
					} else {
						spur_nocode
					};
					Vector {
						handler,
						tss: 0,
						dpl: 0,
					}
				})
			})
			.collect();

		Idt {
			spur_code,
			spur_nocode,
			vectors,
			irq_map: self.irq_map,
		}
	}
}

/// The vectors making up priority level `priority`.
///
/// `priority` has been checked to be non-negative by the time this is used.
fn priority_range(priority: i32) -> std::ops::Range<usize> {
	let base = FIRST_IRQ_VECTOR + VECTORS_PER_PRIORITY * priority.max(0) as usize;
	base..base + VECTORS_PER_PRIORITY
}

impl Idt {
	/// Assigns every `intList` entry a vector in an IDT of `max_vec` vectors
	/// serving `max_irq` IRQ lines.
	pub fn allocate(intlist: &IntList, max_vec: usize, max_irq: usize) -> Result<Self> {
		if max_vec > MAX_VECTORS {
			return Err(Error::InvalidConfig {
				name: "CONFIG_IDT_NUM_VECTORS".to_string(),
				value: max_vec.to_string(),
			});
		}

		let mut allocator = Allocator::new(max_vec, max_irq);
		allocator.place_fixed(&intlist.entries)?;
		allocator.place_prioritized(&intlist.entries)?;
		Ok(allocator.fill_spurious(intlist.spur_code, intlist.spur_nocode))
	}

	pub fn vectors(&self) -> &[Vector] {
		&self.vectors
	}

	/// The vector assigned to each IRQ line, 0 for unassigned lines.
	pub fn irq_map(&self) -> &[u8] {
		&self.irq_map
	}

	/// Lays out all vectors as IDT gates.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		let gates = self
			.vectors
			.iter()
			.enumerate()
			.map(|(i, vector)| vector.encode(i))
			.collect::<Result<Vec<_>>>()?;
		Ok(gates.as_bytes().to_vec())
	}

	pub fn irq_map_bytes(&self) -> Vec<u8> {
		self.irq_map.clone()
	}

	/// Whether a vector only holds a spurious handler and may be claimed at
	/// runtime.
	pub fn is_free(&self, vector: usize) -> bool {
		self.vectors
			.get(vector)
			.is_some_and(|v| v.handler == self.spur_code || v.handler == self.spur_nocode)
	}

	/// Bitmap with bit `i % 8` of byte `i / 8` set iff vector `i` is free.
	pub fn free_vector_bitmap(&self) -> Vec<u8> {
		let mut bitmap = vec![0u8; self.vectors.len().div_ceil(8)];
		for i in (0..self.vectors.len()).filter(|i| self.is_free(*i)) {
			bitmap[i / 8] |= 1 << (i % 8);
		}
		bitmap
	}
}
