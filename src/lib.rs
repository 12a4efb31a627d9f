//! Build-time generators for x86 boot tables.
//!
//! These read a partially linked kernel image and produce the tables that
//! the final link embeds at well-known symbols:
//!
//! - [`gdt`]: the Global Descriptor Table,
//! - [`idt`]: the Interrupt Descriptor Table, the IRQ to vector map and the
//!   free vector bitmap,
//! - [`shstk`]: CET shadow stack tokens and the IRQ shadow substack size.
//!
//! All emitted structures are little-endian regardless of the host.

pub mod arch;
pub mod cli;
pub mod elf;
mod error;
pub mod gdt;
pub mod idt;
pub mod kconfig;
pub mod shstk;

pub use error::{Error, Result};
