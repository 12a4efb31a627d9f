//! Intel CET shadow stacks.
//!
//! Shadow stacks are preallocated by the linker in `.x86shadowstack.arr`;
//! [`patch`] seeds the top of each one so the kernel can switch to it, and
//! [`header`] sizes the per-nesting-level IRQ shadow stacks.

pub mod header;
pub mod patch;
