//! Generation of the IRQ shadow substack size header.

use log::debug;

use crate::kconfig::DotConfig;
use crate::{Error, Result};

const DEFINE: &str = "X86_CET_IRQ_SHADOW_SUBSTACK_SIZE";
const GUARD: &str = "ZEPHYR_INCLUDE_ARCH_X86_CET_SHADOW_STACK_H_";

/// The Kconfig options the substack size is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstackConfig {
	pub isr_depth: u64,
	pub isr_stack_size: u64,
	pub alignment: u64,
	/// Shadow stack size as a percentage of the ISR stack size.
	pub percentage: u64,
	pub min_size: u64,
}

impl SubstackConfig {
	pub fn from_dot_config(config: &DotConfig) -> Result<Self> {
		Ok(Self {
			isr_depth: config.int("CONFIG_ISR_DEPTH")?,
			isr_stack_size: config.int("CONFIG_ISR_STACK_SIZE")?,
			alignment: config.int("CONFIG_X86_CET_SHADOW_STACK_ALIGNMENT")?,
			percentage: config.int("CONFIG_HW_SHADOW_STACK_PERCENTAGE_SIZE")?,
			min_size: config.int("CONFIG_HW_SHADOW_STACK_MIN_SIZE")?,
		})
	}

	/// Size of the shadow stack used by one interrupt nesting level.
	pub fn substack_size(&self) -> Result<u64> {
		let invalid = |name: &str, value: u64| Error::InvalidConfig {
			name: name.to_string(),
			value: value.to_string(),
		};
		let nonzero = |name: &str, value: u64| {
			if value == 0 {
				Err(invalid(name, value))
			} else {
				Ok(value)
			}
		};
		let alignment = nonzero("CONFIG_X86_CET_SHADOW_STACK_ALIGNMENT", self.alignment)?;
		let isr_depth = nonzero("CONFIG_ISR_DEPTH", self.isr_depth)?;

		let size = self
			.isr_stack_size
			.checked_mul(self.percentage)
			.ok_or_else(|| invalid("CONFIG_ISR_STACK_SIZE", self.isr_stack_size))?
			/ 100;
		let size = size
			.checked_next_multiple_of(alignment)
			.ok_or_else(|| invalid("CONFIG_X86_CET_SHADOW_STACK_ALIGNMENT", alignment))?;
		let size = size.max(self.min_size);
		let size = size / isr_depth;

		debug!("IRQ shadow substack size: {size}");
		Ok(size)
	}
}

pub fn render(substack_size: u64) -> String {
	format!(
		"/* Generated by gen-shstk, do not edit */\n\
		 \n\
		 #ifndef {GUARD}\n\
		 #define {GUARD}\n\
		 \n\
		 #define {DEFINE} {substack_size}\n\
		 \n\
		 #endif /* {GUARD} */\n"
	)
}
