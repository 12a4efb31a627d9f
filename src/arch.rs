use clap::ValueEnum;

/// Target architecture of the kernel image.
#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
#[value(rename_all = "snake_case")]
pub enum Arch {
	/// IA-32
	X86,
	/// x86-64
	X86_64,
}

impl Arch {
	/// Picks the architecture matching the ELF class of an image.
	pub fn from_elf_class(is_64: bool) -> Self {
		if is_64 { Self::X86_64 } else { Self::X86 }
	}

	pub fn name(&self) -> &'static str {
		match self {
			Self::X86 => "x86",
			Self::X86_64 => "x86_64",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn value_names() {
		assert_eq!(Arch::from_str("x86", false), Ok(Arch::X86));
		assert_eq!(Arch::from_str("x86_64", false), Ok(Arch::X86_64));
		assert_eq!(Arch::from_elf_class(true).name(), "x86_64");
		assert_eq!(Arch::from_elf_class(false).name(), "x86");
	}
}
