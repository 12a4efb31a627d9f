//! Parsing of Kconfig `.config` files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// The assignments of a `.config` file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DotConfig {
	values: HashMap<String, String>,
}

impl DotConfig {
	pub fn read(path: impl AsRef<Path>) -> Result<Self> {
		Ok(Self::parse(&fs::read_to_string(path)?))
	}

	/// Parses `CONFIG_NAME=value` lines.
	///
	/// Comments, including `# CONFIG_NAME is not set`, and blank lines are
	/// skipped. String values lose their surrounding quotes.
	pub fn parse(text: &str) -> Self {
		let values = text
			.lines()
			.map(str::trim)
			.filter(|line| !line.is_empty() && !line.starts_with('#'))
			.filter_map(|line| line.split_once('='))
			.map(|(name, value)| {
				let value = value.trim();
				let value = value
					.strip_prefix('"')
					.and_then(|value| value.strip_suffix('"'))
					.unwrap_or(value);
				(name.trim().to_string(), value.to_string())
			})
			.collect();

		Self { values }
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.values.get(name).map(String::as_str)
	}

	/// Looks up an `int` or `hex` option.
	pub fn int(&self, name: &str) -> Result<u64> {
		let value = self
			.get(name)
			.ok_or_else(|| Error::MissingConfig(name.to_string()))?;

		parse_int(value).ok_or_else(|| Error::InvalidConfig {
			name: name.to_string(),
			value: value.to_string(),
		})
	}
}

fn parse_int(value: &str) -> Option<u64> {
	match value
		.strip_prefix("0x")
		.or_else(|| value.strip_prefix("0X"))
	{
		Some(hex) => u64::from_str_radix(hex, 16).ok(),
		None => value.parse().ok(),
	}
}
