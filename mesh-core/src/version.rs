use std::fmt;

/// Build information for this binary, sourced from Cargo at compile time.
#[derive(Debug, Clone)]
pub struct BuildInfo {
	pub version: &'static str,
	pub rust_version: &'static str,
	pub target: &'static str,
}

impl BuildInfo {
	pub fn new() -> Self {
		BuildInfo {
			version: env!("CARGO_PKG_VERSION"),
			rust_version: option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
			target: option_env!("TARGET").unwrap_or("unknown"),
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for BuildInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"version.{} rustc.{} target.{}",
			self.version, self.rust_version, self.target
		)
	}
}
