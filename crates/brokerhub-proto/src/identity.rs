//! Service identity: a name plus an optional three-part version.

use std::fmt;
use std::sync::Arc;

/// A three-part version number (major, minor, patch).
///
/// Ordered structurally; equality is field-wise, matching §3's
/// "structural over version" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
	/// Major component.
	pub major: u32,
	/// Minor component.
	pub minor: u32,
	/// Patch component.
	pub patch: u32,
}

impl Version {
	/// Builds a version from its three components.
	#[must_use]
	pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
		Self { major, minor, patch }
	}
}

impl fmt::Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
	}
}

/// Identifies one version of a service contract.
///
/// `name` is compared case-sensitively; `version` is `None` for a
/// *versionless* identity, which is the only identity shape eligible for the
/// fallback resolution rule in §4.1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
	name: Arc<str>,
	version: Option<Version>,
}

impl Identity {
	/// Creates an identity for a specific version.
	#[must_use]
	pub fn versioned(name: impl Into<Arc<str>>, version: Version) -> Self {
		Self {
			name: name.into(),
			version: Some(version),
		}
	}

	/// Creates a versionless identity, which answers requests for any
	/// version of the same name via fallback (§4.1).
	#[must_use]
	pub fn versionless(name: impl Into<Arc<str>>) -> Self {
		Self {
			name: name.into(),
			version: None,
		}
	}

	/// The service name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The requested version, if any.
	#[must_use]
	pub fn version(&self) -> Option<Version> {
		self.version
	}

	/// True if this identity carries no version.
	#[must_use]
	pub fn is_versionless(&self) -> bool {
		self.version.is_none()
	}

	/// The versionless identity sharing this identity's name.
	#[must_use]
	pub fn to_versionless(&self) -> Self {
		Self {
			name: self.name.clone(),
			version: None,
		}
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.version {
			Some(v) => write!(f, "{}/{}", self.name, v),
			None => write!(f, "{}", self.name),
		}
	}
}
