//! Fault injection / chaos policy (C7, §4.7): loads the JSON policy of
//! `brokerhub_proto::chaos` and answers the lookup engine's per-identity
//! availability decision.

use std::path::Path;

use brokerhub_proto::chaos::{ChaosAvailability, ChaosFile};
use brokerhub_proto::Identity;
use rustc_hash::FxHashMap;

use crate::error::ChaosLoadError;
use crate::registration::RegistrationTable;

/// The decision the lookup engine applies for one identity (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaosDecision {
	/// No-op.
	Allow,
	/// Deny regardless of path.
	DenyAll,
	/// Deny only when the winning entry would be a remote source.
	DenyRemote,
	/// Deny only when the request entered through the remote IPC facade.
	DenyFromRemote,
}

/// An immutable, installable chaos policy snapshot.
///
/// Keyed by the identity's rendered `name` or `name/major.minor.patch`
/// form, matching the JSON schema's keys. A versioned identity with no
/// exact-version entry falls back to a bare `name` entry, mirroring the
/// versionless-fallback rule the rest of the system applies to
/// registrations (§4.1) — a chaos author blocking a whole service by name
/// should not have to enumerate every version.
#[derive(Debug, Clone, Default)]
pub struct ChaosPolicy {
	entries: FxHashMap<String, ChaosAvailability>,
}

impl ChaosPolicy {
	/// The policy that denies nothing (the default when no file is loaded).
	#[must_use]
	pub fn empty() -> Self {
		Self::default()
	}

	/// Builds a policy from a parsed chaos file, warning (not failing) for
	/// any identity absent from `registrations` (§4.7 "otherwise ignored").
	#[must_use]
	pub fn from_file(file: ChaosFile, registrations: &RegistrationTable) -> Self {
		let mut entries = FxHashMap::default();
		for (key, entry) in file.brokered_services {
			if !key_is_registered(&key, registrations) {
				tracing::warn!(identity = %key, "chaos policy entry for unregistered identity");
			}
			entries.insert(key, entry.availability);
		}
		Self { entries }
	}

	/// Reads and parses `path` as a chaos policy file (§6 JSON schema).
	pub fn load(path: &Path, registrations: &RegistrationTable) -> Result<Self, ChaosLoadError> {
		let text = std::fs::read_to_string(path)?;
		let file: ChaosFile = serde_json::from_str(&text)?;
		Ok(Self::from_file(file, registrations))
	}

	/// The decision for `identity`, defaulting to [`ChaosDecision::Allow`]
	/// when unconfigured.
	#[must_use]
	pub fn decision_for(&self, identity: &Identity) -> ChaosDecision {
		let exact = identity.to_string();
		if let Some(entry) = self.entries.get(&exact) {
			return to_decision(*entry);
		}
		if identity.version().is_some() {
			if let Some(entry) = self.entries.get(identity.name()) {
				return to_decision(*entry);
			}
		}
		ChaosDecision::Allow
	}
}

fn key_is_registered(key: &str, registrations: &RegistrationTable) -> bool {
	let identity = match key.split_once('/') {
		Some((name, version)) => match parse_version(version) {
			Some(v) => Identity::versioned(name, v),
			None => return false,
		},
		None => Identity::versionless(key),
	};
	registrations.get(&identity).is_some()
}

fn parse_version(s: &str) -> Option<brokerhub_proto::Version> {
	let mut parts = s.split('.');
	let major = parts.next()?.parse().ok()?;
	let minor = parts.next()?.parse().ok()?;
	let patch = parts.next()?.parse().ok()?;
	Some(brokerhub_proto::Version::new(major, minor, patch))
}

fn to_decision(availability: ChaosAvailability) -> ChaosDecision {
	match availability {
		ChaosAvailability::AllowAll => ChaosDecision::Allow,
		ChaosAvailability::DenyAll => ChaosDecision::DenyAll,
		ChaosAvailability::DenyRemote => ChaosDecision::DenyRemote,
		ChaosAvailability::DenyFromRemote => ChaosDecision::DenyFromRemote,
	}
}
