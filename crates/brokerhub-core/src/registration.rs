//! Registration table (C1): identity metadata, immutable after insertion.

use std::sync::Arc;

use brokerhub_proto::{Audience, Identity};
use rustc_hash::FxHashMap;

/// A unique handle to the host process/package that registered a service,
/// used for the "proffering package" diagnostics field and host-activation
/// dedup (§3 `loaded_hosts`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub u64);

/// Everything recorded about a service identity at registration time.
///
/// Immutable after insertion (§3): re-registering the same identity is
/// ignored with a warning rather than replacing the existing record.
#[derive(Debug, Clone)]
pub struct Registration {
	/// Which consumer audiences this service is exposed to.
	pub audience: Audience,
	/// The host that registered this identity, if any.
	pub proffering_host_id: Option<HostId>,
	/// Whether guest clients may use this service without an ownership check.
	pub allow_guest_clients: bool,
	/// Additional interface names this service also answers to (diagnostics only).
	pub extra_interface_names: Vec<String>,
}

impl Registration {
	/// `audience ∩ {Process, SameMachine} ≠ ∅`.
	#[must_use]
	pub fn is_exposed_locally(&self) -> bool {
		self.audience
			.intersects(Audience::PROCESS | Audience::SAME_MACHINE)
	}

	/// `audience ∩ {TrustedExclusiveClient, TrustedExclusiveServer, LiveShareGuest} ≠ ∅`.
	#[must_use]
	pub fn is_exposed_remotely(&self) -> bool {
		self.audience.intersects(
			Audience::TRUSTED_EXCLUSIVE_CLIENT
				| Audience::TRUSTED_EXCLUSIVE_SERVER
				| Audience::LIVE_SHARE_GUEST,
		)
	}

	/// `consumer ⊆ self.audience`.
	#[must_use]
	pub fn is_exposed_to(&self, consumer: Audience) -> bool {
		consumer.is_exposed_to(self.audience)
	}
}

/// The `registered` table from §3: `map<Identity → Registration>`.
#[derive(Debug, Default, Clone)]
pub struct RegistrationTable {
	entries: FxHashMap<Identity, Arc<Registration>>,
}

impl RegistrationTable {
	/// An empty table.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `identity`. If already present, the call is ignored (the
	/// caller is expected to log a warning); returns `false` in that case.
	pub fn register(&mut self, identity: Identity, registration: Registration) -> bool {
		if self.entries.contains_key(&identity) {
			return false;
		}
		self.entries.insert(identity, Arc::new(registration));
		true
	}

	/// Removes a registration. Unregistering is supported but, per §3, is
	/// "not load-bearing" — most callers never use it.
	pub fn unregister(&mut self, identity: &Identity) -> bool {
		self.entries.remove(identity).is_some()
	}

	/// Direct lookup, with no fallback.
	#[must_use]
	pub fn get(&self, identity: &Identity) -> Option<Arc<Registration>> {
		self.entries.get(identity).cloned()
	}

	/// Versionless fallback (§4.1): resolve `identity` directly; if absent
	/// and `identity` carries a version, fall back to the registration for
	/// the versionless identity of the same name. Returns the *matching*
	/// identity (which may differ from the input) alongside its registration.
	#[must_use]
	pub fn resolve(&self, identity: &Identity) -> Option<(Identity, Arc<Registration>)> {
		if let Some(reg) = self.get(identity) {
			return Some((identity.clone(), reg));
		}
		if identity.version().is_some() {
			let versionless = identity.to_versionless();
			if let Some(reg) = self.get(&versionless) {
				return Some((versionless, reg));
			}
		}
		None
	}

	/// Iterates all registered identities and their registrations.
	pub fn iter(&self) -> impl Iterator<Item = (&Identity, &Arc<Registration>)> {
		self.entries.iter()
	}
}
