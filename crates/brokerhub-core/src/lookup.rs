//! Lookup & precedence engine (C4, §4.4): given an identity and a
//! consumer's audience, picks the single winning proffered entry or
//! explains precisely why none qualifies.

use std::sync::Arc;

use brokerhub_proto::{Audience, Identity, MissKind, Source};

use crate::chaos::{ChaosDecision, ChaosPolicy};
use crate::entry::ProfferedEntryOps;
use crate::index::ProfferIndexSnapshot;
use crate::registration::RegistrationTable;

/// The result of a lookup: either the single winning entry (with the
/// identity that actually matched, which may differ from the request via
/// versionless fallback) or a precise miss reason.
pub enum LookupResult {
	/// A proffered entry answers the request.
	Hit {
		/// The winning entry.
		entry: Arc<dyn ProfferedEntryOps>,
		/// The identity that matched in `registered` (§4.1).
		matched_identity: Identity,
	},
	/// No entry answers the request, for the given reason.
	Miss(MissKind),
}

/// Extra context the engine needs beyond the tables themselves (§4.4, §4.7).
#[derive(Debug, Clone, Copy)]
pub struct LookupContext {
	/// The requesting consumer's audience.
	pub consumer_audience: Audience,
	/// Whether this container is itself a client of an exclusive remote
	/// host (§3 "Exclusive remote host").
	pub is_client_of_exclusive_server: bool,
	/// Whether the request entered through the remote IPC facade rather
	/// than a direct `GetPipe`/`GetProxy` call (§4.7 `DenyFromRemote`).
	pub entered_via_remote_facade: bool,
}

/// Runs the §4.4 algorithm.
pub fn lookup(
	identity: &Identity,
	ctx: LookupContext,
	registrations: &RegistrationTable,
	index: &ProfferIndexSnapshot,
	chaos: &ChaosPolicy,
) -> LookupResult {
	// Step 1: versionless fallback resolution.
	let Some((match_identity, registration)) = registrations.resolve(identity) else {
		return LookupResult::Miss(MissKind::NotRegistered);
	};

	// Step 2 (early half): the two chaos decisions that don't depend on
	// which entry would win.
	let decision = chaos.decision_for(&match_identity);
	if decision == ChaosDecision::DenyAll {
		return LookupResult::Miss(MissKind::ChaosDenied);
	}
	if decision == ChaosDecision::DenyFromRemote && ctx.entered_via_remote_facade {
		return LookupResult::Miss(MissKind::ChaosDenied);
	}

	let result = resolve_precedence(&match_identity, &registration, ctx, index);

	// Step 2 (second half): `DenyRemote` depends on which source actually
	// won, so it is applied once the winner is known rather than before.
	if let LookupResult::Hit { ref entry, .. } = result
		&& decision == ChaosDecision::DenyRemote
		&& entry.source().is_remote_group()
	{
		return LookupResult::Miss(MissKind::ChaosDenied);
	}

	result
}

fn resolve_precedence(
	match_identity: &Identity,
	registration: &crate::registration::Registration,
	ctx: LookupContext,
	index: &ProfferIndexSnapshot,
) -> LookupResult {
	let consumer_is_local = ctx.consumer_audience.is_local();
	let exposed_to_consumer = registration.is_exposed_to(ctx.consumer_audience);

	// Steps 5 and 6 take priority over step 3's per-identity remote scan
	// whenever the registration is dual-exposed (locally *and* remotely):
	// a local consumer must never silently receive a local instance when a
	// remote host is expected to answer instead, regardless of whether that
	// remote host happens to have already proffered this exact identity
	// (§8 invariant 3; see DESIGN.md for why this runs ahead of step 3
	// rather than after it as the numbered list alone would suggest). Both
	// checks still require the registration to actually be exposed to this
	// consumer's audience (step 4) — a consumer the registration never
	// exposes to must get `AudienceMismatch`, not a hiding reason.
	if consumer_is_local && exposed_to_consumer {
		// Step 5: an exclusive remote host is expected to answer instead.
		if ctx.is_client_of_exclusive_server && registration.audience.contains(Audience::TRUSTED_EXCLUSIVE_CLIENT) {
			return LookupResult::Miss(MissKind::LocalHiddenOnRemoteClient);
		}

		// Step 6: any remote source present at all, with a registration
		// exposed both locally and remotely, hides the local proffer
		// unconditionally.
		if index.has_any_remote_source() && registration.is_exposed_locally() && registration.is_exposed_remotely() {
			return LookupResult::Miss(MissKind::LocalHiddenOnRemoteClient);
		}

		// Step 3: a registration that is *not* dual-exposed (i.e. reachable
		// from this process only through a remote source) is served
		// transparently through whichever remote source proffers it.
		for &source in Source::remote_preferred_order() {
			if let Some(entry) = index.get(source, match_identity) {
				return LookupResult::Hit {
					entry,
					matched_identity: match_identity.clone(),
				};
			}
		}
	}

	// Step 4: audience gate.
	if !exposed_to_consumer {
		return LookupResult::Miss(MissKind::AudienceMismatch);
	}

	// Step 7: local precedence.
	for &source in Source::local_preferred_order() {
		if let Some(entry) = index.get(source, match_identity) {
			return LookupResult::Hit {
				entry,
				matched_identity: match_identity.clone(),
			};
		}
	}

	// Step 8.
	LookupResult::Miss(MissKind::FactoryNotProffered)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::tests::stub_entry;
	use crate::index::ProfferIndex;
	use crate::registration::Registration;

	fn ctx(audience: Audience) -> LookupContext {
		LookupContext {
			consumer_audience: audience,
			is_client_of_exclusive_server: false,
			entered_via_remote_facade: false,
		}
	}

	fn registered(id: &Identity, audience: Audience) -> RegistrationTable {
		let mut table = RegistrationTable::new();
		table.register(
			id.clone(),
			Registration {
				audience,
				proffering_host_id: None,
				allow_guest_clients: true,
				extra_interface_names: Vec::new(),
			},
		);
		table
	}

	#[test]
	fn not_registered_when_nothing_matches() {
		let id = Identity::versionless("Calc");
		let table = RegistrationTable::new();
		let index = ProfferIndex::new();
		let result = lookup(&id, ctx(Audience::PROCESS), &table, &index.snapshot(), &ChaosPolicy::empty());
		assert!(matches!(result, LookupResult::Miss(MissKind::NotRegistered)));
	}

	#[test]
	fn local_preferred_order_prefers_same_process_over_same_machine() {
		let id = Identity::versionless("Calc");
		let table = registered(&id, Audience::PROCESS | Audience::SAME_MACHINE);
		let index = ProfferIndex::new();
		index.insert(&table, stub_entry(Source::SameMachine, [id.clone()])).unwrap();
		index.insert(&table, stub_entry(Source::SameProcess, [id.clone()])).unwrap();

		let result = lookup(&id, ctx(Audience::PROCESS), &table, &index.snapshot(), &ChaosPolicy::empty());
		let LookupResult::Hit { entry, .. } = result else { panic!("expected hit") };
		assert_eq!(entry.source(), Source::SameProcess);
	}

	#[test]
	fn remote_source_hides_local_proffer_for_local_consumer() {
		let id = Identity::versionless("Svc");
		let table = registered(&id, Audience::PROCESS | Audience::TRUSTED_EXCLUSIVE_CLIENT);
		let index = ProfferIndex::new();
		index.insert(&table, stub_entry(Source::SameProcess, [id.clone()])).unwrap();
		index
			.insert(&table, stub_entry(Source::TrustedServer, [id.clone()]))
			.unwrap();

		let result = lookup(&id, ctx(Audience::PROCESS), &table, &index.snapshot(), &ChaosPolicy::empty());
		assert!(matches!(result, LookupResult::Miss(MissKind::LocalHiddenOnRemoteClient)));
	}

	#[test]
	fn audience_mismatch_when_registration_does_not_expose_to_consumer() {
		let id = Identity::versionless("Svc");
		let table = registered(&id, Audience::SAME_MACHINE);
		let index = ProfferIndex::new();
		let result = lookup(
			&id,
			ctx(Audience::LIVE_SHARE_GUEST),
			&table,
			&index.snapshot(),
			&ChaosPolicy::empty(),
		);
		assert!(matches!(result, LookupResult::Miss(MissKind::AudienceMismatch)));
	}

	#[test]
	fn local_consumer_outside_audience_gets_audience_mismatch_not_hiding() {
		let id = Identity::versionless("Svc");
		let table = registered(&id, Audience::SAME_MACHINE | Audience::TRUSTED_EXCLUSIVE_CLIENT);
		let index = ProfferIndex::new();
		index.insert(&table, stub_entry(Source::SameMachine, [id.clone()])).unwrap();

		let mut local_ctx = ctx(Audience::PROCESS);
		local_ctx.is_client_of_exclusive_server = true;
		let result = lookup(&id, local_ctx, &table, &index.snapshot(), &ChaosPolicy::empty());
		assert!(
			matches!(result, LookupResult::Miss(MissKind::AudienceMismatch)),
			"a consumer the registration never exposes to must not see a hiding reason"
		);

		index
			.insert(&table, stub_entry(Source::TrustedServer, [id.clone()]))
			.unwrap();
		let result = lookup(&id, ctx(Audience::PROCESS), &table, &index.snapshot(), &ChaosPolicy::empty());
		assert!(matches!(result, LookupResult::Miss(MissKind::AudienceMismatch)));
	}

	#[test]
	fn factory_not_proffered_when_registered_but_nothing_serves_it() {
		let id = Identity::versionless("Svc");
		let table = registered(&id, Audience::PROCESS);
		let index = ProfferIndex::new();
		let result = lookup(&id, ctx(Audience::PROCESS), &table, &index.snapshot(), &ChaosPolicy::empty());
		assert!(matches!(result, LookupResult::Miss(MissKind::FactoryNotProffered)));
	}
}
