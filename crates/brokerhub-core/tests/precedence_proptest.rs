//! Property test for the lookup engine's precedence ordering (§8: "a couple
//! of proptest cases for the lookup engine's precedence ordering over
//! arbitrary subsets of sources"). A pure reference mirrors the ordering
//! contract of `lookup::resolve_precedence` directly against
//! `Registration`/`Source`'s own audience-membership helpers, and is checked
//! against the real engine over randomly generated source subsets, audience
//! masks, and exclusive-client flags.

mod support;

use std::collections::HashSet;

use brokerhub_core::chaos::ChaosPolicy;
use brokerhub_core::index::ProfferIndex;
use brokerhub_core::lookup::{lookup, LookupContext, LookupResult};
use brokerhub_core::registration::{Registration, RegistrationTable};
use brokerhub_proto::{Audience, Identity, Source};
use proptest::prelude::*;
use support::stub_entry;

const ALL_SOURCES: [Source; 6] = [
	Source::SameProcess,
	Source::SameMachine,
	Source::TrustedServer,
	Source::UntrustedServer,
	Source::TrustedExclusiveServer,
	Source::TrustedExclusiveClient,
];

const VALID_AUDIENCE_BITS: u8 = 0b0011_1111;

/// Mirrors `resolve_precedence`'s ordering decisions using only the
/// registration's own membership helpers, independent of the engine's
/// internal control flow.
fn reference_winner(
	present: &HashSet<Source>,
	registration: &Registration,
	consumer_audience: Audience,
	is_client_of_exclusive_server: bool,
) -> Option<Source> {
	let exposed_to_consumer = registration.is_exposed_to(consumer_audience);

	if consumer_audience.is_local() && exposed_to_consumer {
		if is_client_of_exclusive_server && registration.audience.contains(Audience::TRUSTED_EXCLUSIVE_CLIENT) {
			return None;
		}
		let has_any_remote = present.iter().any(|s| s.is_remote_group());
		if has_any_remote && registration.is_exposed_locally() && registration.is_exposed_remotely() {
			return None;
		}
		for source in Source::remote_preferred_order() {
			if present.contains(source) {
				return Some(*source);
			}
		}
	}

	if !exposed_to_consumer {
		return None;
	}

	for source in Source::local_preferred_order() {
		if present.contains(source) {
			return Some(*source);
		}
	}
	None
}

fn presence_strategy() -> impl Strategy<Value = HashSet<Source>> {
	proptest::collection::vec(any::<bool>(), ALL_SOURCES.len()).prop_map(|flags| {
		ALL_SOURCES
			.iter()
			.zip(flags)
			.filter_map(|(source, present)| present.then_some(*source))
			.collect()
	})
}

fn audience_strategy() -> impl Strategy<Value = Audience> {
	(0..=VALID_AUDIENCE_BITS).prop_map(Audience::from_bits_truncate)
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(256))]

	#[test]
	fn winner_matches_reference_across_arbitrary_source_subsets(
		present in presence_strategy(),
		registration_audience in audience_strategy(),
		consumer_audience in audience_strategy(),
		is_client_of_exclusive_server in any::<bool>(),
	) {
		let id = Identity::versionless("Svc");
		let registration = Registration {
			audience: registration_audience,
			proffering_host_id: None,
			allow_guest_clients: true,
			extra_interface_names: Vec::new(),
		};

		let mut table = RegistrationTable::new();
		table.register(id.clone(), registration.clone());

		let index = ProfferIndex::new();
		for &source in &present {
			index.insert(&table, stub_entry(source, [id.clone()])).unwrap();
		}

		let ctx = LookupContext {
			consumer_audience,
			is_client_of_exclusive_server,
			entered_via_remote_facade: false,
		};
		let actual = match lookup(&id, ctx, &table, &index.snapshot(), &ChaosPolicy::empty()) {
			LookupResult::Hit { entry, .. } => Some(entry.source()),
			LookupResult::Miss(_) => None,
		};

		let expected = reference_winner(&present, &registration, consumer_audience, is_client_of_exclusive_server);
		prop_assert_eq!(actual, expected);
	}

	#[test]
	fn winner_is_always_a_member_of_the_present_set_or_none(
		present in presence_strategy(),
		registration_audience in audience_strategy(),
		consumer_audience in audience_strategy(),
		is_client_of_exclusive_server in any::<bool>(),
	) {
		let id = Identity::versionless("Svc");
		let registration = Registration {
			audience: registration_audience,
			proffering_host_id: None,
			allow_guest_clients: true,
			extra_interface_names: Vec::new(),
		};
		let mut table = RegistrationTable::new();
		table.register(id.clone(), registration);

		let index = ProfferIndex::new();
		for &source in &present {
			index.insert(&table, stub_entry(source, [id.clone()])).unwrap();
		}

		let ctx = LookupContext {
			consumer_audience,
			is_client_of_exclusive_server,
			entered_via_remote_facade: false,
		};
		if let LookupResult::Hit { entry, .. } = lookup(&id, ctx, &table, &index.snapshot(), &ChaosPolicy::empty()) {
			prop_assert!(present.contains(&entry.source()));
		}
	}
}
