//! Availability fan-out (C6, §4.6): turns an index mutation into the exact
//! set of `AvailabilityChanged` events each view should see, and the
//! subscriber bookkeeping that delivers them off the calling thread.

use std::sync::{Arc, Mutex};

use brokerhub_proto::Audience;
use rustc_hash::FxHashSet;

use crate::index::{IndexChange, ProfferIndexSnapshot};
use crate::lookup::{lookup, LookupContext};
use crate::registration::RegistrationTable;
use crate::view::View;

/// Payload of an `AvailabilityChanged` event (§6): the identities impacted,
/// and whether the change came from a sub-broker's "other services
/// impacted" flag rather than an enumerated set.
#[derive(Debug, Clone)]
pub struct AvailabilityEvent {
	/// Identities this view should treat as possibly changed.
	pub impacted: FxHashSet<brokerhub_proto::Identity>,
	/// Set when a sub-broker reported a change without naming identities.
	pub other_impacted: bool,
}

/// Computes what a single view should be told about `change` (§4.6 steps
/// 1-4), mutating `observed` in place (step 2: "removes the intersected
/// identities from observed").
///
/// Returns `None` when nothing in `change.affected` was ever observed by
/// this view, or when re-running the lookup shows the winning entry did
/// not actually change (step 3, "a local proffer flip is silent when a
/// remote host is preferred anyway").
pub fn compute_delivery(
	change: &IndexChange,
	observed: &mut FxHashSet<brokerhub_proto::Identity>,
	registrations: &RegistrationTable,
	chaos: &crate::chaos::ChaosPolicy,
	view_audience: Audience,
	is_client_of_exclusive_server: bool,
) -> Option<AvailabilityEvent> {
	let intersected: FxHashSet<_> = change
		.affected
		.iter()
		.filter(|id| observed.contains(*id))
		.cloned()
		.collect();
	if intersected.is_empty() {
		return None;
	}
	for id in &intersected {
		observed.remove(id);
	}

	let ctx = LookupContext {
		consumer_audience: view_audience,
		is_client_of_exclusive_server,
		entered_via_remote_facade: false,
	};
	let filtered: FxHashSet<_> = intersected
		.into_iter()
		.filter(|id| {
			winner_changed(
				id,
				&ctx,
				registrations,
				&change.old_snapshot,
				&change.new_snapshot,
				chaos,
			)
		})
		.collect();

	if filtered.is_empty() {
		None
	} else {
		Some(AvailabilityEvent { impacted: filtered, other_impacted: false })
	}
}

fn winner_changed(
	identity: &brokerhub_proto::Identity,
	ctx: &LookupContext,
	registrations: &RegistrationTable,
	old: &ProfferIndexSnapshot,
	new: &ProfferIndexSnapshot,
	chaos: &crate::chaos::ChaosPolicy,
) -> bool {
	let old_winner = winner_key(identity, *ctx, registrations, old, chaos);
	let new_winner = winner_key(identity, *ctx, registrations, new, chaos);
	old_winner != new_winner
}

fn winner_key(
	identity: &brokerhub_proto::Identity,
	ctx: LookupContext,
	registrations: &RegistrationTable,
	snapshot: &ProfferIndexSnapshot,
	chaos: &crate::chaos::ChaosPolicy,
) -> Option<brokerhub_proto::Source> {
	match lookup(identity, ctx, registrations, snapshot, chaos) {
		crate::lookup::LookupResult::Hit { entry, .. } => Some(entry.source()),
		crate::lookup::LookupResult::Miss(_) => None,
	}
}

/// An event forwarded from a [`crate::entry::SubBrokerBackend`] (§4.6
/// "Sub-broker variants also forward their inner broker's events"). These
/// arrive with no index mutation behind them, so there is no before/after
/// snapshot to diff against — every named (or, if `other_impacted`, every
/// moniker of the wrapping entry) identity is delivered unconditionally.
#[derive(Debug, Clone)]
pub struct ForwardedChange {
	/// The specific identities impacted, when known.
	pub affected: Option<FxHashSet<brokerhub_proto::Identity>>,
	/// Whether the sub-broker reported "other services impacted" instead.
	pub other_impacted: bool,
	/// The wrapping entry's full moniker set, used when `other_impacted`.
	pub entry_monikers: FxHashSet<brokerhub_proto::Identity>,
}

impl ForwardedChange {
	/// Resolves the set of identities this forwarded change should be
	/// reported against, unfiltered by any view's observed set (the
	/// `compute_delivery` intersection still applies once dispatched).
	#[must_use]
	pub fn resolve_affected(&self) -> FxHashSet<brokerhub_proto::Identity> {
		if self.other_impacted {
			self.entry_monikers.clone()
		} else {
			self.affected.clone().unwrap_or_default()
		}
	}
}

/// The container's subscriber list: weak references to every live
/// [`View`], compacted lazily on each publish.
#[derive(Default)]
pub struct Subscribers {
	views: Mutex<Vec<std::sync::Weak<View>>>,
}

impl Subscribers {
	/// An empty subscriber list.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `view` for future availability notifications.
	pub fn add(&self, view: &Arc<View>) {
		self.views.lock().unwrap().push(Arc::downgrade(view));
	}

	/// Delivers `change` to every live subscriber, each on its own
	/// background task (§4.6 step 5, §5 "never on the caller that
	/// triggered the change").
	pub fn publish(&self, change: IndexChange) {
		let live: Vec<Arc<View>> = {
			let mut guard = self.views.lock().unwrap();
			guard.retain(|w| w.strong_count() > 0);
			guard.iter().filter_map(std::sync::Weak::upgrade).collect()
		};
		for view in live {
			let change = change.clone();
			tokio::spawn(async move {
				view.handle_index_change(&change).await;
			});
		}
	}

	/// Delivers a sub-broker-forwarded change to every live subscriber.
	pub fn publish_forwarded(&self, change: ForwardedChange) {
		let live: Vec<Arc<View>> = {
			let mut guard = self.views.lock().unwrap();
			guard.retain(|w| w.strong_count() > 0);
			guard.iter().filter_map(std::sync::Weak::upgrade).collect()
		};
		for view in live {
			let change = change.clone();
			tokio::spawn(async move {
				view.handle_forwarded_change(&change).await;
			});
		}
	}
}
