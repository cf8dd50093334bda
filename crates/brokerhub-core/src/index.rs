//! Proffer index (C2, §4.2): the ordered `Source → Identity → ProfferedEntry`
//! table, its `remote_sources` sibling, and the copy-on-write snapshot both
//! are published through.

use std::sync::Arc;

use brokerhub_proto::{Identity, Source};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::entry::ProfferedEntryOps;
use crate::error::ProfferError;
use crate::registration::RegistrationTable;

/// An immutable view of the proffer index at one point in time.
///
/// Readers clone this `Arc` out from under a brief lock and then run the
/// lookup algorithm, construct pipes, or invoke factories entirely outside
/// the container lock (§5 "Mutation discipline").
#[derive(Debug, Default, Clone)]
pub struct ProfferIndexSnapshot {
	by_source: FxHashMap<Source, FxHashMap<Identity, Arc<dyn ProfferedEntryOps>>>,
	remote_sources: FxHashMap<Source, Arc<dyn ProfferedEntryOps>>,
}

impl ProfferIndexSnapshot {
	/// The entry proffering `identity` from `source`, if any.
	#[must_use]
	pub fn get(&self, source: Source, identity: &Identity) -> Option<Arc<dyn ProfferedEntryOps>> {
		self.by_source.get(&source)?.get(identity).cloned()
	}

	/// True if any remote-group source currently has an active proffer
	/// (§4.4 step 6: "a remote source exists in the snapshot at all").
	#[must_use]
	pub fn has_any_remote_source(&self) -> bool {
		!self.remote_sources.is_empty()
	}

	/// The remote-group sources with an active proffer, for diagnostics.
	pub fn active_remote_sources(&self) -> impl Iterator<Item = Source> + '_ {
		self.remote_sources.keys().copied()
	}
}

/// Result of a mutating [`ProfferIndex`] operation: the snapshots on either
/// side of the change, and the identities it affected (§4.2 "enqueue an
/// availability notification carrying `(old_snapshot, entry, affected_ids)`").
#[derive(Debug, Clone)]
pub struct IndexChange {
	/// The snapshot immediately before this mutation.
	pub old_snapshot: Arc<ProfferIndexSnapshot>,
	/// The snapshot immediately after this mutation.
	pub new_snapshot: Arc<ProfferIndexSnapshot>,
	/// The entry that was inserted or removed.
	pub entry: Arc<dyn ProfferedEntryOps>,
	/// Identities whose availability may have changed as a result.
	pub affected: Vec<Identity>,
}

/// The `proffer_index`/`remote_sources` tables of §3, guarded by one lock
/// and published as copy-on-write [`ProfferIndexSnapshot`]s.
#[derive(Debug, Default)]
pub struct ProfferIndex {
	current: RwLock<Arc<ProfferIndexSnapshot>>,
}

impl ProfferIndex {
	/// An empty index.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// The current snapshot, cloned out from under a brief read lock.
	#[must_use]
	pub fn snapshot(&self) -> Arc<ProfferIndexSnapshot> {
		self.current.read().clone()
	}

	/// Inserts `entry`, validating the invariants of §4.2:
	///
	/// - every identity in `entry.monikers()` must be registered;
	/// - none of them may already occupy `proffer_index[entry.source()]`;
	/// - if `entry.source()` is in the remote group, its `remote_sources`
	///   slot must be unoccupied.
	///
	/// On success, the index is left unchanged on any `Err` path (§7
	/// "the proffer throws and the index is left unchanged").
	pub fn insert(
		&self,
		registrations: &RegistrationTable,
		entry: Arc<dyn ProfferedEntryOps>,
	) -> Result<IndexChange, ProfferError> {
		let mut guard = self.current.write();
		let source = entry.source();

		for id in entry.monikers() {
			if registrations.get(id).is_none() {
				return Err(ProfferError::UnregisteredIdentity(id.clone()));
			}
		}
		if let Some(existing) = guard.by_source.get(&source) {
			for id in entry.monikers() {
				if existing.contains_key(id) {
					return Err(ProfferError::AlreadyProffered(id.clone(), source));
				}
			}
		}
		if source.is_remote_group() && guard.remote_sources.contains_key(&source) {
			return Err(ProfferError::RemoteSourceOccupied(source));
		}

		let old_snapshot = guard.clone();
		let mut by_source = old_snapshot.by_source.clone();
		let slot = by_source.entry(source).or_default();
		for id in entry.monikers() {
			slot.insert(id.clone(), entry.clone());
		}
		let mut remote_sources = old_snapshot.remote_sources.clone();
		if source.is_remote_group() {
			remote_sources.insert(source, entry.clone());
		}
		let new_snapshot = Arc::new(ProfferIndexSnapshot { by_source, remote_sources });
		*guard = new_snapshot.clone();

		Ok(IndexChange {
			old_snapshot,
			new_snapshot,
			affected: entry.monikers().iter().cloned().collect(),
			entry,
		})
	}

	/// Removes `entry` (§4.2): for `SameProcess`/`SameMachine` sources,
	/// removes only `entry.monikers()`; for remote-group sources, removes
	/// the entire source entry from both tables.
	pub fn remove(&self, entry: &Arc<dyn ProfferedEntryOps>) -> IndexChange {
		let mut guard = self.current.write();
		let old_snapshot = guard.clone();
		let source = entry.source();
		let mut by_source = old_snapshot.by_source.clone();
		let mut remote_sources = old_snapshot.remote_sources.clone();

		let affected: Vec<Identity> = if source.is_remote_group() {
			remote_sources.remove(&source);
			let removed = by_source
				.remove(&source)
				.map(|map| map.into_keys().collect())
				.unwrap_or_default();
			removed
		} else {
			if let Some(map) = by_source.get_mut(&source) {
				for id in entry.monikers() {
					map.remove(id);
				}
			}
			entry.monikers().iter().cloned().collect()
		};

		let new_snapshot = Arc::new(ProfferIndexSnapshot { by_source, remote_sources });
		*guard = new_snapshot.clone();

		IndexChange {
			old_snapshot,
			new_snapshot,
			affected,
			entry: entry.clone(),
		}
	}
}
