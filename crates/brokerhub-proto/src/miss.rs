//! The miss-reason taxonomy (§7, §8): values, not exceptions.

use std::fmt;

/// Why a lookup did not resolve to a proffered entry.
///
/// A miss is not an error: it is returned to the dispatcher, logged at
/// `warn`, and surfaced to the caller as `None` (§7 "Propagation policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissKind {
	/// No miss reason is available (e.g. the factory itself returned null).
	NoExplanation,
	/// Neither the exact identity nor its versionless fallback is registered.
	NotRegistered,
	/// The chaos policy denied this request.
	ChaosDenied,
	/// The registration's audience does not include the consumer's audience.
	AudienceMismatch,
	/// The identity is registered but no source currently proffers it.
	FactoryNotProffered,
	/// The factory ran and returned `None`.
	FactoryReturnedNull,
	/// The factory raised an error while constructing the service.
	FactoryFaulted,
	/// An exclusive remote host is expected to answer this identity instead
	/// of a local proffer.
	LocalHiddenOnRemoteClient,
}

impl fmt::Display for MissKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			MissKind::NoExplanation => "no explanation",
			MissKind::NotRegistered => "not registered",
			MissKind::ChaosDenied => "denied by chaos policy",
			MissKind::AudienceMismatch => "audience mismatch",
			MissKind::FactoryNotProffered => "factory not proffered",
			MissKind::FactoryReturnedNull => "factory returned null",
			MissKind::FactoryFaulted => "factory faulted",
			MissKind::LocalHiddenOnRemoteClient => "hidden locally in favor of a remote host",
		};
		f.write_str(s)
	}
}
