//! Error types for proffer-time invariant violations, chaos policy loading,
//! and wrapped activation faults (§7).

use brokerhub_proto::Identity;
use thiserror::Error;

/// A proffer-time invariant violation (§4.2, §7): "the proffer throws and
/// the index is left unchanged".
#[derive(Debug, Error)]
pub enum ProfferError {
	/// An identity in `monikers` has no registration.
	#[error("identity {0} is not registered")]
	UnregisteredIdentity(Identity),
	/// The entry's source already has an entry for this identity.
	#[error("identity {0} is already proffered by source {1:?}")]
	AlreadyProffered(Identity, brokerhub_proto::Source),
	/// A second entry was proffered for a remote-group source that already
	/// has one.
	#[error("source {0:?} already has a remote proffer")]
	RemoteSourceOccupied(brokerhub_proto::Source),
}

/// Failure to load or hot-reload a chaos policy file.
#[derive(Debug, Error)]
pub enum ChaosLoadError {
	/// The file could not be read.
	#[error("reading chaos policy file: {0}")]
	Io(#[from] std::io::Error),
	/// The file did not parse as the documented JSON schema.
	#[error("parsing chaos policy file: {0}")]
	Parse(#[from] serde_json::Error),
}

/// Wraps any fault raised while activating a service (factory error, RPC
/// setup failure, host activation failure) at the outer dispatch boundary.
///
/// Caller-supplied cancellation is **not** wrapped here; it propagates
/// unchanged per §7.
#[derive(Debug, Error)]
#[error("activating service {identity}: {source}")]
pub struct ServiceActivationFailed {
	/// The identity that was being activated.
	pub identity: Identity,
	/// The underlying cause.
	#[source]
	pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl ServiceActivationFailed {
	/// Wraps `source` as the cause of an activation failure for `identity`.
	pub fn new(
		identity: Identity,
		source: impl std::error::Error + Send + Sync + 'static,
	) -> Self {
		Self {
			identity,
			source: Box::new(source),
		}
	}
}

/// An error surfaced from a view's `GetPipe`/`GetProxy` dispatch (§4.5, §7).
///
/// A miss is not an error (§7): it is represented as `Ok(None)` from the
/// dispatch methods, carrying a `MissKind` only in the trace/telemetry
/// output. Only activation faults and caller cancellation reach this type.
#[derive(Debug, Error)]
pub enum DispatchError {
	/// A fault during factory invocation or RPC setup, wrapped once at the
	/// dispatch boundary (§7 "wrapped in `ServiceActivationFailed`").
	#[error(transparent)]
	ActivationFailed(#[from] ServiceActivationFailed),
	/// The caller's own cancellation token fired during activation; this
	/// propagates unchanged rather than being wrapped (§7).
	#[error("request cancelled")]
	Cancelled,
}
