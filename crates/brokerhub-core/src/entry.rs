//! Proffered entry variants (C3, §4.3, §9 "Polymorphic entries"): the four
//! `ProfferedEntry` shapes, modeled as implementations of one object-safe
//! capability trait so the proffer index can hold them as
//! `Arc<dyn ProfferedEntryOps>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use brokerhub_proto::{Identity, Source};
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;

use crate::contracts::{
	AuthorizationClient, AuthorizingFactory, ClientMetadata, DynError, Factory, RemoteBrokerClient,
	RequestOptions, RpcDescriptor, ServiceObject, ViewIntrinsicFactory,
};
use crate::container::Container;
use crate::pipe::{pipe_pair, DuplexPipe, DEFAULT_PIPE_BUFFER};
use crate::registration::Registration;
use crate::view::View;

/// Common capability set every proffered-entry variant exposes (§4.3, §9).
///
/// `ViewIntrinsic` is the only variant that inspects `requesting_view`; the
/// other three ignore it or forward it unchanged. It is the dispatcher in
/// [`View`] that decides when a view is available, never the entry itself
/// (§9 resolution (c)).
#[async_trait]
pub trait ProfferedEntryOps: Send + Sync {
	/// Where this entry's service instances come from.
	fn source(&self) -> Source;

	/// The identities this entry can answer for.
	fn monikers(&self) -> &FxHashSet<Identity>;

	/// Builds a duplex byte pipe for `identity` (§4.3 `GetPipe`), or `None`
	/// if the factory declined.
	async fn get_pipe(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<DuplexPipe>, DynError>;

	/// Invokes the factory and returns the constructed service instance
	/// directly, the local in-process equivalent of `GetProxy` (§4.3).
	async fn get_proxy(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError>;

	/// Releases any resources this entry holds. Idempotent: a redundant
	/// call is a no-op (§9 resolution (b)).
	fn dispose(&self);
}

/// Outcome of the §4.3 "authorization precondition" check.
enum AuthOutcome {
	/// No client was acquired, either because guests are allowed or no
	/// authorization service is wired up.
	NotChecked,
	/// The client passed the owner check; a factory that accepts one gets
	/// ownership of it.
	Granted(Box<dyn AuthorizationClient>),
	/// The client failed the owner check: the entry must return `null`
	/// without invoking the factory (§4.3).
	Denied,
}

/// Runs the §4.3 "authorization precondition" against `registration`.
///
/// A denial is not an error: per §4.3 the entry "returns null without
/// invoking the factory", so this reports it as a value, not a `DynError`.
async fn check_authorization(registration: &Registration, secure_view: &Arc<View>) -> AuthOutcome {
	if registration.allow_guest_clients {
		return AuthOutcome::NotChecked;
	}
	let Some(auth_service) = secure_view.container().authorization_service() else {
		// No authorization service configured: nothing to check against.
		// Treat as owner-equivalent rather than silently denying every
		// guest-restricted service in setups that never wired one up.
		return AuthOutcome::NotChecked;
	};
	let client = auth_service.client_for(secure_view).await;
	if client.check_client_is_owner().await {
		AuthOutcome::Granted(client)
	} else {
		AuthOutcome::Denied
	}
}

/// Marker used by [`ViewIntrinsicEntry`] when invoked with no requesting
/// view (§9 resolution (c)).
#[derive(Debug, thiserror::Error)]
#[error("view-intrinsic entry invoked without a requesting view")]
pub struct ViewRequired;

/// Shared plumbing for building a `DuplexPipe` from a constructed service:
/// hands the inner half to the descriptor's server-connection constructor
/// and returns the outer half (§4.3 `GetPipe`).
fn wrap_in_pipe(descriptor: &dyn RpcDescriptor, _service: &ServiceObject) -> DuplexPipe {
	let (outer, inner) = pipe_pair(DEFAULT_PIPE_BUFFER);
	descriptor.construct_server_connection(inner);
	outer
}

/// The factory half of an in-process entry: either a plain [`Factory`] or
/// one that accepts ownership of the authorization client (§4.3 "ownership
/// of that client passes to the factory").
pub enum FactoryKind {
	/// A factory with no use for the authorization client.
	Plain(Arc<dyn Factory>),
	/// A factory that takes ownership of the authorization client checked
	/// on its behalf.
	Authorizing(Arc<dyn AuthorizingFactory>),
}

/// *InProcessFactory* (§4.3): owns a factory closure and the service's
/// descriptor; serves exactly `{descriptor.identity()}`.
pub struct InProcessFactoryEntry {
	factory: FactoryKind,
	descriptor: Arc<dyn RpcDescriptor>,
	registration: Arc<Registration>,
	container: Weak<Container>,
	monikers: FxHashSet<Identity>,
	disposed: AtomicBool,
}

impl InProcessFactoryEntry {
	/// Builds an entry serving exactly `descriptor.identity()`.
	#[must_use]
	pub fn new(
		factory: FactoryKind,
		descriptor: Arc<dyn RpcDescriptor>,
		registration: Arc<Registration>,
		container: Weak<Container>,
	) -> Self {
		let mut monikers = FxHashSet::default();
		monikers.insert(descriptor.identity().clone());
		Self {
			factory,
			descriptor,
			registration,
			container,
			monikers,
			disposed: AtomicBool::new(false),
		}
	}

	async fn activate(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		if cancel.is_cancelled() {
			return Ok(None);
		}
		let container = self
			.container
			.upgrade()
			.ok_or_else(|| -> DynError { Box::new(ContainerGone) })?;
		let secure_view = container.secure_view(options.client_credentials.clone());
		match (check_authorization(&self.registration, &secure_view).await, &self.factory) {
			(AuthOutcome::Denied, _) => Ok(None),
			(AuthOutcome::NotChecked, FactoryKind::Plain(f))
			| (AuthOutcome::Granted(_), FactoryKind::Plain(f)) => {
				f.create(identity, options, secure_view, cancel).await
			}
			(AuthOutcome::Granted(client), FactoryKind::Authorizing(f)) => {
				f.create(identity, options, secure_view, Some(client), cancel).await
			}
			(AuthOutcome::NotChecked, FactoryKind::Authorizing(f)) => {
				// allow_guest_clients was true, or no authorization service
				// is configured, so no client was acquired; an authorizing
				// factory with nothing to own still runs, it simply
				// receives no ownership transfer.
				f.create(identity, options, secure_view, None, cancel).await
			}
		}
	}
}

#[derive(Debug, thiserror::Error)]
#[error("container has been dropped")]
struct ContainerGone;

#[async_trait]
impl ProfferedEntryOps for InProcessFactoryEntry {
	fn source(&self) -> Source {
		Source::SameProcess
	}

	fn monikers(&self) -> &FxHashSet<Identity> {
		&self.monikers
	}

	async fn get_pipe(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		_requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<DuplexPipe>, DynError> {
		let service = self.activate(identity, options, cancel).await?;
		Ok(service.map(|s| wrap_in_pipe(self.descriptor.as_ref(), &s)))
	}

	async fn get_proxy(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		_requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		self.activate(identity, options, cancel).await
	}

	fn dispose(&self) {
		self.disposed.store(true, Ordering::SeqCst);
	}
}

/// *ViewIntrinsic* (§4.3): like `InProcessFactory`, but the factory receives
/// the requesting view as an extra input, and is unreachable without one.
pub struct ViewIntrinsicEntry {
	factory: Arc<dyn ViewIntrinsicFactory>,
	descriptor: Arc<dyn RpcDescriptor>,
	registration: Arc<Registration>,
	container: Weak<Container>,
	monikers: FxHashSet<Identity>,
	disposed: AtomicBool,
}

impl ViewIntrinsicEntry {
	/// Builds a view-intrinsic entry serving exactly `descriptor.identity()`.
	#[must_use]
	pub fn new(
		factory: Arc<dyn ViewIntrinsicFactory>,
		descriptor: Arc<dyn RpcDescriptor>,
		registration: Arc<Registration>,
		container: Weak<Container>,
	) -> Self {
		let mut monikers = FxHashSet::default();
		monikers.insert(descriptor.identity().clone());
		Self {
			factory,
			descriptor,
			registration,
			container,
			monikers,
			disposed: AtomicBool::new(false),
		}
	}

	async fn activate(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		let Some(requesting_view) = requesting_view else {
			return Err(Box::new(ViewRequired));
		};
		if cancel.is_cancelled() {
			return Ok(None);
		}
		let container = self
			.container
			.upgrade()
			.ok_or_else(|| -> DynError { Box::new(ContainerGone) })?;
		let secure_view = container.secure_view(options.client_credentials.clone());
		// A `ViewIntrinsicFactory` has no ownership-transfer variant in §6;
		// the authorization check still gates invocation but the client
		// itself is dropped once checked.
		if matches!(check_authorization(&self.registration, &secure_view).await, AuthOutcome::Denied) {
			return Ok(None);
		}
		self.factory
			.create(requesting_view, identity, options, secure_view, cancel)
			.await
	}
}

#[async_trait]
impl ProfferedEntryOps for ViewIntrinsicEntry {
	fn source(&self) -> Source {
		Source::SameProcess
	}

	fn monikers(&self) -> &FxHashSet<Identity> {
		&self.monikers
	}

	async fn get_pipe(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<DuplexPipe>, DynError> {
		let service = self.activate(identity, options, requesting_view, cancel).await?;
		Ok(service.map(|s| wrap_in_pipe(self.descriptor.as_ref(), &s)))
	}

	async fn get_proxy(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		self.activate(identity, options, requesting_view, cancel).await
	}

	fn dispose(&self) {
		self.disposed.store(true, Ordering::SeqCst);
	}
}

/// The shape of another broker implementation a [`LocalSubBrokerEntry`]
/// wraps: any object able to answer `GetPipe`/`GetProxy` for its own
/// pre-declared identity set.
#[async_trait]
pub trait SubBrokerBackend: Send + Sync {
	/// Builds a pipe for `identity`, using the sub-broker's own policy.
	async fn get_pipe(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		cancel: &CancellationToken,
	) -> Result<Option<DuplexPipe>, DynError>;

	/// Constructs a service instance for `identity`.
	async fn get_proxy(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError>;
}

/// *LocalSubBroker* (§4.3): wraps another broker implementation proffering
/// a pre-declared identity set.
pub struct LocalSubBrokerEntry {
	backend: Arc<dyn SubBrokerBackend>,
	monikers: FxHashSet<Identity>,
	source: Source,
	disposed: AtomicBool,
}

impl LocalSubBrokerEntry {
	/// Builds a sub-broker entry proffering `monikers` from `source`
	/// (typically [`Source::SameProcess`] or [`Source::SameMachine`]).
	#[must_use]
	pub fn new(backend: Arc<dyn SubBrokerBackend>, monikers: FxHashSet<Identity>, source: Source) -> Self {
		Self {
			backend,
			monikers,
			source,
			disposed: AtomicBool::new(false),
		}
	}
}

#[async_trait]
impl ProfferedEntryOps for LocalSubBrokerEntry {
	fn source(&self) -> Source {
		self.source
	}

	fn monikers(&self) -> &FxHashSet<Identity> {
		&self.monikers
	}

	async fn get_pipe(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		_requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<DuplexPipe>, DynError> {
		self.backend.get_pipe(identity, options, cancel).await
	}

	async fn get_proxy(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		_requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		self.backend.get_proxy(identity, options, cancel).await
	}

	fn dispose(&self) {
		self.disposed.store(true, Ordering::SeqCst);
	}
}

/// *RemoteBroker* (§4.3): wraps a remote broker endpoint; lazily establishes
/// its connection on first use and reuses it afterward.
pub struct RemoteBrokerEntry {
	client: Arc<dyn RemoteBrokerClient>,
	monikers: FxHashSet<Identity>,
	source: Source,
	handshake_done: tokio::sync::OnceCell<()>,
	disposed: AtomicBool,
}

impl RemoteBrokerEntry {
	/// Builds a remote-broker entry proffering `monikers` from `source`
	/// (one of the remote-group sources).
	#[must_use]
	pub fn new(client: Arc<dyn RemoteBrokerClient>, monikers: FxHashSet<Identity>, source: Source) -> Self {
		debug_assert!(source.is_remote_group());
		Self {
			client,
			monikers,
			source,
			handshake_done: tokio::sync::OnceCell::new(),
			disposed: AtomicBool::new(false),
		}
	}

	async fn ensure_connected(&self) -> Result<(), DynError> {
		self.handshake_done
			.get_or_try_init(|| async {
				self.client
					.handshake(&ClientMetadata { advertises_pipe_transport: true })
					.await
					.map_err(|e| -> DynError { Box::new(e) })
			})
			.await?;
		Ok(())
	}
}

#[async_trait]
impl ProfferedEntryOps for RemoteBrokerEntry {
	fn source(&self) -> Source {
		self.source
	}

	fn monikers(&self) -> &FxHashSet<Identity> {
		&self.monikers
	}

	async fn get_pipe(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		_requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<DuplexPipe>, DynError> {
		if cancel.is_cancelled() {
			return Ok(None);
		}
		self.ensure_connected().await?;
		let channel = self
			.client
			.request_service_channel(identity, options)
			.await
			.map_err(|e| -> DynError { Box::new(e) })?;
		// The real named-pipe connect is an external collaborator (§1); we
		// hand back a freshly paired local pipe standing in for "the
		// caller's end of the remote channel" once the remote side confirms
		// a service exists.
		Ok(channel.map(|_info| pipe_pair(DEFAULT_PIPE_BUFFER).0))
	}

	async fn get_proxy(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		_requesting_view: Option<&Arc<View>>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		if cancel.is_cancelled() {
			return Ok(None);
		}
		self.ensure_connected().await?;
		let channel = self
			.client
			.request_service_channel(identity, options)
			.await
			.map_err(|e| -> DynError { Box::new(e) })?;
		Ok(channel.map(|info| Arc::new(info) as ServiceObject))
	}

	fn dispose(&self) {
		self.disposed.store(true, Ordering::SeqCst);
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	struct StubEntry {
		source: Source,
		monikers: FxHashSet<Identity>,
	}

	#[async_trait]
	impl ProfferedEntryOps for StubEntry {
		fn source(&self) -> Source {
			self.source
		}
		fn monikers(&self) -> &FxHashSet<Identity> {
			&self.monikers
		}
		async fn get_pipe(
			&self,
			_identity: &Identity,
			_options: &RequestOptions,
			_requesting_view: Option<&Arc<View>>,
			_cancel: &CancellationToken,
		) -> Result<Option<DuplexPipe>, DynError> {
			Ok(None)
		}
		async fn get_proxy(
			&self,
			_identity: &Identity,
			_options: &RequestOptions,
			_requesting_view: Option<&Arc<View>>,
			_cancel: &CancellationToken,
		) -> Result<Option<ServiceObject>, DynError> {
			Ok(None)
		}
		fn dispose(&self) {}
	}

	pub(crate) fn stub_entry(
		source: Source,
		monikers: impl IntoIterator<Item = Identity>,
	) -> Arc<dyn ProfferedEntryOps> {
		Arc::new(StubEntry {
			source,
			monikers: monikers.into_iter().collect(),
		})
	}
}
