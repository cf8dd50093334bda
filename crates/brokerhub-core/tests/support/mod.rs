//! Shared fixtures for the cross-component scenario tests: a loopback
//! remote-broker double, fixed-answer authorization services, a counting
//! in-process factory, and an observer that records every dispatch outcome.
//!
//! Grounded in the same style as the teacher's own `core::tests::helpers`
//! module (`TestSession`, `mock_instance`): small, purpose-built doubles
//! that stand in for the external collaborators §1 puts out of scope.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use brokerhub_core::contracts::{
	AuthorizationClient, AuthorizationService, AuthorizingFactory, ClientMetadata, DispatchObserver, DispatchOutcome,
	DynError, Factory, RemoteBrokerClient, RemoteBrokerError, RemoteChannelInfo, RequestOptions, RpcDescriptor,
	ServiceObject,
};
use brokerhub_core::entry::{FactoryKind, InProcessFactoryEntry, LocalSubBrokerEntry, ProfferedEntryOps, SubBrokerBackend};
use brokerhub_core::pipe::DuplexPipe;
use brokerhub_core::registration::Registration;
use brokerhub_core::{Container, ProfferHandle, View};
use brokerhub_proto::{Audience, Identity, Source};
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;

/// A registration with `audience`/`allow_guest_clients` set and no host or
/// extra interfaces, matching the shape every scenario needs repeatedly.
pub fn registration(audience: Audience, allow_guest_clients: bool) -> Registration {
	Registration {
		audience,
		proffering_host_id: None,
		allow_guest_clients,
		extra_interface_names: Vec::new(),
	}
}

pub struct CountingDescriptor(pub Identity);

impl RpcDescriptor for CountingDescriptor {
	fn identity(&self) -> &Identity {
		&self.0
	}
}

/// A factory that counts invocations and always succeeds, standing in for
/// any real typed service behind the `Factory` seam (§6).
pub struct CountingFactory {
	pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Factory for CountingFactory {
	async fn create(
		&self,
		_identity: &Identity,
		_options: &RequestOptions,
		_broker: Arc<View>,
		_cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(Some(Arc::new(()) as ServiceObject))
	}
}

/// An [`AuthorizingFactory`] that counts invocations and records whether it
/// was handed an authorization client, standing in for a factory that takes
/// ownership of one when the precondition actually ran (§4.3).
pub struct CountingAuthorizingFactory {
	pub calls: Arc<AtomicUsize>,
	pub called_with_client: Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait]
impl AuthorizingFactory for CountingAuthorizingFactory {
	async fn create(
		&self,
		_identity: &Identity,
		_options: &RequestOptions,
		_broker: Arc<View>,
		auth_client: Option<Box<dyn AuthorizationClient>>,
		_cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.called_with_client.store(auth_client.is_some(), Ordering::SeqCst);
		Ok(Some(Arc::new(()) as ServiceObject))
	}
}

/// Registers `identity` and proffers a fresh [`CountingFactory`] for it from
/// [`Source::SameProcess`], returning the handle and its call counter.
pub fn proffer_counting_factory(
	container: &Arc<Container>,
	identity: &Identity,
	audience: Audience,
	allow_guest_clients: bool,
) -> (ProfferHandle, Arc<AtomicUsize>) {
	container.register_services([(identity.clone(), registration(audience, allow_guest_clients))]);
	let calls = Arc::new(AtomicUsize::new(0));
	let entry = Arc::new(InProcessFactoryEntry::new(
		FactoryKind::Plain(Arc::new(CountingFactory { calls: calls.clone() })),
		Arc::new(CountingDescriptor(identity.clone())),
		Arc::new(registration(audience, allow_guest_clients)),
		Arc::downgrade(container),
	));
	let handle = container.proffer(entry).expect("proffer should succeed");
	(handle, calls)
}

/// A [`SubBrokerBackend`] that never answers, used only so [`stub_entry`]
/// can occupy a proffer-index slot without needing a real service.
struct InertBackend;

#[async_trait]
impl SubBrokerBackend for InertBackend {
	async fn get_pipe(
		&self,
		_identity: &Identity,
		_options: &RequestOptions,
		_cancel: &CancellationToken,
	) -> Result<Option<DuplexPipe>, DynError> {
		Ok(None)
	}

	async fn get_proxy(
		&self,
		_identity: &Identity,
		_options: &RequestOptions,
		_cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		Ok(None)
	}
}

/// Occupies `source`'s proffer-index slot for `monikers` without serving
/// anything, for precedence-ordering tests that only care which source wins.
pub fn stub_entry(source: Source, monikers: impl IntoIterator<Item = Identity>) -> Arc<dyn ProfferedEntryOps> {
	Arc::new(LocalSubBrokerEntry::new(
		Arc::new(InertBackend),
		monikers.into_iter().collect::<FxHashSet<_>>(),
		source,
	))
}

/// An [`AuthorizationClient`] that always fails the owner check.
pub struct DenyingAuthClient;

#[async_trait]
impl AuthorizationClient for DenyingAuthClient {
	async fn check_client_is_owner(&self) -> bool {
		false
	}
}

/// An [`AuthorizationService`] that denies every client (§4.3, S4).
pub struct DenyingAuthService;

#[async_trait]
impl AuthorizationService for DenyingAuthService {
	async fn client_for(&self, _view: &View) -> Box<dyn AuthorizationClient> {
		Box::new(DenyingAuthClient)
	}
}

/// An [`AuthorizationClient`] that always passes the owner check.
pub struct GrantingAuthClient;

#[async_trait]
impl AuthorizationClient for GrantingAuthClient {
	async fn check_client_is_owner(&self) -> bool {
		true
	}
}

/// An [`AuthorizationService`] that grants every client.
pub struct GrantingAuthService;

#[async_trait]
impl AuthorizationService for GrantingAuthService {
	async fn client_for(&self, _view: &View) -> Box<dyn AuthorizationClient> {
		Box::new(GrantingAuthClient)
	}
}

/// An in-process stand-in for a remote broker endpoint (§4.3 `RemoteBroker`),
/// grounded in the same role the teacher's `mock_instance`/`TestSession`
/// helpers play for its own broker tests: a fixed-answer double that records
/// what it was asked, without any real IPC behind it.
pub struct LoopbackRemoteBroker {
	served: FxHashSet<Identity>,
	reject_handshake: bool,
	handshake_count: AtomicUsize,
	requested: Mutex<Vec<Identity>>,
	next_request_id: AtomicU64,
}

impl LoopbackRemoteBroker {
	/// A broker that answers `served` and accepts any pipe-transport handshake.
	#[must_use]
	pub fn serving(served: impl IntoIterator<Item = Identity>) -> Self {
		Self {
			served: served.into_iter().collect(),
			reject_handshake: false,
			handshake_count: AtomicUsize::new(0),
			requested: Mutex::new(Vec::new()),
			next_request_id: AtomicU64::new(1),
		}
	}

	/// A broker that rejects every handshake, regardless of what it serves.
	#[must_use]
	pub fn rejecting_handshake() -> Self {
		Self {
			served: FxHashSet::default(),
			reject_handshake: true,
			handshake_count: AtomicUsize::new(0),
			requested: Mutex::new(Vec::new()),
			next_request_id: AtomicU64::new(1),
		}
	}

	/// Number of completed handshakes (§4.3 "lazily establishes its RPC
	/// connection on first use; subsequent calls reuse it").
	#[must_use]
	pub fn handshake_count(&self) -> usize {
		self.handshake_count.load(Ordering::SeqCst)
	}

	/// Every identity a channel was ever requested for, in call order.
	#[must_use]
	pub fn requested(&self) -> Vec<Identity> {
		self.requested.lock().unwrap().clone()
	}
}

#[async_trait]
impl RemoteBrokerClient for LoopbackRemoteBroker {
	async fn handshake(&self, metadata: &ClientMetadata) -> Result<(), RemoteBrokerError> {
		if self.reject_handshake {
			return Err(RemoteBrokerError::HandshakeRejected("loopback configured to reject".into()));
		}
		if !metadata.advertises_pipe_transport {
			return Err(RemoteBrokerError::HandshakeRejected("no pipe transport advertised".into()));
		}
		self.handshake_count.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn request_service_channel(
		&self,
		identity: &Identity,
		_options: &RequestOptions,
	) -> Result<Option<RemoteChannelInfo>, RemoteBrokerError> {
		self.requested.lock().unwrap().push(identity.clone());
		if !self.served.contains(identity) {
			return Ok(None);
		}
		let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
		Ok(Some(RemoteChannelInfo {
			request_id,
			pipe_name: format!("loopback-{request_id}"),
			mx_channel_id: None,
		}))
	}

	async fn cancel_service_request(&self, _request_id: u64) {}
}

/// A [`DispatchObserver`] that records every outcome it is told about, in
/// order, for assertions on miss reasons the lookup path doesn't otherwise
/// surface to the caller (§4.5 step 6, §7).
#[derive(Default)]
pub struct RecordingObserver {
	outcomes: Mutex<Vec<(Identity, DispatchOutcome)>>,
}

impl RecordingObserver {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn outcomes(&self) -> Vec<(Identity, DispatchOutcome)> {
		self.outcomes.lock().unwrap().clone()
	}

	#[must_use]
	pub fn last(&self) -> Option<(Identity, DispatchOutcome)> {
		self.outcomes.lock().unwrap().last().cloned()
	}
}

impl DispatchObserver for RecordingObserver {
	fn on_outcome(&self, identity: &Identity, outcome: DispatchOutcome) {
		self.outcomes.lock().unwrap().push((identity.clone(), outcome));
	}
}
