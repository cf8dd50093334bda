//! View (C5, §4.5): the per-client filtered handle that implements the
//! client-facing broker contract, plus the thin remote IPC facade exposed
//! over it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use brokerhub_proto::{Audience, Identity, MissKind};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;

use crate::container::Container;
use crate::contracts::{
	ClientMetadata, DispatchOutcome, DynError, RemoteBrokerError, RemoteChannelInfo, RequestOptions,
	ServiceObject,
};
use crate::error::{DispatchError, ServiceActivationFailed};
use crate::fanout::{AvailabilityEvent, ForwardedChange};
use crate::index::IndexChange;
use crate::lookup::LookupResult;
use crate::pipe::DuplexPipe;

/// How a view reconciles its own stored credentials against credentials
/// supplied in a per-request [`RequestOptions`] (§4.5 step 2 "options
/// filter").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsPolicy {
	/// The view's own credentials always win, regardless of what the
	/// request carries. Used for the ephemeral secure view handed to
	/// factories (§4.3): a factory-visible view must not be spoofable by
	/// request-level credentials.
	FilterOverridesRequest,
	/// The request's credentials win, unless empty, in which case the
	/// view's own credentials are used. Used for ordinary limited/full
	/// access views, where per-call credentials refine the view's own.
	RequestOverridesFilter,
}

/// Opaque handle for an availability-change subscription, returned by
/// [`View::on_availability_changed`] and consumed by
/// [`View::off_availability_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn Fn(&AvailabilityEvent) + Send + Sync>;

/// A per-client filtered handle on the container (§3 "View state", §4.5).
pub struct View {
	container: Arc<Container>,
	audience: Audience,
	credentials: FxHashMap<String, String>,
	creds_policy: CredentialsPolicy,
	culture: Option<String>,
	ui_culture: Option<String>,
	observed: Mutex<FxHashSet<Identity>>,
	subscribers: Mutex<FxHashMap<u64, Handler>>,
	next_subscription_id: AtomicU64,
}

impl std::fmt::Debug for View {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("View").field("audience", &self.audience).finish_non_exhaustive()
	}
}

impl View {
	pub(crate) fn new(
		container: Arc<Container>,
		audience: Audience,
		credentials: FxHashMap<String, String>,
		creds_policy: CredentialsPolicy,
		culture: Option<String>,
		ui_culture: Option<String>,
	) -> Arc<Self> {
		Arc::new(Self {
			container,
			audience,
			credentials,
			creds_policy,
			culture,
			ui_culture,
			observed: Mutex::new(FxHashSet::default()),
			subscribers: Mutex::new(FxHashMap::default()),
			next_subscription_id: AtomicU64::new(0),
		})
	}

	/// The container this view was handed out by.
	#[must_use]
	pub fn container(&self) -> &Arc<Container> {
		&self.container
	}

	/// This view's audience filter. The empty set means "no filter" (§3).
	#[must_use]
	pub fn audience(&self) -> Audience {
		self.audience
	}

	/// Builds a short-lived remote-facing facade over this view, for out-
	/// of-process clients connecting through a named-pipe IPC server (§4.5,
	/// §6).
	#[must_use]
	pub fn remote_facade(self: &Arc<Self>) -> RemoteFacade {
		RemoteFacade::new(self.clone())
	}

	/// Builds a duplex byte pipe for `identity` (§4.5, §6 `GetPipe`).
	pub async fn get_pipe(
		self: &Arc<Self>,
		identity: &Identity,
		options: RequestOptions,
		cancel: &CancellationToken,
	) -> Result<Option<DuplexPipe>, DispatchError> {
		self.dispatch_pipe(identity, options, cancel, false).await
	}

	/// Invokes the factory for `identity` and returns the constructed
	/// service instance directly (§4.5, §6 `GetProxy`).
	pub async fn get_proxy(
		self: &Arc<Self>,
		identity: &Identity,
		options: RequestOptions,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DispatchError> {
		self.dispatch_proxy(identity, options, cancel, false).await
	}

	/// Registers a handler for this view's `AvailabilityChanged` event
	/// (§6), returning a handle usable with [`Self::off_availability_changed`].
	pub fn on_availability_changed(
		&self,
		handler: impl Fn(&AvailabilityEvent) + Send + Sync + 'static,
	) -> SubscriptionId {
		let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
		self.subscribers.lock().unwrap().insert(id, Box::new(handler));
		SubscriptionId(id)
	}

	/// Removes a previously registered handler. A stale or already-removed
	/// id is a no-op.
	pub fn off_availability_changed(&self, id: SubscriptionId) {
		self.subscribers.lock().unwrap().remove(&id.0);
	}

	/// Request pipeline shared by [`Self::get_pipe`] and the remote facade
	/// (§4.5 "Request pipeline").
	pub(crate) async fn dispatch_pipe(
		self: &Arc<Self>,
		identity: &Identity,
		mut options: RequestOptions,
		cancel: &CancellationToken,
		entered_via_remote_facade: bool,
	) -> Result<Option<DuplexPipe>, DispatchError> {
		// Step 1: honor cancellation.
		if cancel.is_cancelled() {
			return Err(DispatchError::Cancelled);
		}
		self.apply_options_filter(&mut options);

		let outcome = self.resolve_with_host_activation(identity, entered_via_remote_facade).await;
		let result = match outcome {
			LookupResult::Hit { entry, matched_identity } => {
				match entry.get_pipe(&matched_identity, &options, Some(self), cancel).await {
					Ok(Some(pipe)) => {
						self.report(identity, DispatchOutcome::Fulfilled);
						Ok(Some(pipe))
					}
					Ok(None) => {
						self.report(identity, DispatchOutcome::Declined(MissKind::FactoryReturnedNull));
						Ok(None)
					}
					Err(error) => Err(self.classify_error(identity, error, cancel)),
				}
			}
			LookupResult::Miss(kind) => {
				self.report_miss(identity, kind);
				Ok(None)
			}
		};

		self.record_observed(identity);
		result
	}

	/// Request pipeline for `GetProxy` (§4.5).
	pub(crate) async fn dispatch_proxy(
		self: &Arc<Self>,
		identity: &Identity,
		mut options: RequestOptions,
		cancel: &CancellationToken,
		entered_via_remote_facade: bool,
	) -> Result<Option<ServiceObject>, DispatchError> {
		if cancel.is_cancelled() {
			return Err(DispatchError::Cancelled);
		}
		self.apply_options_filter(&mut options);

		let outcome = self.resolve_with_host_activation(identity, entered_via_remote_facade).await;
		let result = match outcome {
			LookupResult::Hit { entry, matched_identity } => {
				match entry.get_proxy(&matched_identity, &options, Some(self), cancel).await {
					Ok(Some(service)) => {
						self.report(identity, DispatchOutcome::Fulfilled);
						Ok(Some(service))
					}
					Ok(None) => {
						self.report(identity, DispatchOutcome::Declined(MissKind::FactoryReturnedNull));
						Ok(None)
					}
					Err(error) => Err(self.classify_error(identity, error, cancel)),
				}
			}
			LookupResult::Miss(kind) => {
				self.report_miss(identity, kind);
				Ok(None)
			}
		};

		self.record_observed(identity);
		result
	}

	/// Step 2: replaces the caller's credentials with the view's own when
	/// the policy demands it or the caller supplied none; fills in culture
	/// fields only when absent.
	fn apply_options_filter(&self, options: &mut RequestOptions) {
		let use_view_credentials = matches!(self.creds_policy, CredentialsPolicy::FilterOverridesRequest)
			|| options.client_credentials.is_empty();
		if use_view_credentials {
			options.client_credentials = self.credentials.clone();
		}
		options.fill_missing_culture_from(self.culture.as_deref(), self.ui_culture.as_deref());
	}

	/// Step 3: runs the lookup engine, retrying once after a best-effort
	/// host activation on `FactoryNotProffered`.
	async fn resolve_with_host_activation(&self, identity: &Identity, entered_via_remote_facade: bool) -> LookupResult {
		let first = self.container.run_lookup(identity, self.audience, entered_via_remote_facade);
		let LookupResult::Miss(MissKind::FactoryNotProffered) = first else {
			return first;
		};
		let Some((_, registration)) = self.container.resolve_registration(identity) else {
			return first;
		};
		let Some(host_id) = registration.proffering_host_id else {
			return first;
		};
		if self.container.try_activate_host(host_id).await {
			self.container.run_lookup(identity, self.audience, entered_via_remote_facade)
		} else {
			first
		}
	}

	/// Wraps a factory/entry error as cancellation or as
	/// `ServiceActivationFailed`, per §7/§5's cancellation semantics.
	fn classify_error(&self, identity: &Identity, error: DynError, cancel: &CancellationToken) -> DispatchError {
		if cancel.is_cancelled() {
			return DispatchError::Cancelled;
		}
		self.report(identity, DispatchOutcome::Declined(MissKind::FactoryFaulted));
		DispatchError::ActivationFailed(ServiceActivationFailed::new(identity.clone(), error))
	}

	fn report_miss(&self, identity: &Identity, kind: MissKind) {
		let outcome = if kind == MissKind::NotRegistered {
			DispatchOutcome::DeclinedNotFound
		} else {
			DispatchOutcome::Declined(kind)
		};
		self.report(identity, outcome);
	}

	/// Step 6: emits a `tracing` event and forwards to the optional
	/// programmatic observer.
	fn report(&self, identity: &Identity, outcome: DispatchOutcome) {
		match outcome {
			DispatchOutcome::Fulfilled => {
				tracing::debug!(target: "brokerhub::dispatch", %identity, "fulfilled");
			}
			DispatchOutcome::Declined(kind) => {
				tracing::warn!(target: "brokerhub::dispatch", %identity, miss = %kind, "declined");
			}
			DispatchOutcome::DeclinedNotFound => {
				tracing::warn!(target: "brokerhub::dispatch", %identity, "not registered");
			}
		}
		if let Some(observer) = self.container.dispatch_observer() {
			observer.on_outcome(identity, outcome);
		}
	}

	/// Step 5: records `identity` as observed only after the operation
	/// returns, so a proffer change mid-request still notifies next time
	/// (§9 resolution (a)).
	fn record_observed(&self, identity: &Identity) {
		self.observed.lock().unwrap().insert(identity.clone());
	}

	/// Delivers an index-originated availability change to this view (§4.6
	/// steps 1-4), invoked by [`crate::fanout::Subscribers::publish`].
	pub(crate) async fn handle_index_change(&self, change: &IndexChange) {
		let event = {
			let registrations = self.container.registrations_read();
			let chaos = self.container.chaos_policy();
			let mut observed = self.observed.lock().unwrap();
			crate::fanout::compute_delivery(
				change,
				&mut observed,
				&registrations,
				&chaos,
				self.audience,
				self.container.is_client_of_exclusive_server(),
			)
		};
		if let Some(event) = event {
			self.dispatch_event(&event);
		}
	}

	/// Delivers a sub-broker-forwarded change to this view (§4.6 "Sub-
	/// broker variants also forward their inner broker's events").
	pub(crate) async fn handle_forwarded_change(&self, change: &ForwardedChange) {
		let affected = change.resolve_affected();
		let intersected: FxHashSet<_> = {
			let mut observed = self.observed.lock().unwrap();
			let hit: FxHashSet<_> = affected.iter().filter(|id| observed.contains(*id)).cloned().collect();
			for id in &hit {
				observed.remove(id);
			}
			hit
		};
		if intersected.is_empty() {
			return;
		}
		self.dispatch_event(&AvailabilityEvent {
			impacted: intersected,
			other_impacted: change.other_impacted,
		});
	}

	/// Invokes every registered handler in turn (§4.6 step 5). A panicking
	/// handler is the caller's bug, not this dispatcher's to recover from;
	/// well-behaved handlers log their own faults rather than propagate.
	fn dispatch_event(&self, event: &AvailabilityEvent) {
		for handler in self.subscribers.lock().unwrap().values() {
			handler(event);
		}
	}
}

/// A thin remote-facing facade over a [`View`] (§4.5, §6): the surface a
/// named-pipe IPC server would expose to out-of-process clients.
pub struct RemoteFacade {
	view: Arc<View>,
	pending: Mutex<FxHashMap<u64, CancellationToken>>,
	next_request_id: AtomicU64,
}

impl RemoteFacade {
	fn new(view: Arc<View>) -> Self {
		Self {
			view,
			pending: Mutex::new(FxHashMap::default()),
			next_request_id: AtomicU64::new(1),
		}
	}

	/// Establishes the logical session; rejects clients that do not
	/// advertise pipe-based transport (§4.5).
	pub async fn handshake(&self, metadata: &ClientMetadata) -> Result<(), RemoteBrokerError> {
		if metadata.advertises_pipe_transport {
			Ok(())
		} else {
			Err(RemoteBrokerError::HandshakeRejected("client does not advertise pipe transport".into()))
		}
	}

	/// Requests a channel for `identity` (§4.5, §6). An absent result means
	/// "no service"; entries reached through this facade are subject to
	/// `DenyFromRemote` chaos decisions (§4.7).
	pub async fn request_service_channel(
		&self,
		identity: &Identity,
		options: &RequestOptions,
	) -> Result<Option<RemoteChannelInfo>, RemoteBrokerError> {
		let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
		let cancel = CancellationToken::new();
		self.pending.lock().unwrap().insert(request_id, cancel.clone());

		let result = self
			.view
			.dispatch_pipe(identity, options.clone(), &cancel, true)
			.await;
		self.pending.lock().unwrap().remove(&request_id);

		match result {
			Ok(Some(_pipe)) => Ok(Some(RemoteChannelInfo {
				request_id,
				pipe_name: format!("brokerhub-{request_id}"),
				mx_channel_id: None,
			})),
			Ok(None) => Ok(None),
			Err(DispatchError::Cancelled) => Ok(None),
			Err(DispatchError::ActivationFailed(inner)) => {
				Err(RemoteBrokerError::ConnectionFailed(inner.to_string()))
			}
		}
	}

	/// Cancels a previously requested channel (§4.5, §6). A stale or
	/// already-completed request id is a no-op.
	pub async fn cancel_service_request(&self, request_id: u64) {
		if let Some(cancel) = self.pending.lock().unwrap().remove(&request_id) {
			cancel.cancel();
		}
	}
}

/// Validates that a connecting IPC client's process id matches the one
/// carried in the activation arguments under the well-known
/// `__servicehub__HostProcessId` key (§4.5 "IPC client validation", §6).
pub const HOST_PROCESS_ID_KEY: &str = "__servicehub__HostProcessId";

/// Error returned by [`validate_activation_pid`].
#[derive(Debug, thiserror::Error)]
pub enum PeerCredentialError {
	/// The activation arguments carried no PID to validate against.
	#[error("no {HOST_PROCESS_ID_KEY} in activation arguments")]
	Missing,
	/// The value present was not a valid decimal process id.
	#[error("invalid process id in activation arguments: {0}")]
	Malformed(String),
	/// The connecting client's pid did not match.
	#[error("peer pid {actual} does not match expected pid {expected}")]
	Mismatch {
		/// The pid carried in the activation arguments.
		expected: u32,
		/// The pid actually observed on the connection.
		actual: u32,
	},
}

/// Checks `options.activation_arguments[HOST_PROCESS_ID_KEY]` against
/// `actual_pid`, the process id observed on the accepted connection.
pub fn validate_activation_pid(options: &RequestOptions, actual_pid: u32) -> Result<(), PeerCredentialError> {
	let raw = options
		.activation_arguments
		.get(HOST_PROCESS_ID_KEY)
		.ok_or(PeerCredentialError::Missing)?;
	let expected: u32 = raw.parse().map_err(|_| PeerCredentialError::Malformed(raw.clone()))?;
	if expected == actual_pid {
		Ok(())
	} else {
		Err(PeerCredentialError::Mismatch { expected, actual: actual_pid })
	}
}

/// Reads the process id of the peer on the other end of a connected
/// socket, for the IPC client validation of §4.5/§6.
pub trait PeerCredential {
	/// Returns the connecting client's process id.
	fn peer_pid(&self) -> std::io::Result<u32>;
}

#[cfg(all(feature = "unix-ipc", target_os = "linux"))]
impl PeerCredential for std::os::unix::net::UnixStream {
	fn peer_pid(&self) -> std::io::Result<u32> {
		use std::os::unix::io::AsRawFd;

		let fd = self.as_raw_fd();
		let mut cred = libc::ucred { pid: 0, uid: 0, gid: 0 };
		let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
		// SAFETY: `fd` is a valid, open socket owned by `self` for the
		// duration of this call; `cred`/`len` describe a correctly sized
		// buffer for `SO_PEERCRED`.
		let rc = unsafe {
			libc::getsockopt(
				fd,
				libc::SOL_SOCKET,
				libc::SO_PEERCRED,
				std::ptr::addr_of_mut!(cred).cast(),
				&mut len,
			)
		};
		if rc != 0 {
			return Err(std::io::Error::last_os_error());
		}
		Ok(cred.pid as u32)
	}
}
