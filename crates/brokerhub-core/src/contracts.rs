//! Contracts consumed or exposed at the container's boundary (§6): the
//! factory shapes the core invokes, the RPC/remote-broker shapes it wraps,
//! and the authorization/observer hooks a host can plug in.
//!
//! These are deliberately thin — the transports behind them (a real RPC
//! codec, a named-pipe server, an external authorization service) are
//! external collaborators per §1 and are not implemented here.

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use brokerhub_proto::{Identity, MissKind};
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::pipe::DuplexPipe;
use crate::view::View;

/// A boxed, send+sync error, used wherever a factory or transport can fail
/// with an arbitrary cause that later gets wrapped in
/// [`crate::error::ServiceActivationFailed`].
pub type DynError = Box<dyn StdError + Send + Sync + 'static>;

/// An opaque constructed service instance.
///
/// The core never inspects this value; callers downcast it with
/// [`std::any::Any`] the way `GetProxy<T>` would in a fuller binding.
pub type ServiceObject = Arc<dyn std::any::Any + Send + Sync>;

/// Per-request options threaded through `GetPipe`/`GetProxy` (§4.5 step 2).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
	/// Credentials presented by the caller; may be overridden by the
	/// view's own credentials per the options filter.
	pub client_credentials: FxHashMap<String, String>,
	/// Locale for user-facing strings, if any.
	pub culture: Option<String>,
	/// Locale for UI strings, if any.
	pub ui_culture: Option<String>,
	/// Freeform activation arguments, including the
	/// `__servicehub__HostProcessId` key used by IPC client validation (§6).
	pub activation_arguments: FxHashMap<String, String>,
}

impl RequestOptions {
	/// Fills in `culture`/`ui_culture` only where absent, leaving explicit
	/// values from the caller untouched (§4.5 step 2, "fill in culture
	/// fields only when absent").
	pub fn fill_missing_culture_from(&mut self, view_culture: Option<&str>, view_ui_culture: Option<&str>) {
		if self.culture.is_none() {
			self.culture = view_culture.map(str::to_owned);
		}
		if self.ui_culture.is_none() {
			self.ui_culture = view_ui_culture.map(str::to_owned);
		}
	}
}

/// A factory that constructs a service instance given a secure view.
#[async_trait]
pub trait Factory: Send + Sync {
	/// Constructs the service, or returns `Ok(None)` if it declines.
	async fn create(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		broker: Arc<View>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError>;
}

/// Like [`Factory`], but receives ownership of an [`AuthorizationClient`]
/// when the registration required one (§4.3 "ownership of that client
/// passes to the factory").
///
/// `auth_client` is `None` when the authorization precondition was never
/// checked (guests allowed, or no authorization service configured): an
/// authorizing factory with nothing to own still runs, it simply receives
/// no ownership transfer.
#[async_trait]
pub trait AuthorizingFactory: Send + Sync {
	/// Constructs the service, taking ownership of `auth_client` when one
	/// was acquired.
	async fn create(
		&self,
		identity: &Identity,
		options: &RequestOptions,
		broker: Arc<View>,
		auth_client: Option<Box<dyn AuthorizationClient>>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError>;
}

/// A factory that additionally receives the requesting view (§4.3
/// `ViewIntrinsic`).
#[async_trait]
pub trait ViewIntrinsicFactory: Send + Sync {
	/// Constructs the service using the requesting view directly.
	async fn create(
		&self,
		requesting_view: &View,
		identity: &Identity,
		options: &RequestOptions,
		broker: Arc<View>,
		cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError>;
}

/// A client of the external authorization service (§4.3 authorization
/// precondition): answers the well-known "client-is-owner" check.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
	/// Returns whether the requesting client owns (is entitled to) the
	/// service being requested.
	async fn check_client_is_owner(&self) -> bool;
}

/// Acquires [`AuthorizationClient`]s on behalf of the dispatcher. Modeled
/// as a service reachable through the secure view, per §4.3.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
	/// Acquires a client scoped to `view`'s credentials.
	async fn client_for(&self, view: &View) -> Box<dyn AuthorizationClient>;
}

/// The RPC descriptor contract (§6): turns a raw pipe half into a typed
/// connection. Out of scope per §1; this is the seam a real RPC crate
/// would implement.
pub trait RpcDescriptor: Send + Sync {
	/// The identity this descriptor serves.
	fn identity(&self) -> &Identity;
	/// The client-side interface name the descriptor expects, if any.
	fn client_interface(&self) -> Option<&str> {
		None
	}
	/// Builds a server-side connection over the inner pipe half. A real
	/// implementation would hand this to an RPC codec; this default is a
	/// no-op suitable for tests and the demo CLI.
	fn construct_server_connection(&self, _inner: DuplexPipe) {}
}

/// Metadata a remote client presents during [`RemoteBrokerClient::handshake`].
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
	/// Whether the client advertises a pipe-based transport. Handshakes
	/// that don't are rejected per §4.5.
	pub advertises_pipe_transport: bool,
}

/// Channel info returned by a successful [`RemoteBrokerClient::request_service_channel`].
#[derive(Debug, Clone)]
pub struct RemoteChannelInfo {
	/// Opaque id identifying this request, used for cancellation.
	pub request_id: u64,
	/// Name of the named pipe the caller should connect to.
	pub pipe_name: String,
	/// Out-of-band multiplex channel id, if the transport uses one.
	pub mx_channel_id: Option<String>,
}

/// An error from a remote broker round-trip.
#[derive(Debug, thiserror::Error)]
pub enum RemoteBrokerError {
	/// The handshake was rejected (e.g. no pipe transport advertised).
	#[error("handshake rejected: {0}")]
	HandshakeRejected(String),
	/// The underlying RPC connection failed.
	#[error("remote broker connection failed: {0}")]
	ConnectionFailed(String),
}

/// The remote-broker contract (§6), consumed for remote sources and also
/// the shape a named-pipe IPC server would expose to out-of-process
/// clients.
#[async_trait]
pub trait RemoteBrokerClient: Send + Sync {
	/// Establishes the logical session; rejects clients without pipe transport.
	async fn handshake(&self, metadata: &ClientMetadata) -> Result<(), RemoteBrokerError>;

	/// Requests a channel for `identity`. An empty result means "no service".
	async fn request_service_channel(
		&self,
		identity: &Identity,
		options: &RequestOptions,
	) -> Result<Option<RemoteChannelInfo>, RemoteBrokerError>;

	/// Cancels a previously requested channel.
	async fn cancel_service_request(&self, request_id: u64);
}

/// Outcome reported to a [`DispatchObserver`] for every request (§4.5 step 6).
#[derive(Debug, Clone, Copy)]
pub enum DispatchOutcome {
	/// The request was satisfied by a proffered entry.
	Fulfilled,
	/// The request was declined for the given reason.
	Declined(MissKind),
	/// The request was declined because the identity is not registered at all.
	DeclinedNotFound,
}

/// A pluggable sink for dispatch outcomes (§4.5 step 6 "pluggable telemetry
/// hook"). The container also always emits a `tracing` event regardless of
/// whether an observer is installed.
pub trait DispatchObserver: Send + Sync {
	/// Called once per `GetPipe`/`GetProxy` call with its outcome.
	fn on_outcome(&self, identity: &Identity, outcome: DispatchOutcome);
}
