//! Container facade (C8, §4.8): holds the lock-guarded tables, the fan-out
//! subscriber list, and the construction entry points for views.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use brokerhub_proto::{Audience, Identity};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::chaos::ChaosPolicy;
use crate::contracts::{
	AuthorizationService, DispatchObserver, DynError, RequestOptions, RpcDescriptor, ServiceObject,
	ViewIntrinsicFactory,
};
use crate::entry::{ProfferedEntryOps, ViewIntrinsicEntry};
use crate::error::{ChaosLoadError, ProfferError};
use crate::fanout::Subscribers;
use crate::index::ProfferIndex;
use crate::lookup::{lookup, LookupContext, LookupResult};
use crate::registration::{HostId, Registration, RegistrationTable};
use crate::view::{CredentialsPolicy, View};

/// A host-activation callback, invoked at most once per [`HostId`] (§3
/// `loaded_hosts`, §4.5 step 3).
#[async_trait]
pub trait HostActivator: Send + Sync {
	/// Activates the host, proffering whatever it registers as a side
	/// effect. Best-effort: a failure is logged and the request that
	/// triggered it still resolves to `FactoryNotProffered`.
	async fn activate(&self, host_id: HostId) -> Result<(), DynError>;
}

/// The process-local brokered-service container (C8).
///
/// Holds one lock per table (§5 "Mutation discipline"): readers take a
/// snapshot under a brief lock and then run the lookup algorithm, construct
/// pipes, or invoke factories entirely outside it. No lock is ever held
/// across an `.await`.
pub struct Container {
	registrations: RwLock<RegistrationTable>,
	index: ProfferIndex,
	chaos: ArcSwap<ChaosPolicy>,
	subscribers: Subscribers,
	host_activators: RwLock<FxHashMap<HostId, Arc<dyn HostActivator>>>,
	loaded_hosts: Mutex<FxHashSet<HostId>>,
	is_client_of_exclusive_server: AtomicBool,
	authorization_service: Option<Arc<dyn AuthorizationService>>,
	observer: Option<Arc<dyn DispatchObserver>>,
	next_host_id: AtomicU64,
	intrinsic_handles: Mutex<Vec<ProfferHandle>>,
}

impl std::fmt::Debug for Container {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Container")
			.field("is_client_of_exclusive_server", &self.is_client_of_exclusive_server.load(Ordering::Relaxed))
			.finish_non_exhaustive()
	}
}

/// Builds a [`Container`] (§4.8, §9 "composition root").
#[derive(Default)]
pub struct ContainerBuilder {
	is_client_of_exclusive_server: bool,
	authorization_service: Option<Arc<dyn AuthorizationService>>,
	observer: Option<Arc<dyn DispatchObserver>>,
}

impl ContainerBuilder {
	/// Sets whether this container is itself a client of an exclusive
	/// remote host (§3 "Exclusive remote host").
	#[must_use]
	pub fn is_client_of_exclusive_server(mut self, value: bool) -> Self {
		self.is_client_of_exclusive_server = value;
		self
	}

	/// Installs the external authorization service consulted by §4.3's
	/// guest-client precondition.
	#[must_use]
	pub fn authorization_service(mut self, service: Arc<dyn AuthorizationService>) -> Self {
		self.authorization_service = Some(service);
		self
	}

	/// Installs the pluggable telemetry hook of §4.5 step 6.
	#[must_use]
	pub fn dispatch_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
		self.observer = Some(observer);
		self
	}

	/// Builds the container and installs its two intrinsic services (§4.8):
	/// a per-view manifest and a per-view missing-service analyzer.
	#[must_use]
	pub fn build(self) -> Arc<Container> {
		let container = Arc::new(Container {
			registrations: RwLock::new(RegistrationTable::new()),
			index: ProfferIndex::new(),
			chaos: ArcSwap::from_pointee(ChaosPolicy::empty()),
			subscribers: Subscribers::new(),
			host_activators: RwLock::new(FxHashMap::default()),
			loaded_hosts: Mutex::new(FxHashSet::default()),
			is_client_of_exclusive_server: AtomicBool::new(self.is_client_of_exclusive_server),
			authorization_service: self.authorization_service,
			observer: self.observer,
			next_host_id: AtomicU64::new(0),
			intrinsic_handles: Mutex::new(Vec::new()),
		});
		container.install_intrinsic_services();
		container
	}
}

/// A handle returned from [`Container::proffer`]. Disposing it (explicitly
/// via [`ProfferHandle::dispose`] or implicitly on drop) removes the entry
/// from the index and publishes the resulting availability change (§3
/// "Proffered entries are... removed by disposing the handle").
pub struct ProfferHandle {
	container: Weak<Container>,
	entry: Arc<dyn ProfferedEntryOps>,
	disposed: AtomicBool,
}

impl ProfferHandle {
	/// Disposes this handle. Idempotent (§9 resolution (b)).
	pub fn dispose(&self) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.entry.dispose();
		if let Some(container) = self.container.upgrade() {
			container.unproffer(&self.entry);
		}
	}
}

impl Drop for ProfferHandle {
	fn drop(&mut self) {
		self.dispose();
	}
}

impl Container {
	/// Starts building a container.
	#[must_use]
	pub fn builder() -> ContainerBuilder {
		ContainerBuilder::default()
	}

	/// Registers a batch of services (§4.8 `RegisterServices`). Duplicate
	/// identities are ignored with a warning (§3).
	pub fn register_services(&self, services: impl IntoIterator<Item = (Identity, Registration)>) {
		let mut table = self.registrations.write();
		for (identity, registration) in services {
			if !table.register(identity.clone(), registration) {
				tracing::warn!(%identity, "re-registration of an already-registered identity ignored");
			}
		}
	}

	/// Allocates a fresh [`HostId`] for a newly registered host.
	#[must_use]
	pub fn allocate_host_id(&self) -> HostId {
		HostId(self.next_host_id.fetch_add(1, Ordering::SeqCst))
	}

	/// Installs the callback invoked the first time a registration carrying
	/// `host_id` misses a lookup (§4.5 step 3 "host activation").
	pub fn register_host_activator(&self, host_id: HostId, activator: Arc<dyn HostActivator>) {
		self.host_activators.write().insert(host_id, activator);
	}

	/// Proffers `entry` (§4.2, §4.8). On success, publishes the resulting
	/// availability change to every subscribed view (§4.6) and returns a
	/// handle whose disposal removes the entry again.
	pub fn proffer(
		self: &Arc<Self>,
		entry: Arc<dyn ProfferedEntryOps>,
	) -> Result<ProfferHandle, ProfferError> {
		let change = {
			let registrations = self.registrations.read();
			self.index.insert(&registrations, entry.clone())?
		};
		self.subscribers.publish(change);
		Ok(ProfferHandle {
			container: Arc::downgrade(self),
			entry,
			disposed: AtomicBool::new(false),
		})
	}

	fn unproffer(&self, entry: &Arc<dyn ProfferedEntryOps>) {
		let change = self.index.remove(entry);
		self.subscribers.publish(change);
	}

	/// A view with no audience filter and direct local precedence (§3 "the
	/// empty set on a view means no filter"). Intended for the hosting
	/// process's own privileged callers.
	#[must_use]
	pub fn get_full_access_view(self: &Arc<Self>) -> Arc<View> {
		let view = View::new(
			self.clone(),
			Audience::empty(),
			FxHashMap::default(),
			CredentialsPolicy::RequestOverridesFilter,
			None,
			None,
		);
		self.subscribers.add(&view);
		view
	}

	/// A view scoped to `audience`, with the given credentials and culture
	/// (§4.8 `GetLimitedAccessView`).
	#[must_use]
	pub fn get_limited_access_view(
		self: &Arc<Self>,
		audience: Audience,
		credentials: FxHashMap<String, String>,
		creds_policy: CredentialsPolicy,
		culture: Option<String>,
		ui_culture: Option<String>,
	) -> Arc<View> {
		let view = View::new(self.clone(), audience, credentials, creds_policy, culture, ui_culture);
		self.subscribers.add(&view);
		view
	}

	/// The ephemeral `Process`-audience view a factory is invoked with
	/// (§4.3 "a secure view... with the caller's credentials"). Not
	/// subscribed to availability notifications: it is used for exactly one
	/// factory invocation and then dropped.
	pub(crate) fn secure_view(self: &Arc<Self>, credentials: FxHashMap<String, String>) -> Arc<View> {
		View::new(
			self.clone(),
			Audience::PROCESS,
			credentials,
			CredentialsPolicy::FilterOverridesRequest,
			None,
			None,
		)
	}

	/// The installed authorization service, if any (§4.3).
	pub(crate) fn authorization_service(&self) -> Option<&Arc<dyn AuthorizationService>> {
		self.authorization_service.as_ref()
	}

	/// The installed telemetry observer, if any (§4.5 step 6).
	pub(crate) fn dispatch_observer(&self) -> Option<&Arc<dyn DispatchObserver>> {
		self.observer.as_ref()
	}

	/// A read guard over the registration table, for callers (views, fan-out)
	/// that need to run the lookup/fan-out algorithms directly.
	pub(crate) fn registrations_read(&self) -> RwLockReadGuard<'_, RegistrationTable> {
		self.registrations.read()
	}

	/// Versionless-fallback resolution of `identity` (§4.1), for host
	/// activation and diagnostics.
	pub(crate) fn resolve_registration(&self, identity: &Identity) -> Option<(Identity, Arc<Registration>)> {
		self.registrations.read().resolve(identity)
	}

	/// The current chaos policy snapshot.
	pub(crate) fn chaos_policy(&self) -> Arc<ChaosPolicy> {
		self.chaos.load_full()
	}

	/// Whether this container is a client of an exclusive remote host (§3).
	pub(crate) fn is_client_of_exclusive_server(&self) -> bool {
		self.is_client_of_exclusive_server.load(Ordering::Relaxed)
	}

	/// Runs the §4.4 lookup algorithm for `identity` against the current
	/// tables, from `consumer_audience`'s perspective.
	pub(crate) fn run_lookup(
		&self,
		identity: &Identity,
		consumer_audience: Audience,
		entered_via_remote_facade: bool,
	) -> LookupResult {
		let registrations = self.registrations.read();
		let chaos = self.chaos_policy();
		let snapshot = self.index.snapshot();
		let ctx = LookupContext {
			consumer_audience,
			is_client_of_exclusive_server: self.is_client_of_exclusive_server(),
			entered_via_remote_facade,
		};
		lookup(identity, ctx, &registrations, &snapshot, &chaos)
	}

	/// Attempts host activation for `host_id` at most once (§4.5 step 3,
	/// §3 `loaded_hosts`). Returns `true` if activation ran and succeeded,
	/// in which case the caller should retry its lookup.
	pub(crate) async fn try_activate_host(&self, host_id: HostId) -> bool {
		let already_attempted = {
			let mut loaded = self.loaded_hosts.lock();
			if loaded.contains(&host_id) {
				true
			} else {
				loaded.insert(host_id);
				false
			}
		};
		if already_attempted {
			return false;
		}
		let activator = self.host_activators.read().get(&host_id).cloned();
		let Some(activator) = activator else {
			return false;
		};
		match activator.activate(host_id).await {
			Ok(()) => true,
			Err(error) => {
				tracing::warn!(?host_id, %error, "host activation failed");
				false
			}
		}
	}

	/// Identities visible to `audience` (§4.8 manifest service): registered
	/// and exposed to it, regardless of whether anything currently proffers
	/// them.
	pub(crate) fn manifest_for(&self, audience: Audience) -> Vec<Identity> {
		self.registrations
			.read()
			.iter()
			.filter(|(_, registration)| registration.is_exposed_to(audience))
			.map(|(identity, _)| identity.clone())
			.collect()
	}

	/// Applies (or hot-reloads) a chaos policy file (§4.7, §4.8
	/// `ApplyChaosPolicy`).
	pub fn apply_chaos_policy(&self, path: &std::path::Path) -> Result<(), ChaosLoadError> {
		let policy = ChaosPolicy::load(path, &self.registrations.read())?;
		self.chaos.store(Arc::new(policy));
		Ok(())
	}

	/// Builds the §6 diagnostics JSON document from `perspective_audience`'s
	/// point of view.
	#[must_use]
	pub fn diagnostics(&self, perspective_audience: Audience) -> brokerhub_proto::diagnostics::DiagnosticsReport {
		use brokerhub_proto::diagnostics::{BrokeredServiceDiagnostics, DiagnosticsReport};
		use brokerhub_proto::MissKind;

		let registrations = self.registrations.read();
		let chaos = self.chaos_policy();
		let snapshot = self.index.snapshot();
		let ctx = LookupContext {
			consumer_audience: perspective_audience,
			is_client_of_exclusive_server: self.is_client_of_exclusive_server(),
			entered_via_remote_facade: false,
		};

		let mut rows = Vec::new();
		for (identity, registration) in registrations.iter() {
			let proffered_locally = brokerhub_proto::Source::local_preferred_order()
				.iter()
				.any(|source| snapshot.get(*source, identity).is_some());
			let result = lookup(identity, ctx, &registrations, &snapshot, &chaos);
			let (active_source, local_blocked) = match &result {
				LookupResult::Hit { entry, .. } => (Some(format!("{:?}", entry.source())), false),
				LookupResult::Miss(MissKind::LocalHiddenOnRemoteClient) => (None, true),
				LookupResult::Miss(_) => (None, false),
			};
			rows.push(BrokeredServiceDiagnostics {
				name: identity.name().to_string(),
				version: identity.version().map(|v| v.to_string()),
				audience: format!("{:?}", registration.audience),
				allow_guest_clients: registration.allow_guest_clients,
				proffering_package: registration.proffering_host_id.map(|id| format!("{id:?}")),
				proffered_locally,
				active_source,
				local_source_blocked_by_exclusive_client: local_blocked,
				included_by_remote_source_manifest: false,
			});
		}

		DiagnosticsReport {
			perspective_audience: format!("{perspective_audience:?}"),
			active_remote_sources: snapshot.active_remote_sources().map(|s| format!("{s:?}")).collect(),
			local_services_blocked_due_to_exclusive_client: self.is_client_of_exclusive_server(),
			brokered_services: rows,
		}
	}

	fn install_intrinsic_services(self: &Arc<Self>) {
		let manifest_identity = manifest_identity();
		let missing_identity = missing_service_analyzer_identity();
		let registration = || Registration {
			audience: Audience::all(),
			proffering_host_id: None,
			allow_guest_clients: true,
			extra_interface_names: Vec::new(),
		};

		self.register_services([(manifest_identity.clone(), registration()), (missing_identity.clone(), registration())]);

		let manifest_entry = Arc::new(ViewIntrinsicEntry::new(
			Arc::new(ManifestFactory),
			Arc::new(IntrinsicDescriptor(manifest_identity)),
			Arc::new(registration()),
			Arc::downgrade(self),
		));
		let missing_entry = Arc::new(ViewIntrinsicEntry::new(
			Arc::new(MissingServiceAnalyzerFactory),
			Arc::new(IntrinsicDescriptor(missing_identity)),
			Arc::new(registration()),
			Arc::downgrade(self),
		));

		let mut handles = self.intrinsic_handles.lock();
		if let Ok(handle) = self.proffer(manifest_entry) {
			handles.push(handle);
		}
		if let Ok(handle) = self.proffer(missing_entry) {
			handles.push(handle);
		}
	}
}

/// The identity of the per-view manifest intrinsic service (§4.8).
#[must_use]
pub fn manifest_identity() -> Identity {
	Identity::versionless("brokerhub.manifest")
}

/// The identity of the per-view missing-service analyzer intrinsic service
/// (§4.8).
#[must_use]
pub fn missing_service_analyzer_identity() -> Identity {
	Identity::versionless("brokerhub.missing-service-analyzer")
}

struct IntrinsicDescriptor(Identity);

impl RpcDescriptor for IntrinsicDescriptor {
	fn identity(&self) -> &Identity {
		&self.0
	}
}

/// The value handed back by the manifest intrinsic service: the identities
/// visible to the requesting view's audience.
#[derive(Debug, Clone)]
pub struct ServiceManifest {
	/// Identities registered and exposed to the requesting view's audience.
	pub identities: Vec<Identity>,
}

struct ManifestFactory;

#[async_trait]
impl ViewIntrinsicFactory for ManifestFactory {
	async fn create(
		&self,
		requesting_view: &View,
		_identity: &Identity,
		_options: &RequestOptions,
		_broker: Arc<View>,
		_cancel: &tokio_util::sync::CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		let manifest = ServiceManifest {
			identities: requesting_view.container().manifest_for(requesting_view.audience()),
		};
		Ok(Some(Arc::new(manifest) as ServiceObject))
	}
}

/// The value handed back by the missing-service-analyzer intrinsic service:
/// a bound callable that replays the lookup engine for a given identity from
/// the requesting view's perspective (§4.8).
pub struct MissingServiceAnalyzer {
	container: Arc<Container>,
	audience: Audience,
}

impl MissingServiceAnalyzer {
	/// Explains why `identity` would (or wouldn't) resolve right now, from
	/// the perspective this analyzer was created for.
	#[must_use]
	pub fn explain(&self, identity: &Identity) -> brokerhub_proto::MissKind {
		match self.container.run_lookup(identity, self.audience, false) {
			LookupResult::Hit { .. } => brokerhub_proto::MissKind::NoExplanation,
			LookupResult::Miss(kind) => kind,
		}
	}
}

struct MissingServiceAnalyzerFactory;

#[async_trait]
impl ViewIntrinsicFactory for MissingServiceAnalyzerFactory {
	async fn create(
		&self,
		requesting_view: &View,
		_identity: &Identity,
		_options: &RequestOptions,
		_broker: Arc<View>,
		_cancel: &tokio_util::sync::CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		let analyzer = MissingServiceAnalyzer {
			container: requesting_view.container().clone(),
			audience: requesting_view.audience(),
		};
		Ok(Some(Arc::new(analyzer) as ServiceObject))
	}
}
