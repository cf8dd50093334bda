//! Diagnostics JSON schema (§6), emitted on demand by a container.
//!
//! ```json
//! { "perspectiveAudience": "<audience>",
//!   "activeRemoteSources": ["<source>", ...],
//!   "localServicesBlockedDueToExclusiveClient": bool,
//!   "brokeredServices": [
//!     { "name", "version", "audience", "allowGuestClients",
//!       "profferingPackage", "profferedLocally", "activeSource",
//!       "localSourceBlockedByExclusiveClient", "includedByRemoteSourceManifest" } ] }
//! ```

use serde::Serialize;

/// Root diagnostics document for one view's perspective.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
	/// Rendering of the audience this report was generated for.
	pub perspective_audience: String,
	/// Remote sources with at least one active proffer.
	pub active_remote_sources: Vec<String>,
	/// Whether this perspective is subject to §4.4 step 5/6 hiding.
	pub local_services_blocked_due_to_exclusive_client: bool,
	/// Per-identity detail rows.
	pub brokered_services: Vec<BrokeredServiceDiagnostics>,
}

/// One identity's row in a [`DiagnosticsReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokeredServiceDiagnostics {
	/// Service name.
	pub name: String,
	/// Service version, rendered, or `None` for a versionless registration.
	pub version: Option<String>,
	/// Rendering of the registration's audience.
	pub audience: String,
	/// The registration's `allow-guest-clients` flag.
	pub allow_guest_clients: bool,
	/// The host id that proffered this registration, if known.
	pub proffering_package: Option<String>,
	/// Whether any `SameProcess`/`SameMachine` source currently proffers it.
	pub proffered_locally: bool,
	/// The source that would currently win a lookup, if any.
	pub active_source: Option<String>,
	/// Whether a local proffer exists but is hidden by an exclusive client/remote host.
	pub local_source_blocked_by_exclusive_client: bool,
	/// Whether a remote broker's manifest reports this identity as included.
	pub included_by_remote_source_manifest: bool,
}
