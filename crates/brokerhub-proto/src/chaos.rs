//! Fault-injection ("chaos") JSON schema (§4.7, §6).
//!
//! ```json
//! { "brokeredServices": { "<name>[/<version>]": { "availability": "allowAll|denyAll|denyRemote|denyFromRemote" } } }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root of the chaos policy JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaosFile {
	/// Per-identity overrides, keyed by `"name"` or `"name/major.minor.patch"`.
	#[serde(rename = "brokeredServices", default)]
	pub brokered_services: HashMap<String, ChaosEntry>,
}

/// One identity's chaos override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosEntry {
	/// The configured availability behavior.
	pub availability: ChaosAvailability,
}

/// The four availability behaviors a chaos entry can request (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChaosAvailability {
	/// No-op: behave as if unconfigured.
	AllowAll,
	/// Deny regardless of path.
	DenyAll,
	/// Deny when the winning entry would be a remote source.
	DenyRemote,
	/// Deny only requests entering through the remote IPC facade.
	DenyFromRemote,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_documented_schema() {
		let json = r#"{
			"brokeredServices": {
				"Svc/1.0.0": { "availability": "denyFromRemote" },
				"Other": { "availability": "denyAll" }
			}
		}"#;
		let file: ChaosFile = serde_json::from_str(json).unwrap();
		assert_eq!(file.brokered_services.len(), 2);
		assert_eq!(
			file.brokered_services["Svc/1.0.0"].availability,
			ChaosAvailability::DenyFromRemote
		);
	}

	#[test]
	fn missing_section_defaults_to_empty() {
		let file: ChaosFile = serde_json::from_str("{}").unwrap();
		assert!(file.brokered_services.is_empty());
	}
}
