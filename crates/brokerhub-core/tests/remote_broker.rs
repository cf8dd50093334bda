//! Direct tests of `RemoteBrokerEntry` against the `LoopbackRemoteBroker`
//! double (§4.3 "RemoteBroker... lazily establishes its connection on first
//! use and reuses it afterward").

mod support;

use std::sync::Arc;

use brokerhub_core::contracts::RequestOptions;
use brokerhub_core::entry::{ProfferedEntryOps, RemoteBrokerEntry};
use brokerhub_proto::{Identity, Source};
use support::LoopbackRemoteBroker;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn handshake_happens_once_and_is_reused_across_calls() {
	let svc = Identity::versionless("Svc");
	let remote = Arc::new(LoopbackRemoteBroker::serving([svc.clone()]));
	let remote_ref = remote.clone();
	let entry = RemoteBrokerEntry::new(remote, [svc.clone()].into_iter().collect(), Source::TrustedServer);
	let cancel = CancellationToken::new();

	entry.get_proxy(&svc, &RequestOptions::default(), None, &cancel).await.unwrap();
	entry.get_proxy(&svc, &RequestOptions::default(), None, &cancel).await.unwrap();

	assert_eq!(remote_ref.handshake_count(), 1, "handshake must only run on the first call");
	assert_eq!(remote_ref.requested(), vec![svc.clone(), svc]);
}

#[tokio::test]
async fn rejected_handshake_surfaces_as_an_error() {
	let svc = Identity::versionless("Svc");
	let remote = Arc::new(LoopbackRemoteBroker::rejecting_handshake());
	let entry = RemoteBrokerEntry::new(remote, [svc.clone()].into_iter().collect(), Source::TrustedServer);
	let cancel = CancellationToken::new();

	let result = entry.get_proxy(&svc, &RequestOptions::default(), None, &cancel).await;
	assert!(result.is_err());

	let result = entry.get_pipe(&svc, &RequestOptions::default(), None, &cancel).await;
	assert!(result.is_err());
}

#[tokio::test]
async fn unserved_identity_resolves_to_none_without_erroring() {
	let served = Identity::versionless("Served");
	let unserved = Identity::versionless("Unserved");
	let remote = Arc::new(LoopbackRemoteBroker::serving([served]));
	let entry = RemoteBrokerEntry::new(remote, [unserved.clone()].into_iter().collect(), Source::TrustedServer);
	let cancel = CancellationToken::new();

	let result = entry.get_proxy(&unserved, &RequestOptions::default(), None, &cancel).await.unwrap();
	assert!(result.is_none());
}

#[tokio::test]
async fn served_identity_resolves_to_a_service_object() {
	let svc = Identity::versionless("Svc");
	let remote = Arc::new(LoopbackRemoteBroker::serving([svc.clone()]));
	let entry = RemoteBrokerEntry::new(remote, [svc.clone()].into_iter().collect(), Source::TrustedServer);
	let cancel = CancellationToken::new();

	let result = entry.get_proxy(&svc, &RequestOptions::default(), None, &cancel).await.unwrap();
	assert!(result.is_some());

	let pipe = entry.get_pipe(&svc, &RequestOptions::default(), None, &cancel).await.unwrap();
	assert!(pipe.is_some());
}

#[tokio::test]
async fn cancelled_token_short_circuits_before_any_remote_call() {
	let svc = Identity::versionless("Svc");
	let remote = Arc::new(LoopbackRemoteBroker::serving([svc.clone()]));
	let remote_ref = remote.clone();
	let entry = RemoteBrokerEntry::new(remote, [svc.clone()].into_iter().collect(), Source::TrustedServer);
	let cancel = CancellationToken::new();
	cancel.cancel();

	let result = entry.get_proxy(&svc, &RequestOptions::default(), None, &cancel).await.unwrap();
	assert!(result.is_none());
	assert_eq!(remote_ref.handshake_count(), 0, "a cancelled request must not even handshake");
}
