//! Process-local brokered-service container: registration, the lookup &
//! precedence engine, per-client views, availability fan-out, and fault
//! injection.
//!
//! Callers interact only with [`View`] (via [`Container::get_full_access_view`]
//! or [`Container::get_limited_access_view`]); the container coordinates
//! registration, proffering, and the background delivery of availability
//! events to every live view.

#![warn(missing_docs)]

pub mod chaos;
pub mod container;
pub mod contracts;
pub mod entry;
pub mod error;
pub mod fanout;
pub mod index;
pub mod lookup;
pub mod pipe;
pub mod registration;
pub mod view;

pub use container::{Container, ContainerBuilder, HostActivator, ProfferHandle};
pub use entry::{
	FactoryKind, InProcessFactoryEntry, LocalSubBrokerEntry, ProfferedEntryOps, RemoteBrokerEntry,
	SubBrokerBackend, ViewIntrinsicEntry,
};
pub use error::{ChaosLoadError, DispatchError, ProfferError, ServiceActivationFailed};
pub use fanout::AvailabilityEvent;
pub use registration::{HostId, Registration, RegistrationTable};
pub use view::{CredentialsPolicy, RemoteFacade, SubscriptionId, View};
