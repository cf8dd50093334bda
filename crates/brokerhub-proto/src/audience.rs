//! Consumer/registration audience bit set (§3).

use bitflags::bitflags;

bitflags! {
	/// The fixed set of audience elements a registration can be exposed to,
	/// or a consumer can present.
	///
	/// `SAME_MACHINE` implies `PROCESS` for the purpose of "local consumer"
	/// (see [`Audience::is_local`]); callers that construct audiences by hand
	/// should set both bits if they mean "same machine", matching how the
	/// rest of this crate interprets the set.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct Audience: u8 {
		/// Same process as the container.
		const PROCESS = 0b0000_0001;
		/// Another process on the same machine.
		const SAME_MACHINE = 0b0000_0010;
		/// A trusted remote client that exclusively owns this process's services.
		const TRUSTED_EXCLUSIVE_CLIENT = 0b0000_0100;
		/// A Live Share guest.
		const LIVE_SHARE_GUEST = 0b0000_1000;
		/// A trusted remote server this process is exclusively hosted by.
		const TRUSTED_EXCLUSIVE_SERVER = 0b0001_0000;
		/// Any client using the public SDK.
		const PUBLIC_SDK = 0b0010_0000;
	}
}

impl Audience {
	/// "Local consumer" per §3: non-empty and a subset of
	/// `{Process, SameMachine}`.
	#[must_use]
	pub fn is_local(self) -> bool {
		let local_bits = Self::PROCESS.union(Self::SAME_MACHINE);
		!self.is_empty() && local_bits.contains(self)
	}

	/// True iff every bit `self` (as a consumer) presents is permitted by
	/// `registered` (as a registration's audience): `self ⊆ registered`.
	#[must_use]
	pub fn is_exposed_to(self, registered: Audience) -> bool {
		registered.contains(self)
	}

	/// The empty set, meaning "no filter" on a view.
	#[must_use]
	pub fn unfiltered() -> Self {
		Self::empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn local_consumer_is_nonempty_subset_of_process_or_same_machine() {
		assert!(Audience::PROCESS.is_local());
		assert!(Audience::SAME_MACHINE.is_local());
		assert!((Audience::PROCESS | Audience::SAME_MACHINE).is_local());
		assert!(!Audience::empty().is_local());
		assert!(!Audience::TRUSTED_EXCLUSIVE_CLIENT.is_local());
		assert!(!(Audience::PROCESS | Audience::TRUSTED_EXCLUSIVE_CLIENT).is_local());
	}

	#[test]
	fn exposed_to_is_subset_check() {
		let registered = Audience::PROCESS | Audience::SAME_MACHINE;
		assert!(Audience::PROCESS.is_exposed_to(registered));
		assert!(!Audience::TRUSTED_EXCLUSIVE_CLIENT.is_exposed_to(registered));
	}
}
