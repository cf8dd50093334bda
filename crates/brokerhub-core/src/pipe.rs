//! Duplex byte pipe: the transport-agnostic channel handed back by
//! `GetPipe` (§4.3), built on an in-process `tokio::io::duplex` pair.

use tokio::io::DuplexStream;

/// One half of a bidirectional byte pipe.
///
/// The "inner" half is handed to the RPC layer (out of scope here, §1) to
/// construct a server-side connection; the "outer" half is returned to the
/// caller of `GetPipe`.
pub struct DuplexPipe(pub DuplexStream);

impl std::fmt::Debug for DuplexPipe {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DuplexPipe").finish_non_exhaustive()
	}
}

/// Creates a connected pair of duplex pipes: `(outer, inner)`.
///
/// `buffer` bounds the in-memory channel capacity in bytes, matching the
/// way `tokio::io::duplex` is used elsewhere for in-process transports.
#[must_use]
pub fn pipe_pair(buffer: usize) -> (DuplexPipe, DuplexPipe) {
	let (a, b) = tokio::io::duplex(buffer);
	(DuplexPipe(a), DuplexPipe(b))
}

/// Default buffer size for pipes created without an explicit size.
pub const DEFAULT_PIPE_BUFFER: usize = 64 * 1024;
