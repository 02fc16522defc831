use core::fmt;

/// An opaque identifier for a submitted task.
///
/// Returned by [`Server::submit`] and redeemed exactly once with
/// [`Server::await_result`]. Handles are recycled: once a result has been
/// retrieved, the same value may be issued to a later submission. At any
/// instant no two outstanding submissions share a handle.
///
/// With the `serde` feature a handle serializes as its bare integer value.
///
/// [`Server::submit`]: crate::Server::submit
/// [`Server::await_result`]: crate::Server::await_result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Handle(u64);

impl Handle {
    /// Reconstructs a handle from its raw value.
    ///
    /// A handle built this way is only meaningful to the server that issued
    /// the value; redeeming a value that was never issued fails with
    /// [`Error::UnknownHandle`].
    ///
    /// [`Error::UnknownHandle`]: crate::Error::UnknownHandle
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}
