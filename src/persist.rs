//! The durability boundary for term and vote state.
//!
//! Raft's election safety rests on two values surviving restarts: the highest term a server has
//! seen and the candidate it voted for in that term. A [`StableStore`] holds them; the node saves
//! through it *before* sending any message that depends on them, so a crash between deciding and
//! replying can never produce a second vote in the same term. A failed save is fatal for the
//! node: the operation that triggered it returns an error and no message is produced.

use crate::message::Term;

pub mod memory;

/// The values a server must persist before answering any RPC that depends on them.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HardState<N> {
    /// The highest leadership term this server has seen.
    pub current_term: Term,

    /// The candidate this server voted for in `current_term`, if any.
    pub voted_for: Option<N>,
}

// Manual `Default` avoids the spurious `N: Default` bound a derive would impose;
// `voted_for` always defaults to `None`.
impl<N> Default for HardState<N> {
    fn default() -> Self {
        HardState {
            current_term: Term::default(),
            voted_for: None,
        }
    }
}

/// An interface to durable storage of a node's [`HardState`].
///
/// An `Ok` return from [`save`](Self::save) means the state will be visible to
/// [`load`](Self::load) after a restart.
pub trait StableStore<N> {
    /// The error type returned by fallible operations.
    type Error;

    /// Durably replaces the stored hard state.
    ///
    /// # Errors
    ///
    /// If the state could not be stored durably, an error is returned.
    fn save(&mut self, state: &HardState<N>) -> Result<(), Self::Error>;

    /// Returns the stored hard state, or `None` if nothing has ever been saved.
    ///
    /// # Errors
    ///
    /// If the store could not be read, an error is returned.
    fn load(&mut self) -> Result<Option<HardState<N>>, Self::Error>;
}
