//! A naive in-memory implementation of [`StableStore`](super::StableStore), primarily for
//! testing. It is durable only for the lifetime of the process; real deployments implement
//! [`StableStore`](super::StableStore) over actual storage.

use super::{HardState, StableStore};

/// A naive in-memory implementation of [`StableStore`](super::StableStore), primarily for
/// testing.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStable<N> {
    state: Option<HardState<N>>,
}

impl<N> InMemoryStable<N> {
    /// Constructs an empty store, as on a server's first boot.
    pub fn new() -> Self {
        Self { state: None }
    }

    /// Constructs a store already holding `state`, as after a restart.
    pub fn with_state(state: HardState<N>) -> Self {
        Self { state: Some(state) }
    }
}

impl<N: Clone> StableStore<N> for InMemoryStable<N> {
    type Error = ();

    fn save(&mut self, state: &HardState<N>) -> Result<(), Self::Error> {
        self.state = Some(state.clone());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<HardState<N>>, Self::Error> {
        Ok(self.state.clone())
    }
}
