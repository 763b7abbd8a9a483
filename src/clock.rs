//! Tick-counting clocks for elections and heartbeats.
//!
//! The node is driven by a timer ticking at a fixed interval; these clocks count ticks down to
//! the two timeout events Raft needs. Each clock is owned by the role state it belongs to
//! (followers and candidates hold an [`ElectionClock`], leaders a [`HeartbeatClock`]), so a role
//! transition drops the old clock with the old role and a stale timeout can never fire across a
//! transition.

use rand_core::RngCore;

/// Counts down to an election timeout. Every reset draws a fresh duration uniformly from the
/// configured `[min, max]` tick range, so near-simultaneous timeouts across peers stay unlikely
/// and split votes resolve.
pub(crate) struct ElectionClock {
    remaining: u32,
    drawn: u32,
}

/// Counts down to the leader's next heartbeat round at a fixed interval.
pub(crate) struct HeartbeatClock {
    remaining: u32,
}

//
// ElectionClock impls
//

impl ElectionClock {
    pub fn new(random: &mut impl RngCore, min_ticks: u32, max_ticks: u32) -> Self {
        let drawn = draw(random, min_ticks, max_ticks);
        Self {
            remaining: drawn,
            drawn,
        }
    }

    /// Counts one tick down; returns true when the timeout fires.
    pub fn tick(&mut self) -> bool {
        match self.remaining.saturating_sub(1) {
            0 => true,
            remaining => {
                self.remaining = remaining;
                false
            }
        }
    }

    /// Restarts the countdown from the duration drawn at construction. Called when a legitimate
    /// leader is heard from or a vote is granted.
    pub fn restart(&mut self) {
        self.remaining = self.drawn;
    }
}

//
// HeartbeatClock impls
//

impl HeartbeatClock {
    /// A clock that fires on the first tick, for asserting authority immediately after winning an
    /// election.
    pub fn expired() -> Self {
        Self { remaining: 0 }
    }

    /// Counts one tick down; returns true when the interval elapses.
    pub fn tick(&mut self, interval_ticks: u32) -> bool {
        match self.remaining.saturating_sub(1) {
            0 => {
                self.remaining = interval_ticks;
                true
            }
            remaining => {
                self.remaining = remaining;
                false
            }
        }
    }
}

fn draw(random: &mut impl RngCore, min_ticks: u32, max_ticks: u32) -> u32 {
    let spread = max_ticks.saturating_sub(min_ticks).saturating_add(1);
    let random = random.next_u32().checked_rem(spread).unwrap_or(0);
    min_ticks.saturating_add(random)
}
