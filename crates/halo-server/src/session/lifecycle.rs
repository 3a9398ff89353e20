//! Connection lifecycle state machine.
//!
//! Pure and synchronous: the session actor feeds it connect, disconnect and
//! backoff-expiry events and acts on the returned [`Transition`]. One
//! instance tracks the glasses link; each TPA gets its own.
//!
//! ```text
//! Connecting ──connected──▶ Connected ──transient──▶ Reconnecting ──connected──▶ Connected
//!                              │                        │
//!                          permanent              attempts exhausted
//!                              ▼                        ▼
//!                       PermanentlyDisconnected ◀───────┘
//! ```

use std::time::Duration;

use halo_core::backoff::ReconnectPolicy;
use serde::Serialize;

use crate::websocket::connection::Disconnect;

/// Where a link is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Created, first socket not yet bound.
    Connecting,
    /// A socket is bound.
    Connected,
    /// Socket lost; waiting for the peer inside a backoff window.
    Reconnecting,
    /// Gone for good. Terminal.
    PermanentlyDisconnected,
}

/// What the caller must do after an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// A socket is bound. `resumed` is true when it ended a backoff window
    /// or replaced a live socket.
    Connected {
        /// Whether this is not the first socket.
        resumed: bool,
    },
    /// Arm a backoff timer for `delay`, tagged with the current generation.
    Reconnecting {
        /// Zero-based window index.
        attempt: u32,
        /// Window length.
        delay: Duration,
    },
    /// Tear down. Returned at most once per instance.
    Terminated {
        /// Why the link ended.
        reason: String,
    },
    /// Nothing to do.
    Ignored,
}

/// Lifecycle of one peer link.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    state: LinkState,
    attempts: u32,
    generation: u64,
    policy: ReconnectPolicy,
}

impl Lifecycle {
    /// New link in [`LinkState::Connecting`].
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: LinkState::Connecting,
            attempts: 0,
            generation: 0,
            policy,
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Backoff windows expired since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Tag for the currently armed backoff timer. Older tags are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the link is gone for good.
    pub fn is_terminal(&self) -> bool {
        self.state == LinkState::PermanentlyDisconnected
    }

    /// A socket was bound.
    pub fn on_connected(&mut self) -> Transition {
        let resumed = match self.state {
            LinkState::PermanentlyDisconnected => return Transition::Ignored,
            LinkState::Connecting => false,
            LinkState::Connected | LinkState::Reconnecting => true,
        };
        self.state = LinkState::Connected;
        self.attempts = 0;
        self.generation += 1;
        Transition::Connected { resumed }
    }

    /// The bound socket went away.
    pub fn on_disconnect(&mut self, disconnect: &Disconnect) -> Transition {
        match (self.state, disconnect) {
            (LinkState::PermanentlyDisconnected, _) => Transition::Ignored,
            (_, Disconnect::Permanent { reason }) => self.terminate(reason.clone()),
            (LinkState::Reconnecting, Disconnect::Transient { .. }) => Transition::Ignored,
            (LinkState::Connecting | LinkState::Connected, Disconnect::Transient { .. }) => {
                if self.policy.max_attempts == 0 {
                    return self.terminate("reconnection disabled".into());
                }
                self.state = LinkState::Reconnecting;
                self.attempts = 0;
                self.generation += 1;
                Transition::Reconnecting {
                    attempt: 0,
                    delay: self.policy.delay_for(0),
                }
            }
        }
    }

    /// The backoff timer tagged `generation` fired.
    pub fn on_backoff_expired(&mut self, generation: u64) -> Transition {
        if self.state != LinkState::Reconnecting || generation != self.generation {
            return Transition::Ignored;
        }
        self.attempts += 1;
        if self.policy.is_exhausted(self.attempts) {
            return self.terminate(format!(
                "no reconnection after {} attempts",
                self.attempts
            ));
        }
        self.generation += 1;
        Transition::Reconnecting {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        }
    }

    /// Force the terminal state.
    pub fn terminate(&mut self, reason: String) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }
        self.state = LinkState::PermanentlyDisconnected;
        self.generation += 1;
        Transition::Terminated { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }

    fn connected(max_attempts: u32) -> Lifecycle {
        let mut l = Lifecycle::new(policy(max_attempts));
        assert_eq!(l.on_connected(), Transition::Connected { resumed: false });
        l
    }

    #[test]
    fn transient_loss_opens_window() {
        let mut l = connected(3);
        assert_eq!(
            l.on_disconnect(&Disconnect::transient("network")),
            Transition::Reconnecting {
                attempt: 0,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(l.state(), LinkState::Reconnecting);
    }

    #[test]
    fn permanent_loss_skips_window() {
        let mut l = connected(3);
        assert_matches!(
            l.on_disconnect(&Disconnect::permanent("normal close")),
            Transition::Terminated { reason } if reason == "normal close"
        );
        assert!(l.is_terminal());
    }

    #[test]
    fn exhausting_attempts_terminates_exactly_once() {
        let mut l = connected(3);
        let _ = l.on_disconnect(&Disconnect::transient("network"));

        let mut terminated = 0;
        let mut delays = Vec::new();
        for _ in 0..6 {
            match l.on_backoff_expired(l.generation()) {
                Transition::Reconnecting { delay, .. } => delays.push(delay),
                Transition::Terminated { .. } => terminated += 1,
                _ => {}
            }
        }
        assert_eq!(terminated, 1);
        assert_eq!(delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);
        assert_eq!(l.attempts(), 3);
        assert!(l.is_terminal());
    }

    #[test]
    fn reconnect_resets_attempts() {
        let mut l = connected(5);
        let _ = l.on_disconnect(&Disconnect::transient("network"));
        let _ = l.on_backoff_expired(l.generation());
        let _ = l.on_backoff_expired(l.generation());
        assert_eq!(l.attempts(), 2);

        assert_eq!(l.on_connected(), Transition::Connected { resumed: true });
        assert_eq!(l.attempts(), 0);
        assert_eq!(
            l.on_disconnect(&Disconnect::transient("again")),
            Transition::Reconnecting {
                attempt: 0,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn stale_timer_is_ignored() {
        let mut l = connected(5);
        let _ = l.on_disconnect(&Disconnect::transient("network"));
        let stale = l.generation();
        let _ = l.on_connected();
        assert_eq!(l.on_backoff_expired(stale), Transition::Ignored);
        assert_eq!(l.state(), LinkState::Connected);
    }

    #[test]
    fn second_transient_loss_while_waiting_is_ignored() {
        let mut l = connected(5);
        let _ = l.on_disconnect(&Disconnect::transient("a"));
        assert_eq!(l.on_disconnect(&Disconnect::transient("b")), Transition::Ignored);
    }

    #[test]
    fn zero_attempts_terminates_on_first_loss() {
        let mut l = connected(0);
        assert_matches!(
            l.on_disconnect(&Disconnect::transient("network")),
            Transition::Terminated { .. }
        );
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut l = connected(5);
        let _ = l.terminate("shutdown".into());
        assert_eq!(l.on_connected(), Transition::Ignored);
        assert_eq!(l.on_disconnect(&Disconnect::permanent("x")), Transition::Ignored);
        assert_eq!(l.terminate("again".into()), Transition::Ignored);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_more_than_one_termination(events in proptest::collection::vec(0u8..4, 0..60), max in 0u32..6) {
                let mut l = Lifecycle::new(policy(max));
                let mut terminations = 0;
                for event in events {
                    let t = match event {
                        0 => l.on_connected(),
                        1 => l.on_disconnect(&Disconnect::transient("t")),
                        2 => l.on_disconnect(&Disconnect::permanent("p")),
                        _ => l.on_backoff_expired(l.generation()),
                    };
                    if matches!(t, Transition::Terminated { .. }) {
                        terminations += 1;
                    }
                    prop_assert!(l.attempts() <= max.max(1));
                }
                prop_assert!(terminations <= 1);
            }
        }
    }
}
