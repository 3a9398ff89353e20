//! Render throttle for one display lane.
//!
//! At most one layout per interval. A request inside the interval arms a
//! single timer; further requests only mark the lane pending, and the timer
//! emits the latest state once.

use std::time::Duration;

use tokio::time::Instant;

/// What the caller should do with a render request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Render immediately.
    EmitNow,
    /// Arm a timer for this long, then call [`Throttle::on_timer`].
    Schedule(Duration),
    /// A timer is already armed; nothing to do.
    Coalesced,
}

/// Throttle state for one lane.
#[derive(Clone, Debug)]
pub struct Throttle {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: bool,
    armed: bool,
}

impl Throttle {
    /// Throttle allowing one render per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: false,
            armed: false,
        }
    }

    /// A render was requested at `now`.
    pub fn request(&mut self, now: Instant) -> ThrottleDecision {
        if self.armed {
            self.pending = true;
            return ThrottleDecision::Coalesced;
        }
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                self.pending = true;
                self.armed = true;
                ThrottleDecision::Schedule(self.interval - now.saturating_duration_since(last))
            }
            _ => ThrottleDecision::EmitNow,
        }
    }

    /// A render happened at `now`.
    pub fn on_emit(&mut self, now: Instant) {
        self.last_emit = Some(now);
        self.pending = false;
    }

    /// The armed timer fired. Returns whether a render is still owed.
    pub fn on_timer(&mut self) -> bool {
        self.armed = false;
        std::mem::take(&mut self.pending)
    }

    /// Whether a render is owed.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Whether a timer is armed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(500);

    #[test]
    fn first_request_emits_now() {
        let mut t = Throttle::new(INTERVAL);
        assert_eq!(t.request(Instant::now()), ThrottleDecision::EmitNow);
    }

    #[test]
    fn burst_arms_single_timer() {
        let mut t = Throttle::new(INTERVAL);
        let start = Instant::now();
        t.on_emit(start);

        let at = start + Duration::from_millis(100);
        assert_eq!(t.request(at), ThrottleDecision::Schedule(Duration::from_millis(400)));
        for _ in 0..10 {
            assert_eq!(t.request(at), ThrottleDecision::Coalesced);
        }
        assert!(t.is_pending());
        assert!(t.on_timer());
        assert!(!t.is_armed());
    }

    #[test]
    fn timer_after_immediate_render_owes_nothing() {
        let mut t = Throttle::new(INTERVAL);
        let start = Instant::now();
        t.on_emit(start);
        let _ = t.request(start + Duration::from_millis(10));
        t.on_emit(start + Duration::from_millis(20));
        assert!(!t.on_timer());
    }

    #[test]
    fn request_after_interval_emits_now() {
        let mut t = Throttle::new(INTERVAL);
        let start = Instant::now();
        t.on_emit(start);
        assert_eq!(t.request(start + INTERVAL), ThrottleDecision::EmitNow);
    }

    #[test]
    fn zero_interval_never_schedules() {
        let mut t = Throttle::new(Duration::ZERO);
        let now = Instant::now();
        t.on_emit(now);
        assert_eq!(t.request(now), ThrottleDecision::EmitNow);
    }
}
