//! Link lifecycle state machine and reconnect backoff, free of any I/O.
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// Port open, waiting for the first valid frame.
    Syncing,
    Streaming,
    Backoff,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Syncing => "syncing",
            LinkState::Streaming => "streaming",
            LinkState::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Start,
    Opened,
    OpenFailed,
    /// The decoder surfaced a well-formed frame.
    FrameValidated,
    /// Read/write error, EOF or idle timeout.
    Failure,
    BackoffElapsed,
    Stop,
}

#[derive(Debug, Clone)]
pub struct LinkStateMachine {
    state: LinkState,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStateMachine {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Apply `event`. Events that make no sense in the current state are ignored.
    /// Returns the new state and whether it changed.
    pub fn on(&mut self, event: LinkEvent) -> (LinkState, bool) {
        use LinkEvent as E;
        use LinkState as S;
        let next = match (self.state, event) {
            (_, E::Stop) => S::Disconnected,
            (S::Disconnected, E::Start) => S::Connecting,
            (S::Connecting, E::Opened) => S::Syncing,
            (S::Connecting, E::OpenFailed) => S::Backoff,
            (S::Syncing, E::FrameValidated) => S::Streaming,
            (S::Syncing | S::Streaming, E::Failure) => S::Backoff,
            (S::Backoff, E::BackoffElapsed) => S::Connecting,
            (s, _) => s,
        };
        let changed = next != self.state;
        self.state = next;
        (next, changed)
    }
}

/// Exponential reconnect delay: `min`, `2*min`, `4*min` ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Option<Duration>,
    attempts: u32,
}

fn bounded_backoff_next(current: Duration, max: Duration) -> Duration {
    let current_ms = current.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(current_ms.saturating_mul(2).min(max_ms))
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        Self {
            min,
            max: max.max(min),
            current: None,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.min,
            Some(c) => bounded_backoff_next(c, self.max),
        };
        self.current = Some(next);
        self.attempts = self.attempts.saturating_add(1);
        next
    }

    /// Back to `min`; called only after a sustained streaming period.
    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    /// Delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut m = LinkStateMachine::new();
        assert_eq!(m.on(LinkEvent::Start), (LinkState::Connecting, true));
        assert_eq!(m.on(LinkEvent::Opened), (LinkState::Syncing, true));
        assert_eq!(m.on(LinkEvent::FrameValidated), (LinkState::Streaming, true));
        assert_eq!(m.on(LinkEvent::FrameValidated), (LinkState::Streaming, false));
        assert_eq!(m.on(LinkEvent::Failure), (LinkState::Backoff, true));
        assert_eq!(m.on(LinkEvent::BackoffElapsed), (LinkState::Connecting, true));
        assert_eq!(m.on(LinkEvent::Stop), (LinkState::Disconnected, true));
    }

    #[test]
    fn open_failure_goes_to_backoff() {
        let mut m = LinkStateMachine::new();
        m.on(LinkEvent::Start);
        assert_eq!(m.on(LinkEvent::OpenFailed).0, LinkState::Backoff);
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        let mut m = LinkStateMachine::new();
        assert_eq!(m.on(LinkEvent::FrameValidated), (LinkState::Disconnected, false));
        m.on(LinkEvent::Start);
        // Streaming is only reachable through Syncing.
        assert_eq!(m.on(LinkEvent::FrameValidated).0, LinkState::Connecting);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(b.attempts(), 6);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn inverted_bounds_are_clamped() {
        let mut b = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
    }
}
