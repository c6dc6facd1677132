use crate::backoff::BackoffPolicy;
use crate::term_wire::NORMAL_CLOSURE;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Close code used when a socket is abandoned because it cannot be trusted.
pub const STALE_SOCKET_CLOSURE: u16 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    /// Intentional teardown. Terminal: nothing reopens from here.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the socket itself claims, which may be stale after OS suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Open { generation: u64 },
    Close { generation: u64, code: u16, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOpen {
    Initial,
    Retry,
}

/// Socket lifecycle for one (pane, tab). Every socket it asks for carries a
/// generation number; events from older generations are ignored, so a
/// socket that was replaced can never drive the machine again.
#[derive(Debug)]
pub struct ReconnectController {
    policy: BackoffPolicy,
    hung_after: Duration,
    state: ConnectionState,
    generation: u64,
    socket_live: bool,
    current_delay: Duration,
    failures: u32,
    pending: Option<(Instant, PendingOpen)>,
    hidden_since: Option<Instant>,
}

impl ReconnectController {
    /// The first open is deferred until `open_at` so mounting does not race layout.
    pub fn new(policy: BackoffPolicy, hung_after: Duration, open_at: Instant) -> Self {
        Self {
            policy,
            hung_after,
            state: ConnectionState::Connecting,
            generation: 0,
            socket_live: false,
            current_delay: policy.base,
            failures: 0,
            pending: Some((open_at, PendingOpen::Initial)),
            hidden_since: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay that the next failure will wait before retrying.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|(at, _)| at)
    }

    /// Ready state as far as this controller has been told. After a long
    /// suspension it may claim `Open` for a socket that is already dead.
    pub fn ready_state(&self) -> SocketReadyState {
        if !self.socket_live {
            return SocketReadyState::Closed;
        }
        match self.state {
            ConnectionState::Connected => SocketReadyState::Open,
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                SocketReadyState::Connecting
            }
            ConnectionState::Disconnected | ConnectionState::Closed => SocketReadyState::Closed,
        }
    }

    pub fn poll(&mut self, now: Instant) -> Option<ControlAction> {
        let (at, kind) = self.pending?;
        if at > now || self.state == ConnectionState::Closed {
            return None;
        }
        self.pending = None;
        self.state = match kind {
            PendingOpen::Initial => ConnectionState::Connecting,
            PendingOpen::Retry => ConnectionState::Reconnecting,
        };
        Some(self.open_socket())
    }

    pub fn on_open(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.current_delay = self.policy.base;
        self.failures = 0;
        debug!(event = "socket_open", generation);
        true
    }

    /// Returns true when a retry was scheduled.
    pub fn on_close(&mut self, generation: u64, now: Instant) -> bool {
        if generation != self.generation || !self.socket_live {
            return false;
        }
        self.socket_live = false;
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        self.failures += 1;
        self.pending = Some((now + self.current_delay, PendingOpen::Retry));
        debug!(
            event = "socket_lost",
            generation,
            failures = self.failures,
            retry_in_ms = self.current_delay.as_millis() as u64
        );
        self.current_delay = self.policy.next(self.current_delay);
        true
    }

    pub fn hide(&mut self, now: Instant) {
        if self.hidden_since.is_none() {
            self.hidden_since = Some(now);
        }
    }

    pub fn show(&mut self, now: Instant, ready: SocketReadyState) -> Vec<ControlAction> {
        let hidden_for = self
            .hidden_since
            .take()
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        self.resume_after(hidden_for, ready)
    }

    /// After a long hide the socket is replaced even if it reports `Open`:
    /// suspension can kill it without a close event ever arriving.
    pub fn resume_after(
        &mut self,
        hidden_for: Duration,
        ready: SocketReadyState,
    ) -> Vec<ControlAction> {
        self.hidden_since = None;
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }
        // nothing has been opened yet; the mount deferral still stands
        if !self.socket_live && matches!(self.pending, Some((_, PendingOpen::Initial))) {
            return Vec::new();
        }
        let stale = hidden_for >= self.hung_after;
        if !stale && ready == SocketReadyState::Open {
            return Vec::new();
        }
        debug!(
            event = "socket_revalidate",
            hidden_ms = hidden_for.as_millis() as u64,
            ready = ?ready,
            stale
        );
        let mut actions = Vec::new();
        if self.socket_live {
            actions.push(ControlAction::Close {
                generation: self.generation,
                code: STALE_SOCKET_CLOSURE,
                reason: "stale socket",
            });
        }
        self.pending = None;
        self.state = ConnectionState::Reconnecting;
        actions.push(self.open_socket());
        actions
    }

    /// Intentional teardown. Safe to call any number of times.
    pub fn close(&mut self) -> Option<ControlAction> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;
        self.pending = None;
        self.hidden_since = None;
        if !self.socket_live {
            return None;
        }
        self.socket_live = false;
        Some(ControlAction::Close {
            generation: self.generation,
            code: NORMAL_CLOSURE,
            reason: "teardown",
        })
    }

    fn open_socket(&mut self) -> ControlAction {
        self.generation += 1;
        self.socket_live = true;
        ControlAction::Open {
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::at;

    fn controller(base: Instant) -> ReconnectController {
        ReconnectController::new(BackoffPolicy::default(), Duration::from_secs(5), at(base, 150))
    }

    fn open_generation(action: Option<ControlAction>) -> u64 {
        match action {
            Some(ControlAction::Open { generation }) => generation,
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[test]
    fn first_open_waits_for_mount_deferral() {
        let base = Instant::now();
        let mut ctl = controller(base);
        assert_eq!(ctl.state(), ConnectionState::Connecting);
        assert_eq!(ctl.poll(at(base, 100)), None);
        assert_eq!(ctl.ready_state(), SocketReadyState::Closed);
        let generation = open_generation(ctl.poll(at(base, 150)));
        assert_eq!(ctl.ready_state(), SocketReadyState::Connecting);
        assert!(ctl.on_open(generation));
        assert_eq!(ctl.state(), ConnectionState::Connected);
        assert_eq!(ctl.ready_state(), SocketReadyState::Open);
    }

    #[test]
    fn consecutive_failures_follow_capped_doubling_and_reset_on_success() {
        let base = Instant::now();
        let mut ctl = controller(base);
        let mut now = at(base, 150);
        let mut generation = open_generation(ctl.poll(now));
        let policy = BackoffPolicy::default();

        for attempt in 1..=8u32 {
            assert!(ctl.on_close(generation, now));
            assert_eq!(ctl.state(), ConnectionState::Disconnected);
            let deadline = ctl.next_deadline().expect("retry scheduled");
            assert_eq!(deadline - now, policy.delay(attempt), "attempt {attempt}");
            assert_eq!(ctl.poll(deadline - Duration::from_millis(1)), None);
            now = deadline;
            generation = open_generation(ctl.poll(now));
            assert_eq!(ctl.state(), ConnectionState::Reconnecting);
        }

        assert!(ctl.on_open(generation));
        assert_eq!(ctl.current_delay(), policy.base);
        assert_eq!(ctl.failures(), 0);
        assert!(ctl.on_close(generation, now));
        assert_eq!(ctl.next_deadline(), Some(now + policy.base));
    }

    #[test]
    fn stale_generations_are_ignored() {
        let base = Instant::now();
        let mut ctl = controller(base);
        let old = open_generation(ctl.poll(at(base, 150)));
        ctl.resume_after(Duration::from_secs(6), SocketReadyState::Open);
        assert!(!ctl.on_open(old));
        assert!(!ctl.on_close(old, at(base, 200)));
        assert_eq!(ctl.state(), ConnectionState::Reconnecting);
        assert!(ctl.on_open(old + 1));
    }

    #[test]
    fn long_hide_force_reopens_even_when_socket_claims_open() {
        let base = Instant::now();
        let mut ctl = controller(base);
        let generation = open_generation(ctl.poll(at(base, 150)));
        ctl.on_open(generation);

        ctl.hide(at(base, 1_000));
        let actions = ctl.show(at(base, 7_000), SocketReadyState::Open);
        assert_eq!(
            actions,
            vec![
                ControlAction::Close {
                    generation,
                    code: STALE_SOCKET_CLOSURE,
                    reason: "stale socket",
                },
                ControlAction::Open {
                    generation: generation + 1
                },
            ]
        );
        assert_eq!(ctl.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn short_hide_trusts_an_open_socket() {
        let base = Instant::now();
        let mut ctl = controller(base);
        let generation = open_generation(ctl.poll(at(base, 150)));
        ctl.on_open(generation);

        ctl.hide(at(base, 1_000));
        assert!(ctl.show(at(base, 3_000), SocketReadyState::Open).is_empty());
        assert_eq!(ctl.state(), ConnectionState::Connected);

        ctl.hide(at(base, 4_000));
        let actions = ctl.show(at(base, 5_000), SocketReadyState::Connecting);
        assert_eq!(actions.len(), 2);
        assert_eq!(ctl.generation(), generation + 1);
    }

    #[test]
    fn short_hide_with_pending_retry_reconnects_now() {
        let base = Instant::now();
        let mut ctl = controller(base);
        let generation = open_generation(ctl.poll(at(base, 150)));
        ctl.on_close(generation, at(base, 200));
        let actions = ctl.resume_after(Duration::from_secs(1), SocketReadyState::Closed);
        assert_eq!(
            actions,
            vec![ControlAction::Open {
                generation: generation + 1
            }]
        );
        assert_eq!(ctl.next_deadline(), None);
    }

    #[test]
    fn visibility_during_mount_deferral_keeps_the_deferral() {
        let base = Instant::now();
        let mut ctl = controller(base);
        ctl.hide(at(base, 10));
        assert!(ctl.show(at(base, 60), SocketReadyState::Closed).is_empty());
        assert!(ctl
            .resume_after(Duration::from_secs(30), SocketReadyState::Closed)
            .is_empty());
        assert_eq!(ctl.next_deadline(), Some(at(base, 150)));
        assert_eq!(ctl.generation(), 0);
        assert_eq!(open_generation(ctl.poll(at(base, 150))), 1);
    }

    #[test]
    fn close_is_terminal_and_idempotent() {
        let base = Instant::now();
        let mut ctl = controller(base);
        let generation = open_generation(ctl.poll(at(base, 150)));
        ctl.on_open(generation);

        assert_eq!(
            ctl.close(),
            Some(ControlAction::Close {
                generation,
                code: NORMAL_CLOSURE,
                reason: "teardown",
            })
        );
        assert_eq!(ctl.close(), None);
        assert!(!ctl.on_close(generation, at(base, 300)));
        assert_eq!(ctl.poll(at(base, 60_000)), None);
        assert!(ctl.resume_after(Duration::from_secs(60), SocketReadyState::Closed).is_empty());
        assert_eq!(ctl.state(), ConnectionState::Closed);
    }

    #[test]
    fn close_before_first_open_sends_nothing() {
        let base = Instant::now();
        let mut ctl = controller(base);
        assert_eq!(ctl.close(), None);
        assert_eq!(ctl.poll(at(base, 150)), None);
    }
}
