//! Suspend detection for a desktop process. A terminal client gets no
//! visibility events, but a system sleep shows up as a tick that arrives
//! far later than scheduled by the wall clock.

use crate::input::ClientInput;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tracing::debug;

pub const TICK: Duration = Duration::from_secs(1);
const SLACK: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct SuspendWatchdog {
	tick: Duration,
	last_wall: SystemTime,
	last_mono: Instant,
}

impl SuspendWatchdog {
	pub fn new(tick: Duration, wall: SystemTime, mono: Instant) -> Self {
		Self {
			tick,
			last_wall: wall,
			last_mono: mono,
		}
	}

	/// Returns how long the process was away when the gap since the last
	/// observation exceeds one tick plus slack. The monotonic clock may
	/// stand still across suspend, so the wall clock is consulted too.
	pub fn observe(&mut self, wall: SystemTime, mono: Instant) -> Option<Duration> {
		let wall_gap = wall.duration_since(self.last_wall).unwrap_or_default();
		let mono_gap = mono.saturating_duration_since(self.last_mono);
		self.last_wall = wall;
		self.last_mono = mono;
		let gap = wall_gap.max(mono_gap);
		if gap > self.tick + SLACK {
			debug!(event = "suspend_gap", wall_ms = wall_gap.as_millis() as u64, mono_ms = mono_gap.as_millis() as u64);
			return Some(gap);
		}
		None
	}
}

pub async fn run_watchdog(tx: mpsc::Sender<ClientInput>) {
	let mut watchdog = SuspendWatchdog::new(TICK, SystemTime::now(), Instant::now());
	let mut ticker = tokio::time::interval(TICK);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	loop {
		ticker.tick().await;
		if let Some(gap) = watchdog.observe(SystemTime::now(), Instant::now()) {
			if tx.send(ClientInput::Resumed(gap)).await.is_err() {
				break;
			}
		}
	}
}
