//! Display power control with probe reconciliation.
//!
//! Power status queries on the target hardware are slow and occasionally
//! wrong, so a local `On/OnPending/Off/OffPending` state is reconciled
//! against each probe instead of trusting any single reading. A pending
//! state absorbs the stale probe that follows a force command, which is what
//! stops the monitor from flapping.

use std::process::Command;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    On,
    OnPending,
    Off,
    OffPending,
}

/// Fold one probe reading into the tracked state. Returns the next state and
/// whether the monitor counts as on.
pub fn reconcile(state: MonitorState, reported_on: bool) -> (MonitorState, bool) {
    use MonitorState::*;
    match (state, reported_on) {
        (On, true) => (On, true),
        (On, false) => (Off, false),
        (OnPending, true) => (On, true),
        (OnPending, false) => (OnPending, true),
        (Off, true) => (On, true),
        (Off, false) => (Off, false),
        (OffPending, true) => (OffPending, false),
        (OffPending, false) => (Off, false),
    }
}

/// Whether a quiet poke should re-assert power, given time since the last
/// activity and the configured sleep timeout.
pub fn poke_due(since_activity: Duration, time_to_sleep: Duration) -> bool {
    let threshold = time_to_sleep.as_secs().max(10) / 2;
    since_activity.as_secs() > threshold
}

/// Display-power driver contract. The controller must tolerate a no-op
/// implementation on platforms without power control.
pub trait DisplayPower {
    fn force_on(&mut self);
    fn force_off(&mut self);
    fn set_auto_off_timer(&mut self, timeout: Duration);
    /// Reconciled power status; `true` while the panel counts as on.
    fn is_monitor_on(&mut self) -> bool;
    /// Re-assert "on" when enough time has passed since the last activity,
    /// or unconditionally with `force`.
    fn poke(&mut self, force: bool);
}

/// Stub for platforms without display-power control; always reports on.
#[derive(Debug, Default)]
pub struct NoopPower;

impl DisplayPower for NoopPower {
    fn force_on(&mut self) {}
    fn force_off(&mut self) {}
    fn set_auto_off_timer(&mut self, _timeout: Duration) {}
    fn is_monitor_on(&mut self) -> bool {
        true
    }
    fn poke(&mut self, _force: bool) {}
}

/// DPMS control through `xset`.
#[derive(Debug)]
pub struct XsetPower {
    state: MonitorState,
    last_activity: Instant,
    time_to_sleep: Duration,
}

impl XsetPower {
    pub fn new(time_to_sleep: Duration) -> Self {
        Self {
            state: MonitorState::On,
            last_activity: Instant::now(),
            time_to_sleep,
        }
    }

    fn spawn(args: &[&str]) {
        if let Err(err) = Command::new("xset").args(args).spawn() {
            warn!(?args, %err, "failed to run xset");
        }
    }

    /// Ask the server for DPMS status. `None` when the probe itself fails.
    fn probe(&self) -> Option<bool> {
        let output = Command::new("xset").arg("q").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout).to_lowercase();
        if text.is_empty() {
            return None;
        }
        Some(!(text.contains("monitor is off") || text.contains("monitor is susp")))
    }
}

impl DisplayPower for XsetPower {
    fn force_on(&mut self) {
        self.last_activity = Instant::now();
        Self::spawn(&["dpms", "force", "on"]);
        self.state = MonitorState::OnPending;
    }

    fn force_off(&mut self) {
        self.last_activity = Instant::now();
        Self::spawn(&["dpms", "force", "standby"]);
        self.state = MonitorState::OffPending;
    }

    fn set_auto_off_timer(&mut self, timeout: Duration) {
        self.time_to_sleep = timeout;
        if timeout.is_zero() {
            Self::spawn(&["s", "off"]);
            Self::spawn(&["-dpms"]);
            Self::spawn(&["s", "noblank"]);
        } else {
            let secs = timeout.as_secs().to_string();
            Self::spawn(&["s", &secs, &secs]);
        }
    }

    fn is_monitor_on(&mut self) -> bool {
        match self.probe() {
            Some(reported) => {
                let (next, on) = reconcile(self.state, reported);
                if next != self.state {
                    debug!(from = ?self.state, to = ?next, "monitor state reconciled");
                }
                self.state = next;
                on
            }
            None => {
                // Probe failure: keep the previous known state.
                warn!("monitor power probe failed; assuming previous state");
                matches!(self.state, MonitorState::On | MonitorState::OnPending)
            }
        }
    }

    fn poke(&mut self, force: bool) {
        if force || poke_due(self.last_activity.elapsed(), self.time_to_sleep) {
            self.force_on();
            let timeout = self.time_to_sleep;
            self.set_auto_off_timer(timeout);
        }
    }
}
