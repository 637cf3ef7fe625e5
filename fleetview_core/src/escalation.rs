//! Confirm-then-dispatch emergency (SOS) state machine.
//!
//! ```text
//!            trigger                 countdown hits 0
//!   Idle ───────────────► Confirming ────────────────► Dispatching
//!    ▲    ◄── cancel ────┘  │  ▲ tick (countdown-1)         │
//!    │                      └──┘ trigger (restart)          │
//!    └──────────── after the dispatch call, any outcome ────┘
//! ```
//!
//! Triggers come in over an [`EmergencySignal`] channel so any part of the
//! application can raise one without holding a reference to the machine.

use crate::config::EscalationConfig;
use crate::error::DispatchError;
use fleetview_env::{Cadence, Clock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPhase {
    #[default]
    Idle,
    Confirming,
    Dispatching,
}

/// A single phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: EscalationPhase,
    pub to: EscalationPhase,
}

impl Transition {
    fn new(from: EscalationPhase, to: EscalationPhase) -> Self {
        Self { from, to }
    }
}

/// What gets handed to the dispatcher once the countdown runs out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub reason: String,
    pub emergency_number: String,
    pub raised_at_ms: u64,
}

/// Delivery boundary for confirmed alerts.
pub trait Dispatcher: Send {
    fn dispatch(&mut self, alert: &EmergencyAlert) -> Result<(), DispatchError>;
}

/// Records alerts in the log. No transmission happens.
#[derive(Debug, Default)]
pub struct LogDispatcher {
    dispatched: Vec<EmergencyAlert>,
}

impl LogDispatcher {
    pub fn dispatched(&self) -> &[EmergencyAlert] {
        &self.dispatched
    }
}

impl Dispatcher for LogDispatcher {
    fn dispatch(&mut self, alert: &EmergencyAlert) -> Result<(), DispatchError> {
        warn!(
            "SOS: alerting {} (reason: {}, raised at {})",
            alert.emergency_number, alert.reason, alert.raised_at_ms
        );
        self.dispatched.push(alert.clone());
        Ok(())
    }
}

// ============================================================================
// SIGNAL CHANNEL
// ============================================================================

/// Process-wide emergency trigger channel.
pub struct EmergencySignal;

impl EmergencySignal {
    /// Fire-and-forget sender plus the single consumer end.
    pub fn channel() -> (EmergencyTrigger, EmergencySignals) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EmergencyTrigger(tx), EmergencySignals(rx))
    }
}

/// Cloneable sending end; raising never blocks and never fails loudly.
#[derive(Clone)]
pub struct EmergencyTrigger(mpsc::UnboundedSender<String>);

impl EmergencyTrigger {
    pub fn raise(&self, reason: impl Into<String>) {
        if self.0.send(reason.into()).is_err() {
            warn!("SOS: signal raised with no listener");
        }
    }
}

pub struct EmergencySignals(mpsc::UnboundedReceiver<String>);

impl EmergencySignals {
    /// Reasons raised since the last drain, oldest first.
    pub fn drain(&mut self) -> Vec<String> {
        let mut reasons = Vec::new();
        while let Ok(reason) = self.0.try_recv() {
            reasons.push(reason);
        }
        reasons
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

pub struct EmergencyEscalation {
    config: EscalationConfig,
    clock: Arc<dyn Clock>,

    phase: EscalationPhase,
    countdown: u32,
    reason: Option<String>,

    /// Countdown ticks; running only while confirming
    cadence: Cadence,

    raised_at_ms: u64,
    dispatch_count: u64,
}

impl EmergencyEscalation {
    pub fn new(config: EscalationConfig, clock: Arc<dyn Clock>) -> Self {
        let countdown = config.countdown;
        let cadence = Cadence::new(config.tick_interval());
        Self {
            config,
            clock,
            phase: EscalationPhase::Idle,
            countdown,
            reason: None,
            cadence,
            raised_at_ms: 0,
            dispatch_count: 0,
        }
    }

    pub fn phase(&self) -> EscalationPhase {
        self.phase
    }

    /// Seconds (ticks) left before dispatch.
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// Starts (or restarts) the confirmation countdown.
    pub fn trigger(&mut self, reason: impl Into<String>) -> Vec<Transition> {
        let reason = reason.into();
        let from = self.phase;
        if from == EscalationPhase::Dispatching {
            // Not observable between calls; dispatch completes within tick()
            return Vec::new();
        }

        info!("SOS: {} ({}s to cancel)", reason, self.config.countdown);
        self.phase = EscalationPhase::Confirming;
        self.countdown = self.config.countdown;
        self.reason = Some(reason);
        self.raised_at_ms = self.clock.unix_millis();
        self.cadence.start(self.clock.now());

        vec![Transition::new(from, EscalationPhase::Confirming)]
    }

    /// Aborts a pending escalation. No-op unless confirming.
    pub fn cancel(&mut self) -> Vec<Transition> {
        if self.phase != EscalationPhase::Confirming {
            return Vec::new();
        }
        info!("SOS: cancelled with {}s left", self.countdown);
        self.reset();
        vec![Transition::new(EscalationPhase::Confirming, EscalationPhase::Idle)]
    }

    /// One countdown step.
    pub fn tick<D>(&mut self, dispatcher: &mut D) -> Vec<Transition>
    where
        D: Dispatcher + ?Sized,
    {
        if self.phase != EscalationPhase::Confirming {
            return Vec::new();
        }

        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return vec![Transition::new(
                EscalationPhase::Confirming,
                EscalationPhase::Confirming,
            )];
        }

        let mut transitions = vec![Transition::new(
            EscalationPhase::Confirming,
            EscalationPhase::Dispatching,
        )];
        self.phase = EscalationPhase::Dispatching;
        self.cadence.stop();

        let alert = EmergencyAlert {
            reason: self.reason.clone().unwrap_or_default(),
            emergency_number: self.config.emergency_number.clone(),
            raised_at_ms: self.raised_at_ms,
        };
        match dispatcher.dispatch(&alert) {
            Ok(()) => info!("SOS: dispatched to {}", alert.emergency_number),
            Err(e) => warn!("SOS: {}", e),
        }
        self.dispatch_count += 1;

        self.reset();
        transitions.push(Transition::new(
            EscalationPhase::Dispatching,
            EscalationPhase::Idle,
        ));
        transitions
    }

    /// Runs the countdown ticks that have come due on the clock.
    pub fn advance<D>(&mut self, dispatcher: &mut D) -> Vec<Transition>
    where
        D: Dispatcher + ?Sized,
    {
        let due = self.cadence.poll(self.clock.now());
        let mut transitions = Vec::new();
        for _ in 0..due {
            if self.phase != EscalationPhase::Confirming {
                break;
            }
            transitions.extend(self.tick(dispatcher));
        }
        transitions
    }

    fn reset(&mut self) {
        self.phase = EscalationPhase::Idle;
        self.countdown = self.config.countdown;
        self.reason = None;
        self.cadence.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualClock;
    use std::time::Duration;

    use EscalationPhase::{Confirming, Dispatching, Idle};

    struct FailingDispatcher;

    impl Dispatcher for FailingDispatcher {
        fn dispatch(&mut self, _alert: &EmergencyAlert) -> Result<(), DispatchError> {
            Err(DispatchError("line busy".to_string()))
        }
    }

    fn escalation() -> (EmergencyEscalation, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        (EmergencyEscalation::new(EscalationConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn test_trigger_starts_countdown() {
        let (mut sos, _) = escalation();
        let transitions = sos.trigger("manual");

        assert_eq!(transitions, vec![Transition::new(Idle, Confirming)]);
        assert_eq!(sos.phase(), Confirming);
        assert_eq!(sos.countdown(), 5);
        assert_eq!(sos.reason(), Some("manual"));
    }

    #[test]
    fn test_cancel_before_zero_never_dispatches() {
        let (mut sos, _) = escalation();
        let mut dispatcher = LogDispatcher::default();
        sos.trigger("manual");
        sos.tick(&mut dispatcher);
        sos.tick(&mut dispatcher);
        assert_eq!(sos.countdown(), 3);

        assert_eq!(sos.cancel(), vec![Transition::new(Confirming, Idle)]);
        assert_eq!(sos.phase(), Idle);
        assert_eq!(sos.countdown(), 5);
        for _ in 0..10 {
            assert!(sos.tick(&mut dispatcher).is_empty());
        }
        assert!(dispatcher.dispatched().is_empty());
    }

    #[test]
    fn test_full_countdown_dispatches_then_idles() {
        let (mut sos, _) = escalation();
        let mut dispatcher = LogDispatcher::default();
        sos.trigger("driver panic button");

        for remaining in (1..5).rev() {
            assert_eq!(sos.tick(&mut dispatcher), vec![Transition::new(Confirming, Confirming)]);
            assert_eq!(sos.countdown(), remaining);
        }
        let last = sos.tick(&mut dispatcher);
        assert_eq!(
            last,
            vec![Transition::new(Confirming, Dispatching), Transition::new(Dispatching, Idle)]
        );
        assert_eq!(sos.phase(), Idle);
        assert_eq!(dispatcher.dispatched().len(), 1);
        assert_eq!(dispatcher.dispatched()[0].emergency_number, "100");
        assert_eq!(dispatcher.dispatched()[0].reason, "driver panic button");
    }

    #[test]
    fn test_dispatch_failure_still_returns_to_idle() {
        let (mut sos, _) = escalation();
        sos.trigger("manual");
        let transitions: Vec<_> = (0..5).flat_map(|_| sos.tick(&mut FailingDispatcher)).collect();

        assert_eq!(transitions.last(), Some(&Transition::new(Dispatching, Idle)));
        assert_eq!(sos.phase(), Idle);
        assert_eq!(sos.dispatch_count(), 1);
    }

    #[test]
    fn test_retrigger_restarts_countdown() {
        let (mut sos, _) = escalation();
        let mut dispatcher = LogDispatcher::default();
        sos.trigger("first");
        sos.tick(&mut dispatcher);
        sos.tick(&mut dispatcher);

        assert_eq!(sos.trigger("second"), vec![Transition::new(Confirming, Confirming)]);
        assert_eq!(sos.countdown(), 5);
        assert_eq!(sos.reason(), Some("second"));
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let (mut sos, _) = escalation();
        assert!(sos.cancel().is_empty());
        assert_eq!(sos.phase(), Idle);
    }

    #[test]
    fn test_advance_follows_clock() {
        let (mut sos, clock) = escalation();
        let mut dispatcher = LogDispatcher::default();
        sos.trigger("manual");

        clock.advance(Duration::from_millis(2_500));
        sos.advance(&mut dispatcher);
        assert_eq!(sos.countdown(), 3);

        clock.advance(Duration::from_secs(10));
        let transitions = sos.advance(&mut dispatcher);
        assert_eq!(transitions.last(), Some(&Transition::new(Dispatching, Idle)));
        assert_eq!(dispatcher.dispatched().len(), 1);
    }

    #[test]
    fn test_signal_channel_drains_in_order() {
        let (trigger, mut signals) = EmergencySignal::channel();
        let remote = trigger.clone();
        trigger.raise("a");
        remote.raise("b");

        assert_eq!(signals.drain(), vec!["a".to_string(), "b".to_string()]);
        assert!(signals.drain().is_empty());
    }
}
