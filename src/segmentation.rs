//! Decides when a wand gesture starts, when it is noise, and when it is done.
//!
//! The machine is fed one [`Sample`] per tick and never looks at a clock of
//! its own, so a recorded sample sequence always replays to the same
//! transitions.
//!
//! ```text
//!   Idle ──present──▶ PresencePending ──moving after presence window──▶ Tracing
//!    ▲                    │ absent                                        │
//!    └────────────────────┘                                               │
//!    ▲                                                                    │
//!    └──── still (or gone) for stillness window: Cancel / Complete ◀──────┘
//! ```

use std::time::Duration;
use tracing::{debug, info};

use crate::config::SegmentationConfig;
use crate::trace::TraceBuffer;
use crate::types::{GestureState, Point, Sample, Status};

/// Why a trace ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The wand stopped moving.
    Still,
    /// The wand left the field of view.
    LeftView,
}

/// A finished gesture, ready for rasterisation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTrace {
    pub points: Vec<Point>,
    pub reason: ExitReason,
    pub at: Duration,
}

/// Transition produced by one step.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    PresenceStarted,
    PresenceLost,
    TracingStarted,
    Canceled { points: usize, reason: ExitReason },
    Completed(CompletedTrace),
}

pub struct SegmentationStateMachine {
    config: SegmentationConfig,
    state: GestureState,
    status: Status,
    trace: TraceBuffer,
    presence_since: Duration,
    last_position: Option<Point>,
    last_seen: Option<Duration>,
    still_since: Duration,
    still_ticks: u32,
    cooldown_until: Option<Duration>,
}

impl SegmentationStateMachine {
    pub fn new(config: SegmentationConfig) -> Self {
        Self {
            config,
            state: GestureState::Idle,
            status: Status::Ready,
            trace: TraceBuffer::new(),
            presence_since: Duration::ZERO,
            last_position: None,
            last_seen: None,
            still_since: Duration::ZERO,
            still_ticks: 0,
            cooldown_until: None,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn trace(&self) -> &TraceBuffer {
        &self.trace
    }

    /// Consecutive present ticks without significant movement.
    pub fn still_ticks(&self) -> u32 {
        self.still_ticks
    }

    /// Advances the machine by one tick.
    pub fn step(&mut self, sample: Sample) -> Option<SegmentEvent> {
        if let Some(until) = self.cooldown_until {
            if sample.at < until {
                return None;
            }
            self.cooldown_until = None;
        }

        match self.state {
            GestureState::Idle => self.step_idle(sample),
            GestureState::PresencePending => self.step_pending(sample),
            GestureState::Tracing => self.step_tracing(sample),
        }
    }

    /// Distance from the previous valid position. Invalid coordinates count
    /// as no movement.
    fn movement(&self, position: &Point) -> f64 {
        match (&self.last_position, position.is_valid()) {
            (Some(last), true) => last.distance(position),
            _ => 0.0,
        }
    }

    fn remember(&mut self, position: Point, at: Duration) {
        if position.is_valid() {
            self.last_position = Some(position);
        }
        self.last_seen = Some(at);
    }

    fn step_idle(&mut self, sample: Sample) -> Option<SegmentEvent> {
        let position = sample.position?;
        self.remember(position, sample.at);
        self.presence_since = sample.at;
        self.state = GestureState::PresencePending;
        debug!(at = ?sample.at, "presence started");
        Some(SegmentEvent::PresenceStarted)
    }

    fn step_pending(&mut self, sample: Sample) -> Option<SegmentEvent> {
        let Some(position) = sample.position else {
            self.state = GestureState::Idle;
            debug!(at = ?sample.at, "presence lost");
            return Some(SegmentEvent::PresenceLost);
        };

        let movement = self.movement(&position);
        self.remember(position, sample.at);

        let present_for = sample.at.saturating_sub(self.presence_since);
        if present_for > self.config.presence_duration() && movement > self.config.movement_threshold {
            self.state = GestureState::Tracing;
            self.status = Status::Tracing;
            self.trace.clear();
            self.trace.offer(position, self.config.movement_threshold);
            self.still_since = sample.at;
            self.still_ticks = 0;
            info!("Start tracing");
            return Some(SegmentEvent::TracingStarted);
        }
        None
    }

    fn step_tracing(&mut self, sample: Sample) -> Option<SegmentEvent> {
        let stillness = self.config.stillness_duration();

        let Some(position) = sample.position else {
            let gone_for = self
                .last_seen
                .map(|seen| sample.at.saturating_sub(seen))
                .unwrap_or_default();
            if gone_for > stillness {
                return Some(self.finish(ExitReason::LeftView, sample.at));
            }
            return None;
        };

        let movement = self.movement(&position);
        self.remember(position, sample.at);
        self.trace.offer(position, self.config.movement_threshold);

        if movement < self.config.movement_threshold {
            self.still_ticks += 1;
        } else {
            self.still_ticks = 0;
            self.still_since = sample.at;
        }

        if sample.at.saturating_sub(self.still_since) > stillness {
            return Some(self.finish(ExitReason::Still, sample.at));
        }
        None
    }

    fn finish(&mut self, reason: ExitReason, at: Duration) -> SegmentEvent {
        let points = self.trace.take();
        self.state = GestureState::Idle;
        self.last_position = None;
        self.last_seen = None;
        self.still_ticks = 0;

        // Leaving the view always completes; only stillness may cancel.
        if reason == ExitReason::Still && points.len() < self.config.min_trace_points {
            info!(points = points.len(), ?reason, "Canceled trace, likely a reflection");
            self.status = Status::Canceled;
            self.cooldown_until = Some(at + self.config.cancel_cooldown());
            SegmentEvent::Canceled { points: points.len(), reason }
        } else {
            info!(points = points.len(), ?reason, "Tracing done");
            self.status = Status::Ready;
            self.cooldown_until = Some(at + self.config.complete_cooldown());
            SegmentEvent::Completed(CompletedTrace { points, reason, at })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_MS: u64 = 50;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn machine() -> SegmentationStateMachine {
        SegmentationStateMachine::new(SegmentationConfig::default())
    }

    /// Drives the machine into Tracing: present from t=0, moving 10px per tick.
    /// Returns the time of the tick that opened the trace and the last x.
    fn start_tracing(m: &mut SegmentationStateMachine) -> (u64, f64) {
        let mut t = 0;
        let mut x = 100.0;
        loop {
            let event = m.step(Sample::present(x, 100.0, ms(t)));
            if event == Some(SegmentEvent::TracingStarted) {
                return (t, x);
            }
            assert!(t < 2000, "never started tracing");
            t += TICK_MS;
            x += 10.0;
        }
    }

    #[test]
    fn test_idle_to_pending_on_presence() {
        let mut m = machine();
        assert_eq!(m.step(Sample::absent(ms(0))), None);
        assert_eq!(m.state(), GestureState::Idle);
        assert_eq!(m.step(Sample::present(1.0, 1.0, ms(50))), Some(SegmentEvent::PresenceStarted));
        assert_eq!(m.state(), GestureState::PresencePending);
    }

    #[test]
    fn test_pending_resets_on_absence() {
        let mut m = machine();
        m.step(Sample::present(100.0, 100.0, ms(0)));
        m.step(Sample::present(110.0, 100.0, ms(300)));
        assert_eq!(m.step(Sample::absent(ms(350))), Some(SegmentEvent::PresenceLost));
        assert_eq!(m.state(), GestureState::Idle);

        // The presence window starts over: moving at 700ms is not enough.
        m.step(Sample::present(120.0, 100.0, ms(400)));
        assert_eq!(m.step(Sample::present(140.0, 100.0, ms(700))), None);
        assert_eq!(m.state(), GestureState::PresencePending);
        assert_eq!(
            m.step(Sample::present(160.0, 100.0, ms(1050))),
            Some(SegmentEvent::TracingStarted)
        );
    }

    #[test]
    fn test_pending_requires_movement() {
        let mut m = machine();
        m.step(Sample::present(100.0, 100.0, ms(0)));
        for i in 1..30 {
            assert_eq!(m.step(Sample::present(101.0, 100.0, ms(i * TICK_MS))), None);
        }
        assert_eq!(m.state(), GestureState::PresencePending);
    }

    #[test]
    fn test_tracing_opens_with_one_point() {
        let mut m = machine();
        let (t, _) = start_tracing(&mut m);
        assert_eq!(t, 650);
        assert_eq!(m.state(), GestureState::Tracing);
        assert_eq!(m.status(), Status::Tracing);
        assert_eq!(m.trace().len(), 1);
    }

    /// Opens a trace, adds moving points until the trace holds `points`,
    /// then holds the wand still until the machine exits.
    fn trace_with_points(points: usize) -> SegmentEvent {
        let mut m = machine();
        let (mut t, mut x) = start_tracing(&mut m);
        while m.trace().len() < points {
            t += TICK_MS;
            x += 10.0;
            assert_eq!(m.step(Sample::present(x, 100.0, ms(t))), None);
        }
        for _ in 0..40 {
            t += TICK_MS;
            if let Some(event) = m.step(Sample::present(x + 1.0, 100.0, ms(t))) {
                assert_eq!(m.state(), GestureState::Idle);
                assert!(m.trace().is_empty());
                return event;
            }
        }
        panic!("stillness never ended the trace");
    }

    #[test]
    fn test_cancel_below_min_points() {
        let min = SegmentationConfig::default().min_trace_points;
        match trace_with_points(min - 1) {
            SegmentEvent::Canceled { points, reason } => {
                assert_eq!(points, min - 1);
                assert_eq!(reason, ExitReason::Still);
            }
            other => panic!("expected cancel, got {:?}", other),
        }
    }

    #[test]
    fn test_complete_at_min_points() {
        let min = SegmentationConfig::default().min_trace_points;
        match trace_with_points(min) {
            SegmentEvent::Completed(done) => {
                assert_eq!(done.points.len(), min);
                assert_eq!(done.reason, ExitReason::Still);
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_stillness_is_measured_in_time() {
        let mut m = machine();
        let (start, x) = start_tracing(&mut m);
        // 1.0s of stillness is not enough, anything past it is.
        assert_eq!(m.step(Sample::present(x, 100.0, ms(start + 1000))), None);
        assert_eq!(m.still_ticks(), 1);
        assert!(m.step(Sample::present(x, 100.0, ms(start + 1001))).is_some());
    }

    #[test]
    fn test_absence_exit_completes() {
        let mut m = machine();
        let (mut t, mut x) = start_tracing(&mut m);
        for _ in 0..12 {
            t += TICK_MS;
            x += 10.0;
            m.step(Sample::present(x, 100.0, ms(t)));
        }
        let last_seen = t;
        for _ in 0..20 {
            t += TICK_MS;
            assert_eq!(m.step(Sample::absent(ms(t))), None);
        }
        assert_eq!(t - last_seen, 1000);
        match m.step(Sample::absent(ms(t + TICK_MS))) {
            Some(SegmentEvent::Completed(done)) => {
                assert_eq!(done.reason, ExitReason::LeftView);
                assert_eq!(done.points.len(), 13);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(m.status(), Status::Ready);
    }

    #[test]
    fn test_absence_exit_completes_short_trace() {
        let mut m = machine();
        let (mut t, mut x) = start_tracing(&mut m);
        for _ in 0..3 {
            t += TICK_MS;
            x += 10.0;
            m.step(Sample::present(x, 100.0, ms(t)));
        }
        match m.step(Sample::absent(ms(t + 1100))) {
            Some(SegmentEvent::Completed(done)) => {
                assert_eq!(done.reason, ExitReason::LeftView);
                assert_eq!(done.points.len(), 4);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(m.status(), Status::Ready);
    }

    #[test]
    fn test_nan_keeps_tracing_without_points() {
        let mut m = machine();
        let (mut t, _) = start_tracing(&mut m);
        let before = m.trace().len();
        for _ in 0..5 {
            t += TICK_MS;
            assert_eq!(m.step(Sample::present(f64::NAN, f64::NAN, ms(t))), None);
        }
        assert_eq!(m.state(), GestureState::Tracing);
        assert_eq!(m.trace().len(), before);
        assert_eq!(m.still_ticks(), 5);
    }

    #[test]
    fn test_cooldown_ignores_samples() {
        let mut m = machine();
        let (t, x) = start_tracing(&mut m);
        let exit_at = t + 1050;
        assert!(matches!(
            m.step(Sample::present(x, 100.0, ms(exit_at))),
            Some(SegmentEvent::Canceled { points: 1, reason: ExitReason::Still })
        ));
        // Cancel cooldown is 0.5s.
        assert_eq!(m.step(Sample::present(5.0, 5.0, ms(exit_at + 400))), None);
        assert_eq!(m.state(), GestureState::Idle);
        assert_eq!(
            m.step(Sample::present(5.0, 5.0, ms(exit_at + 500))),
            Some(SegmentEvent::PresenceStarted)
        );
    }

    #[test]
    fn test_complete_cooldown_is_longer() {
        let mut m = machine();
        let (t, _) = start_tracing(&mut m);
        let exit_at = t + 1100;
        assert!(matches!(m.step(Sample::absent(ms(exit_at))), Some(SegmentEvent::Completed(_))));
        assert_eq!(m.step(Sample::present(5.0, 5.0, ms(exit_at + 900))), None);
        assert_eq!(
            m.step(Sample::present(5.0, 5.0, ms(exit_at + 1000))),
            Some(SegmentEvent::PresenceStarted)
        );
    }

    #[test]
    fn test_replay_is_deterministic() {
        let samples: Vec<Sample> = (0..120u64)
            .map(|i| {
                let at = ms(i * TICK_MS);
                match i {
                    0..=10 => Sample::present(100.0 + i as f64 * 9.0, 100.0, at),
                    11..=13 => Sample::absent(at),
                    14..=40 => Sample::present(50.0 + (i * 13 % 200) as f64, 80.0 + (i * 7 % 90) as f64, at),
                    _ => Sample::present(400.0, 300.0, at),
                }
            })
            .collect();

        let run = || {
            let mut m = machine();
            samples
                .iter()
                .filter_map(|s| m.step(*s).map(|e| (s.at, e)))
                .collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first.iter().any(|(_, e)| *e == SegmentEvent::TracingStarted));
    }
}
