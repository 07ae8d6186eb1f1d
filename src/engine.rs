use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{CameraConfig, RasterConfig};
use crate::dispatcher::{ClassificationDispatcher, SubmitOutcome};
use crate::segmentation::{SegmentEvent, SegmentationStateMachine};
use crate::source::PositionSource;
use crate::trace;
use crate::types::{Point, Sample, Status};

/// What a tick did with a completed trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Started(u64),
    Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub position: Option<Point>,
    pub event: Option<SegmentEvent>,
    pub submission: Option<Submission>,
}

/// One sensing loop: source, segmentation and hand-off to the classifier.
pub struct GestureEngine<S: PositionSource> {
    source: S,
    machine: SegmentationStateMachine,
    dispatcher: ClassificationDispatcher,
    canvas: (u32, u32),
    stroke_width: u32,
    started: Instant,
}

impl<S: PositionSource> GestureEngine<S> {
    pub fn new(
        source: S,
        machine: SegmentationStateMachine,
        dispatcher: ClassificationDispatcher,
        camera: &CameraConfig,
        raster: &RasterConfig,
    ) -> Self {
        Self {
            source,
            machine,
            dispatcher,
            canvas: (camera.width, camera.height),
            stroke_width: raster.stroke_width,
            started: Instant::now(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn machine(&self) -> &SegmentationStateMachine {
        &self.machine
    }

    pub fn status(&self) -> Status {
        self.machine.status()
    }

    pub fn dispatcher(&self) -> &ClassificationDispatcher {
        &self.dispatcher
    }

    /// Polls the source and steps the machine, timestamped by the engine clock.
    pub fn tick(&mut self) -> Result<TickReport> {
        let at = self.started.elapsed();
        self.tick_at(at)
    }

    /// Same as [`tick`](Self::tick) with an explicit timestamp, for replay.
    pub fn tick_at(&mut self, at: Duration) -> Result<TickReport> {
        let reading = self.source.poll()?;
        let sample = match reading {
            Some((x, y)) => Sample::present(x, y, at),
            None => Sample::absent(at),
        };

        let event = self.machine.step(sample);
        let submission = match &event {
            Some(SegmentEvent::Completed(done)) => {
                let mask = trace::rasterize(&done.points, self.canvas.0, self.canvas.1, self.stroke_width);
                Some(match self.dispatcher.submit(mask) {
                    // Detached: the worker reports through logs and the handler.
                    SubmitOutcome::Started(job) => Submission::Started(job.id),
                    SubmitOutcome::Dropped => Submission::Dropped,
                })
            }
            Some(SegmentEvent::Canceled { points, reason }) => {
                info!("Trace canceled after {} points ({:?})", points, reason);
                None
            }
            _ => None,
        };

        Ok(TickReport { position: sample.position, event, submission })
    }
}

/// Fixed-cadence pacing: sleeps only for what is left of each period.
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self { period, next: Instant::now() + period }
    }

    pub fn wait(&mut self) {
        let now = Instant::now();
        if let Some(remaining) = self.next.checked_duration_since(now) {
            thread::sleep(remaining);
            self.next += self.period;
        } else {
            let behind = now - self.next;
            if behind > self.period {
                warn!("Tick overran by {:?}", behind);
            }
            // Skip missed ticks instead of bursting to catch up.
            self.next = now + self.period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassifierConfig, SegmentationConfig};
    use crate::dispatcher::ClassificationHandler;
    use crate::inference::UnavailablePredictor;
    use crate::source::ScriptedSource;
    use crate::types::Spell;
    use std::sync::Arc;

    struct Ignore;

    impl ClassificationHandler for Ignore {
        fn on_label(&self, _spell: Spell) {}
    }

    #[test]
    fn test_completed_trace_is_submitted_once() {
        let mut readings = vec![Some((100.0, 100.0))];
        readings.extend((1..=30).map(|i| Some((100.0 + 10.0 * i as f64, 100.0))));
        readings.extend(std::iter::repeat(Some((400.0, 100.0))).take(30));

        let dispatcher = ClassificationDispatcher::new(
            Box::new(UnavailablePredictor),
            Arc::new(Ignore),
            RasterConfig::default(),
            &ClassifierConfig::default(),
        );
        let machine = SegmentationStateMachine::new(SegmentationConfig::default());
        let mut engine = GestureEngine::new(
            ScriptedSource::new(readings),
            machine,
            dispatcher,
            &CameraConfig::default(),
            &RasterConfig::default(),
        );

        let mut submissions = Vec::new();
        for i in 0..61u64 {
            let report = engine.tick_at(Duration::from_millis(50 * i)).unwrap();
            submissions.extend(report.submission);
        }
        assert_eq!(submissions.len(), 1);
        assert!(matches!(submissions[0], Submission::Started(_)));
        assert_eq!(engine.status(), Status::Ready);
    }

    #[test]
    fn test_ticker_keeps_cadence() {
        let mut ticker = Ticker::new(Duration::from_millis(5));
        let start = Instant::now();
        for _ in 0..4 {
            ticker.wait();
        }
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
