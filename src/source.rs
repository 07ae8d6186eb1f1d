use anyhow::Result;
use image::GrayImage;
use std::collections::VecDeque;

/// Something that reports where the wand tip is, once per tick.
pub trait PositionSource {
    fn name(&self) -> String;

    /// `Ok(None)` when no tip is visible this tick.
    fn poll(&mut self) -> Result<Option<(f64, f64)>>;

    /// The frame the last reading came from, if the source has one.
    fn frame(&self) -> Option<&GrayImage> {
        None
    }
}

/// Replays a fixed list of readings, then reports absence forever.
pub struct ScriptedSource {
    readings: VecDeque<Option<(f64, f64)>>,
}

impl ScriptedSource {
    pub fn new(readings: impl IntoIterator<Item = Option<(f64, f64)>>) -> Self {
        Self { readings: readings.into_iter().collect() }
    }

    pub fn remaining(&self) -> usize {
        self.readings.len()
    }
}

impl PositionSource for ScriptedSource {
    fn name(&self) -> String {
        "Scripted".to_string()
    }

    fn poll(&mut self) -> Result<Option<(f64, f64)>> {
        Ok(self.readings.pop_front().flatten())
    }
}

/// A pretend wand for running without a camera: it appears, draws a
/// circle, holds still, then leaves the view, over and over.
pub struct SimulatedWand {
    tick: u32,
    width: f64,
    height: f64,
}

impl SimulatedWand {
    const HIDDEN: u32 = 20;
    const SETTLE: u32 = 15;
    const DRAW: u32 = 40;
    const HOLD: u32 = 30;

    pub fn new(width: u32, height: u32) -> Self {
        Self { tick: 0, width: width as f64, height: height as f64 }
    }

    fn position_at(&self, tick: u32) -> Option<(f64, f64)> {
        let cycle = Self::HIDDEN + Self::SETTLE + Self::DRAW + Self::HOLD;
        let t = tick % cycle;
        let (cx, cy) = (self.width / 2.0, self.height / 2.0);
        let r = self.width.min(self.height) * 0.25;
        let on_circle = |phase: f64| {
            let a = phase * std::f64::consts::TAU;
            (cx + r * a.cos(), cy + r * a.sin())
        };

        if t < Self::HIDDEN {
            None
        } else if t < Self::HIDDEN + Self::SETTLE {
            // Small drift first, so the trace starts only once it is clearly moving.
            let k = (t - Self::HIDDEN) as f64;
            let (x, y) = on_circle(0.0);
            Some((x - 30.0 + 2.0 * k, y))
        } else if t < Self::HIDDEN + Self::SETTLE + Self::DRAW {
            let k = (t - Self::HIDDEN - Self::SETTLE) as f64;
            Some(on_circle(k / Self::DRAW as f64))
        } else {
            Some(on_circle(0.0))
        }
    }
}

impl PositionSource for SimulatedWand {
    fn name(&self) -> String {
        "Simulated wand".to_string()
    }

    fn poll(&mut self) -> Result<Option<(f64, f64)>> {
        let position = self.position_at(self.tick);
        self.tick = self.tick.wrapping_add(1);
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_runs_dry() {
        let mut src = ScriptedSource::new(vec![Some((1.0, 2.0)), None]);
        assert_eq!(src.poll().unwrap(), Some((1.0, 2.0)));
        assert_eq!(src.poll().unwrap(), None);
        assert_eq!(src.remaining(), 0);
        assert_eq!(src.poll().unwrap(), None);
    }

    #[test]
    fn test_simulated_wand_cycle() {
        let mut wand = SimulatedWand::new(640, 480);
        let readings: Vec<_> = (0..105).map(|_| wand.poll().unwrap()).collect();
        assert!(readings[..20].iter().all(Option::is_none));
        assert!(readings[20..].iter().all(Option::is_some));
        // Held still at the end of the cycle.
        assert_eq!(readings[100], readings[104]);
        // Stays on the canvas.
        for (x, y) in readings.iter().flatten() {
            assert!((0.0..640.0).contains(x) && (0.0..480.0).contains(y));
        }
    }
}
