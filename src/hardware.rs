//! Output devices: the lid servo, the LED strip and the speaker.
//!
//! The feedback sequence only talks to these traits. [`crate::bridge`]
//! implements them over a helper process that owns the real devices; the
//! simulated drivers below log and sleep so the whole loop can run on a
//! laptop.

use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::DeviceState;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("device I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("device rejected command `{command}`: {reason}")]
    Rejected { command: String, reason: String },

    #[error("device helper exited")]
    Disconnected,
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Easing {
    Linear,
    EaseInOut,
}

impl Easing {
    /// Maps linear progress in [0, 1] onto the eased curve.
    pub fn apply(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::EaseInOut => 0.5 - 0.5 * (std::f64::consts::PI * t).cos(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Easing::Linear => "linear",
            Easing::EaseInOut => "ease-in-out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    pub duration: Duration,
    pub easing: Easing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    pub const WHITE: Rgb = Rgb { r: 255, g: 255, b: 255 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn hex(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

pub trait Actuator: Send {
    /// Blocks until the move has finished.
    fn move_to(&mut self, position: DeviceState, profile: MotionProfile) -> DriverResult<()>;

    /// Stops holding position (servo detach) so it does not jitter at rest.
    fn release(&mut self) -> DriverResult<()> {
        Ok(())
    }
}

pub trait LightStrip: Send {
    fn len(&self) -> usize;

    fn render(&mut self, frame: &[Rgb]) -> DriverResult<()>;

    fn blank(&mut self) -> DriverResult<()> {
        let frame = vec![Rgb::BLACK; self.len()];
        self.render(&frame)
    }
}

pub trait AudioOutput: Send {
    /// Starts a clip and returns without waiting for it.
    fn play(&mut self, clip: &str) -> DriverResult<()>;

    fn set_ambient_volume(&mut self, volume: f32) -> DriverResult<()>;

    fn start_ambient(&mut self, track: &str, volume: f32) -> DriverResult<()>;

    fn stop_ambient(&mut self) -> DriverResult<()>;
}

/// Lowers the ambient track while alive and restores it on drop.
pub struct DuckedAmbient<'a> {
    audio: &'a mut dyn AudioOutput,
    restore: f32,
}

impl<'a> DuckedAmbient<'a> {
    pub fn new(audio: &'a mut dyn AudioOutput, duck: f32, restore: f32) -> DriverResult<Self> {
        audio.set_ambient_volume(duck)?;
        Ok(Self { audio, restore })
    }

    pub fn play(&mut self, clip: &str) -> DriverResult<()> {
        self.audio.play(clip)
    }
}

impl Drop for DuckedAmbient<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.audio.set_ambient_volume(self.restore) {
            tracing::warn!("Failed to restore ambient volume: {}", e);
        }
    }
}

const SIMULATED_STEPS: u32 = 10;

/// Logs moves and sleeps for their duration, stepping along the easing curve.
#[derive(Debug, Default)]
pub struct SimulatedActuator {
    pub position: Option<DeviceState>,
    /// Eased travel of the last move, 0 at the start and 1 at the target.
    pub travel: f64,
}

impl Actuator for SimulatedActuator {
    fn move_to(&mut self, position: DeviceState, profile: MotionProfile) -> DriverResult<()> {
        info!("[servo] moving to {} over {:?} ({})", position, profile.duration, profile.easing.name());
        let step = profile.duration / SIMULATED_STEPS;
        for i in 1..=SIMULATED_STEPS {
            thread::sleep(step);
            self.travel = profile.easing.apply(i as f64 / SIMULATED_STEPS as f64);
            debug!("[servo] {:.0}% of the way to {}", self.travel * 100.0, position);
        }
        self.position = Some(position);
        Ok(())
    }

    fn release(&mut self) -> DriverResult<()> {
        debug!("[servo] released");
        Ok(())
    }
}

/// Keeps the last frame; logs its average brightness at debug level.
#[derive(Debug)]
pub struct SimulatedStrip {
    pub frame: Vec<Rgb>,
}

impl SimulatedStrip {
    pub fn new(len: usize) -> Self {
        Self { frame: vec![Rgb::BLACK; len] }
    }
}

impl LightStrip for SimulatedStrip {
    fn len(&self) -> usize {
        self.frame.len()
    }

    fn render(&mut self, frame: &[Rgb]) -> DriverResult<()> {
        self.frame.clear();
        self.frame.extend_from_slice(frame);
        let level: u32 = frame.iter().map(|c| c.r as u32 + c.g as u32 + c.b as u32).sum();
        debug!("[leds] {} pixels, level {}", frame.len(), level);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimulatedAudio {
    pub ambient_volume: f32,
}

impl AudioOutput for SimulatedAudio {
    fn play(&mut self, clip: &str) -> DriverResult<()> {
        info!("[audio] playing {}", clip);
        Ok(())
    }

    fn set_ambient_volume(&mut self, volume: f32) -> DriverResult<()> {
        debug!("[audio] ambient volume {:.2}", volume);
        self.ambient_volume = volume;
        Ok(())
    }

    fn start_ambient(&mut self, track: &str, volume: f32) -> DriverResult<()> {
        info!("[audio] looping {} at {:.2}", track, volume);
        self.ambient_volume = volume;
        Ok(())
    }

    fn stop_ambient(&mut self) -> DriverResult<()> {
        info!("[audio] ambient stopped");
        self.ambient_volume = 0.0;
        Ok(())
    }
}
