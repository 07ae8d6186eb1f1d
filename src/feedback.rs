//! Turns a classified spell into one physical feedback sequence.
//!
//! A spell only acts when it asks for the opposite of the current lid state,
//! so repeating a spell does nothing. The sequence (sound, move with light
//! wave, fade, release) runs to completion on the calling thread; the lid
//! state changes only after every step succeeded.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{secs, FeedbackConfig};
use crate::dispatcher::ClassificationHandler;
use crate::hardware::{Actuator, AudioOutput, DriverResult, DuckedAmbient, Easing, LightStrip, MotionProfile};
use crate::lights;
use crate::types::{Action, DeviceState, Spell};

/// State gate: `(new_state, action)` for `spell` given the `current` state.
pub fn decide(spell: Spell, current: DeviceState) -> (DeviceState, Option<Action>) {
    match (spell, current) {
        (Spell::OpenSpell, DeviceState::Closed) => (DeviceState::Open, Some(Action::Open)),
        (Spell::CloseSpell, DeviceState::Open) => (DeviceState::Closed, Some(Action::Close)),
        _ => (current, None),
    }
}

/// The three output devices, each behind its own lock so the light
/// animation can run while the actuator blocks.
pub struct Devices {
    pub actuator: Box<dyn Actuator>,
    pub strip: Box<dyn LightStrip>,
    pub audio: Box<dyn AudioOutput>,
}

pub struct FeedbackCoordinator {
    state: Mutex<DeviceState>,
    /// Held for a whole sequence; `state` is only locked to read or commit.
    sequence: Mutex<()>,
    actuator: Mutex<Box<dyn Actuator>>,
    strip: Mutex<Box<dyn LightStrip>>,
    audio: Mutex<Box<dyn AudioOutput>>,
    settings: FeedbackConfig,
    seed: Mutex<StdRng>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FeedbackCoordinator {
    pub fn new(devices: Devices, settings: FeedbackConfig) -> Self {
        Self {
            state: Mutex::new(settings.initial_state),
            sequence: Mutex::new(()),
            actuator: Mutex::new(devices.actuator),
            strip: Mutex::new(devices.strip),
            audio: Mutex::new(devices.audio),
            settings,
            seed: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fixes the animation randomness, for reproducible runs.
    pub fn with_seed(self, seed: u64) -> Self {
        *lock(&self.seed) = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> DeviceState {
        *lock(&self.state)
    }

    /// Drives the actuator to the initial state and starts the ambient track.
    pub fn home(&self) -> DriverResult<()> {
        let _sequence = lock(&self.sequence);
        let target = self.state();
        info!("Homing actuator to {}", target);
        {
            let mut actuator = lock(&self.actuator);
            actuator.move_to(target, MotionProfile { duration: secs(self.settings.home_secs), easing: Easing::Linear })?;
            actuator.release()?;
        }
        lock(&self.strip).blank()?;
        if let Some(track) = &self.settings.ambient_track {
            lock(&self.audio).start_ambient(track, self.settings.ambient_volume)?;
        }
        Ok(())
    }

    /// Gates `spell` against the current state and runs the resulting
    /// action, if any. Returns the action that completed.
    pub fn handle(&self, spell: Spell) -> DriverResult<Option<Action>> {
        let _sequence = lock(&self.sequence);
        let current = self.state();
        let (next, action) = decide(spell, current);
        let Some(action) = action else {
            info!("{:?} while {}: nothing to do", spell, current);
            return Ok(None);
        };

        self.execute(action)?;
        *lock(&self.state) = next;
        info!("Device is now {}", next);
        Ok(Some(action))
    }

    fn execute(&self, action: Action) -> DriverResult<()> {
        match action {
            Action::Open => info!("Alohomora!!"),
            Action::Close => info!("Colloportus!!"),
        }

        self.play_spell_sound(action)?;
        self.move_with_lights(action)?;
        self.fade_out(action)?;
        thread::sleep(Duration::from_millis(self.settings.settle_ms));
        lock(&self.actuator).release()
    }

    fn play_spell_sound(&self, action: Action) -> DriverResult<()> {
        let clip = match action {
            Action::Open => &self.settings.open_clip,
            Action::Close => &self.settings.close_clip,
        };
        let mut audio = lock(&self.audio);
        let mut ducked = DuckedAmbient::new(audio.as_mut(), self.settings.duck_volume, self.settings.ambient_volume)?;
        ducked.play(clip)?;
        thread::sleep(Duration::from_millis(self.settings.duck_hold_ms));
        Ok(())
    }

    /// Moves the actuator while a scoped thread animates the strip; the
    /// animation stops when the move returns.
    fn move_with_lights(&self, action: Action) -> DriverResult<()> {
        let profile = MotionProfile { duration: secs(self.settings.motion_secs), easing: Easing::EaseInOut };
        let moving = AtomicBool::new(true);
        let refresh = Duration::from_millis(self.settings.led_refresh_ms);

        thread::scope(|scope| {
            let animation = scope.spawn(|| -> DriverResult<()> {
                let mut strip = lock(&self.strip);
                let mut rng = lock(&self.seed);
                let len = strip.len();
                let start = Instant::now();
                while moving.load(Ordering::Acquire) {
                    let elapsed = start.elapsed().as_secs_f64();
                    let progress = (elapsed / profile.duration.as_secs_f64().max(f64::EPSILON)).min(1.0);
                    strip.render(&lights::spell_frame(action, elapsed, progress, len, &mut *rng))?;
                    thread::sleep(refresh);
                }
                Ok(())
            });

            let moved = lock(&self.actuator).move_to(action.target(), profile);
            moving.store(false, Ordering::Release);

            let animated = match animation.join() {
                Ok(result) => result,
                Err(_) => {
                    error!("Light animation thread panicked");
                    Ok(())
                }
            };
            moved.and(animated)
        })
    }

    fn fade_out(&self, action: Action) -> DriverResult<()> {
        let mut strip = lock(&self.strip);
        let mut rng = lock(&self.seed);
        let len = strip.len();
        let steps = self.settings.fade_steps;
        for step in 0..steps {
            strip.render(&lights::fade_frame(action, step, steps, len, &mut *rng))?;
            thread::sleep(Duration::from_millis(self.settings.fade_step_ms));
        }
        strip.blank()
    }

    /// Lights off, actuator released, ambient stopped. Errors are logged.
    pub fn shutdown(&self) {
        if let Err(e) = lock(&self.strip).blank() {
            warn!("Failed to blank strip: {}", e);
        }
        if let Err(e) = lock(&self.actuator).release() {
            warn!("Failed to release actuator: {}", e);
        }
        if let Err(e) = lock(&self.audio).stop_ambient() {
            warn!("Failed to stop ambient track: {}", e);
        }
    }
}

impl ClassificationHandler for FeedbackCoordinator {
    fn on_label(&self, spell: Spell) {
        if let Err(e) = self.handle(spell) {
            error!("Feedback for {:?} failed: {}", spell, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{DriverError, Rgb};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Move(DeviceState),
        Release,
        Frame,
        Play(String),
        Volume(f32),
    }

    type Log = Arc<Mutex<Vec<Call>>>;

    struct FakeActuator {
        log: Log,
        fail: bool,
        delay: Duration,
    }

    impl Actuator for FakeActuator {
        fn move_to(&mut self, position: DeviceState, _profile: MotionProfile) -> DriverResult<()> {
            if self.fail {
                return Err(DriverError::Disconnected);
            }
            self.log.lock().unwrap().push(Call::Move(position));
            thread::sleep(self.delay);
            Ok(())
        }

        fn release(&mut self) -> DriverResult<()> {
            self.log.lock().unwrap().push(Call::Release);
            Ok(())
        }
    }

    struct FakeStrip {
        log: Log,
    }

    impl LightStrip for FakeStrip {
        fn len(&self) -> usize {
            8
        }

        fn render(&mut self, frame: &[Rgb]) -> DriverResult<()> {
            assert_eq!(frame.len(), 8);
            self.log.lock().unwrap().push(Call::Frame);
            Ok(())
        }
    }

    struct FakeAudio {
        log: Log,
    }

    impl AudioOutput for FakeAudio {
        fn play(&mut self, clip: &str) -> DriverResult<()> {
            self.log.lock().unwrap().push(Call::Play(clip.to_string()));
            Ok(())
        }

        fn set_ambient_volume(&mut self, volume: f32) -> DriverResult<()> {
            self.log.lock().unwrap().push(Call::Volume(volume));
            Ok(())
        }

        fn start_ambient(&mut self, _track: &str, _volume: f32) -> DriverResult<()> {
            Ok(())
        }

        fn stop_ambient(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }

    fn fast_settings() -> FeedbackConfig {
        FeedbackConfig {
            motion_secs: 0.02,
            led_refresh_ms: 1,
            fade_steps: 3,
            fade_step_ms: 1,
            settle_ms: 1,
            duck_hold_ms: 1,
            ..FeedbackConfig::default()
        }
    }

    fn coordinator(fail_moves: bool) -> (FeedbackCoordinator, Log) {
        coordinator_with_delay(fail_moves, Duration::from_millis(20))
    }

    fn coordinator_with_delay(fail_moves: bool, delay: Duration) -> (FeedbackCoordinator, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let devices = Devices {
            actuator: Box::new(FakeActuator { log: log.clone(), fail: fail_moves, delay }),
            strip: Box::new(FakeStrip { log: log.clone() }),
            audio: Box::new(FakeAudio { log: log.clone() }),
        };
        (FeedbackCoordinator::new(devices, fast_settings()).with_seed(5), log)
    }

    #[test]
    fn test_decide_table() {
        assert_eq!(decide(Spell::OpenSpell, DeviceState::Closed), (DeviceState::Open, Some(Action::Open)));
        assert_eq!(decide(Spell::CloseSpell, DeviceState::Open), (DeviceState::Closed, Some(Action::Close)));
        assert_eq!(decide(Spell::OpenSpell, DeviceState::Open), (DeviceState::Open, None));
        assert_eq!(decide(Spell::CloseSpell, DeviceState::Closed), (DeviceState::Closed, None));
    }

    #[test]
    fn test_satisfied_spell_is_noop() {
        let (fc, log) = coordinator(false);
        assert_eq!(fc.handle(Spell::CloseSpell).unwrap(), None);
        assert_eq!(fc.state(), DeviceState::Closed);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_open_acts_once() {
        let (fc, log) = coordinator(false);
        assert_eq!(fc.handle(Spell::OpenSpell).unwrap(), Some(Action::Open));
        assert_eq!(fc.handle(Spell::OpenSpell).unwrap(), None);
        assert_eq!(fc.state(), DeviceState::Open);

        let calls = log.lock().unwrap();
        let moves = calls.iter().filter(|c| matches!(c, Call::Move(_))).count();
        assert_eq!(moves, 1);
    }

    #[test]
    fn test_sequence_order() {
        let (fc, log) = coordinator(false);
        fc.handle(Spell::OpenSpell).unwrap();
        let calls = log.lock().unwrap().clone();

        assert_eq!(calls[0], Call::Volume(0.4));
        assert_eq!(calls[1], Call::Play("Alohamora.mp3".to_string()));
        assert_eq!(calls[2], Call::Volume(0.6));
        let move_at = calls.iter().position(|c| *c == Call::Move(DeviceState::Open)).unwrap();
        assert!(move_at > 2);
        assert_eq!(calls.last(), Some(&Call::Release));
        // Fade frames plus the final blank follow the move.
        let frames_after = calls[move_at..].iter().filter(|c| **c == Call::Frame).count();
        assert!(frames_after >= 4);
    }

    #[test]
    fn test_state_readable_during_sequence() {
        let (fc, _log) = coordinator_with_delay(false, Duration::from_millis(600));
        let fc = Arc::new(fc);
        let worker = {
            let fc = fc.clone();
            thread::spawn(move || fc.handle(Spell::OpenSpell))
        };

        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        assert_eq!(fc.state(), DeviceState::Closed);
        assert!(started.elapsed() < Duration::from_millis(100));

        assert_eq!(worker.join().unwrap().unwrap(), Some(Action::Open));
        assert_eq!(fc.state(), DeviceState::Open);
    }

    #[test]
    fn test_driver_failure_keeps_state() {
        let (fc, _log) = coordinator(true);
        assert!(fc.handle(Spell::OpenSpell).is_err());
        assert_eq!(fc.state(), DeviceState::Closed);
        // The handler path logs instead of propagating.
        fc.on_label(Spell::OpenSpell);
        assert_eq!(fc.state(), DeviceState::Closed);
    }
}
