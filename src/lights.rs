//! LED strip animations for a spell: a pulsing wave while the lid moves and
//! a flickering fade afterwards.

use rand::Rng;

use crate::hardware::Rgb;
use crate::types::Action;

/// Per-action colours.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub low: (f64, f64, f64),
    pub high: (f64, f64, f64),
    pub fade: (f64, f64, f64),
}

impl Palette {
    pub fn for_action(action: Action) -> Self {
        match action {
            Action::Open => Palette {
                low: (100.0, 30.0, 180.0),
                high: (180.0, 60.0, 255.0),
                fade: (100.0, 20.0, 160.0),
            },
            Action::Close => Palette {
                low: (30.0, 100.0, 200.0),
                high: (70.0, 200.0, 255.0),
                fade: (30.0, 100.0, 255.0),
            },
        }
    }
}

const SPARKLE_CHANCE: f64 = 0.02;
const HEARTBEAT_HZ: f64 = 1.2;

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn channel(v: f64) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

/// One frame of the travelling wave shown while the actuator moves.
///
/// `elapsed` is seconds since the animation started and `progress` the
/// fraction of the move completed.
pub fn spell_frame<R: Rng>(action: Action, elapsed: f64, progress: f64, len: usize, rng: &mut R) -> Vec<Rgb> {
    let palette = Palette::for_action(action);
    let fade_in = (progress * 1.5).min(1.0);
    let beat = (elapsed * 2.0 * std::f64::consts::PI * HEARTBEAT_HZ).sin();
    let brightness = 0.7 + 0.3 * (0.5 + 0.5 * beat);

    (0..len)
        .map(|j| {
            if rng.gen_bool(SPARKLE_CHANCE) {
                return Rgb::WHITE;
            }
            let wave = 0.5 + 0.5 * (elapsed * 25.0 + j as f64 * 0.3).sin();
            let flicker = 0.95 + 0.1 * (elapsed * 60.0 + j as f64).sin();
            let scale = flicker * fade_in * brightness;
            Rgb::new(
                channel(lerp(palette.low.0, palette.high.0, wave) * scale),
                channel(lerp(palette.low.1, palette.high.1, wave) * scale),
                channel(lerp(palette.low.2, palette.high.2, wave) * scale),
            )
        })
        .collect()
}

/// Frame `step` of `steps` of the fade-out; brightness falls linearly.
pub fn fade_frame<R: Rng>(action: Action, step: u32, steps: u32, len: usize, rng: &mut R) -> Vec<Rgb> {
    let palette = Palette::for_action(action);
    let fade = 1.0 - step as f64 / steps.max(1) as f64;
    (0..len)
        .map(|_| {
            let flicker = 0.9 + 0.2 * rng.gen::<f64>();
            let scale = fade * flicker;
            Rgb::new(
                channel(palette.fade.0 * scale),
                channel(palette.fade.1 * scale),
                channel(palette.fade.2 * scale),
            )
        })
        .collect()
}
