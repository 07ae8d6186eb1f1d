use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A position in camera pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// NaN or infinite coordinates come out of the detector now and then.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// One tick of sensing: the detected position (if any) and the monotonic
/// time since the engine started.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub position: Option<Point>,
    pub at: Duration,
}

impl Sample {
    pub fn present(x: f64, y: f64, at: Duration) -> Self {
        Self { position: Some(Point::new(x, y)), at }
    }

    pub fn absent(at: Duration) -> Self {
        Self { position: None, at }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    Idle,
    PresencePending,
    Tracing,
}

/// What the indicator shows. Classifier and actuator errors never reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Tracing,
    Canceled,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Ready => "Ready...",
            Status::Tracing => "Tracing...",
            Status::Canceled => "Canceled.",
        }
    }
}

/// Logical position of the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Open,
    Closed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Open => write!(f, "open"),
            DeviceState::Closed => write!(f, "closed"),
        }
    }
}

/// Classifier output. Class index 0 is the open spell, 1 the close spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spell {
    OpenSpell,
    CloseSpell,
}

impl Spell {
    pub fn from_class(class: i64) -> Option<Self> {
        match class {
            0 => Some(Spell::OpenSpell),
            1 => Some(Spell::CloseSpell),
            _ => None,
        }
    }

    pub fn class(&self) -> u32 {
        match self {
            Spell::OpenSpell => 0,
            Spell::CloseSpell => 1,
        }
    }

    /// The device state this spell asks for.
    pub fn target(&self) -> DeviceState {
        match self {
            Spell::OpenSpell => DeviceState::Open,
            Spell::CloseSpell => DeviceState::Closed,
        }
    }
}

/// A physical feedback sequence to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Open,
    Close,
}

impl Action {
    pub fn target(&self) -> DeviceState {
        match self {
            Action::Open => DeviceState::Open,
            Action::Close => DeviceState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spell_classes() {
        assert_eq!(Spell::from_class(0), Some(Spell::OpenSpell));
        assert_eq!(Spell::from_class(1), Some(Spell::CloseSpell));
        assert_eq!(Spell::from_class(2), None);
        assert_eq!(Spell::CloseSpell.class(), 1);
    }

    #[test]
    fn test_point_validity() {
        assert!(Point::new(1.0, 2.0).is_valid());
        assert!(!Point::new(f64::NAN, 2.0).is_valid());
        assert!(!Point::new(1.0, f64::INFINITY).is_valid());
        assert_eq!(Point::new(0.0, 0.0).distance(&Point::new(3.0, 4.0)), 5.0);
    }
}
