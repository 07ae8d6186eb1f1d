use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Result;
use tracing::{info, warn};

use crate::types::DeviceState;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub segmentation: SegmentationConfig,
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub raster: RasterConfig,
    pub classifier: ClassifierConfig,
    pub feedback: FeedbackConfig,
    pub hardware: HardwareConfig,
}

/// Thresholds for deciding when a gesture starts and ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Pixels per tick below which the wand counts as still.
    pub movement_threshold: f64,
    /// Seconds the wand must be visible before a trace may start.
    pub presence_duration_secs: f64,
    /// Seconds of stillness (or absence) that end a trace.
    pub stillness_duration_secs: f64,
    /// Traces with fewer points are treated as reflections.
    pub min_trace_points: usize,
    /// Sensing cadence.
    pub tick_period_secs: f64,
    /// Samples are ignored for this long after a completed trace.
    pub complete_cooldown_secs: f64,
    /// Samples are ignored for this long after a canceled trace.
    pub cancel_cooldown_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    /// Frames are scaled to this size before detection; it is also the trace canvas.
    pub width: u32,
    pub height: u32,
    pub mirror: bool,
}

/// Bright-blob filter, tuned for an IR-lit wand tip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_threshold: u8,
    pub min_area: usize,
    pub max_area: usize,
    pub min_circularity: f64,
    pub min_inertia_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    pub stroke_width: u32,
    pub blur_sigma: f32,
    pub threshold: u8,
    /// Side of the square classifier input.
    pub output_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// `.bin` for a native forest, `.onnx` for an exported model.
    pub model_path: PathBuf,
    /// Name of the label output of an ONNX model.
    pub onnx_label_output: String,
    /// A classification (plus its feedback) running longer than this is considered hung.
    pub watchdog_secs: f64,
    /// Write each normalised mask here, for debugging.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub initial_state: DeviceState,
    pub home_secs: f64,
    pub motion_secs: f64,
    pub led_count: usize,
    pub led_refresh_ms: u64,
    pub fade_steps: u32,
    pub fade_step_ms: u64,
    pub settle_ms: u64,
    pub ambient_track: Option<String>,
    pub ambient_volume: f32,
    pub duck_volume: f32,
    pub duck_hold_ms: u64,
    pub open_clip: String,
    pub close_clip: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Program (and arguments) that owns the servo, strip and speaker.
    /// When empty the simulated drivers are used.
    pub helper_command: Vec<String>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            movement_threshold: 6.0,
            presence_duration_secs: 0.6,
            stillness_duration_secs: 1.0,
            min_trace_points: 10,
            tick_period_secs: 0.05,
            complete_cooldown_secs: 1.0,
            cancel_cooldown_secs: 0.5,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            mirror: true,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_threshold: 180,
            min_area: 15,
            max_area: 500,
            min_circularity: 0.75,
            min_inertia_ratio: 0.3,
        }
    }
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            stroke_width: 7,
            blur_sigma: 1.1,
            threshold: 80,
            output_size: 28,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("spell_classifier.bin"),
            onnx_label_output: "label".to_string(),
            watchdog_secs: 10.0,
            snapshot_path: None,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            initial_state: DeviceState::Closed,
            home_secs: 1.5,
            motion_secs: 1.2,
            led_count: 30,
            led_refresh_ms: 5,
            fade_steps: 20,
            fade_step_ms: 20,
            settle_ms: 200,
            ambient_track: Some("loop.mp3".to_string()),
            ambient_volume: 0.6,
            duck_volume: 0.4,
            duck_hold_ms: 100,
            open_clip: "Alohamora.mp3".to_string(),
            close_clip: "Colloportus.mp3".to_string(),
        }
    }
}

/// Seconds to a whole number of nanoseconds, so that 0.6 is exactly 600ms.
pub fn secs(value: f64) -> Duration {
    Duration::from_nanos((value.max(0.0) * 1e9).round() as u64)
}

impl SegmentationConfig {
    pub fn presence_duration(&self) -> Duration {
        secs(self.presence_duration_secs)
    }

    pub fn stillness_duration(&self) -> Duration {
        secs(self.stillness_duration_secs)
    }

    pub fn tick_period(&self) -> Duration {
        secs(self.tick_period_secs)
    }

    pub fn complete_cooldown(&self) -> Duration {
        secs(self.complete_cooldown_secs)
    }

    pub fn cancel_cooldown(&self) -> Duration {
        secs(self.cancel_cooldown_secs)
    }
}

impl ClassifierConfig {
    pub fn watchdog(&self) -> Duration {
        secs(self.watchdog_secs)
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, expected: "> 0", value: value.to_string() })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, expected: ">= 0", value: value.to_string() })
    }
}

fn unit(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, expected: "in [0, 1]", value: value.to_string() })
    }
}

impl AppConfig {
    pub const DEFAULT_PATH: &'static str = "spellcast.json";

    /// Reports the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let seg = &self.segmentation;
        non_negative("segmentation.movement_threshold", seg.movement_threshold)?;
        non_negative("segmentation.presence_duration_secs", seg.presence_duration_secs)?;
        positive("segmentation.stillness_duration_secs", seg.stillness_duration_secs)?;
        positive("segmentation.tick_period_secs", seg.tick_period_secs)?;
        non_negative("segmentation.complete_cooldown_secs", seg.complete_cooldown_secs)?;
        non_negative("segmentation.cancel_cooldown_secs", seg.cancel_cooldown_secs)?;
        if seg.min_trace_points == 0 {
            return Err(ConfigError::OutOfRange {
                field: "segmentation.min_trace_points",
                expected: ">= 1",
                value: "0".to_string(),
            });
        }
        positive("camera.width", self.camera.width as f64)?;
        positive("camera.height", self.camera.height as f64)?;
        if self.detector.min_area > self.detector.max_area {
            return Err(ConfigError::OutOfRange {
                field: "detector.min_area",
                expected: "<= detector.max_area",
                value: self.detector.min_area.to_string(),
            });
        }
        positive("raster.stroke_width", self.raster.stroke_width as f64)?;
        positive("raster.output_size", self.raster.output_size as f64)?;
        positive("classifier.watchdog_secs", self.classifier.watchdog_secs)?;
        positive("feedback.motion_secs", self.feedback.motion_secs)?;
        unit("feedback.ambient_volume", self.feedback.ambient_volume)?;
        unit("feedback.duck_volume", self.feedback.duck_volume)?;
        Ok(())
    }

    /// Loads the file at `path`, falling back to defaults when it is missing
    /// or unreadable, then writes it back so new fields show up in it.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)?;
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!("Loaded configuration from {}", path.display());
                    c
                }
                Err(e) => {
                    warn!("Error parsing config {}: {}. Loading defaults.", path.display(), e);
                    Self::default()
                }
            }
        } else {
            info!("Configuration file not found. Creating default at {}", path.display());
            Self::default()
        };

        config.validate()?;
        config.save(path)?;

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_wand_tuning() {
        let config = AppConfig::default();
        assert_eq!(config.segmentation.movement_threshold, 6.0);
        assert_eq!(config.segmentation.min_trace_points, 10);
        assert_eq!(config.segmentation.tick_period(), Duration::from_millis(50));
        assert_eq!(config.feedback.initial_state, DeviceState::Closed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{ "segmentation": { "min_trace_points": 4 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.segmentation.min_trace_points, 4);
        assert_eq!(config.segmentation.stillness_duration_secs, 1.0);
        assert_eq!(config.raster.output_size, 28);
    }

    #[test]
    fn test_load_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spellcast.json");
        let config = AppConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.detector.min_threshold, 180);

        let reloaded = AppConfig::load(&path).unwrap();
        assert_eq!(reloaded.feedback.led_count, config.feedback.led_count);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spellcast.json");
        fs::write(&path, r#"{ "segmentation": { "tick_period_secs": 0.0 } }"#).unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("tick_period_secs"));
    }

    #[test]
    fn test_validate_volume_range() {
        let mut config = AppConfig::default();
        config.feedback.duck_volume = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "feedback.duck_volume", .. })
        ));
    }
}
