use image::GrayImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use smartcore::ensemble::random_forest_classifier::RandomForestClassifier;
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::ClassifierConfig;
use crate::types::Spell;

/// The native model: a random forest over flattened mask pixels.
pub type SpellForest = RandomForestClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("no classifier loaded")]
    Unavailable,

    #[error("mask must be {expected}x{expected}, got {got_w}x{got_h}")]
    MalformedImage { expected: u32, got_w: u32, got_h: u32 },

    #[error("model failed: {0}")]
    Model(String),

    #[error("model produced unknown class {0}")]
    UnknownLabel(i64),

    /// A job abandoned by the watchdog still holds the model.
    #[error("classifier still held by an earlier job")]
    Busy,
}

pub trait GesturePredictor: Send {
    fn name(&self) -> String;
    fn predict(&mut self, mask: &GrayImage) -> Result<Spell, PredictError>;
}

/// Row-major pixel values in 0..=255, the layout the models are trained on.
pub fn features(mask: &GrayImage) -> Vec<f64> {
    mask.pixels().map(|p| p[0] as f64).collect()
}

fn check_shape(mask: &GrayImage, side: u32) -> Result<(), PredictError> {
    if mask.width() != side || mask.height() != side {
        return Err(PredictError::MalformedImage {
            expected: side,
            got_w: mask.width(),
            got_h: mask.height(),
        });
    }
    Ok(())
}

pub struct ForestClassifier {
    model: SpellForest,
    side: u32,
}

impl ForestClassifier {
    pub fn new(model: SpellForest, side: u32) -> Self {
        Self { model, side }
    }

    pub fn load(path: &Path, side: u32) -> anyhow::Result<Self> {
        let bytes = fs::read(path)?;
        let model: SpellForest = bincode::deserialize(&bytes)?;
        Ok(Self::new(model, side))
    }
}

impl GesturePredictor for ForestClassifier {
    fn name(&self) -> String {
        "Random forest (native)".to_string()
    }

    fn predict(&mut self, mask: &GrayImage) -> Result<Spell, PredictError> {
        check_shape(mask, self.side)?;
        let x = DenseMatrix::from_2d_vec(&vec![features(mask)]);
        let labels = self.model.predict(&x).map_err(|e| PredictError::Model(e.to_string()))?;
        let class = *labels.first().ok_or_else(|| PredictError::Model("empty prediction".to_string()))?;
        Spell::from_class(class as i64).ok_or(PredictError::UnknownLabel(class as i64))
    }
}

/// A classifier exported to ONNX (e.g. from scikit-learn), taking a
/// `[1, side*side]` float tensor and producing an int64 label output.
pub struct OnnxClassifier {
    session: Session,
    label_output: String,
    side: u32,
}

impl OnnxClassifier {
    pub fn load(path: &Path, label_output: &str, side: u32) -> anyhow::Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(path)?;
        Ok(Self {
            session,
            label_output: label_output.to_string(),
            side,
        })
    }

    fn run(&mut self, mask: &GrayImage) -> ort::Result<i64> {
        let data: Vec<f32> = mask.pixels().map(|p| p[0] as f32).collect();
        let shape = vec![1, data.len()];
        let input = ort::value::Tensor::from_array((shape, data))?;
        let outputs = self.session.run(ort::inputs![input])?;
        let (_shape, labels) = outputs[self.label_output.as_str()].try_extract_tensor::<i64>()?;
        Ok(labels.first().copied().unwrap_or(-1))
    }
}

impl GesturePredictor for OnnxClassifier {
    fn name(&self) -> String {
        "ONNX classifier".to_string()
    }

    fn predict(&mut self, mask: &GrayImage) -> Result<Spell, PredictError> {
        check_shape(mask, self.side)?;
        let class = self.run(mask).map_err(|e| PredictError::Model(e.to_string()))?;
        Spell::from_class(class).ok_or(PredictError::UnknownLabel(class))
    }
}

/// Stands in when no model could be loaded; every prediction fails.
pub struct UnavailablePredictor;

impl GesturePredictor for UnavailablePredictor {
    fn name(&self) -> String {
        "No classifier".to_string()
    }

    fn predict(&mut self, _mask: &GrayImage) -> Result<Spell, PredictError> {
        Err(PredictError::Unavailable)
    }
}

/// Picks the backend from the model file's extension. A missing or broken
/// model leaves recognition disabled rather than stopping the program.
pub fn load_predictor(config: &ClassifierConfig, side: u32) -> Box<dyn GesturePredictor> {
    let path = config.model_path.as_path();
    if !path.exists() {
        warn!("Classifier model not found at {}. Recognition disabled.", path.display());
        return Box::new(UnavailablePredictor);
    }

    let is_onnx = path.extension().and_then(|e| e.to_str()) == Some("onnx");
    let loaded: anyhow::Result<Box<dyn GesturePredictor>> = if is_onnx {
        OnnxClassifier::load(path, &config.onnx_label_output, side).map(|c| Box::new(c) as Box<dyn GesturePredictor>)
    } else {
        ForestClassifier::load(path, side).map(|c| Box::new(c) as Box<dyn GesturePredictor>)
    };

    match loaded {
        Ok(predictor) => {
            info!("Loaded {} from {}", predictor.name(), path.display());
            predictor
        }
        Err(e) => {
            warn!("Failed to load classifier {}: {}. Recognition disabled.", path.display(), e);
            Box::new(UnavailablePredictor)
        }
    }
}
