use image::{imageops::{self, FilterType}, GrayImage, ImageBuffer, Rgb};
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
    Camera,
};
use anyhow::{Result, Context, anyhow};
use colored::*;

use crate::config::{CameraConfig, DetectorConfig};
use crate::detector::BlobDetector;
use crate::source::PositionSource;

pub struct CameraSource {
    camera: Camera,
}

impl CameraSource {
    pub fn new(index: u32) -> Result<Self> {
        let cam_index = CameraIndex::Index(index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(cam_index, requested).context("Failed to create camera instance")?;

        camera.open_stream().map_err(|e| anyhow!(e)).context("Failed to open camera stream")?;

        println!("{}", format!("Opened camera: {}", camera.info().human_name()).green());
        println!("Format: {}", camera.camera_format());

        Ok(Self { camera })
    }

    pub fn capture(&mut self) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>> {
        let frame = self.camera.frame().map_err(|e| anyhow!(e)).context("Failed to get frame")?;
        let decoded = frame.decode_image::<RgbFormat>().map_err(|e| anyhow!(e)).context("Failed to decode frame")?;
        Ok(decoded)
    }

    pub fn name(&self) -> String {
        self.camera.info().human_name()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        let _ = self.camera.stop_stream();
    }
}

/// Prints the cameras the native backend can see.
pub fn list_cameras() -> Result<()> {
    let cameras = query(ApiBackend::Auto).map_err(|e| anyhow!(e)).context("Failed to query cameras")?;
    if cameras.is_empty() {
        println!("{}", "No cameras found".yellow());
    }
    for info in cameras {
        println!("{}: {}", info.index(), info.human_name());
    }
    Ok(())
}

/// Luma conversion, scaling to the trace canvas and optional mirroring,
/// so a stroke to the user's right is drawn to the right.
pub fn prepare_frame(frame: &ImageBuffer<Rgb<u8>, Vec<u8>>, config: &CameraConfig) -> GrayImage {
    let gray = imageops::grayscale(frame);
    let mut scaled = if gray.dimensions() == (config.width, config.height) {
        gray
    } else {
        imageops::resize(&gray, config.width, config.height, FilterType::Triangle)
    };
    if config.mirror {
        imageops::flip_horizontal_in_place(&mut scaled);
    }
    scaled
}

/// Camera plus blob detector: the production position source.
pub struct CameraPositionSource {
    camera: CameraSource,
    detector: BlobDetector,
    config: CameraConfig,
    last_frame: Option<GrayImage>,
}

impl CameraPositionSource {
    pub fn open(config: &CameraConfig, detector: &DetectorConfig) -> Result<Self> {
        Ok(Self {
            camera: CameraSource::new(config.index)?,
            detector: BlobDetector::new(detector.clone()),
            config: config.clone(),
            last_frame: None,
        })
    }
}

impl PositionSource for CameraPositionSource {
    fn name(&self) -> String {
        format!("Camera ({})", self.camera.name())
    }

    fn poll(&mut self) -> Result<Option<(f64, f64)>> {
        let frame = self.camera.capture()?;
        let gray = prepare_frame(&frame, &self.config);
        let tip = self.detector.detect(&gray);
        self.last_frame = Some(gray);
        Ok(tip)
    }

    fn frame(&self) -> Option<&GrayImage> {
        self.last_frame.as_ref()
    }
}
