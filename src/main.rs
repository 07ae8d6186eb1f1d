use anyhow::Result;
use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use spellcast::args::Args;
use spellcast::bridge::HelperBridge;
use spellcast::camera::{self, CameraPositionSource};
use spellcast::config::{secs, AppConfig};
use spellcast::dispatcher::ClassificationDispatcher;
use spellcast::engine::{GestureEngine, Ticker};
use spellcast::feedback::{Devices, FeedbackCoordinator};
use spellcast::hardware::{SimulatedActuator, SimulatedAudio, SimulatedStrip};
use spellcast::inference;
use spellcast::output::{compose_frame, DebugView, WindowOutput};
use spellcast::segmentation::SegmentationStateMachine;
use spellcast::source::{PositionSource, SimulatedWand};

/// Helper-backed devices when a helper command is configured, simulated
/// ones otherwise. The bridge must outlive the devices.
fn open_devices(config: &AppConfig) -> Result<(Devices, Option<HelperBridge>)> {
    if config.hardware.helper_command.is_empty() {
        info!("No device helper configured; using simulated servo, LEDs and audio");
        let devices = Devices {
            actuator: Box::new(SimulatedActuator::default()),
            strip: Box::new(SimulatedStrip::new(config.feedback.led_count)),
            audio: Box::new(SimulatedAudio::default()),
        };
        return Ok((devices, None));
    }

    let bridge = HelperBridge::spawn(&config.hardware.helper_command)?;
    let devices = Devices {
        actuator: Box::new(bridge.actuator()),
        strip: Box::new(bridge.strip(config.feedback.led_count)),
        audio: Box::new(bridge.audio()),
    };
    Ok((devices, Some(bridge)))
}

fn run<S: PositionSource>(mut engine: GestureEngine<S>, config: &AppConfig, args: &Args, coordinator: &FeedbackCoordinator) -> Result<()> {
    let (width, height) = (config.camera.width as usize, config.camera.height as usize);
    let mut window = if args.headless {
        None
    } else {
        Some(WindowOutput::new("Spellcast", width, height)?)
    };

    info!("Sensing with {} every {:?}", engine.source().name(), config.segmentation.tick_period());
    println!("{}", "Ready. Draw a spell with the wand; [Esc] quits.".green());

    let deadline = args.run_secs.map(|s| Instant::now() + secs(s));
    let mut ticker = Ticker::new(config.segmentation.tick_period());
    let mut last_status = engine.status();
    let mut frame_count: u64 = 0;

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Run time elapsed");
            break;
        }

        let report = match engine.tick() {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Sensing failed: {:#}", e);
                None
            }
        };

        let status = engine.status();
        if status != last_status {
            info!("{}", status.label());
            last_status = status;
        }

        if let Some(win) = window.as_mut() {
            if !win.is_open() || win.is_key_down(minifb::Key::Escape) {
                break;
            }
            frame_count += 1;
            let view = DebugView {
                frame: engine.source().frame(),
                marker: report.and_then(|r| r.position),
                trace: engine.machine().trace().points(),
                status,
                device: coordinator.state(),
                busy: engine.dispatcher().is_busy(),
                blink: (frame_count / 5) % 2 == 0,
            };
            let buffer = compose_frame(&view, width, height);
            if let Err(e) = win.update(&buffer) {
                error!("Window update failed: {}", e);
                window = None;
            }
        }

        ticker.wait();
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    spellcast::init_tracing(args.verbose);

    if args.list {
        return camera::list_cameras();
    }

    let mut config = AppConfig::load(&args.config)?;
    if let Some(index) = args.cam_index {
        config.camera.index = index;
    }
    if let Some(model) = &args.model {
        config.classifier.model_path = model.clone();
    }

    let (devices, _bridge) = open_devices(&config)?;
    let coordinator = Arc::new(FeedbackCoordinator::new(devices, config.feedback.clone()));
    coordinator.home()?;

    let predictor = inference::load_predictor(&config.classifier, config.raster.output_size);
    info!("Classifier: {}", predictor.name());
    let dispatcher = ClassificationDispatcher::new(predictor, coordinator.clone(), config.raster.clone(), &config.classifier);
    let machine = SegmentationStateMachine::new(config.segmentation.clone());

    let result = if args.simulate {
        let source = SimulatedWand::new(config.camera.width, config.camera.height);
        let engine = GestureEngine::new(source, machine, dispatcher, &config.camera, &config.raster);
        run(engine, &config, &args, &coordinator)
    } else {
        let source = CameraPositionSource::open(&config.camera, &config.detector)?;
        let engine = GestureEngine::new(source, machine, dispatcher, &config.camera, &config.raster);
        run(engine, &config, &args, &coordinator)
    };

    coordinator.shutdown();
    result
}
