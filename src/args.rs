use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(short, long, default_value = "spellcast.json")]
    pub config: PathBuf,

    /// Camera index, overrides the config file
    #[arg(long)]
    pub cam_index: Option<u32>,

    /// Classifier model (.bin forest or .onnx), overrides the config file
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Use a simulated wand instead of the camera
    #[arg(long)]
    pub simulate: bool,

    /// Run without the debug window
    #[arg(long)]
    pub headless: bool,

    /// List available cameras
    #[arg(long)]
    pub list: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Stop after this many seconds
    #[arg(long)]
    pub run_secs: Option<f64>,
}
