//! Wand-gesture recognition for a spell-operated box.
//!
//! A camera watches an IR-lit wand tip. Each tick the tip position feeds a
//! segmentation state machine; finished traces are rasterised and
//! classified off-thread, and a recognised spell opens or closes the lid
//! with sound and light.

pub mod args;
pub mod bridge;
pub mod camera;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod dispatcher;
pub mod engine;
pub mod feedback;
pub mod font;
pub mod hardware;
pub mod inference;
pub mod lights;
pub mod output;
pub mod segmentation;
pub mod source;
pub mod trace;
pub mod types;

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}
