//! Draw training examples with the mouse.
//!
//! [SPACE] saves the drawing as a 28x28 PNG, [C] clears, [ESC] quits.

use anyhow::Result;
use clap::Parser;
use colored::*;
use image::{imageops::{self, FilterType}, GrayImage};
use minifb::{Key, MouseButton, MouseMode};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use spellcast::dataset;
use spellcast::output::WindowOutput;
use spellcast::trace;
use spellcast::types::Point;

const CANVAS: u32 = 300;
const STROKE: u32 = 7;

#[derive(Parser, Debug)]
#[command(author, version, about = "Draw spell examples for training", long_about = None)]
struct Args {
    /// Where drawings are saved
    #[arg(short, long, default_value = "spells_dataset")]
    dir: PathBuf,

    /// Label for this session's drawings ("open" or "close")
    #[arg(short, long, default_value = "close")]
    label: String,

    /// Side of the saved images
    #[arg(long, default_value_t = 28)]
    size: u32,
}

fn to_rgb(canvas: &GrayImage) -> Vec<u8> {
    canvas.pixels().flat_map(|p| [p[0], p[0], p[0]]).collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    spellcast::init_tracing(false);
    fs::create_dir_all(&args.dir)?;

    let mut window = WindowOutput::new("Draw Spell", CANVAS as usize, CANVAS as usize)?;
    let mut canvas = GrayImage::new(CANVAS, CANVAS);
    let mut last: Option<Point> = None;

    println!("{}", "[SPACE] = Save drawing, [C] = Clear, [ESC] = Quit".cyan());

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if window.is_mouse_down(MouseButton::Left) {
            if let Some((x, y)) = window.get_mouse_pos(MouseMode::Discard) {
                let here = Point::new(x as f64, y as f64);
                if let Some(prev) = last {
                    trace::draw_stroke(&mut canvas, &prev, &here, STROKE);
                }
                last = Some(here);
            }
        } else {
            last = None;
        }

        if window.is_key_pressed(Key::C) {
            canvas = GrayImage::new(CANVAS, CANVAS);
        }

        if window.is_key_pressed(Key::Space) {
            let small = imageops::resize(&canvas, args.size, args.size, FilterType::Triangle);
            let name = dataset::next_file_name(&args.dir, &args.label);
            small.save(args.dir.join(&name))?;
            info!("Saved: {}", name);
            canvas = GrayImage::new(CANVAS, CANVAS);
        }

        window.update(&to_rgb(&canvas))?;
    }

    Ok(())
}
