//! Labelled trace images on disk, as written by `draw_spells`:
//! a name containing `open` is the open spell, anything else the close spell.

use anyhow::{Context, Result};
use image::GrayImage;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::types::Spell;

pub struct Dataset {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<u32>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Spell named by a dataset file name.
pub fn label_for(file_name: &str) -> Spell {
    if file_name.to_ascii_lowercase().contains("open") {
        Spell::OpenSpell
    } else {
        Spell::CloseSpell
    }
}

/// Next free `<prefix>_<n>.png` in `dir`.
pub fn next_file_name(dir: &Path, prefix: &str) -> String {
    let mut n = 0;
    loop {
        let name = format!("{}_{}.png", prefix, n);
        if !dir.join(&name).exists() {
            return name;
        }
        n += 1;
    }
}

/// Loads every PNG in `dir`, resized to `side` x `side` if needed.
/// Unreadable images are skipped with a warning.
pub fn load_dataset(dir: &Path, side: u32) -> Result<Dataset> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read dataset directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("png")) == Some(true))
        .collect();
    entries.sort();

    let mut features = Vec::with_capacity(entries.len());
    let mut labels = Vec::with_capacity(entries.len());
    for path in entries {
        let image: GrayImage = match image::open(&path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let image = if image.dimensions() == (side, side) {
            image
        } else {
            image::imageops::resize(&image, side, side, image::imageops::FilterType::Triangle)
        };

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let spell = label_for(name);
        debug!("{} -> {:?}", name, spell);
        features.push(crate::inference::features(&image));
        labels.push(spell.class());
    }

    Ok(Dataset { features, labels })
}
