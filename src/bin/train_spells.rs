//! Train the native spell classifier from a directory of drawings.

use anyhow::{bail, Result};
use clap::Parser;
use colored::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use smartcore::ensemble::random_forest_classifier::{RandomForestClassifier, RandomForestClassifierParameters};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::metrics::accuracy;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use spellcast::dataset::{load_dataset, Dataset};
use spellcast::inference::SpellForest;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the spell classifier", long_about = None)]
struct Args {
    /// Directory of labelled PNGs
    #[arg(short, long, default_value = "spells_dataset")]
    dir: PathBuf,

    /// Where the trained model is written
    #[arg(short, long, default_value = "spell_classifier.bin")]
    output: PathBuf,

    /// Side the images are scaled to
    #[arg(long, default_value_t = 28)]
    size: u32,

    #[arg(long, default_value_t = 100)]
    trees: u16,

    /// Fraction held out for testing
    #[arg(long, default_value_t = 0.25)]
    test_fraction: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Shuffled train/test index split.
fn split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let test_len = ((n as f64) * test_fraction).round() as usize;
    let test = indices.split_off(n - test_len.min(n));
    (indices, test)
}

fn subset(data: &Dataset, idx: &[usize]) -> (DenseMatrix<f64>, Vec<u32>) {
    let rows: Vec<Vec<f64>> = idx.iter().map(|&i| data.features[i].clone()).collect();
    let labels = idx.iter().map(|&i| data.labels[i]).collect();
    (DenseMatrix::from_2d_vec(&rows), labels)
}

fn main() -> Result<()> {
    let args = Args::parse();
    spellcast::init_tracing(false);

    let data = load_dataset(&args.dir, args.size)?;
    let opens = data.labels.iter().filter(|&&l| l == 0).count();
    info!("Loaded {} samples ({} open, {} close)", data.len(), opens, data.len() - opens);
    if data.len() < 4 || opens == 0 || opens == data.len() {
        bail!("Need examples of both spells in {}", args.dir.display());
    }

    let (train_idx, test_idx) = split(data.len(), args.test_fraction, args.seed);
    let (x_train, y_train) = subset(&data, &train_idx);

    let params = RandomForestClassifierParameters::default()
        .with_n_trees(args.trees)
        .with_seed(args.seed);
    let model: SpellForest = RandomForestClassifier::fit(&x_train, &y_train, params)?;

    if !test_idx.is_empty() {
        let (x_test, y_test) = subset(&data, &test_idx);
        let predicted = model.predict(&x_test)?;
        let score: f64 = accuracy(&y_test, &predicted);
        println!("{}", format!("Model accuracy: {:.4} on {} held-out samples", score, y_test.len()).green());
    }

    fs::write(&args.output, bincode::serialize(&model)?)?;
    println!("Model saved as {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let (train, test) = split(20, 0.25, 42);
        assert_eq!(test.len(), 5);
        assert_eq!(train.len(), 15);
        assert!(test.iter().all(|i| !train.contains(i)));
        assert_eq!(split(20, 0.25, 42), (train, test));
    }

    #[test]
    fn test_held_out_accuracy() {
        let truth: Vec<u32> = vec![0, 1, 1, 0];
        let predicted: Vec<u32> = vec![0, 1, 0, 0];
        let score: f64 = accuracy(&truth, &predicted);
        assert!((score - 0.75).abs() < 1e-9);
    }
}
