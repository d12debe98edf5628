//! Seeded stratified train/test split.

use std::collections::BTreeMap;

use polars::prelude::DataFrame;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::{f64_values, take_rows};

use super::domain::SplitDataset;

/// Row indices of each partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Per class, shuffle and send `round(n_class * test_fraction)` rows to test.
///
/// Classes are visited in ascending label order and both partitions are
/// shuffled afterwards with the same generator, so a seed fully determines
/// the result.
pub fn stratified_indices(labels: &[i64], test_fraction: f64, seed: u64) -> SplitIndices {
    let mut by_class: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, label) in labels.iter().enumerate() {
        by_class.entry(*label).or_default().push(row);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for (_, mut rows) in by_class {
        rows.shuffle(&mut rng);
        let n_test = ((rows.len() as f64) * test_fraction).round() as usize;
        let n_test = n_test.min(rows.len());
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    SplitIndices { train, test }
}

/// Split a labelled table on `target`.
pub fn stratified_split(
    table: &DataFrame,
    target: &str,
    test_fraction: f64,
    seed: u64,
) -> CsatResult<SplitDataset> {
    let labels = f64_values(table, target)?
        .into_iter()
        .enumerate()
        .map(|(row, label)| {
            label.map(|v| v as i64).ok_or_else(|| {
                CsatError::invalid(format!("row {row} has no value in target column '{target}'"))
            })
        })
        .collect::<CsatResult<Vec<i64>>>()?;
    let indices = stratified_indices(&labels, test_fraction, seed);
    if indices.train.is_empty() || indices.test.is_empty() {
        return Err(CsatError::invalid(format!(
            "split of {} rows at fraction {test_fraction} leaves an empty partition",
            labels.len()
        )));
    }
    Ok(SplitDataset {
        train: take_rows(table, &indices.train)?,
        test: take_rows(table, &indices.test)?,
    })
}
