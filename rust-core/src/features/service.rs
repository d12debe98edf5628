//! Stages 3 and 4 glue: engineered table in, fitted encoder and raw partitions out.

use std::path::Path;

use polars::prelude::DataFrame;
use tracing::info;

use crate::common::config::TransformationCfg;
use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::{has_column, write_csv};
use crate::common::fs::{load_json, save_json};

use super::domain::SplitDataset;
use super::encoder::FittedEncoder;
use super::split::stratified_split;

/// Split `table` on `target` and fit the encoder on the training partition only.
pub fn fit_and_split(
    table: &DataFrame,
    cfg: &TransformationCfg,
    target: &str,
) -> CsatResult<(FittedEncoder, SplitDataset)> {
    if !has_column(table, target) {
        return Err(CsatError::config(format!(
            "feature table has no target column '{target}'"
        )));
    }
    cfg.groups.require_present(table, target)?;

    let split = stratified_split(table, target, cfg.test_fraction, cfg.seed)?;
    let encoder = FittedEncoder::fit(&split.train, &cfg.groups)?;
    info!(
        train = split.train.height(),
        test = split.test.height(),
        width = encoder.width(),
        "encoder fitted on training partition"
    );
    Ok((encoder, split))
}

/// Persist the encoder as JSON and both partitions as CSV, target column last.
pub fn persist(
    encoder: &FittedEncoder,
    split: &SplitDataset,
    cfg: &TransformationCfg,
    target: &str,
) -> CsatResult<()> {
    save_json(&cfg.encoder_path, encoder)?;
    let mut columns = encoder.input_columns();
    columns.push(target.to_string());
    for (frame, path) in [(&split.train, &cfg.train_path), (&split.test, &cfg.test_path)] {
        let mut raw = frame.select(columns.iter().map(String::as_str))?;
        write_csv(&mut raw, path)?;
        info!(path = %path.display(), rows = raw.height(), "partition saved");
    }
    Ok(())
}

pub fn load_encoder(path: &Path) -> CsatResult<FittedEncoder> {
    load_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::frame::read_csv;
    use crate::features::domain::FeatureGroups;
    use polars::prelude::*;
    use tempfile::tempdir;

    fn table() -> DataFrame {
        let n = 40;
        df!(
            "total_price" => (0..n).map(|i| 10.0 + i as f64 * 3.5).collect::<Vec<_>>(),
            "price_tier" => (0..n).map(|i| ["cheap", "affordable", "expensive"][i % 3]).collect::<Vec<_>>(),
            "customer_state" => (0..n).map(|i| format!("S{}", i % 7)).collect::<Vec<_>>(),
            "is_late_delivery" => (0..n).map(|i| i32::from(i % 5 == 0)).collect::<Vec<_>>(),
            "label" => (0..n).map(|i| i32::from(i % 10 >= 3)).collect::<Vec<_>>()
        )
        .unwrap()
    }

    fn cfg(root: &Path) -> TransformationCfg {
        TransformationCfg {
            feature_path: root.join("features.parquet"),
            encoder_path: root.join("encoder.json"),
            train_path: root.join("train.csv"),
            test_path: root.join("test.csv"),
            test_fraction: 0.2,
            seed: 42,
            groups: FeatureGroups {
                numeric: vec!["total_price".into()],
                categorical: vec!["price_tier".into(), "customer_state".into()],
                passthrough: vec!["is_late_delivery".into()],
            },
        }
    }

    #[test]
    fn encoder_only_sees_the_training_partition() {
        let dir = tempdir().unwrap();
        let cfg = cfg(dir.path());
        let (encoder, split) = fit_and_split(&table(), &cfg, "label").unwrap();
        assert_eq!(encoder, FittedEncoder::fit(&split.train, &cfg.groups).unwrap());

        let with_test = FittedEncoder::fit(&table(), &cfg.groups).unwrap();
        assert_ne!(encoder.numeric[0].mean.to_bits(), with_test.numeric[0].mean.to_bits());
    }

    #[test]
    fn persisted_partitions_reproduce_the_encoding() {
        let dir = tempdir().unwrap();
        let cfg = cfg(dir.path());
        let (encoder, split) = fit_and_split(&table(), &cfg, "label").unwrap();
        persist(&encoder, &split, &cfg, "label").unwrap();

        let encoder_back = load_encoder(&cfg.encoder_path).unwrap();
        assert_eq!(encoder_back, encoder);
        let train_back = read_csv(&cfg.train_path).unwrap();
        assert_eq!(train_back.get_column_names().last().copied(), Some("label"));
        assert_eq!(
            encoder_back.transform(&train_back).unwrap(),
            encoder.transform(&split.train).unwrap()
        );
        assert_eq!(read_csv(&cfg.test_path).unwrap().height(), 8);
    }

    #[test]
    fn absent_feature_column_is_config_error() {
        let dir = tempdir().unwrap();
        let mut cfg = cfg(dir.path());
        cfg.groups.numeric.push("payment_value".into());
        let err = fit_and_split(&table(), &cfg, "label").unwrap_err();
        assert!(matches!(err, CsatError::Config(_)));
    }
}
