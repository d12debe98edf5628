//! The fitted column encoder shared by training, evaluation and serving.
//!
//! Statistics are learned from the training partition only and the encoder is
//! read-only afterwards. Unseen or null categories encode as an all-zero block
//! and missing numerics encode as the training mean, so `transform` never
//! fails on values it has not seen.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use ndarray::Array2;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::{f64_values, has_column, str_values};

use super::domain::FeatureGroups;

/// Mean and scale learned for one numeric column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericStat {
    pub column: String,
    pub mean: f64,
    /// Population standard deviation; 1 when the column is constant.
    pub scale: f64,
}

/// Sorted vocabulary of one categorical column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub column: String,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedEncoder {
    pub numeric: Vec<NumericStat>,
    pub categorical: Vec<Vocabulary>,
    pub passthrough: Vec<String>,
}

/// Column values pulled out of a frame or a single record.
struct Columns {
    rows: usize,
    numeric: Vec<Vec<Option<f64>>>,
    categorical: Vec<Vec<Option<String>>>,
    passthrough: Vec<Vec<Option<f64>>>,
}

impl FittedEncoder {
    /// Learn statistics from `train`; only the grouped columns are read.
    pub fn fit(train: &DataFrame, groups: &FeatureGroups) -> CsatResult<Self> {
        groups.validate()?;
        let mut numeric = Vec::with_capacity(groups.numeric.len());
        for column in &groups.numeric {
            let values: Vec<f64> = f64_values(train, column)?
                .into_iter()
                .flatten()
                .filter(|v| v.is_finite())
                .collect();
            let (mean, scale) = if values.is_empty() {
                (0.0, 1.0)
            } else {
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                (mean, if std > 0.0 { std } else { 1.0 })
            };
            numeric.push(NumericStat {
                column: column.clone(),
                mean,
                scale,
            });
        }

        let mut categorical = Vec::with_capacity(groups.categorical.len());
        for column in &groups.categorical {
            let values: BTreeSet<String> = str_values(train, column)?.into_iter().flatten().collect();
            categorical.push(Vocabulary {
                column: column.clone(),
                values: values.into_iter().collect(),
            });
        }

        Ok(Self {
            numeric,
            categorical,
            passthrough: groups.passthrough.clone(),
        })
    }

    /// Raw feature columns this encoder expects, in output order.
    pub fn input_columns(&self) -> Vec<String> {
        self.numeric
            .iter()
            .map(|stat| stat.column.clone())
            .chain(self.categorical.iter().map(|vocab| vocab.column.clone()))
            .chain(self.passthrough.iter().cloned())
            .collect()
    }

    /// Names of the encoded output columns.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|stat| stat.column.clone()).collect();
        for vocab in &self.categorical {
            names.extend(vocab.values.iter().map(|value| format!("{}={value}", vocab.column)));
        }
        names.extend(self.passthrough.iter().cloned());
        names
    }

    pub fn width(&self) -> usize {
        self.numeric.len()
            + self.categorical.iter().map(|v| v.values.len()).sum::<usize>()
            + self.passthrough.len()
    }

    /// Encode every row of `df`; extra columns (including the label) are ignored.
    pub fn transform(&self, df: &DataFrame) -> CsatResult<Array2<f64>> {
        let missing: Vec<String> = self
            .input_columns()
            .into_iter()
            .filter(|column| !has_column(df, column))
            .collect();
        if !missing.is_empty() {
            return Err(CsatError::invalid(format!(
                "frame is missing feature columns: {}",
                missing.join(", ")
            )));
        }
        let columns = Columns {
            rows: df.height(),
            numeric: self
                .numeric
                .iter()
                .map(|stat| f64_values(df, &stat.column))
                .collect::<CsatResult<_>>()?,
            categorical: self
                .categorical
                .iter()
                .map(|vocab| str_values(df, &vocab.column))
                .collect::<CsatResult<_>>()?,
            passthrough: self
                .passthrough
                .iter()
                .map(|column| f64_values(df, column))
                .collect::<CsatResult<_>>()?,
        };
        Ok(self.assemble(&columns))
    }

    /// Encode one raw record; its key set must match [`Self::input_columns`] exactly.
    pub fn transform_record(&self, record: &BTreeMap<String, Value>) -> CsatResult<Array2<f64>> {
        let expected: BTreeSet<String> = self.input_columns().into_iter().collect();
        let given: BTreeSet<String> = record.keys().cloned().collect();
        if expected != given {
            let missing: Vec<&String> = expected.difference(&given).collect();
            let extra: Vec<&String> = given.difference(&expected).collect();
            return Err(CsatError::invalid(format!(
                "record fields do not match the feature set (missing: {missing:?}, unexpected: {extra:?})"
            )));
        }
        let number = |column: &str| -> CsatResult<Vec<Option<f64>>> {
            json_number(column, &record[column]).map(|value| vec![value])
        };
        let columns = Columns {
            rows: 1,
            numeric: self
                .numeric
                .iter()
                .map(|stat| number(&stat.column))
                .collect::<CsatResult<_>>()?,
            categorical: self
                .categorical
                .iter()
                .map(|vocab| vec![json_category(&record[&vocab.column])])
                .collect(),
            passthrough: self
                .passthrough
                .iter()
                .map(|column| number(column))
                .collect::<CsatResult<_>>()?,
        };
        Ok(self.assemble(&columns))
    }

    fn assemble(&self, columns: &Columns) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((columns.rows, self.width()));
        for row in 0..columns.rows {
            let mut offset = 0;
            for (stat, values) in self.numeric.iter().zip(&columns.numeric) {
                out[[row, offset]] = match values[row] {
                    Some(v) if v.is_finite() => (v - stat.mean) / stat.scale,
                    _ => 0.0,
                };
                offset += 1;
            }
            for (vocab, values) in self.categorical.iter().zip(&columns.categorical) {
                if let Some(value) = &values[row] {
                    if let Ok(position) = vocab.values.binary_search(value) {
                        out[[row, offset + position]] = 1.0;
                    }
                }
                offset += vocab.values.len();
            }
            for values in &columns.passthrough {
                out[[row, offset]] = values[row].filter(|v| v.is_finite()).unwrap_or(0.0);
                offset += 1;
            }
        }
        out
    }
}

fn json_number(column: &str, value: &Value) -> CsatResult<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(|_| {
            CsatError::invalid(format!("field '{column}' expects a number, got '{s}'"))
        }),
        other => Err(CsatError::invalid(format!(
            "field '{column}' expects a number, got {other}"
        ))),
    }
}

fn json_category(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
