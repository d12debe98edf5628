//! Thin helpers over `polars` for artefact IO and typed column access.
//!
//! Stages exchange tables as parquet (merged, features) or CSV with header
//! (train/test partitions). Column readers always cast, so callers do not
//! care whether a numeric column came back from CSV as integer or float.

use std::fs::File;
use std::path::Path;

use polars::prelude::*;

use crate::common::error::{CsatError, CsatResult};
use crate::common::fs::ensure_parent;
use crate::common::time;

fn require_file(path: &Path) -> CsatResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CsatError::config(format!("input not found: {}", path.display())))
    }
}

/// Read a CSV with header, inferring dtypes from the whole file.
pub fn read_csv(path: &Path) -> CsatResult<DataFrame> {
    require_file(path)?;
    let df = CsvReader::from_path(path)?
        .has_header(true)
        .infer_schema(None)
        .finish()?;
    Ok(df)
}

pub fn write_csv(df: &mut DataFrame, path: &Path) -> CsatResult<()> {
    ensure_parent(path)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> CsatResult<DataFrame> {
    require_file(path)?;
    let file = File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

pub fn write_parquet(df: &mut DataFrame, path: &Path) -> CsatResult<()> {
    ensure_parent(path)?;
    let file = File::create(path)?;
    ParquetWriter::new(file).finish(df)?;
    Ok(())
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

/// Column values as `f64`; unparseable cells become `None`.
pub fn f64_values(df: &DataFrame, name: &str) -> CsatResult<Vec<Option<f64>>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    let values = series.f64()?.into_iter().collect();
    Ok(values)
}

/// Column values rendered as strings.
pub fn str_values(df: &DataFrame, name: &str) -> CsatResult<Vec<Option<String>>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect();
    Ok(values)
}

/// Timestamp column as epoch milliseconds, whether stored as text or temporal.
pub fn millis_values(df: &DataFrame, name: &str) -> CsatResult<Vec<Option<i64>>> {
    let column = df.column(name)?;
    let values = match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|value| value.and_then(time::parse_millis))
            .collect(),
        DataType::Datetime(unit, _) => {
            let per_milli: i64 = match unit {
                TimeUnit::Nanoseconds => 1_000_000,
                TimeUnit::Microseconds => 1_000,
                TimeUnit::Milliseconds => 1,
            };
            let physical = column.cast(&DataType::Int64)?;
            physical
                .i64()?
                .into_iter()
                .map(|value| value.map(|raw| raw.div_euclid(per_milli)))
                .collect()
        }
        DataType::Date => {
            let physical = column.cast(&DataType::Int32)?;
            physical
                .i32()?
                .into_iter()
                .map(|value| value.map(|days| i64::from(days) * 86_400_000))
                .collect()
        }
        _ => {
            let physical = column.cast(&DataType::Int64)?;
            physical.i64()?.into_iter().collect()
        }
    };
    Ok(values)
}

/// Build a millisecond-precision datetime column.
pub fn millis_series(name: &str, values: Vec<Option<i64>>) -> CsatResult<Series> {
    let raw = Series::new(name, values);
    Ok(raw.cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}

/// Select rows by position, preserving the given order.
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> CsatResult<DataFrame> {
    let idx: Vec<IdxSize> = rows.iter().map(|&row| row as IdxSize).collect();
    let idx = IdxCa::from_vec("idx", idx);
    Ok(df.take(&idx)?)
}

/// Every column except the named ones, in original order.
pub fn without_columns(df: &DataFrame, drop: &[&str]) -> CsatResult<DataFrame> {
    let keep: Vec<String> = df
        .get_column_names()
        .into_iter()
        .filter(|name| !drop.contains(name))
        .map(str::to_string)
        .collect();
    Ok(df.select(keep)?)
}
