//! Per-table schema checks.
//!
//! Validation fails closed: every violation is recorded against its table and
//! nothing is coerced. All tables are checked even after the first failure.

use std::collections::BTreeSet;

use polars::prelude::{DataFrame, DataType};

use crate::common::error::CsatResult;
use crate::common::frame::{f64_values, str_values};

use super::domain::{ColumnType, Failure, TableKind, TableReport, TableSchema};

/// Distinct disallowed values kept in a failure entry.
const SAMPLE_LIMIT: usize = 5;

/// Check one loaded table against its declared schema.
pub fn validate_table(
    kind: TableKind,
    file: String,
    table: &TableSchema,
    df: &DataFrame,
) -> CsatResult<TableReport> {
    let mut failures = Vec::new();
    let present: BTreeSet<&str> = df.get_column_names().into_iter().collect();

    for column in table.columns.keys() {
        if !present.contains(column.as_str()) {
            failures.push(Failure::MissingColumn { column: column.clone() });
        }
    }
    for column in &present {
        if !table.columns.contains_key(*column) {
            failures.push(Failure::UnexpectedColumn { column: column.to_string() });
        }
    }

    for (column, declared) in &table.columns {
        let Ok(series) = df.column(column) else {
            continue;
        };
        if series.null_count() == series.len() {
            continue;
        }
        if !dtype_matches(*declared, series.dtype()) {
            failures.push(Failure::TypeMismatch {
                column: column.clone(),
                expected: *declared,
                found: series.dtype().to_string(),
            });
        }
    }

    let constraints = &table.constraints;
    for (column, [min, max]) in &constraints.min_max {
        if !present.contains(column.as_str()) {
            continue;
        }
        let violations = f64_values(df, column)?
            .into_iter()
            .flatten()
            .filter(|value| value < min || value > max)
            .count();
        if violations > 0 {
            failures.push(Failure::OutOfRange {
                column: column.clone(),
                min: *min,
                max: *max,
                violations,
            });
        }
    }

    for (column, allowed) in &constraints.allowed_values {
        if !present.contains(column.as_str()) {
            continue;
        }
        let mut violations = 0usize;
        let mut sample = BTreeSet::new();
        for value in str_values(df, column)?.into_iter().flatten() {
            if !allowed.iter().any(|candidate| *candidate == value) {
                violations += 1;
                if sample.len() < SAMPLE_LIMIT {
                    sample.insert(value);
                }
            }
        }
        if violations > 0 {
            failures.push(Failure::DisallowedValue {
                column: column.clone(),
                violations,
                sample: sample.into_iter().collect(),
            });
        }
    }

    for column in &constraints.critical_columns {
        let Ok(series) = df.column(column) else {
            continue;
        };
        let nulls = series.null_count();
        if nulls > 0 {
            failures.push(Failure::CriticalNull { column: column.clone(), nulls });
        }
    }

    if let Some(budget) = constraints.max_null_count {
        let nulls: usize = df.get_columns().iter().map(|s| s.null_count()).sum();
        if nulls > budget {
            failures.push(Failure::NullBudgetExceeded { nulls, budget });
        }
    }

    Ok(TableReport::new(kind, file, df.height(), failures))
}

fn is_integer(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Integer data satisfies `float`; `datetime` accepts text awaiting parsing.
fn dtype_matches(declared: ColumnType, dtype: &DataType) -> bool {
    match declared {
        ColumnType::String => matches!(dtype, DataType::String),
        ColumnType::Int => is_integer(dtype),
        ColumnType::Float => is_integer(dtype) || matches!(dtype, DataType::Float32 | DataType::Float64),
        ColumnType::Datetime => {
            matches!(dtype, DataType::String | DataType::Date | DataType::Datetime(_, _))
        }
        ColumnType::Bool => matches!(dtype, DataType::Boolean),
    }
}
