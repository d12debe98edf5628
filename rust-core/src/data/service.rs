//! Stage 2: validate every raw table, then merge them into one row per order.

use std::collections::BTreeMap;

use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::common::config::ValidationCfg;
use crate::common::error::CsatResult;
use crate::common::frame::str_values;
use crate::common::time;

use super::domain::{
    DataRepo, DropCounts, Failure, HealthReport, Schema, TableKind, TableReport,
    ValidationOutcome,
};
use super::merge::{dedup_by_key, dedup_payments, merge_tables, MergeOptions, RawTables};
use super::validate::validate_table;

/// Validate all tables against `schema` and, when every table passes, merge them.
///
/// A failed table never aborts the checks of its siblings. If any table fails,
/// the report and a `False` status marker are written and no merge happens.
/// Any error raised while loading, validating, merging or persisting writes a
/// `False` marker with the error summary before it is returned, so a marker
/// left by an earlier successful run never survives a failed one.
pub fn validate_and_merge(
    repo: &impl DataRepo,
    schema: &Schema,
    cfg: &ValidationCfg,
) -> CsatResult<ValidationOutcome> {
    validate_then_merge(repo, schema, cfg).or_else(|err| {
        if let Err(marker_err) = repo.save_status(false, Some(&err.to_string())) {
            warn!(error = %marker_err, "could not write the failed status marker");
        }
        Err(err)
    })
}

fn validate_then_merge(
    repo: &impl DataRepo,
    schema: &Schema,
    cfg: &ValidationCfg,
) -> CsatResult<ValidationOutcome> {
    let mut reports = Vec::with_capacity(TableKind::ALL.len());
    let mut tables = RawTables::default();

    for kind in TableKind::ALL {
        let declared = schema.table(kind)?;
        let file = declared.file_name(kind);
        let report = match repo.load_table(&file)? {
            None => TableReport::new(
                kind,
                file.clone(),
                0,
                vec![Failure::MissingFile { path: file.clone() }],
            ),
            Some(df) => {
                let report = validate_table(kind, file.clone(), declared, &df)?;
                if report.passed {
                    tables.insert(kind, df);
                }
                report
            }
        };
        if report.passed {
            info!(table = %kind, rows = report.rows, "table passed validation");
        } else {
            for line in report.summary_lines() {
                warn!("{line}");
            }
        }
        reports.push(report);
    }

    if reports.iter().any(|report| !report.passed) {
        let report = HealthReport {
            status: false,
            generated_at: time::now().to_rfc3339(),
            rows: 0,
            columns: 0,
            null_percentage: BTreeMap::new(),
            target_distribution: BTreeMap::new(),
            tables: reports,
            dropped: DropCounts::default(),
        };
        let summary = report.failure_summary().join("\n");
        repo.save_report(&report)?;
        repo.save_status(false, Some(&summary))?;
        warn!(failures = report.failure_summary().len(), "validation failed; merge skipped");
        return Ok(ValidationOutcome {
            status: false,
            report,
            merged: None,
        });
    }

    let options = MergeOptions {
        review_placeholder: cfg.review_placeholder.clone(),
        critical_columns: cfg.critical_merged_columns.clone(),
    };
    let (mut merged, dropped) = dedup_and_merge(tables, schema, &options)?;
    let report = health_report(&merged, reports, dropped)?;
    repo.save_merged(&mut merged)?;
    repo.save_report(&report)?;
    repo.save_status(true, None)?;
    info!(rows = report.rows, columns = report.columns, "validation and merge complete");
    Ok(ValidationOutcome {
        status: true,
        report,
        merged: Some(merged),
    })
}

fn dedup_and_merge(
    tables: RawTables,
    schema: &Schema,
    options: &MergeOptions,
) -> CsatResult<(DataFrame, DropCounts)> {
    let mut dropped = DropCounts::default();
    let mut deduped = RawTables::default();
    for kind in TableKind::ALL {
        let df = tables.get(kind)?;
        let key = schema.table(kind)?.key_columns(kind);
        let (df, mut removed) = match kind {
            TableKind::Payments => dedup_payments(df, &key)?,
            _ => dedup_by_key(df, &key)?,
        };
        let df = if kind == TableKind::Reviews {
            let (per_order, extra) = dedup_by_key(&df, &["order_id".to_string()])?;
            removed += extra;
            per_order
        } else {
            df
        };
        if removed > 0 {
            info!(table = %kind, rows = removed, "duplicates removed");
        }
        dropped.duplicate_rows.insert(kind.to_string(), removed);
        deduped.insert(kind, df);
    }
    let merged = merge_tables(&deduped, options, &mut dropped)?;
    Ok((merged, dropped))
}

fn health_report(
    merged: &DataFrame,
    tables: Vec<TableReport>,
    dropped: DropCounts,
) -> CsatResult<HealthReport> {
    let rows = merged.height();
    let null_percentage = merged
        .get_columns()
        .iter()
        .map(|series| {
            let pct = if rows == 0 {
                0.0
            } else {
                series.null_count() as f64 / rows as f64 * 100.0
            };
            (series.name().to_string(), (pct * 100.0).round() / 100.0)
        })
        .collect();

    let mut target_distribution = BTreeMap::new();
    for score in str_values(merged, "review_score")?.into_iter().flatten() {
        *target_distribution.entry(score).or_insert(0usize) += 1;
    }

    Ok(HealthReport {
        status: true,
        generated_at: time::now().to_rfc3339(),
        rows,
        columns: merged.width(),
        null_percentage,
        target_distribution,
        tables,
        dropped,
    })
}
