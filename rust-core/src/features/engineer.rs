//! Stage 3: derive behavioural, temporal and pricing features and the label.
//!
//! Leakage-prone columns (identifiers, raw timestamps, the raw rating and the
//! review text) never reach the output table.

use chrono::{Datelike, Timelike};
use polars::prelude::*;
use tracing::{info, warn};

use crate::common::config::FeatureCfg;
use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::{f64_values, has_column, millis_values, take_rows, without_columns};
use crate::common::time::{from_millis, MILLIS_PER_DAY};

/// Minimum input columns; anything else is optional.
pub const REQUIRED_COLUMNS: [&str; 3] = ["total_price", "total_freight", "order_purchase_timestamp"];

/// Single-item column names accepted in place of the aggregated ones.
const LEGACY_RENAMES: [(&str, &str); 3] = [
    ("price", "total_price"),
    ("freight_value", "total_freight"),
    ("order_item_id", "order_items_count"),
];

/// Identifiers and post-hoc columns removed from the feature table.
pub const LEAKY_COLUMNS: [&str; 15] = [
    "order_id",
    "customer_id",
    "customer_unique_id",
    "product_id",
    "seller_id",
    "review_id",
    "order_status",
    "review_score",
    "review_comment_title",
    "review_comment_message",
    "review_creation_date",
    "review_answer_timestamp",
    "shipping_limit_date",
    "customer_zip_code_prefix",
    "seller_zip_code_prefix",
];

fn days_between(later: Option<i64>, earlier: Option<i64>) -> Option<f64> {
    Some((later? - earlier?) as f64 / MILLIS_PER_DAY)
}

fn optional_millis(df: &DataFrame, name: &str) -> CsatResult<Vec<Option<i64>>> {
    if has_column(df, name) {
        millis_values(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

fn optional_f64(df: &DataFrame, name: &str) -> CsatResult<Option<Vec<Option<f64>>>> {
    if has_column(df, name) {
        f64_values(df, name).map(Some)
    } else {
        Ok(None)
    }
}

fn flag(value: bool) -> i32 {
    i32::from(value)
}

/// Bucket a price into `cheap`, `affordable` or `expensive`.
pub fn price_tier(price: f64, tiers: [f64; 2]) -> &'static str {
    if price < tiers[0] {
        "cheap"
    } else if price < tiers[1] {
        "affordable"
    } else {
        "expensive"
    }
}

/// Build the model-ready table from the merged one.
///
/// Fails with a configuration error when a required input column is absent.
/// Rows without a review score cannot be labelled and are dropped.
pub fn engineer(merged: &DataFrame, cfg: &FeatureCfg, target: &str) -> CsatResult<DataFrame> {
    let mut df = merged.clone();
    for (legacy, name) in LEGACY_RENAMES {
        if !has_column(&df, name) && has_column(&df, legacy) {
            df.rename(legacy, name)?;
        }
    }
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !has_column(&df, column))
        .collect();
    if !missing.is_empty() {
        return Err(CsatError::config(format!(
            "feature engineering requires columns: {}",
            missing.join(", ")
        )));
    }
    if !has_column(&df, "review_score") {
        return Err(CsatError::config("feature engineering requires column: review_score"));
    }

    let scores = f64_values(&df, "review_score")?;
    let labelled: Vec<usize> = (0..df.height()).filter(|&row| scores[row].is_some()).collect();
    if labelled.len() < df.height() {
        warn!(rows = df.height() - labelled.len(), "dropped rows without a review score");
        df = take_rows(&df, &labelled)?;
    }
    let labels: Vec<i32> = labelled
        .iter()
        .map(|&row| flag(scores[row].unwrap_or_default() >= cfg.satisfied_threshold as f64))
        .collect();

    let rows = df.height();
    let purchased = millis_values(&df, "order_purchase_timestamp")?;
    let approved = optional_millis(&df, "order_approved_at")?;
    let carrier = optional_millis(&df, "order_delivered_carrier_date")?;
    let delivered = optional_millis(&df, "order_delivered_customer_date")?;
    let estimated = optional_millis(&df, "order_estimated_delivery_date")?;
    let prices = f64_values(&df, "total_price")?;
    let freights = f64_values(&df, "total_freight")?;
    let counts = optional_f64(&df, "order_items_count")?;
    let installments = optional_f64(&df, "payment_installments")?;
    let price_median = df.column("total_price")?.cast(&DataType::Float64)?.median();

    let mut delivery_time = Vec::with_capacity(rows);
    let mut estimated_days = Vec::with_capacity(rows);
    let mut gap = Vec::with_capacity(rows);
    let mut severity = Vec::with_capacity(rows);
    let mut handling = Vec::with_capacity(rows);
    let mut late = Vec::with_capacity(rows);
    let mut freight_ratio = Vec::with_capacity(rows);
    let mut high_value = Vec::with_capacity(rows);
    let mut avg_item_price = Vec::with_capacity(rows);
    let mut used_installments = Vec::with_capacity(rows);
    let mut day_of_week = Vec::with_capacity(rows);
    let mut hour = Vec::with_capacity(rows);
    let mut month = Vec::with_capacity(rows);
    let mut weekend = Vec::with_capacity(rows);
    let mut tier = Vec::with_capacity(rows);

    for row in 0..rows {
        // Missing timestamps count as zero days, and the gap follows from the filled durations.
        let actual = days_between(delivered[row], purchased[row]).unwrap_or(0.0);
        let promised = days_between(estimated[row], purchased[row]).unwrap_or(0.0);
        let row_gap = actual - promised;
        delivery_time.push(actual);
        estimated_days.push(promised);
        gap.push(row_gap);
        severity.push(if row_gap > 0.0 { row_gap * row_gap } else { 0.0 });
        late.push(flag(row_gap > 0.0));
        handling.push(days_between(carrier[row], approved[row]).unwrap_or(0.0));

        let (price, freight) = (prices[row], freights[row]);
        freight_ratio.push(price.zip(freight).map(|(p, f)| {
            let total = p + f;
            if total > 0.0 {
                f / total
            } else {
                0.0
            }
        }));
        high_value.push(flag(price.zip(price_median).map_or(false, |(p, m)| p > m)));
        avg_item_price.push(match &counts {
            Some(counts) => price.zip(counts[row]).and_then(|(p, c)| (c > 0.0).then(|| p / c)),
            None => price,
        });
        used_installments.push(flag(
            installments
                .as_ref()
                .and_then(|values| values[row])
                .map_or(false, |n| n > 1.0),
        ));

        let when = purchased[row].and_then(from_millis);
        let weekday = when.map(|dt| dt.weekday().num_days_from_monday() as i32);
        day_of_week.push(weekday);
        hour.push(when.map(|dt| dt.hour() as i32));
        month.push(when.map(|dt| dt.month() as i32));
        weekend.push(flag(weekday.map_or(false, |d| d >= 5)));
        tier.push(price.map(|p| price_tier(p, cfg.price_tiers)));
    }

    let derived = vec![
        Series::new("delivery_time_days", delivery_time),
        Series::new("estimated_delivery_days", estimated_days),
        Series::new("delivery_expectation_gap", gap),
        Series::new("delay_severity", severity),
        Series::new("carrier_handling_time", handling),
        Series::new("is_late_delivery", late),
        Series::new("freight_ratio", freight_ratio),
        Series::new("is_high_value", high_value),
        Series::new("avg_item_price", avg_item_price),
        Series::new("used_installments", used_installments),
        Series::new("order_day_of_week", day_of_week),
        Series::new("order_hour", hour),
        Series::new("order_month", month),
        Series::new("is_weekend_order", weekend),
        Series::new("price_tier", tier),
        Series::new(target, labels),
    ];
    for series in derived {
        df.with_column(series)?;
    }

    let temporal: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|s| matches!(s.dtype(), DataType::Datetime(_, _) | DataType::Date))
        .map(|s| s.name().to_string())
        .collect();
    let mut drop: Vec<&str> = LEAKY_COLUMNS.to_vec();
    drop.extend(crate::data::merge::ORDER_TIMESTAMPS);
    drop.extend(temporal.iter().map(String::as_str));
    drop.extend(cfg.extra_drop_columns.iter().map(String::as_str));
    drop.retain(|column| *column != target);
    let mut df = without_columns(&df, &drop)?;

    impute_numeric_medians(&mut df, target)?;
    info!(rows = df.height(), columns = df.width(), "features engineered");
    Ok(df)
}

fn is_numeric(dtype: &DataType) -> bool {
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
            | DataType::Float32
            | DataType::Float64
    )
}

/// Fill numeric nulls with the column median; all-null columns are left as is.
fn impute_numeric_medians(df: &mut DataFrame, target: &str) -> CsatResult<()> {
    let numeric: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|s| s.name() != target && is_numeric(s.dtype()) && s.null_count() > 0)
        .map(|s| s.name().to_string())
        .collect();
    for column in numeric {
        let values = df.column(&column)?.cast(&DataType::Float64)?;
        let Some(fill) = values.median() else {
            continue;
        };
        let filled = values.f64()?.fill_null_with_values(fill)?;
        df.with_column(filled.into_series())?;
    }
    Ok(())
}
