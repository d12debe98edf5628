//! Feature column groups and the stratified split.

use std::collections::BTreeSet;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::has_column;

const NUMERIC: [&str; 26] = [
    "order_items_count",
    "total_price",
    "mean_price",
    "max_price",
    "min_price",
    "total_freight",
    "mean_freight",
    "max_freight",
    "min_freight",
    "payment_value",
    "payment_installments",
    "product_weight_g",
    "product_length_cm",
    "product_height_cm",
    "product_width_cm",
    "product_photos_qty",
    "delivery_time_days",
    "estimated_delivery_days",
    "delivery_expectation_gap",
    "delay_severity",
    "carrier_handling_time",
    "freight_ratio",
    "avg_item_price",
    "order_day_of_week",
    "order_hour",
    "order_month",
];

const CATEGORICAL: [&str; 5] = [
    "payment_type",
    "product_category_name",
    "seller_state",
    "customer_state",
    "price_tier",
];

const PASSTHROUGH: [&str; 5] = [
    "review_availability",
    "is_late_delivery",
    "is_high_value",
    "used_installments",
    "is_weekend_order",
];

/// Which encoding each feature column receives.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureGroups {
    /// Standardised to zero mean and unit variance.
    pub numeric: Vec<String>,
    /// One-hot encoded over the training vocabulary.
    pub categorical: Vec<String>,
    /// Binary flags copied through as floats.
    pub passthrough: Vec<String>,
}

impl Default for FeatureGroups {
    fn default() -> Self {
        let owned = |names: &[&str]| -> Vec<String> { names.iter().map(|n| n.to_string()).collect() };
        Self {
            numeric: owned(&NUMERIC),
            categorical: owned(&CATEGORICAL),
            passthrough: owned(&PASSTHROUGH),
        }
    }
}

impl FeatureGroups {
    /// All configured columns, numeric first.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.numeric
            .iter()
            .chain(&self.categorical)
            .chain(&self.passthrough)
            .map(String::as_str)
    }

    pub fn validate(&self) -> CsatResult<()> {
        let mut seen = BTreeSet::new();
        for column in self.columns() {
            if !seen.insert(column) {
                return Err(CsatError::config(format!(
                    "feature column '{column}' is assigned to more than one group"
                )));
            }
        }
        if seen.is_empty() {
            return Err(CsatError::config("feature groups are empty"));
        }
        Ok(())
    }

    /// Every configured column must exist in `df`, and the target must not be one of them.
    pub fn require_present(&self, df: &DataFrame, target: &str) -> CsatResult<()> {
        if self.columns().any(|column| column == target) {
            return Err(CsatError::config(format!(
                "target column '{target}' cannot be used as a feature"
            )));
        }
        let missing: Vec<&str> = self.columns().filter(|c| !has_column(df, c)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CsatError::config(format!(
                "feature columns missing from table: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Raw, human-readable train/test partitions, label column included.
#[derive(Clone, Debug)]
pub struct SplitDataset {
    pub train: DataFrame,
    pub test: DataFrame,
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn defaults_are_disjoint() {
        let groups = FeatureGroups::default();
        groups.validate().unwrap();
        assert_eq!(groups.columns().count(), 36);
    }

    #[test]
    fn overlapping_groups_are_rejected() {
        let mut groups = FeatureGroups::default();
        groups.passthrough.push("total_price".into());
        assert!(matches!(groups.validate(), Err(CsatError::Config(_))));
    }

    #[test]
    fn absent_column_and_target_are_config_errors() {
        let groups = FeatureGroups {
            numeric: vec!["total_price".into()],
            categorical: vec!["price_tier".into()],
            passthrough: vec![],
        };
        let df = df!("total_price" => &[1.0], "label" => &[1i32]).unwrap();
        let err = groups.require_present(&df, "label").unwrap_err();
        assert!(err.to_string().contains("price_tier"));

        let leaky = FeatureGroups {
            numeric: vec!["label".into()],
            ..groups
        };
        assert!(leaky.require_present(&df, "label").is_err());
    }
}
