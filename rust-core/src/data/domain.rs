//! Raw table definitions, the declared schema and validation reports.
//!
//! The schema document is immutable for the duration of a run: it is loaded
//! once, checked for internal consistency and then only read.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::common::error::{CsatError, CsatResult};

/// The relational tables of the order export.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Orders,
    OrderItems,
    Payments,
    Products,
    Sellers,
    Customers,
    Reviews,
}

impl TableKind {
    pub const ALL: [TableKind; 7] = [
        TableKind::Orders,
        TableKind::OrderItems,
        TableKind::Payments,
        TableKind::Products,
        TableKind::Sellers,
        TableKind::Customers,
        TableKind::Reviews,
    ];

    /// Name used as the table key in the schema document.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Orders => "orders",
            TableKind::OrderItems => "order_items",
            TableKind::Payments => "payments",
            TableKind::Products => "products",
            TableKind::Sellers => "sellers",
            TableKind::Customers => "customers",
            TableKind::Reviews => "reviews",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// File name inside the extracted archive.
    pub fn default_file(&self) -> &'static str {
        match self {
            TableKind::Orders => "olist_orders_dataset.csv",
            TableKind::OrderItems => "olist_order_items_dataset.csv",
            TableKind::Payments => "olist_order_payments_dataset.csv",
            TableKind::Products => "olist_products_dataset.csv",
            TableKind::Sellers => "olist_sellers_dataset.csv",
            TableKind::Customers => "olist_customers_dataset.csv",
            TableKind::Reviews => "olist_order_reviews_dataset.csv",
        }
    }

    /// Natural key used for deduplication.
    pub fn default_key(&self) -> &'static [&'static str] {
        match self {
            TableKind::Orders => &["order_id"],
            TableKind::OrderItems => &["order_id", "order_item_id"],
            TableKind::Payments => &["order_id", "payment_sequential"],
            TableKind::Products => &["product_id"],
            TableKind::Sellers => &["seller_id"],
            TableKind::Customers => &["customer_id"],
            TableKind::Reviews => &["review_id", "order_id"],
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared column type.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Datetime,
    Bool,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Datetime => "datetime",
            ColumnType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Value constraints attached to one table.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Constraints {
    /// Inclusive numeric bounds per column.
    pub min_max: BTreeMap<String, [f64; 2]>,
    pub allowed_values: BTreeMap<String, Vec<String>>,
    /// Columns that must never contain a null.
    pub critical_columns: Vec<String>,
    /// Upper bound on the total null count across the table.
    pub max_null_count: Option<usize>,
}

/// Declared shape of one raw table.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableSchema {
    /// Overrides [`TableKind::default_file`].
    #[serde(default)]
    pub file: Option<String>,
    /// Overrides [`TableKind::default_key`]; empty means whole-row dedup.
    #[serde(default)]
    pub key: Option<Vec<String>>,
    pub columns: BTreeMap<String, ColumnType>,
    #[serde(default)]
    pub constraints: Constraints,
}

impl TableSchema {
    pub fn file_name(&self, kind: TableKind) -> String {
        self.file
            .clone()
            .unwrap_or_else(|| kind.default_file().to_string())
    }

    pub fn key_columns(&self, kind: TableKind) -> Vec<String> {
        match &self.key {
            Some(key) => key.clone(),
            None => kind.default_key().iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Schema document keyed by table name.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Schema {
    pub tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    /// Load and check a TOML schema document.
    pub fn load(path: &Path) -> CsatResult<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            CsatError::config(format!("cannot read schema {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> CsatResult<Self> {
        let schema: Schema = toml::from_str(raw)?;
        schema.check()?;
        Ok(schema)
    }

    /// Every table must be known, present and reference only declared columns.
    fn check(&self) -> CsatResult<()> {
        for name in self.tables.keys() {
            if TableKind::from_name(name).is_none() {
                return Err(CsatError::config(format!("schema declares unknown table '{name}'")));
            }
        }
        for kind in TableKind::ALL {
            let table = self.table(kind)?;
            let declared = |column: &String| table.columns.contains_key(column);
            let constrained = table
                .constraints
                .min_max
                .keys()
                .chain(table.constraints.allowed_values.keys())
                .chain(table.constraints.critical_columns.iter())
                .chain(table.key.iter().flatten());
            for column in constrained {
                if !declared(column) {
                    return Err(CsatError::config(format!(
                        "schema for '{kind}' constrains undeclared column '{column}'"
                    )));
                }
            }
            for (column, [min, max]) in &table.constraints.min_max {
                if min > max {
                    return Err(CsatError::config(format!(
                        "schema for '{kind}' has inverted bounds on '{column}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn table(&self, kind: TableKind) -> CsatResult<&TableSchema> {
        self.tables
            .get(kind.as_str())
            .ok_or_else(|| CsatError::config(format!("schema is missing table '{kind}'")))
    }
}

/// One reason a table failed validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    MissingFile { path: String },
    MissingColumn { column: String },
    UnexpectedColumn { column: String },
    TypeMismatch { column: String, expected: ColumnType, found: String },
    OutOfRange { column: String, min: f64, max: f64, violations: usize },
    DisallowedValue { column: String, violations: usize, sample: Vec<String> },
    CriticalNull { column: String, nulls: usize },
    NullBudgetExceeded { nulls: usize, budget: usize },
}

impl Failure {
    /// Column the failure refers to, if it is column scoped.
    pub fn column(&self) -> Option<&str> {
        match self {
            Failure::MissingColumn { column }
            | Failure::UnexpectedColumn { column }
            | Failure::TypeMismatch { column, .. }
            | Failure::OutOfRange { column, .. }
            | Failure::DisallowedValue { column, .. }
            | Failure::CriticalNull { column, .. } => Some(column),
            Failure::MissingFile { .. } | Failure::NullBudgetExceeded { .. } => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::MissingFile { path } => write!(f, "file not found: {path}"),
            Failure::MissingColumn { column } => write!(f, "missing column '{column}'"),
            Failure::UnexpectedColumn { column } => write!(f, "unexpected column '{column}'"),
            Failure::TypeMismatch { column, expected, found } => {
                write!(f, "column '{column}' expected {expected}, found {found}")
            }
            Failure::OutOfRange { column, min, max, violations } => {
                write!(f, "column '{column}' has {violations} values outside [{min}, {max}]")
            }
            Failure::DisallowedValue { column, violations, .. } => {
                write!(f, "column '{column}' has {violations} disallowed values")
            }
            Failure::CriticalNull { column, nulls } => {
                write!(f, "critical column '{column}' has {nulls} nulls")
            }
            Failure::NullBudgetExceeded { nulls, budget } => {
                write!(f, "{nulls} nulls exceed budget of {budget}")
            }
        }
    }
}

/// Validation result for one table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableReport {
    pub table: TableKind,
    pub file: String,
    pub rows: usize,
    pub passed: bool,
    pub failures: Vec<Failure>,
}

impl TableReport {
    pub fn new(table: TableKind, file: String, rows: usize, failures: Vec<Failure>) -> Self {
        Self {
            table,
            file,
            rows,
            passed: failures.is_empty(),
            failures,
        }
    }

    /// One line per failure, prefixed with the table name.
    pub fn summary_lines(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|failure| format!("{}: {failure}", self.table))
            .collect()
    }
}

/// Rows removed by data-quality gates. Counted, never errors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DropCounts {
    pub duplicate_rows: BTreeMap<String, usize>,
    pub unparseable_dates: usize,
    pub orders_without_items: usize,
    pub orders_without_review: usize,
    pub null_critical: usize,
}

/// Machine-readable outcome of validation and merge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: bool,
    pub generated_at: String,
    pub rows: usize,
    pub columns: usize,
    /// Percentage of nulls per merged column, two decimals.
    pub null_percentage: BTreeMap<String, f64>,
    /// Count of merged rows per raw review score.
    pub target_distribution: BTreeMap<String, usize>,
    pub tables: Vec<TableReport>,
    pub dropped: DropCounts,
}

impl HealthReport {
    pub fn failure_summary(&self) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(TableReport::summary_lines)
            .collect()
    }
}

/// What `validate_and_merge` hands back to the orchestrator.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub status: bool,
    pub report: HealthReport,
    /// `None` whenever validation failed and no merge was attempted.
    pub merged: Option<DataFrame>,
}

/// Storage contract for the validation stage: raw tables in, merged artefacts out.
pub trait DataRepo {
    /// Load one raw table; `Ok(None)` when its file is absent.
    fn load_table(&self, file: &str) -> CsatResult<Option<DataFrame>>;
    fn save_merged(&self, merged: &mut DataFrame) -> CsatResult<()>;
    fn save_report(&self, report: &HealthReport) -> CsatResult<()>;
    fn save_status(&self, ok: bool, detail: Option<&str>) -> CsatResult<()>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Schema matching the fixture tables used across the data tests.
    pub(crate) const SCHEMA: &str = r#"
[orders]
[orders.columns]
order_id = "string"
customer_id = "string"
order_status = "string"
order_purchase_timestamp = "datetime"
order_approved_at = "datetime"
order_delivered_carrier_date = "datetime"
order_delivered_customer_date = "datetime"
order_estimated_delivery_date = "datetime"
[orders.constraints]
critical_columns = ["order_id", "customer_id"]
[orders.constraints.allowed_values]
order_status = ["delivered", "shipped", "canceled", "invoiced", "processing"]

[order_items]
[order_items.columns]
order_id = "string"
order_item_id = "int"
product_id = "string"
seller_id = "string"
price = "float"
freight_value = "float"
[order_items.constraints]
critical_columns = ["order_id"]
[order_items.constraints.min_max]
price = [0.0, 100000.0]

[payments]
[payments.columns]
order_id = "string"
payment_sequential = "int"
payment_type = "string"
payment_installments = "int"
payment_value = "float"

[products]
[products.columns]
product_id = "string"
product_category_name = "string"
product_photos_qty = "float"
product_weight_g = "float"
product_length_cm = "float"
product_height_cm = "float"
product_width_cm = "float"

[sellers]
[sellers.columns]
seller_id = "string"
seller_state = "string"

[customers]
[customers.columns]
customer_id = "string"
customer_state = "string"

[reviews]
[reviews.columns]
review_id = "string"
order_id = "string"
review_score = "int"
review_comment_message = "string"
[reviews.constraints]
critical_columns = ["order_id", "review_score"]
[reviews.constraints.min_max]
review_score = [1.0, 5.0]
"#;

    #[test]
    fn fixture_schema_loads_with_defaults() {
        let schema = Schema::from_toml_str(SCHEMA).unwrap();
        let payments = schema.table(TableKind::Payments).unwrap();
        assert_eq!(payments.file_name(TableKind::Payments), "olist_order_payments_dataset.csv");
        assert_eq!(
            payments.key_columns(TableKind::Payments),
            vec!["order_id".to_string(), "payment_sequential".to_string()]
        );
        assert_eq!(
            schema.table(TableKind::Orders).unwrap().columns["order_purchase_timestamp"],
            ColumnType::Datetime
        );
    }

    #[test]
    fn unknown_table_is_rejected() {
        let raw = format!("{SCHEMA}\n[refunds]\n[refunds.columns]\nid = \"string\"\n");
        let err = Schema::from_toml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("unknown table 'refunds'"));
    }

    #[test]
    fn constraint_on_undeclared_column_is_rejected() {
        let raw = SCHEMA.replace(
            "critical_columns = [\"order_id\", \"review_score\"]",
            "critical_columns = [\"order_id\", \"stars\"]",
        );
        let err = Schema::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, CsatError::Config(_)));
    }

    #[test]
    fn missing_table_is_rejected() {
        let raw = SCHEMA.replace("[sellers]\n[sellers.columns]\nseller_id = \"string\"\nseller_state = \"string\"\n", "");
        let err = Schema::from_toml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("missing table 'sellers'"));
    }

    #[test]
    fn failures_render_with_table_prefix() {
        let report = TableReport::new(
            TableKind::Orders,
            "orders.csv".into(),
            3,
            vec![Failure::MissingColumn { column: "order_status".into() }],
        );
        assert!(!report.passed);
        assert_eq!(report.summary_lines(), vec!["orders: missing column 'order_status'"]);
    }
}
