//! Deduplication, temporal parsing and the relational merge into one row per order.
//!
//! Deduplication and the per-order rollups run on polars; every aggregate is
//! sorted by `order_id` so downstream joins see a deterministic order.

use std::collections::BTreeMap;

use polars::prelude::*;
use tracing::{info, warn};

use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::{has_column, millis_series, millis_values, str_values, take_rows};

use super::domain::{DropCounts, TableKind};

/// Columns of the orders table parsed into datetimes.
pub const ORDER_TIMESTAMPS: [&str; 5] = [
    "order_purchase_timestamp",
    "order_approved_at",
    "order_delivered_carrier_date",
    "order_delivered_customer_date",
    "order_estimated_delivery_date",
];

/// Orders without either of these timestamps are dropped before the merge.
pub const MANDATORY_TIMESTAMPS: [&str; 2] =
    ["order_purchase_timestamp", "order_delivered_customer_date"];

const ROW_INDEX: &str = "__row";
const GROUP_SIZE: &str = "__count";

/// Raw tables loaded for one run, keyed by kind.
#[derive(Debug, Default)]
pub struct RawTables {
    tables: BTreeMap<TableKind, DataFrame>,
}

impl RawTables {
    pub fn insert(&mut self, kind: TableKind, df: DataFrame) {
        self.tables.insert(kind, df);
    }

    pub fn get(&self, kind: TableKind) -> CsatResult<&DataFrame> {
        self.tables
            .get(&kind)
            .ok_or_else(|| CsatError::internal(format!("table '{kind}' was not loaded")))
    }
}

/// Key columns for deduplication; an empty key means every column.
fn dedup_subset(df: &DataFrame, key: &[String]) -> Vec<String> {
    if key.is_empty() {
        df.get_column_names().into_iter().map(str::to_string).collect()
    } else {
        key.to_vec()
    }
}

/// Keep the first row per key; an empty key dedups whole rows.
pub fn dedup_by_key(df: &DataFrame, key: &[String]) -> CsatResult<(DataFrame, usize)> {
    let subset = dedup_subset(df, key);
    let out = df.unique_stable(Some(&subset), UniqueKeepStrategy::First, None)?;
    let removed = df.height() - out.height();
    Ok((out, removed))
}

/// Among payments sharing a key keep the highest `payment_value`; the earlier row wins ties.
///
/// Survivors keep their original relative order.
pub fn dedup_payments(df: &DataFrame, key: &[String]) -> CsatResult<(DataFrame, usize)> {
    let subset = dedup_subset(df, key);
    let out = df
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .sort_by_exprs(
            [col("payment_value").cast(DataType::Float64)],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .unique_stable(Some(subset), UniqueKeepStrategy::First)
        .sort_by_exprs([col(ROW_INDEX)], SortMultipleOptions::default())
        .drop([ROW_INDEX])
        .collect()?;
    let removed = df.height() - out.height();
    Ok((out, removed))
}

/// Parse order timestamps; rows missing a mandatory one are dropped and counted.
pub fn parse_order_dates(orders: &DataFrame) -> CsatResult<(DataFrame, usize)> {
    let mut parsed = Vec::new();
    for column in ORDER_TIMESTAMPS {
        if orders.column(column).is_ok() {
            parsed.push((column, millis_values(orders, column)?));
        }
    }
    let keep: Vec<usize> = (0..orders.height())
        .filter(|&row| {
            MANDATORY_TIMESTAMPS.iter().all(|mandatory| {
                parsed
                    .iter()
                    .find(|(column, _)| column == mandatory)
                    .map_or(false, |(_, values)| values[row].is_some())
            })
        })
        .collect();
    let dropped = orders.height() - keep.len();

    let mut out = take_rows(orders, &keep)?;
    for (column, values) in parsed {
        let kept: Vec<Option<i64>> = keep.iter().map(|&row| values[row]).collect();
        out.with_column(millis_series(column, kept)?)?;
    }
    Ok((out, dropped))
}

fn string_keys(mut df: DataFrame, keys: &[&str]) -> CsatResult<DataFrame> {
    for key in keys {
        let cast = df.column(key)?.cast(&DataType::String)?;
        df.with_column(cast)?;
    }
    Ok(df)
}

/// Rows of `df` with a string `order_id`, nulls removed, as a lazy plan.
fn by_order(df: &DataFrame, extra_keys: &[&str]) -> CsatResult<LazyFrame> {
    let mut keys = vec!["order_id"];
    keys.extend_from_slice(extra_keys);
    Ok(string_keys(df.clone(), &keys)?
        .lazy()
        .filter(col("order_id").is_not_null()))
}

fn sorted_by_order(plan: LazyFrame) -> LazyFrame {
    plan.sort_by_exprs(
        [col("order_id")],
        SortMultipleOptions::default().with_maintain_order(true),
    )
}

/// Most frequent `value` per order; ties go to the lexicographically smallest.
pub fn dominant(plan: LazyFrame, value: &str) -> LazyFrame {
    plan.filter(col(value).is_not_null())
        .group_by([col("order_id"), col(value)])
        .agg([len().alias(GROUP_SIZE)])
        .sort_by_exprs(
            [col("order_id"), col(GROUP_SIZE), col(value)],
            SortMultipleOptions::default().with_order_descendings([false, true, false]),
        )
        .unique_stable(Some(vec!["order_id".to_string()]), UniqueKeepStrategy::First)
        .select([col("order_id"), col(value)])
}

fn float(name: &str) -> Expr {
    col(name).cast(DataType::Float64)
}

fn left_join(left: LazyFrame, right: LazyFrame) -> LazyFrame {
    left.join(
        right,
        [col("order_id")],
        [col("order_id")],
        JoinArgs::new(JoinType::Left),
    )
}

/// Count and price/freight statistics per order.
pub fn aggregate_items(items: &DataFrame) -> CsatResult<DataFrame> {
    let stats = by_order(items, &[])?.group_by([col("order_id")]).agg([
        len().cast(DataType::Int64).alias("order_items_count"),
        float("price").sum().alias("total_price"),
        float("price").mean().alias("mean_price"),
        float("price").max().alias("max_price"),
        float("price").min().alias("min_price"),
        float("freight_value").sum().alias("total_freight"),
        float("freight_value").mean().alias("mean_freight"),
        float("freight_value").max().alias("max_freight"),
        float("freight_value").min().alias("min_freight"),
    ]);
    Ok(sorted_by_order(stats).collect()?)
}

/// Dominant payment type, summed value and maximum installments per order.
pub fn aggregate_payments(payments: &DataFrame) -> CsatResult<DataFrame> {
    let base = by_order(payments, &["payment_type"])?;
    let totals = base.clone().group_by([col("order_id")]).agg([
        float("payment_value").sum().alias("payment_value"),
        float("payment_installments").max().alias("payment_installments"),
    ]);
    let types = dominant(base, "payment_type");
    let joined = left_join(totals, types).select([
        col("order_id"),
        col("payment_type"),
        col("payment_value"),
        col("payment_installments"),
    ]);
    Ok(sorted_by_order(joined).collect()?)
}

/// Items joined to a lookup table on `key`; orders with no match disappear.
fn items_with(items: &DataFrame, lookup: &DataFrame, key: &str) -> CsatResult<LazyFrame> {
    let pairs = by_order(&items.select(["order_id", key])?, &[key])?;
    let lookup = string_keys(lookup.clone(), &[key])?.lazy();
    Ok(pairs.join(lookup, [col(key)], [col(key)], JoinArgs::new(JoinType::Inner)))
}

/// Product attributes rolled up over the items of each order.
pub fn aggregate_products(items: &DataFrame, products: &DataFrame) -> CsatResult<DataFrame> {
    const MEANS: [&str; 4] = [
        "product_length_cm",
        "product_height_cm",
        "product_width_cm",
        "product_photos_qty",
    ];
    let products = string_keys(products.clone(), &["product_category_name"])?;
    let joined = items_with(items, &products, "product_id")?;

    let mut stats = vec![float("product_weight_g").sum().alias("product_weight_g")];
    stats.extend(MEANS.iter().map(|name| float(name).mean().alias(name)));
    let rolled = joined.clone().group_by([col("order_id")]).agg(stats);

    let mut columns = vec![col("order_id"), col("product_category_name"), col("product_weight_g")];
    columns.extend(MEANS.iter().map(|name| col(name)));
    let out = left_join(rolled, dominant(joined, "product_category_name")).select(columns);
    Ok(sorted_by_order(out).collect()?)
}

/// Dominant seller state per order.
pub fn aggregate_sellers(items: &DataFrame, sellers: &DataFrame) -> CsatResult<DataFrame> {
    let sellers = string_keys(sellers.clone(), &["seller_state"])?;
    let joined = items_with(items, &sellers, "seller_id")?;
    Ok(sorted_by_order(dominant(joined, "seller_state")).collect()?)
}

fn join(left: DataFrame, right: DataFrame, key: &str, how: JoinType) -> CsatResult<DataFrame> {
    let joined = left
        .lazy()
        .join(right.lazy(), [col(key)], [col(key)], JoinArgs::new(how))
        .collect()?;
    Ok(joined)
}

/// Knobs for the final cleanup of the merged table.
#[derive(Clone, Debug)]
pub struct MergeOptions {
    pub review_placeholder: String,
    pub critical_columns: Vec<String>,
}

/// Join the deduplicated tables into one row per order, sorted by `order_id`.
pub fn merge_tables(
    tables: &RawTables,
    options: &MergeOptions,
    dropped: &mut DropCounts,
) -> CsatResult<DataFrame> {
    let (orders, unparseable) = parse_order_dates(tables.get(TableKind::Orders)?)?;
    dropped.unparseable_dates = unparseable;
    if unparseable > 0 {
        warn!(rows = unparseable, "dropped orders with unparseable mandatory dates");
    }
    let orders = string_keys(orders, &["order_id", "customer_id"])?;

    let items = tables.get(TableKind::OrderItems)?;
    let items_agg = aggregate_items(items)?;
    let payments_agg = aggregate_payments(tables.get(TableKind::Payments)?)?;
    let products_agg = aggregate_products(items, tables.get(TableKind::Products)?)?;
    let sellers_agg = aggregate_sellers(items, tables.get(TableKind::Sellers)?)?;
    let customers = string_keys(
        tables
            .get(TableKind::Customers)?
            .select(["customer_id", "customer_state"])?,
        &["customer_id"],
    )?;
    let reviews = string_keys(
        tables
            .get(TableKind::Reviews)?
            .select(["order_id", "review_score", "review_comment_message"])?,
        &["order_id"],
    )?;

    let before_items = orders.height();
    let merged = join(orders, items_agg, "order_id", JoinType::Inner)?;
    dropped.orders_without_items = before_items - merged.height();

    let merged = join(merged, payments_agg, "order_id", JoinType::Left)?;
    let merged = join(merged, products_agg, "order_id", JoinType::Left)?;
    let merged = join(merged, sellers_agg, "order_id", JoinType::Left)?;
    let merged = join(merged, customers, "customer_id", JoinType::Left)?;

    let before_reviews = merged.height();
    let mut merged = join(merged, reviews, "order_id", JoinType::Inner)?;
    dropped.orders_without_review = before_reviews.saturating_sub(merged.height());

    let messages = str_values(&merged, "review_comment_message")?;
    let availability: Vec<i32> = messages
        .iter()
        .map(|message| message.as_deref().map_or(0, |text| i32::from(!text.trim().is_empty())))
        .collect();
    let imputed: Vec<String> = messages
        .into_iter()
        .map(|message| match message {
            Some(text) if !text.trim().is_empty() => text,
            _ => options.review_placeholder.clone(),
        })
        .collect();
    merged.with_column(Series::new("review_availability", availability))?;
    merged.with_column(Series::new("review_comment_message", imputed))?;

    let critical: Vec<Expr> = options
        .critical_columns
        .iter()
        .filter(|column| has_column(&merged, column))
        .map(|column| col(column))
        .collect();
    let before_critical = merged.height();
    let mut plan = merged.lazy();
    if !critical.is_empty() {
        plan = plan.drop_nulls(Some(critical));
    }
    let merged = sorted_by_order(plan).collect()?;
    dropped.null_critical = before_critical - merged.height();
    if dropped.null_critical > 0 {
        warn!(rows = dropped.null_critical, "dropped merged rows with null critical columns");
    }

    info!(rows = merged.height(), columns = merged.width(), "tables merged");
    Ok(merged)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::frame::f64_values;

    /// Seven small tables exercising every join path.
    pub(crate) fn fixture_tables() -> RawTables {
        let mut tables = RawTables::default();
        tables.insert(
            TableKind::Orders,
            df!(
                "order_id" => &["o1", "o2", "o3", "o4", "o5"],
                "customer_id" => &["c1", "c2", "c3", "c4", "c5"],
                "order_status" => &["delivered"; 5],
                "order_purchase_timestamp" => &[Some("2018-01-01 10:00:00"), Some("2018-01-02 11:00:00"), Some("2018-01-03 12:00:00"), Some("bad"), Some("2018-01-05 09:00:00")],
                "order_approved_at" => &[Some("2018-01-01 10:30:00"), None, Some("2018-01-03 12:10:00"), None, Some("2018-01-05 09:10:00")],
                "order_delivered_carrier_date" => &[Some("2018-01-02 10:00:00"), None, Some("2018-01-04 08:00:00"), None, None],
                "order_delivered_customer_date" => &[Some("2018-01-05 10:00:00"), Some("2018-01-12 11:00:00"), Some("2018-01-06 12:00:00"), Some("2018-01-07 12:00:00"), Some("2018-01-08 09:00:00")],
                "order_estimated_delivery_date" => &[Some("2018-01-10 00:00:00"), Some("2018-01-09 00:00:00"), Some("2018-01-08 00:00:00"), None, Some("2018-01-09 00:00:00")]
            )
            .unwrap(),
        );
        tables.insert(
            TableKind::OrderItems,
            df!(
                "order_id" => &["o1", "o1", "o2", "o3", "o4"],
                "order_item_id" => &[1i64, 2, 1, 1, 1],
                "product_id" => &["p1", "p2", "p1", "p3", "p1"],
                "seller_id" => &["s1", "s2", "s1", "s2", "s1"],
                "price" => &[20.0, 40.0, 100.0, 200.0, 10.0],
                "freight_value" => &[5.0, 7.0, 10.0, 30.0, 2.0]
            )
            .unwrap(),
        );
        tables.insert(
            TableKind::Payments,
            df!(
                "order_id" => &["o1", "o1", "o2", "o3", "o3"],
                "payment_sequential" => &[1i64, 1, 1, 1, 2],
                "payment_type" => &["credit_card", "credit_card", "boleto", "voucher", "credit_card"],
                "payment_installments" => &[3i64, 3, 1, 1, 6],
                "payment_value" => &[60.0, 72.0, 110.0, 50.0, 180.0]
            )
            .unwrap(),
        );
        tables.insert(
            TableKind::Products,
            df!(
                "product_id" => &["p1", "p2", "p3"],
                "product_category_name" => &["toys", "books", "audio"],
                "product_photos_qty" => &[1.0, 3.0, 2.0],
                "product_weight_g" => &[500.0, 250.0, 1200.0],
                "product_length_cm" => &[10.0, 20.0, 30.0],
                "product_height_cm" => &[5.0, 5.0, 10.0],
                "product_width_cm" => &[8.0, 12.0, 20.0]
            )
            .unwrap(),
        );
        tables.insert(
            TableKind::Sellers,
            df!("seller_id" => &["s1", "s2"], "seller_state" => &["SP", "RJ"]).unwrap(),
        );
        tables.insert(
            TableKind::Customers,
            df!(
                "customer_id" => &["c1", "c2", "c3", "c4", "c5"],
                "customer_state" => &["SP", "MG", "RJ", "SP", "BA"]
            )
            .unwrap(),
        );
        tables.insert(
            TableKind::Reviews,
            df!(
                "review_id" => &["r1", "r2", "r3", "r4"],
                "order_id" => &["o1", "o2", "o3", "o4"],
                "review_score" => &[5i64, 1, 4, 3],
                "review_comment_message" => &[Some("great"), None, Some("  "), Some("meh")]
            )
            .unwrap(),
        );
        tables
    }

    fn options() -> MergeOptions {
        MergeOptions {
            review_placeholder: "no_review".into(),
            critical_columns: vec!["order_id".into(), "total_price".into(), "review_score".into()],
        }
    }

    #[test]
    fn dedup_is_idempotent() {
        let df = df!("order_id" => &["a", "a", "b"], "v" => &[1i64, 2, 3]).unwrap();
        let key = vec!["order_id".to_string()];
        let (once, removed) = dedup_by_key(&df, &key).unwrap();
        assert_eq!(removed, 1);
        let (twice, removed_again) = dedup_by_key(&once, &key).unwrap();
        assert_eq!(removed_again, 0);
        assert!(once.equals_missing(&twice));
        assert_eq!(f64_values(&once, "v").unwrap(), vec![Some(1.0), Some(3.0)]);
    }

    #[test]
    fn whole_row_dedup_without_key() {
        let df = df!("a" => &[1i64, 1, 1], "b" => &["x", "x", "y"]).unwrap();
        let (out, removed) = dedup_by_key(&df, &[]).unwrap();
        assert_eq!((out.height(), removed), (2, 1));
    }

    #[test]
    fn payments_keep_highest_value() {
        let tables = fixture_tables();
        let payments = tables.get(TableKind::Payments).unwrap();
        let key = vec!["order_id".to_string(), "payment_sequential".to_string()];
        let (out, removed) = dedup_payments(payments, &key).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            f64_values(&out, "payment_value").unwrap(),
            vec![Some(72.0), Some(110.0), Some(50.0), Some(180.0)]
        );
        let (again, removed_again) = dedup_payments(&out, &key).unwrap();
        assert_eq!(removed_again, 0);
        assert!(out.equals_missing(&again));
    }

    #[test]
    fn dominant_breaks_ties_lexicographically() {
        let df = df!(
            "order_id" => &["a", "a", "a", "a", "b", "b", "b", "c"],
            "kind" => &[Some("y"), Some("x"), Some("y"), Some("x"), Some("z"), Some("y"), Some("z"), None]
        )
        .unwrap();
        let out = dominant(df.lazy(), "kind").collect().unwrap();
        let out = out
            .sort(["order_id"], SortMultipleOptions::default())
            .unwrap();
        assert_eq!(
            str_values(&out, "order_id").unwrap(),
            vec![Some("a".to_string()), Some("b".to_string())]
        );
        assert_eq!(
            str_values(&out, "kind").unwrap(),
            vec![Some("x".to_string()), Some("z".to_string())]
        );
    }

    #[test]
    fn payment_aggregates_take_the_dominant_type() {
        let tables = fixture_tables();
        let payments = tables.get(TableKind::Payments).unwrap();
        let agg = aggregate_payments(payments).unwrap();
        assert_eq!(
            str_values(&agg, "order_id").unwrap(),
            vec![Some("o1".into()), Some("o2".into()), Some("o3".into())]
        );
        // o3 pays once by voucher and once by card; the tie goes to "credit_card".
        assert_eq!(str_values(&agg, "payment_type").unwrap()[2].as_deref(), Some("credit_card"));
        assert_eq!(f64_values(&agg, "payment_value").unwrap()[2], Some(230.0));
        assert_eq!(f64_values(&agg, "payment_installments").unwrap()[2], Some(6.0));
    }

    #[test]
    fn unparseable_mandatory_dates_drop_rows() {
        let tables = fixture_tables();
        let (orders, dropped) = parse_order_dates(tables.get(TableKind::Orders).unwrap()).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(orders.height(), 4);
        assert!(matches!(
            orders.column("order_purchase_timestamp").unwrap().dtype(),
            DataType::Datetime(TimeUnit::Milliseconds, _)
        ));
    }

    #[test]
    fn item_aggregates_per_order() {
        let tables = fixture_tables();
        let agg = aggregate_items(tables.get(TableKind::OrderItems).unwrap()).unwrap();
        assert_eq!(agg.height(), 4);
        assert_eq!(f64_values(&agg, "order_items_count").unwrap()[0], Some(2.0));
        assert_eq!(f64_values(&agg, "total_price").unwrap()[0], Some(60.0));
        assert_eq!(f64_values(&agg, "mean_freight").unwrap()[0], Some(6.0));
        assert_eq!(f64_values(&agg, "min_price").unwrap()[0], Some(20.0));
    }

    #[test]
    fn merge_is_one_row_per_reviewed_order() {
        let tables = fixture_tables();
        let mut dropped = DropCounts::default();
        let merged = merge_tables(&tables, &options(), &mut dropped).unwrap();

        // o4 has a bad purchase date, o5 has no items.
        assert_eq!(
            str_values(&merged, "order_id").unwrap(),
            vec![Some("o1".into()), Some("o2".into()), Some("o3".into())]
        );
        let reviews = tables.get(TableKind::Reviews).unwrap().height();
        assert!(merged.height() <= reviews);
        assert_eq!(dropped.unparseable_dates, 1);
        assert_eq!(dropped.orders_without_items, 1);

        assert_eq!(
            f64_values(&merged, "review_availability").unwrap(),
            vec![Some(1.0), Some(0.0), Some(0.0)]
        );
        assert_eq!(
            str_values(&merged, "review_comment_message").unwrap()[1].as_deref(),
            Some("no_review")
        );
        assert_eq!(
            str_values(&merged, "customer_state").unwrap()[1].as_deref(),
            Some("MG")
        );
        assert_eq!(
            str_values(&merged, "product_category_name").unwrap()[0].as_deref(),
            Some("books")
        );
        assert_eq!(f64_values(&merged, "product_weight_g").unwrap()[0], Some(750.0));
    }
}
