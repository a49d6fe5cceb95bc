//! Reconciliation of a computed inventory against a reference inventory.
//!
//! Both tables are summed per group (flow, flow and facility, or overall),
//! outer-joined on the group key and classified group by group. Absence of
//! a group on either side is carried as `None`, never as a magic number.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{InventoryError, Result};
use crate::frame::{float_values, string_values};
use crate::io::write_table;
use crate::schema::{flow, group_by, require_columns, validation};

pub const DEFAULT_TOLERANCE: f64 = 5.0;

/// Granularity of the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// One group per flow name.
    #[default]
    Emission,
    /// One group per flow name and facility.
    Facility,
    /// A single group over everything.
    Overall,
}

impl GroupBy {
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            Self::Emission => &[flow::FLOW_NAME],
            Self::Facility => &[flow::FLOW_NAME, flow::FACILITY_ID],
            Self::Overall => &[],
        }
    }
}

impl FromStr for GroupBy {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            group_by::EMISSION => Ok(Self::Emission),
            group_by::FACILITY => Ok(Self::Facility),
            group_by::OVERALL => Ok(Self::Overall),
            other => Err(InventoryError::InvalidConfig(format!(
                "Invalid group_by: '{other}'. Must be 'emission', 'facility' or 'overall'"
            ))),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emission => f.write_str(group_by::EMISSION),
            Self::Facility => f.write_str(group_by::FACILITY),
            Self::Overall => f.write_str(group_by::OVERALL),
        }
    }
}

/// Verdict for one comparison group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Conclusion {
    BothNull,
    InventoryNullReferenceZero,
    MissingFromInventory,
    Identical,
    InventoryZero,
    NotFoundInReference,
    ReferenceZero,
    StatisticallySimilar,
    ExceedsTolerance,
}

impl Conclusion {
    pub const ALL: [Conclusion; 9] = [
        Self::BothNull,
        Self::InventoryNullReferenceZero,
        Self::MissingFromInventory,
        Self::Identical,
        Self::InventoryZero,
        Self::NotFoundInReference,
        Self::ReferenceZero,
        Self::StatisticallySimilar,
        Self::ExceedsTolerance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BothNull => "Both inventory and reference are null",
            Self::InventoryNullReferenceZero => "Inventory is null, reference is zero",
            Self::MissingFromInventory => "Emission missing from inventory",
            Self::Identical => "Identical",
            Self::InventoryZero => "Inventory value is zero",
            Self::NotFoundInReference => "Emission not found in reference",
            Self::ReferenceZero => "Reference value is zero",
            Self::StatisticallySimilar => "Statistically similar",
            Self::ExceedsTolerance => "Percent difference exceeds tolerance",
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Conclusion {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| InventoryError::InvalidConfig(format!("Unknown conclusion: '{s}'")))
    }
}

/// Classify one group, returning `(percent_difference, conclusion)`.
///
/// The percent difference is taken relative to the reference amount.
pub fn classify(inventory: Option<f64>, reference: Option<f64>, tolerance: f64) -> (f64, Conclusion) {
    match (inventory, reference) {
        (None, None) => (0.0, Conclusion::BothNull),
        (None, Some(y)) if y == 0.0 => (0.0, Conclusion::InventoryNullReferenceZero),
        (None, Some(_)) => (100.0, Conclusion::MissingFromInventory),
        (Some(x), Some(y)) if x == 0.0 && y == 0.0 => (0.0, Conclusion::Identical),
        (Some(x), _) if x == 0.0 => (100.0, Conclusion::InventoryZero),
        (Some(_), None) => (100.0, Conclusion::NotFoundInReference),
        (Some(_), Some(y)) if y == 0.0 => (100.0, Conclusion::ReferenceZero),
        (Some(x), Some(y)) => {
            let pct = 100.0 * (y - x).abs() / y.abs();
            let conclusion = if pct == 0.0 {
                Conclusion::Identical
            } else if pct <= tolerance {
                Conclusion::StatisticallySimilar
            } else {
                Conclusion::ExceedsTolerance
            };
            (pct, conclusion)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    pub group_by: GroupBy,
    /// Largest percent difference still reported as statistically similar.
    pub tolerance: f64,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            group_by: GroupBy::default(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl ValidationOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(InventoryError::InvalidConfig(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRow {
    /// Group key values, in `GroupBy::keys` order.
    pub key: Vec<Option<String>>,
    pub inventory: Option<f64>,
    pub reference: Option<f64>,
    pub percent_difference: f64,
    pub conclusion: Conclusion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub conclusion: Conclusion,
    pub count: usize,
    pub avg_pct_difference: f64,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub group_by: GroupBy,
    pub tolerance: f64,
    pub rows: Vec<ValidationRow>,
}

impl ValidationReport {
    pub fn row(&self, key: &[&str]) -> Option<&ValidationRow> {
        self.rows.iter().find(|r| {
            r.key.len() == key.len()
                && r.key.iter().zip(key).all(|(a, b)| a.as_deref() == Some(*b))
        })
    }

    /// Group count and mean percent difference per conclusion, ordered by
    /// conclusion text like `validation_summary`.
    pub fn summary(&self) -> Vec<SummaryRow> {
        let mut acc: BTreeMap<&'static str, (Conclusion, usize, f64)> = BTreeMap::new();
        for r in &self.rows {
            let e = acc.entry(r.conclusion.as_str()).or_insert((r.conclusion, 0, 0.0));
            e.1 += 1;
            e.2 += r.percent_difference;
        }
        acc.into_values()
            .map(|(conclusion, count, total)| SummaryRow {
                conclusion,
                count,
                avg_pct_difference: total / count as f64,
            })
            .collect()
    }

    /// Report columns: group keys, `Inventory_Amount`, `Reference_Amount`,
    /// `Percent_Difference`, `Conclusion`.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut columns: Vec<Column> = Vec::new();

        for (j, name) in self.group_by.keys().iter().enumerate() {
            let values: Vec<Option<String>> = self.rows.iter().map(|r| r.key[j].clone()).collect();
            columns.push(Column::new((*name).into(), values));
        }

        let inventory: Vec<Option<f64>> = self.rows.iter().map(|r| r.inventory).collect();
        let reference: Vec<Option<f64>> = self.rows.iter().map(|r| r.reference).collect();
        let pct: Vec<f64> = self.rows.iter().map(|r| r.percent_difference).collect();
        let conclusion: Vec<&str> = self.rows.iter().map(|r| r.conclusion.as_str()).collect();

        columns.push(Column::new(validation::INVENTORY_AMOUNT.into(), inventory));
        columns.push(Column::new(validation::REFERENCE_AMOUNT.into(), reference));
        columns.push(Column::new(validation::PERCENT_DIFFERENCE.into(), pct));
        columns.push(Column::new(validation::CONCLUSION.into(), conclusion));

        Ok(DataFrame::new(columns)?)
    }

    pub fn summary_frame(&self) -> Result<DataFrame> {
        validation_summary(&self.to_frame()?)
    }
}

/// Compare `inventory` with `reference` at `options.group_by` granularity.
///
/// Text `FlowAmount` columns are parsed after stripping thousands
/// separators; a single unparseable value fails the whole call.
pub fn validate_inventory(
    inventory: &DataFrame,
    reference: &DataFrame,
    options: &ValidationOptions,
) -> Result<ValidationReport> {
    options.validate()?;
    let keys = options.group_by.keys();

    let (inventory_totals, reference_totals) = if keys.is_empty() {
        let mut inv = BTreeMap::new();
        inv.insert(Vec::new(), overall_total(inventory, "inventory")?);
        let mut reference_map = BTreeMap::new();
        reference_map.insert(Vec::new(), overall_total(reference, "reference")?);
        (inv, reference_map)
    } else {
        (
            grouped_totals(inventory, "inventory", keys)?,
            grouped_totals(reference, "reference", keys)?,
        )
    };

    let all_keys: BTreeSet<&Vec<Option<String>>> =
        inventory_totals.keys().chain(reference_totals.keys()).collect();

    let rows: Vec<ValidationRow> = all_keys
        .into_iter()
        .map(|key| {
            let x = inventory_totals.get(key).copied().flatten();
            let y = reference_totals.get(key).copied().flatten();
            let (percent_difference, conclusion) = classify(x, y, options.tolerance);
            ValidationRow {
                key: key.clone(),
                inventory: x,
                reference: y,
                percent_difference,
                conclusion,
            }
        })
        .collect();

    let report = ValidationReport {
        group_by: options.group_by,
        tolerance: options.tolerance,
        rows,
    };

    info!(
        "Validated {} groups by {} (tolerance {}%)",
        report.rows.len(),
        options.group_by,
        options.tolerance
    );
    for s in report.summary() {
        debug!("{}: {} groups, mean difference {:.2}%", s.conclusion, s.count, s.avg_pct_difference);
    }

    Ok(report)
}

/// Summarize a validation report frame: `Conclusion`, `Count`,
/// `Avg_Pct_Difference`, one row per conclusion sorted by its text.
pub fn validation_summary(report: &DataFrame) -> Result<DataFrame> {
    require_columns(
        report,
        "validation report",
        &[validation::CONCLUSION, validation::PERCENT_DIFFERENCE],
    )?;

    let df = report
        .clone()
        .lazy()
        .group_by([col(validation::CONCLUSION)])
        .agg([
            col(validation::PERCENT_DIFFERENCE)
                .count()
                .cast(DataType::Int64)
                .alias(validation::COUNT),
            col(validation::PERCENT_DIFFERENCE)
                .cast(DataType::Float64)
                .mean()
                .alias(validation::AVG_PCT_DIFFERENCE),
        ])
        .sort([validation::CONCLUSION], SortMultipleOptions::default())
        .collect()?;
    Ok(df)
}

/// Write the report to `path` (`.csv` or `.parquet`), creating missing
/// parent directories first.
pub fn write_validation(report: &ValidationReport, path: impl AsRef<Path>) -> Result<()> {
    let mut df = report.to_frame()?;
    write_table(&mut df, path.as_ref())
}

/// Write the per-conclusion summary of `report` to `path`.
pub fn write_summary(report: &ValidationReport, path: impl AsRef<Path>) -> Result<()> {
    let mut df = report.summary_frame()?;
    write_table(&mut df, path.as_ref())
}

fn not_nan(v: Option<f64>) -> Option<f64> {
    v.filter(|x| !x.is_nan())
}

/// Sum of the present amounts; `None` when no row carries an amount.
fn overall_total(df: &DataFrame, table: &str) -> Result<Option<f64>> {
    let amounts = float_values(df, flow::FLOW_AMOUNT, table)?;
    let total = amounts
        .into_iter()
        .filter_map(not_nan)
        .fold(None, |acc: Option<f64>, x| Some(acc.unwrap_or(0.0) + x));
    Ok(total)
}

fn grouped_totals(
    df: &DataFrame,
    table: &str,
    keys: &[&str],
) -> Result<BTreeMap<Vec<Option<String>>, Option<f64>>> {
    let mut required = keys.to_vec();
    required.push(flow::FLOW_AMOUNT);
    require_columns(df, table, &required)?;

    let amounts: Vec<Option<f64>> = float_values(df, flow::FLOW_AMOUNT, table)?
        .into_iter()
        .map(not_nan)
        .collect();
    let mut df = df.clone();
    df.with_column(Column::new(flow::FLOW_AMOUNT.into(), amounts))?;
    let by: Vec<Expr> = keys
        .iter()
        .map(|k| {
            col(*k)
                .cast(DataType::String)
                .str()
                .strip_chars(lit(" \t\r\n"))
                .alias(*k)
        })
        .collect();

    // A group with no present amount stays absent instead of summing to zero.
    let total = when(col(flow::FLOW_AMOUNT).count().eq(lit(0)))
        .then(lit(NULL).cast(DataType::Float64))
        .otherwise(col(flow::FLOW_AMOUNT).sum())
        .alias(flow::FLOW_AMOUNT);

    let grouped = df.lazy().group_by(by).agg([total]).collect()?;

    let key_values = keys
        .iter()
        .map(|k| string_values(&grouped, k))
        .collect::<Result<Vec<_>>>()?;
    let amounts = float_values(&grouped, flow::FLOW_AMOUNT, table)?;

    let mut totals = BTreeMap::new();
    for (i, amount) in amounts.into_iter().enumerate() {
        let key: Vec<Option<String>> = key_values.iter().map(|kv| kv[i].clone()).collect();
        totals.insert(key, not_nan(amount));
    }
    debug!("{table}: {} groups by {:?}", totals.len(), keys);
    Ok(totals)
}
