use std::collections::HashMap;
use std::path::Path;

use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{InventoryError, Result};
use crate::frame::{float_values, string_values, with_float_column};
use crate::io::read_csv_as_strings;
use crate::policy::{ScorePolicy, BEST_SCORE, WORST_SCORE};
use crate::schema::{flow, flow_names, lookup, require_columns, unit_level};

/// Source description → reliability code (1 best, 5 worst).
///
/// Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct ReliabilityLookup {
    scores: HashMap<String, u8>,
}

impl ReliabilityLookup {
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u8)>,
        S: AsRef<str>,
    {
        let mut scores = HashMap::new();
        for (source, score) in entries {
            if !(BEST_SCORE..=WORST_SCORE).contains(&score) {
                return Err(InventoryError::InvalidScore(format!(
                    "'{}' has score {score}",
                    source.as_ref()
                )));
            }
            scores.insert(source.as_ref().trim().to_string(), score);
        }
        Ok(Self { scores })
    }

    /// Build from a two-column table (`Source`, `ReliabilityScore`).
    /// Rows with a blank source or score are skipped.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        require_columns(df, "reliability lookup", &[lookup::SOURCE, lookup::RELIABILITY_SCORE])?;

        let sources = string_values(df, lookup::SOURCE)?;
        let scores = float_values(df, lookup::RELIABILITY_SCORE, "reliability lookup")?;

        let mut entries = Vec::with_capacity(sources.len());
        for (source, score) in sources.into_iter().zip(scores) {
            let (Some(source), Some(score)) = (source, score) else {
                continue;
            };
            if source.is_empty() {
                continue;
            }
            if score.fract() != 0.0 || !(BEST_SCORE as f64..=WORST_SCORE as f64).contains(&score) {
                return Err(InventoryError::InvalidScore(format!(
                    "'{source}' has score {score}"
                )));
            }
            entries.push((source, score as u8));
        }
        Self::new(entries)
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let df = read_csv_as_strings(path.as_ref(), None)?;
        Self::from_frame(&df)
    }

    pub fn get(&self, source: &str) -> Option<u8> {
        self.scores.get(source.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// One flow category of the unit-level table: a quantity column, the
/// column describing how it was obtained, and the canonical flow name the
/// composite score is reported under.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeightedCategory {
    pub flow_name: String,
    pub amount_column: String,
    pub source_column: String,
}

impl WeightedCategory {
    pub fn new(flow_name: &str, amount_column: &str, source_column: &str) -> Self {
        Self {
            flow_name: flow_name.to_string(),
            amount_column: amount_column.to_string(),
            source_column: source_column.to_string(),
        }
    }
}

pub fn default_categories() -> Vec<WeightedCategory> {
    vec![
        WeightedCategory::new(flow_names::HEAT, unit_level::HEAT_INPUT, unit_level::HEAT_INPUT_SOURCE),
        WeightedCategory::new(flow_names::NITROGEN_OXIDES, unit_level::NOX, unit_level::NOX_SOURCE),
        WeightedCategory::new(flow_names::SULFUR_DIOXIDE, unit_level::SO2, unit_level::SO2_SOURCE),
        WeightedCategory::new(flow_names::CARBON_DIOXIDE, unit_level::CO2, unit_level::CO2_SOURCE),
    ]
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    weighted: f64,
    scored_amount: f64,
}

impl Accumulator {
    fn score(&self) -> Option<f64> {
        if self.scored_amount > 0.0 {
            Some(self.weighted / self.scored_amount)
        } else {
            None
        }
    }
}

/// Flow-weighted reliability per facility and category, in long form:
/// `FacilityID, FlowName, DataReliability`.
///
/// A unit whose source description is not in `lookup` adds nothing to
/// either side of the average. A facility with no scored flow for a
/// category gets a null score rather than zero.
pub fn facility_scores(
    units: &DataFrame,
    lookup: &ReliabilityLookup,
    categories: &[WeightedCategory],
) -> Result<DataFrame> {
    let mut required = vec![flow::FACILITY_ID];
    for cat in categories {
        required.push(cat.amount_column.as_str());
        required.push(cat.source_column.as_str());
    }
    require_columns(units, "unit-level", &required)?;

    let facilities = string_values(units, flow::FACILITY_ID)?;

    let mut order: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for fac in facilities.iter().flatten() {
        if !index.contains_key(fac) {
            index.insert(fac.clone(), order.len());
            order.push(fac.clone());
        }
    }

    let mut totals = vec![vec![Accumulator::default(); categories.len()]; order.len()];
    let mut unmatched = 0usize;

    for (c, cat) in categories.iter().enumerate() {
        let amounts = float_values(units, &cat.amount_column, "unit-level")?;
        let sources = string_values(units, &cat.source_column)?;

        for (row, fac) in facilities.iter().enumerate() {
            let Some(fac) = fac else { continue };
            let Some(amount) = amounts[row].filter(|a| *a > 0.0) else {
                continue;
            };
            match sources[row].as_deref().and_then(|s| lookup.get(s)) {
                Some(code) => {
                    let acc = &mut totals[index[fac]][c];
                    acc.weighted += code as f64 * amount;
                    acc.scored_amount += amount;
                }
                None => unmatched += 1,
            }
        }
    }

    if unmatched > 0 {
        warn!("{unmatched} unit quantities have no reliability code for their source");
    }

    let n = order.len() * categories.len();
    let mut ids = Vec::with_capacity(n);
    let mut names = Vec::with_capacity(n);
    let mut scores: Vec<Option<f64>> = Vec::with_capacity(n);
    let mut missing = 0usize;

    for (f, fac) in order.iter().enumerate() {
        for (c, cat) in categories.iter().enumerate() {
            let score = totals[f][c].score();
            if score.is_none() {
                missing += 1;
            }
            ids.push(fac.clone());
            names.push(cat.flow_name.clone());
            scores.push(score);
        }
    }

    debug!(
        "Scored {} facilities over {} categories, {missing} without a composite score",
        order.len(),
        categories.len()
    );

    let df = DataFrame::new(vec![
        Column::new(flow::FACILITY_ID.into(), ids),
        Column::new(flow::FLOW_NAME.into(), names),
        Column::new(flow::DATA_RELIABILITY.into(), scores),
    ])?;
    Ok(df)
}

/// Left-join long-form facility scores onto a flow-by-facility table by
/// `(FacilityID, FlowName)`.
///
/// A computed score replaces an existing `DataReliability` value; rows
/// without a computed score keep whatever they had (possibly null).
pub fn merge_scores(main: DataFrame, scores: &DataFrame) -> Result<DataFrame> {
    require_columns(&main, "inventory", &[flow::FACILITY_ID, flow::FLOW_NAME])?;
    require_columns(scores, "facility scores", &[flow::FACILITY_ID, flow::FLOW_NAME, flow::DATA_RELIABILITY])?;

    let score_ids = string_values(scores, flow::FACILITY_ID)?;
    let score_names = string_values(scores, flow::FLOW_NAME)?;
    let score_values = float_values(scores, flow::DATA_RELIABILITY, "facility scores")?;

    let mut by_key: HashMap<(String, String), f64> = HashMap::new();
    for ((id, name), value) in score_ids.into_iter().zip(score_names).zip(score_values) {
        if let (Some(id), Some(name), Some(value)) = (id, name, value) {
            by_key.insert((id, name), value);
        }
    }

    let existing = if main.schema().contains(flow::DATA_RELIABILITY) {
        float_values(&main, flow::DATA_RELIABILITY, "inventory")?
    } else {
        vec![None; main.height()]
    };

    let ids = string_values(&main, flow::FACILITY_ID)?;
    let names = string_values(&main, flow::FLOW_NAME)?;
    let merged: Vec<Option<f64>> = ids
        .into_iter()
        .zip(names)
        .zip(existing)
        .map(|((id, name), current)| match (id, name) {
            (Some(id), Some(name)) => by_key.get(&(id, name)).copied().or(current),
            _ => current,
        })
        .collect();

    let mut main = main;
    main.with_column(Column::new(flow::DATA_RELIABILITY.into(), merged))?;
    Ok(main)
}

/// Full scoring pass: composite scores from the unit table, merged onto
/// `main`, then resolved by `policy`.
pub fn assign_reliability(
    main: DataFrame,
    units: &DataFrame,
    lookup: &ReliabilityLookup,
    categories: &[WeightedCategory],
    policy: &ScorePolicy,
) -> Result<DataFrame> {
    let scores = facility_scores(units, lookup, categories)?;
    let merged = merge_scores(main, &scores)?;
    policy.apply(merged)
}

/// Collapse rows sharing `keys`: `FlowAmount` is summed and
/// `DataReliability` becomes the flow-weighted average of the collapsed
/// rows.
///
/// Only rows with a score and a positive amount carry weight. A group with
/// no such row falls back to the plain mean of its scores, and a group with
/// no score at all gets the worst score.
pub fn aggregate_inventory(df: DataFrame, keys: &[&str]) -> Result<DataFrame> {
    require_columns(&df, "inventory", keys)?;
    let df = with_float_column(df, flow::FLOW_AMOUNT, "inventory")?;

    let mut aggs = vec![col(flow::FLOW_AMOUNT).sum()];
    if df.schema().contains(flow::DATA_RELIABILITY) {
        let score = col(flow::DATA_RELIABILITY).cast(DataType::Float64);
        let weight = when(
            score
                .clone()
                .is_not_null()
                .and(col(flow::FLOW_AMOUNT).gt(lit(0.0))),
        )
        .then(col(flow::FLOW_AMOUNT))
        .otherwise(lit(0.0));
        let weighted = (score.clone() * weight.clone()).sum();
        let total_weight = weight.sum();
        aggs.push(
            when(total_weight.clone().gt(lit(0.0)))
                .then(weighted / total_weight)
                .otherwise(score.mean().fill_null(lit(WORST_SCORE as f64)))
                .alias(flow::DATA_RELIABILITY),
        );
    }

    let by: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let out = df.lazy().group_by_stable(by).agg(aggs).collect()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> ReliabilityLookup {
        ReliabilityLookup::new([("Measured", 1u8), ("Calculated", 3), ("Estimated", 5)]).unwrap()
    }

    fn one_category() -> Vec<WeightedCategory> {
        vec![WeightedCategory::new(flow_names::NITROGEN_OXIDES, "nox", "nox_source")]
    }

    fn score_of(df: &DataFrame, facility: &str, flow_name: &str) -> Option<f64> {
        let ids = string_values(df, flow::FACILITY_ID).unwrap();
        let names = string_values(df, flow::FLOW_NAME).unwrap();
        let scores = float_values(df, flow::DATA_RELIABILITY, "test").unwrap();
        (0..df.height())
            .find(|&i| ids[i].as_deref() == Some(facility) && names[i].as_deref() == Some(flow_name))
            .and_then(|i| scores[i])
    }

    #[test]
    fn single_unit_score_is_its_code() {
        let units = df! {
            flow::FACILITY_ID => ["10"],
            "nox" => [12.5],
            "nox_source" => ["Calculated"],
        }
        .unwrap();
        let scores = facility_scores(&units, &lookup(), &one_category()).unwrap();
        assert_eq!(score_of(&scores, "10", flow_names::NITROGEN_OXIDES), Some(3.0));
    }

    #[test]
    fn large_units_dominate() {
        let units = df! {
            flow::FACILITY_ID => ["10", "10"],
            "nox" => [90.0, 10.0],
            "nox_source" => ["Measured", "Estimated"],
        }
        .unwrap();
        let scores = facility_scores(&units, &lookup(), &one_category()).unwrap();
        let s = score_of(&scores, "10", flow_names::NITROGEN_OXIDES).unwrap();
        assert!((s - 1.4).abs() < 1e-12);
    }

    #[test]
    fn zero_total_flow_gives_missing_score() {
        let units = df! {
            flow::FACILITY_ID => ["10", "10", "11"],
            "nox" => [0.0, 0.0, 5.0],
            "nox_source" => ["Measured", "Estimated", "Measured"],
        }
        .unwrap();
        let scores = facility_scores(&units, &lookup(), &one_category()).unwrap();
        assert_eq!(scores.height(), 2);
        assert_eq!(score_of(&scores, "10", flow_names::NITROGEN_OXIDES), None);
        assert_eq!(score_of(&scores, "11", flow_names::NITROGEN_OXIDES), Some(1.0));
    }

    #[test]
    fn unmatched_source_does_not_count_as_zero() {
        let units = df! {
            flow::FACILITY_ID => ["10", "10"],
            "nox" => [50.0, 50.0],
            "nox_source" => ["Calculated", "Unknown method"],
        }
        .unwrap();
        let scores = facility_scores(&units, &lookup(), &one_category()).unwrap();
        assert_eq!(score_of(&scores, "10", flow_names::NITROGEN_OXIDES), Some(3.0));
    }

    #[test]
    fn lookup_rejects_out_of_range_codes() {
        let df = df! {
            lookup::SOURCE => ["Measured", "Guess"],
            lookup::RELIABILITY_SCORE => ["1", "7"],
        }
        .unwrap();
        assert!(matches!(
            ReliabilityLookup::from_frame(&df),
            Err(InventoryError::InvalidScore(_))
        ));
    }

    #[test]
    fn merge_keeps_left_rows_and_order() {
        let main = df! {
            flow::FACILITY_ID => [11i64, 10, 10],
            flow::FLOW_NAME => [flow_names::NITROGEN_OXIDES, flow_names::METHANE, flow_names::NITROGEN_OXIDES],
            flow::FLOW_AMOUNT => [1.0, 2.0, 3.0],
        }
        .unwrap();
        let scores = df! {
            flow::FACILITY_ID => ["10"],
            flow::FLOW_NAME => [flow_names::NITROGEN_OXIDES],
            flow::DATA_RELIABILITY => [2.5],
        }
        .unwrap();
        let merged = merge_scores(main, &scores).unwrap();
        let values = float_values(&merged, flow::DATA_RELIABILITY, "test").unwrap();
        assert_eq!(values, vec![None, None, Some(2.5)]);
        assert_eq!(merged.column(flow::FACILITY_ID).unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn aggregate_inventory_weights_by_amount() {
        let df = df! {
            flow::FACILITY_ID => ["1", "1", "2"],
            flow::FLOW_NAME => ["Benzene", "Benzene", "Benzene"],
            flow::FLOW_AMOUNT => ["300", "100", "5"],
            flow::DATA_RELIABILITY => [1.0, 5.0, 2.0],
        }
        .unwrap();
        let out = aggregate_inventory(df, &[flow::FACILITY_ID, flow::FLOW_NAME]).unwrap();
        assert_eq!(out.height(), 2);
        let amounts = float_values(&out, flow::FLOW_AMOUNT, "test").unwrap();
        assert_eq!(amounts, vec![Some(400.0), Some(5.0)]);
        let scores = float_values(&out, flow::DATA_RELIABILITY, "test").unwrap();
        assert_eq!(scores, vec![Some(2.0), Some(2.0)]);
    }

    #[test]
    fn aggregate_inventory_ignores_non_positive_amounts() {
        let df = df! {
            flow::FACILITY_ID => ["1", "1", "1", "2", "2"],
            flow::FLOW_NAME => ["Lead", "Lead", "Lead", "Lead", "Lead"],
            flow::FLOW_AMOUNT => [10.0, -40.0, 0.0, -3.0, 0.0],
            flow::DATA_RELIABILITY => [2.0, 5.0, 4.0, 1.0, 3.0],
        }
        .unwrap();
        let out = aggregate_inventory(df, &[flow::FACILITY_ID, flow::FLOW_NAME]).unwrap();
        let amounts = float_values(&out, flow::FLOW_AMOUNT, "test").unwrap();
        assert_eq!(amounts, vec![Some(-30.0), Some(-3.0)]);
        let scores = float_values(&out, flow::DATA_RELIABILITY, "test").unwrap();
        assert_eq!(scores, vec![Some(2.0), Some(2.0)]);
    }

    #[test]
    fn aggregate_inventory_defaults_unscored_groups_to_worst() {
        let df = df! {
            flow::FACILITY_ID => ["1", "1", "2"],
            flow::FLOW_NAME => ["Lead", "Lead", "Lead"],
            flow::FLOW_AMOUNT => [10.0, 20.0, 5.0],
            flow::DATA_RELIABILITY => [None::<f64>, None, Some(1.0)],
        }
        .unwrap();
        let out = aggregate_inventory(df, &[flow::FACILITY_ID, flow::FLOW_NAME]).unwrap();
        let scores = float_values(&out, flow::DATA_RELIABILITY, "test").unwrap();
        assert_eq!(scores, vec![Some(WORST_SCORE as f64), Some(1.0)]);
        assert!(scores
            .iter()
            .flatten()
            .all(|s| (BEST_SCORE as f64..=WORST_SCORE as f64).contains(s)));
    }
}
