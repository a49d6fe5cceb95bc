use polars::prelude::*;
use serde::Deserialize;
use tracing::debug;

use crate::error::{InventoryError, Result};
use crate::schema::{flow, flow_names};

pub const BEST_SCORE: u8 = 1;
pub const WORST_SCORE: u8 = 5;

/// Flows whose score is set by rule, whatever the aggregator computed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FixedScore {
    pub flow_names: Vec<String>,
    pub score: u8,
}

/// Better score for some flows when the facility burns one of `fuels`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FuelRefinement {
    pub flow_names: Vec<String>,
    pub fuels: Vec<String>,
    pub score: u8,
}

/// Default-score rules applied after the flow-weighted aggregation.
///
/// Resolution order for one row:
/// 1. a fixed-score rule naming the flow replaces the computed score;
/// 2. the fuel refinement replaces it again for its flows and fuels;
/// 3. a still-missing score becomes `fallback`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScorePolicy {
    pub fixed: Vec<FixedScore>,
    pub fuel_refinement: Option<FuelRefinement>,
    pub fallback: u8,
    pub primary_fuel_column: String,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        let ghg = vec![
            flow_names::METHANE.to_string(),
            flow_names::NITROUS_OXIDE.to_string(),
        ];
        Self {
            fixed: vec![
                FixedScore {
                    flow_names: vec![flow_names::ELECTRICITY.to_string()],
                    score: BEST_SCORE,
                },
                FixedScore {
                    flow_names: ghg.clone(),
                    score: 3,
                },
            ],
            fuel_refinement: Some(FuelRefinement {
                flow_names: ghg,
                fuels: ["PG", "RC", "WC", "SLW"].iter().map(|s| s.to_string()).collect(),
                score: 2,
            }),
            fallback: WORST_SCORE,
            primary_fuel_column: flow::PRIMARY_FUEL.to_string(),
        }
    }
}

fn check_score(score: u8, what: &str) -> Result<()> {
    if (BEST_SCORE..=WORST_SCORE).contains(&score) {
        Ok(())
    } else {
        Err(InventoryError::InvalidScore(format!(
            "{what} score {score} outside {BEST_SCORE}..={WORST_SCORE}"
        )))
    }
}

fn names_series(name: &str, values: &[String]) -> Series {
    Series::new(name.into(), values)
}

impl ScorePolicy {
    pub fn validate(&self) -> Result<()> {
        for rule in &self.fixed {
            check_score(rule.score, "fixed")?;
        }
        if let Some(refinement) = &self.fuel_refinement {
            check_score(refinement.score, "fuel refinement")?;
        }
        check_score(self.fallback, "fallback")
    }

    /// Resolve one row's final score.
    pub fn resolve(&self, flow_name: &str, computed: Option<f64>, primary_fuel: Option<&str>) -> f64 {
        let mut score = computed;

        for rule in &self.fixed {
            if rule.flow_names.iter().any(|n| n == flow_name) {
                score = Some(rule.score as f64);
            }
        }

        if let (Some(refinement), Some(fuel)) = (&self.fuel_refinement, primary_fuel) {
            if refinement.flow_names.iter().any(|n| n == flow_name)
                && refinement.fuels.iter().any(|f| f == fuel)
            {
                score = Some(refinement.score as f64);
            }
        }

        score.unwrap_or(self.fallback as f64)
    }

    /// Apply the rules to the `DataReliability` column of a flow-by-facility
    /// table, creating the column if needed.
    pub fn apply(&self, df: DataFrame) -> Result<DataFrame> {
        self.validate()?;

        let has_fuel = df.schema().contains(&self.primary_fuel_column);
        let mut score = if df.schema().contains(flow::DATA_RELIABILITY) {
            col(flow::DATA_RELIABILITY).cast(DataType::Float64)
        } else {
            lit(NULL).cast(DataType::Float64)
        };

        for rule in &self.fixed {
            score = when(
                col(flow::FLOW_NAME).is_in(lit(names_series("fixed", &rule.flow_names)), false),
            )
            .then(lit(rule.score as f64))
            .otherwise(score);
        }

        match &self.fuel_refinement {
            Some(refinement) if has_fuel => {
                let targeted = col(flow::FLOW_NAME)
                    .is_in(lit(names_series("refined", &refinement.flow_names)), false)
                    .and(
                        col(self.primary_fuel_column.as_str())
                            .is_in(lit(names_series("fuels", &refinement.fuels)), false),
                    );
                score = when(targeted)
                    .then(lit(refinement.score as f64))
                    .otherwise(score);
            }
            Some(_) => debug!(
                "No '{}' column, skipping fuel refinement",
                self.primary_fuel_column
            ),
            None => {}
        }

        let df = df
            .lazy()
            .with_column(
                score
                    .fill_null(lit(self.fallback as f64))
                    .alias(flow::DATA_RELIABILITY),
            )
            .collect()?;

        Ok(df)
    }
}
