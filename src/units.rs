use polars::prelude::*;

use crate::error::Result;
use crate::frame::with_float_column;
use crate::schema::require_columns;

// ── Conversion factors ──────────────────────────────────────────────────────
pub const LB_KG: f64 = 0.45359237;
pub const USTON_KG: f64 = 907.18474;
pub const TONNE_KG: f64 = 1000.0;
pub const MMBTU_MJ: f64 = 1055.056;
pub const MWH_MJ: f64 = 3600.0;

/// Multiply `value_column` by `factor` in rows whose `unit_column` equals
/// `unit`, writing the result into `destination`.
///
/// Rows with any other unit keep their current `destination` value, or get
/// null when `destination` is a new column. Unit labels are not rewritten.
pub fn convert_units(
    df: DataFrame,
    value_column: &str,
    unit_column: &str,
    unit: &str,
    factor: f64,
    destination: &str,
) -> Result<DataFrame> {
    require_columns(&df, "inventory", &[value_column, unit_column])?;
    let df = with_float_column(df, value_column, "inventory")?;

    let untouched = if df.schema().contains(destination) {
        col(destination).cast(DataType::Float64)
    } else {
        lit(NULL).cast(DataType::Float64)
    };

    let df = df
        .lazy()
        .with_column(
            when(col(unit_column).eq(lit(unit)))
                .then(col(value_column) * lit(factor))
                .otherwise(untouched)
                .alias(destination),
        )
        .collect()?;

    Ok(df)
}

/// Replace the unit label `from` with `to`.
pub fn relabel_units(df: DataFrame, unit_column: &str, from: &str, to: &str) -> Result<DataFrame> {
    require_columns(&df, "inventory", &[unit_column])?;

    let df = df
        .lazy()
        .with_column(
            when(col(unit_column).eq(lit(from)))
                .then(lit(to))
                .otherwise(col(unit_column))
                .alias(unit_column),
        )
        .collect()?;

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InventoryError;
    use crate::schema::flow;

    fn sample() -> DataFrame {
        df! {
            flow::FLOW_AMOUNT => [10.0, 20.0, 30.0],
            flow::UNIT => ["lb", "kg", "lb"],
        }
        .unwrap()
    }

    #[test]
    fn converts_only_matching_unit() {
        let out = convert_units(sample(), flow::FLOW_AMOUNT, flow::UNIT, "lb", LB_KG, flow::FLOW_AMOUNT)
            .unwrap();
        let amounts: Vec<Option<f64>> = out.column(flow::FLOW_AMOUNT).unwrap().f64().unwrap().into_iter().collect();
        assert!((amounts[0].unwrap() - 10.0 * LB_KG).abs() < 1e-12);
        assert_eq!(amounts[1], Some(20.0));
        assert!((amounts[2].unwrap() - 30.0 * LB_KG).abs() < 1e-12);

        let units: Vec<Option<&str>> = out.column(flow::UNIT).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(units, vec![Some("lb"), Some("kg"), Some("lb")]);
    }

    #[test]
    fn absent_unit_is_noop() {
        let out = convert_units(sample(), flow::FLOW_AMOUNT, flow::UNIT, "Tons", USTON_KG, flow::FLOW_AMOUNT)
            .unwrap();
        assert!(out.equals(&sample()));
    }

    #[test]
    fn new_destination_is_null_for_other_units() {
        let out = convert_units(sample(), flow::FLOW_AMOUNT, flow::UNIT, "kg", 1.0, "Amount_kg").unwrap();
        let dest: Vec<Option<f64>> = out.column("Amount_kg").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(dest, vec![None, Some(20.0), None]);
    }

    #[test]
    fn relabel_then_reconvert_is_noop() {
        let once = convert_units(sample(), flow::FLOW_AMOUNT, flow::UNIT, "lb", LB_KG, flow::FLOW_AMOUNT).unwrap();
        let once = relabel_units(once, flow::UNIT, "lb", "kg").unwrap();
        let twice = convert_units(once.clone(), flow::FLOW_AMOUNT, flow::UNIT, "lb", LB_KG, flow::FLOW_AMOUNT)
            .unwrap();
        assert!(twice.equals(&once));
    }

    #[test]
    fn missing_unit_column_fails() {
        let err = convert_units(sample(), flow::FLOW_AMOUNT, "UnitLabel", "lb", LB_KG, flow::FLOW_AMOUNT)
            .unwrap_err();
        assert!(matches!(err, InventoryError::MissingColumn { .. }));
    }
}
