//! Cell extraction helpers for frames whose columns may still be strings.

use polars::prelude::*;

use crate::error::{InventoryError, Result};

/// Every cell of `column` rendered as a trimmed string; nulls stay `None`.
pub fn string_values(df: &DataFrame, column: &str) -> Result<Vec<Option<String>>> {
    let cast = df.column(column)?.cast(&DataType::String)?;
    let values = cast
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_string()))
        .collect();
    Ok(values)
}

/// Parse a text amount, dropping thousands separators. Blank text is `None`.
pub fn parse_amount(raw: &str) -> Option<std::result::Result<f64, std::num::ParseFloatError>> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.parse::<f64>())
    }
}

/// Numeric view of `column`. Text columns are parsed strictly: one bad cell
/// fails the whole call.
pub fn float_values(df: &DataFrame, column: &str, table: &str) -> Result<Vec<Option<f64>>> {
    let c = df
        .column(column)
        .map_err(|_| InventoryError::missing_column(table, column))?;

    if c.dtype() == &DataType::String {
        c.str()?
            .into_iter()
            .map(|v| match v.and_then(parse_amount) {
                None => Ok(None),
                Some(Ok(x)) => Ok(Some(x)),
                Some(Err(_)) => Err(InventoryError::TypeCoercion {
                    table: table.to_string(),
                    column: column.to_string(),
                    value: v.unwrap_or_default().to_string(),
                }),
            })
            .collect()
    } else {
        let cast = c.cast(&DataType::Float64)?;
        Ok(cast.f64()?.into_iter().collect())
    }
}

/// Replace `column` with its parsed Float64 form.
pub fn with_float_column(mut df: DataFrame, column: &str, table: &str) -> Result<DataFrame> {
    let values = float_values(&df, column, table)?;
    df.with_column(Column::new(column.into(), values))?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grouped_thousands() {
        assert_eq!(parse_amount("1,234,567.5"), Some(Ok(1_234_567.5)));
        assert_eq!(parse_amount("  42 "), Some(Ok(42.0)));
        assert_eq!(parse_amount("   "), None);
        assert!(matches!(parse_amount("n/a"), Some(Err(_))));
    }

    #[test]
    fn text_column_with_bad_cell_fails() {
        let df = df! { "FlowAmount" => [Some("1,000"), None, Some("abc")] }.unwrap();
        let err = float_values(&df, "FlowAmount", "reference").unwrap_err();
        match err {
            InventoryError::TypeCoercion { table, value, .. } => {
                assert_eq!(table, "reference");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn integer_column_is_widened() {
        let df = df! { "FlowAmount" => [1i64, 2, 3] }.unwrap();
        assert_eq!(
            float_values(&df, "FlowAmount", "inventory").unwrap(),
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn string_values_renders_numbers() {
        let df = df! { "FacilityID" => [7i64, 12] }.unwrap();
        assert_eq!(
            string_values(&df, "FacilityID").unwrap(),
            vec![Some("7".to_string()), Some("12".to_string())]
        );
    }
}
