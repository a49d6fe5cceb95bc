/// Column-name constants and the flow-by-facility field descriptor.
/// Single source of truth - exported to Python via PyO3.
use polars::prelude::*;
use serde::Deserialize;

use crate::error::{InventoryError, Result};

// ── Flow-by-facility columns ────────────────────────────────────────────────
pub mod flow {
    pub const FACILITY_ID: &str = "FacilityID";
    pub const FLOW_NAME: &str = "FlowName";
    pub const FLOW_AMOUNT: &str = "FlowAmount";
    pub const UNIT: &str = "Unit";
    pub const COMPARTMENT: &str = "Compartment";
    pub const DATA_RELIABILITY: &str = "DataReliability";
    pub const PRIMARY_FUEL: &str = "PrimaryFuel";
    pub const SOURCE: &str = "Source";
    pub const STATE: &str = "State";
}

// ── Canonical flow names ────────────────────────────────────────────────────
pub mod flow_names {
    pub const HEAT: &str = "Heat";
    pub const NITROGEN_OXIDES: &str = "Nitrogen oxides";
    pub const SULFUR_DIOXIDE: &str = "Sulfur dioxide";
    pub const CARBON_DIOXIDE: &str = "Carbon dioxide";
    pub const METHANE: &str = "Methane";
    pub const NITROUS_OXIDE: &str = "Nitrous oxide";
    pub const ELECTRICITY: &str = "Electricity";
}

// ── Unit-level detail columns ───────────────────────────────────────────────
pub mod unit_level {
    pub const HEAT_INPUT: &str = "Unit unadjusted annual heat input (MMBtu)";
    pub const HEAT_INPUT_SOURCE: &str = "Unit unadjusted annual heat input source";
    pub const NOX: &str = "Unit unadjusted annual NOx emissions (tons)";
    pub const NOX_SOURCE: &str = "Unit unadjusted annual NOx emissions source";
    pub const SO2: &str = "Unit unadjusted annual SO2 emissions (tons)";
    pub const SO2_SOURCE: &str = "Unit unadjusted annual SO2 emissions source";
    pub const CO2: &str = "Unit unadjusted annual CO2 emissions (tons)";
    pub const CO2_SOURCE: &str = "Unit unadjusted annual CO2 emissions source";
}

// ── Reliability lookup columns ──────────────────────────────────────────────
pub mod lookup {
    pub const SOURCE: &str = "Source";
    pub const RELIABILITY_SCORE: &str = "ReliabilityScore";
}

// ── Validation report columns ───────────────────────────────────────────────
pub mod validation {
    pub const INVENTORY_AMOUNT: &str = "Inventory_Amount";
    pub const REFERENCE_AMOUNT: &str = "Reference_Amount";
    pub const PERCENT_DIFFERENCE: &str = "Percent_Difference";
    pub const CONCLUSION: &str = "Conclusion";
    pub const COUNT: &str = "Count";
    pub const AVG_PCT_DIFFERENCE: &str = "Avg_Pct_Difference";
}

// ── Group-by modes ──────────────────────────────────────────────────────────
pub mod group_by {
    pub const EMISSION: &str = "emission";
    pub const FACILITY: &str = "facility";
    pub const OVERALL: &str = "overall";
}

// ── Filter modes ────────────────────────────────────────────────────────────
pub mod filter_type {
    pub const DROP: &str = "drop";
    pub const KEEP: &str = "keep";
    pub const MARK_DROP: &str = "mark_drop";
    pub const MARK_KEEP: &str = "mark_keep";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub dtype: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Key fields identify a flow record and may be used as join keys.
    #[serde(default)]
    pub key: bool,
}

impl Field {
    fn new(name: &str, dtype: FieldType, required: bool, key: bool) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            required,
            key,
        }
    }
}

/// Ordered field list of a standardized flow-by-facility inventory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlowByFacility {
    pub fields: Vec<Field>,
}

impl Default for FlowByFacility {
    fn default() -> Self {
        Self::standard()
    }
}

impl FlowByFacility {
    pub fn standard() -> Self {
        Self {
            fields: vec![
                Field::new(flow::FACILITY_ID, FieldType::String, true, true),
                Field::new(flow::FLOW_NAME, FieldType::String, true, true),
                Field::new(flow::FLOW_AMOUNT, FieldType::Float, true, false),
                Field::new(flow::UNIT, FieldType::String, true, false),
                Field::new(flow::COMPARTMENT, FieldType::String, true, true),
                Field::new(flow::DATA_RELIABILITY, FieldType::Float, true, false),
            ],
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.key)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn optional_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| !f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Fail on the first required field absent from `df`.
    pub fn require_fields(&self, df: &DataFrame, table: &str) -> Result<()> {
        require_columns(df, table, &self.required_fields())
    }
}

pub fn require_columns(df: &DataFrame, table: &str, required: &[&str]) -> Result<()> {
    let schema = df.schema();
    for &col_name in required {
        if !schema.contains(col_name) {
            return Err(InventoryError::missing_column(table, col_name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_schema_tags_keys() {
        let schema = FlowByFacility::standard();
        assert!(schema.is_key(flow::FLOW_NAME));
        assert!(schema.is_key(flow::FACILITY_ID));
        assert!(!schema.is_key(flow::FLOW_AMOUNT));
        assert!(!schema.contains("SourceA"));
        assert_eq!(schema.field_names()[0], flow::FACILITY_ID);
    }

    #[test]
    fn require_fields_reports_first_missing() {
        let df = df! {
            flow::FACILITY_ID => ["1"],
            flow::FLOW_NAME => ["Carbon dioxide"],
        }
        .unwrap();
        let err = FlowByFacility::standard()
            .require_fields(&df, "inventory")
            .unwrap_err();
        match err {
            InventoryError::MissingColumn { table, column } => {
                assert_eq!(table, "inventory");
                assert_eq!(column, flow::FLOW_AMOUNT);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn required_and_optional_fields_partition_the_schema() {
        let standard = FlowByFacility::standard();
        assert_eq!(standard.required_fields(), standard.field_names());
        assert!(standard.optional_fields().is_empty());

        let mut extended = FlowByFacility::standard();
        extended.fields.push(Field::new(flow::STATE, FieldType::String, false, false));
        extended.fields.push(Field::new(flow::SOURCE, FieldType::String, false, false));
        assert_eq!(extended.optional_fields(), vec![flow::STATE, flow::SOURCE]);
        assert_eq!(extended.required_fields().len(), 6);
    }
}
