use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use polars::prelude::*;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{InventoryError, Result};
use crate::frame::string_values;
use crate::schema::{filter_type, flow, require_columns, FlowByFacility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Drop,
    Keep,
    MarkDrop,
    MarkKeep,
}

impl FromStr for FilterType {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            filter_type::DROP => Ok(Self::Drop),
            filter_type::KEEP => Ok(Self::Keep),
            filter_type::MARK_DROP => Ok(Self::MarkDrop),
            filter_type::MARK_KEEP => Ok(Self::MarkKeep),
            other => Err(InventoryError::InvalidConfig(format!(
                "Invalid filter_type: '{other}'. Must be 'drop', 'keep', 'mark_drop' or 'mark_keep'"
            ))),
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Drop => filter_type::DROP,
            Self::Keep => filter_type::KEEP,
            Self::MarkDrop => filter_type::MARK_DROP,
            Self::MarkKeep => filter_type::MARK_KEEP,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Exact cell value that flags a key. `None` flags any non-empty cell.
    pub marker: Option<String>,
    /// Inventory column naming where a row came from. Aspect columns of a
    /// mark table only act on rows whose value here equals the aspect name.
    pub aspect_column: String,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            marker: None,
            aspect_column: flow::SOURCE.to_string(),
        }
    }
}

impl FilterOptions {
    fn is_marked(&self, cell: Option<&str>) -> bool {
        match (&self.marker, cell) {
            (_, None) => false,
            (None, Some(v)) => !v.is_empty(),
            (Some(m), Some(v)) => v == m,
        }
    }
}

/// Restrict `inventory` by `criteria`.
///
/// `Drop`/`Keep` test set membership of every column the two tables share.
/// `MarkDrop`/`MarkKeep` treat criteria columns that are key fields of
/// `schema` as join keys and every non-schema column as an aspect whose
/// marked cells flag the key on that row.
///
/// The result holds the surviving rows in their original order; an empty
/// result is not an error.
pub fn filter_inventory(
    inventory: DataFrame,
    criteria: &DataFrame,
    filter: FilterType,
    schema: &FlowByFacility,
    options: &FilterOptions,
) -> Result<DataFrame> {
    let before = inventory.height();
    let mask = match filter {
        FilterType::Drop | FilterType::Keep => membership_mask(&inventory, criteria, filter)?,
        FilterType::MarkDrop | FilterType::MarkKeep => {
            marker_mask(&inventory, criteria, filter, schema, options)?
        }
    };

    let mask: BooleanChunked = mask.into_iter().collect();
    let out = inventory.filter(&mask)?;
    info!("Filter '{filter}' kept {} of {before} rows", out.height());
    Ok(out)
}

fn membership_mask(inventory: &DataFrame, criteria: &DataFrame, filter: FilterType) -> Result<Vec<bool>> {
    let inventory_schema = inventory.schema();
    let shared: Vec<&str> = criteria
        .get_column_names_str()
        .into_iter()
        .filter(|c| inventory_schema.contains(c))
        .collect();

    let mut mask = vec![true; inventory.height()];
    if shared.is_empty() {
        warn!("Criteria table shares no columns with the inventory, nothing filtered");
        return Ok(mask);
    }

    for field in shared {
        let members: HashSet<String> = string_values(criteria, field)?.into_iter().flatten().collect();
        let values = string_values(inventory, field)?;
        for (keep, value) in mask.iter_mut().zip(values) {
            let found = value.is_some_and(|v| members.contains(&v));
            *keep &= match filter {
                FilterType::Drop => !found,
                _ => found,
            };
        }
    }
    Ok(mask)
}

fn marker_mask(
    inventory: &DataFrame,
    criteria: &DataFrame,
    filter: FilterType,
    schema: &FlowByFacility,
    options: &FilterOptions,
) -> Result<Vec<bool>> {
    let columns = criteria.get_column_names_str();
    let must_match: Vec<&str> = columns.iter().copied().filter(|c| schema.is_key(c)).collect();
    let aspects: Vec<&str> = columns.iter().copied().filter(|c| !schema.contains(c)).collect();

    if must_match.is_empty() {
        let keys: Vec<&str> = schema.fields.iter().filter(|f| f.key).map(|f| f.name.as_str()).collect();
        return Err(InventoryError::missing_column("criteria", &format!("one of {}", keys.join(", "))));
    }
    if aspects.is_empty() {
        warn!("Criteria table has no aspect columns, no rows are marked");
    }

    let height = inventory.height();
    let sources = if inventory.schema().contains(&options.aspect_column) {
        Some(string_values(inventory, &options.aspect_column)?)
    } else {
        None
    };

    let mut marked = vec![false; height];
    let mut in_scope = vec![sources.is_none(); height];

    for key in &must_match {
        if !inventory.schema().contains(key) {
            return Err(InventoryError::missing_column("inventory", key));
        }
        let inventory_keys = string_values(inventory, key)?;
        let criteria_keys = string_values(criteria, key)?;

        for aspect in &aspects {
            let cells = string_values(criteria, aspect)?;
            let flagged: HashSet<&str> = criteria_keys
                .iter()
                .zip(&cells)
                .filter(|(_, cell)| options.is_marked(cell.as_deref()))
                .filter_map(|(k, _)| k.as_deref())
                .collect();

            for i in 0..height {
                let applies = match &sources {
                    None => true,
                    Some(s) => s[i].as_deref() == Some(*aspect),
                };
                if !applies {
                    continue;
                }
                in_scope[i] = true;
                if inventory_keys[i].as_deref().is_some_and(|k| flagged.contains(k)) {
                    marked[i] = true;
                }
            }
        }
    }

    let mask = marked
        .into_iter()
        .zip(in_scope)
        .map(|(marked, in_scope)| match filter {
            FilterType::MarkDrop => !marked,
            _ => marked || !in_scope,
        })
        .collect();
    Ok(mask)
}

/// Two-letter postal codes of the fifty states.
pub const STATES: [&str; 50] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA", "KS", "KY",
    "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ", "NM", "NY", "NC", "ND",
    "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT", "VA", "WA", "WV", "WI", "WY",
];
pub const DISTRICT_OF_COLUMBIA: &str = "DC";
pub const TERRITORIES: [&str; 5] = ["AS", "GU", "MP", "PR", "VI"];

/// Which jurisdictions `filter_states` keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StateSelection {
    pub states: bool,
    pub dc: bool,
    pub territories: bool,
}

impl Default for StateSelection {
    fn default() -> Self {
        Self {
            states: true,
            dc: true,
            territories: false,
        }
    }
}

impl StateSelection {
    pub fn codes(&self) -> Vec<&'static str> {
        let mut codes = Vec::new();
        if self.states {
            codes.extend(STATES);
        }
        if self.dc {
            codes.push(DISTRICT_OF_COLUMBIA);
        }
        if self.territories {
            codes.extend(TERRITORIES);
        }
        codes
    }
}

/// Keep inventory rows whose `State` is one of the selected jurisdictions.
pub fn filter_states(inventory: DataFrame, selection: StateSelection) -> Result<DataFrame> {
    require_columns(&inventory, "inventory", &[flow::STATE])?;
    let criteria = DataFrame::new(vec![Column::new(flow::STATE.into(), selection.codes())])?;
    filter_inventory(
        inventory,
        &criteria,
        FilterType::Keep,
        &FlowByFacility::standard(),
        &FilterOptions::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> DataFrame {
        df! {
            flow::FACILITY_ID => ["1", "1", "2", "3"],
            flow::FLOW_NAME => ["Benzene", "Toluene", "Benzene", "Lead"],
            flow::FLOW_AMOUNT => [1.0, 2.0, 3.0, 4.0],
            flow::SOURCE => ["SourceA", "SourceA", "SourceB", "SourceA"],
        }
        .unwrap()
    }

    fn names(df: &DataFrame) -> Vec<String> {
        string_values(df, flow::FLOW_NAME).unwrap().into_iter().flatten().collect()
    }

    fn run(inv: DataFrame, criteria: &DataFrame, filter: FilterType) -> DataFrame {
        filter_inventory(inv, criteria, filter, &FlowByFacility::standard(), &FilterOptions::default()).unwrap()
    }

    #[test]
    fn parses_filter_types() {
        assert_eq!("mark_keep".parse::<FilterType>().unwrap(), FilterType::MarkKeep);
        assert!("remove".parse::<FilterType>().is_err());
        assert_eq!(FilterType::MarkDrop.to_string(), "mark_drop");
    }

    #[test]
    fn drop_uses_set_membership() {
        let criteria = df! { flow::FLOW_NAME => ["Lead", "Benzene"] }.unwrap();
        let out = run(inventory(), &criteria, FilterType::Drop);
        assert_eq!(names(&out), vec!["Toluene"]);
    }

    #[test]
    fn keep_retains_matches_in_order() {
        let criteria = df! { flow::FLOW_NAME => ["Lead", "Benzene"] }.unwrap();
        let out = run(inventory(), &criteria, FilterType::Keep);
        assert_eq!(names(&out), vec!["Benzene", "Benzene", "Lead"]);
    }

    #[test]
    fn keep_then_drop_is_empty() {
        let criteria = df! { flow::FLOW_NAME => ["Benzene"] }.unwrap();
        let kept = run(inventory(), &criteria, FilterType::Keep);
        let out = run(kept, &criteria, FilterType::Drop);
        assert_eq!(out.height(), 0);
        assert_eq!(out.width(), 4);

        let dropped = run(inventory(), &criteria, FilterType::Drop);
        assert_eq!(run(dropped, &criteria, FilterType::Keep).height(), 0);
    }

    #[test]
    fn mark_drop_only_touches_marked_source() {
        let criteria = df! {
            flow::FLOW_NAME => ["Benzene"],
            "SourceA" => ["x"],
        }
        .unwrap();
        let out = run(inventory(), &criteria, FilterType::MarkDrop);
        let sources: Vec<String> = string_values(&out, flow::SOURCE).unwrap().into_iter().flatten().collect();
        assert_eq!(names(&out), vec!["Toluene", "Benzene", "Lead"]);
        assert_eq!(sources, vec!["SourceA", "SourceB", "SourceA"]);
    }

    #[test]
    fn mark_keep_retains_marked_rows_of_that_source() {
        let criteria = df! {
            flow::FLOW_NAME => ["Benzene", "Lead"],
            "SourceA" => [Some("x"), None],
        }
        .unwrap();
        let out = run(inventory(), &criteria, FilterType::MarkKeep);
        assert_eq!(names(&out), vec!["Benzene", "Benzene"]);
    }

    #[test]
    fn explicit_marker_ignores_other_cells() {
        let criteria = df! {
            flow::FLOW_NAME => ["Benzene", "Lead"],
            "SourceA" => ["x", "no"],
        }
        .unwrap();
        let options = FilterOptions {
            marker: Some("x".to_string()),
            ..FilterOptions::default()
        };
        let out = filter_inventory(
            inventory(),
            &criteria,
            FilterType::MarkDrop,
            &FlowByFacility::standard(),
            &options,
        )
        .unwrap();
        assert_eq!(names(&out), vec!["Toluene", "Benzene", "Lead"]);
    }

    #[test]
    fn mark_table_without_key_column_fails() {
        let criteria = df! { "SourceA" => ["x"] }.unwrap();
        let err = filter_inventory(
            inventory(),
            &criteria,
            FilterType::MarkDrop,
            &FlowByFacility::standard(),
            &FilterOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, InventoryError::MissingColumn { .. }));
    }

    #[test]
    fn states_filter_drops_territories_by_default() {
        let inv = df! {
            flow::FACILITY_ID => ["1", "2", "3", "4"],
            flow::STATE => ["TX", "PR", "DC", "ON"],
        }
        .unwrap();
        let ids = |df: &DataFrame| -> Vec<String> {
            string_values(df, flow::FACILITY_ID).unwrap().into_iter().flatten().collect()
        };

        let out = filter_states(inv.clone(), StateSelection::default()).unwrap();
        assert_eq!(ids(&out), vec!["1", "3"]);

        let all = StateSelection {
            territories: true,
            ..StateSelection::default()
        };
        assert_eq!(ids(&filter_states(inv.clone(), all).unwrap()), vec!["1", "2", "3"]);

        let states_only = StateSelection {
            dc: false,
            ..StateSelection::default()
        };
        assert_eq!(ids(&filter_states(inv, states_only).unwrap()), vec!["1"]);
    }

    #[test]
    fn states_filter_requires_state_column() {
        let err = filter_states(inventory(), StateSelection::default()).unwrap_err();
        assert!(matches!(err, InventoryError::MissingColumn { .. }));
    }
}
