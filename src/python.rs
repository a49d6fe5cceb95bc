use std::path::Path;

use pyo3::prelude::*;
use pyo3::types::PyModule;
use pyo3_polars::PyDataFrame;

use crate::filter::{FilterOptions, FilterType, StateSelection};
use crate::io::write_table;
use crate::policy::ScorePolicy;
use crate::reliability::{self, default_categories, ReliabilityLookup};
use crate::schema::{self, FlowByFacility};
use crate::units;
use crate::validation::{self, GroupBy, ValidationOptions};

/// Convert `value_column` where `unit_column` equals `unit`.
#[pyfunction]
#[pyo3(signature = (df, value_column, unit_column, unit, factor, destination=None))]
fn convert_units(
    df: PyDataFrame,
    value_column: &str,
    unit_column: &str,
    unit: &str,
    factor: f64,
    destination: Option<&str>,
) -> PyResult<PyDataFrame> {
    let destination = destination.unwrap_or(value_column);
    let out = units::convert_units(df.0, value_column, unit_column, unit, factor, destination)?;
    Ok(PyDataFrame(out))
}

#[pyfunction]
#[pyo3(signature = (inventory, criteria, filter_type, marker=None, aspect_column=None))]
fn filter_inventory(
    inventory: PyDataFrame,
    criteria: PyDataFrame,
    filter_type: &str,
    marker: Option<String>,
    aspect_column: Option<String>,
) -> PyResult<PyDataFrame> {
    let filter: FilterType = filter_type.parse()?;
    let mut options = FilterOptions {
        marker,
        ..FilterOptions::default()
    };
    if let Some(aspect_column) = aspect_column {
        options.aspect_column = aspect_column;
    }
    let out = crate::filter::filter_inventory(
        inventory.0,
        &criteria.0,
        filter,
        &FlowByFacility::standard(),
        &options,
    )?;
    Ok(PyDataFrame(out))
}

/// Keep rows whose `State` is a selected state, DC or territory code.
#[pyfunction]
#[pyo3(signature = (inventory, include_states=true, include_dc=true, include_territories=false))]
fn filter_states(
    inventory: PyDataFrame,
    include_states: bool,
    include_dc: bool,
    include_territories: bool,
) -> PyResult<PyDataFrame> {
    let selection = StateSelection {
        states: include_states,
        dc: include_dc,
        territories: include_territories,
    };
    let out = crate::filter::filter_states(inventory.0, selection)?;
    Ok(PyDataFrame(out))
}

/// Long-form flow-weighted reliability per facility and tracked category.
#[pyfunction]
fn facility_scores(units: PyDataFrame, lookup: PyDataFrame) -> PyResult<PyDataFrame> {
    let lookup = ReliabilityLookup::from_frame(&lookup.0)?;
    let out = reliability::facility_scores(&units.0, &lookup, &default_categories())?;
    Ok(PyDataFrame(out))
}

/// Add `DataReliability` to a flow-by-facility table.
#[pyfunction]
fn assign_reliability(flows: PyDataFrame, units: PyDataFrame, lookup: PyDataFrame) -> PyResult<PyDataFrame> {
    let lookup = ReliabilityLookup::from_frame(&lookup.0)?;
    let out = reliability::assign_reliability(
        flows.0,
        &units.0,
        &lookup,
        &default_categories(),
        &ScorePolicy::default(),
    )?;
    Ok(PyDataFrame(out))
}

#[pyfunction]
#[pyo3(signature = (df, keys=None))]
fn aggregate_inventory(df: PyDataFrame, keys: Option<Vec<String>>) -> PyResult<PyDataFrame> {
    let keys = keys.unwrap_or_else(|| {
        vec![
            schema::flow::FACILITY_ID.to_string(),
            schema::flow::FLOW_NAME.to_string(),
        ]
    });
    let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
    let out = reliability::aggregate_inventory(df.0, &keys)?;
    Ok(PyDataFrame(out))
}

/// Compare an inventory with reference totals. Writes the report to
/// `filepath` when given.
#[pyfunction]
#[pyo3(signature = (inventory, reference, group_by="emission", tolerance=5.0, filepath=None))]
fn validate_inventory(
    inventory: PyDataFrame,
    reference: PyDataFrame,
    group_by: &str,
    tolerance: f64,
    filepath: Option<&str>,
) -> PyResult<PyDataFrame> {
    let options = ValidationOptions {
        group_by: group_by.parse::<GroupBy>()?,
        tolerance,
    };
    let report = validation::validate_inventory(&inventory.0, &reference.0, &options)?;
    if let Some(path) = filepath {
        validation::write_validation(&report, path)?;
    }
    Ok(PyDataFrame(report.to_frame()?))
}

#[pyfunction]
#[pyo3(signature = (report, filepath=None))]
fn validation_summary(report: PyDataFrame, filepath: Option<&str>) -> PyResult<PyDataFrame> {
    let mut df = validation::validation_summary(&report.0)?;
    if let Some(path) = filepath {
        write_table(&mut df, Path::new(path))?;
    }
    Ok(PyDataFrame(df))
}

/// Export schema constants as Python submodules
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Flow-by-facility
    let flow = PyModule::new(m.py(), "flow")?;
    flow.add("FACILITY_ID", schema::flow::FACILITY_ID)?;
    flow.add("FLOW_NAME", schema::flow::FLOW_NAME)?;
    flow.add("FLOW_AMOUNT", schema::flow::FLOW_AMOUNT)?;
    flow.add("UNIT", schema::flow::UNIT)?;
    flow.add("COMPARTMENT", schema::flow::COMPARTMENT)?;
    flow.add("DATA_RELIABILITY", schema::flow::DATA_RELIABILITY)?;
    flow.add("PRIMARY_FUEL", schema::flow::PRIMARY_FUEL)?;
    flow.add("SOURCE", schema::flow::SOURCE)?;
    flow.add("STATE", schema::flow::STATE)?;
    m.add_submodule(&flow)?;

    // Validation report
    let report = PyModule::new(m.py(), "validation")?;
    report.add("INVENTORY_AMOUNT", schema::validation::INVENTORY_AMOUNT)?;
    report.add("REFERENCE_AMOUNT", schema::validation::REFERENCE_AMOUNT)?;
    report.add("PERCENT_DIFFERENCE", schema::validation::PERCENT_DIFFERENCE)?;
    report.add("CONCLUSION", schema::validation::CONCLUSION)?;
    report.add("COUNT", schema::validation::COUNT)?;
    report.add("AVG_PCT_DIFFERENCE", schema::validation::AVG_PCT_DIFFERENCE)?;
    m.add_submodule(&report)?;

    // GroupBy
    let group_by = PyModule::new(m.py(), "group_by")?;
    group_by.add("EMISSION", schema::group_by::EMISSION)?;
    group_by.add("FACILITY", schema::group_by::FACILITY)?;
    group_by.add("OVERALL", schema::group_by::OVERALL)?;
    m.add_submodule(&group_by)?;

    // FilterType
    let filter_type = PyModule::new(m.py(), "filter_type")?;
    filter_type.add("DROP", schema::filter_type::DROP)?;
    filter_type.add("KEEP", schema::filter_type::KEEP)?;
    filter_type.add("MARK_DROP", schema::filter_type::MARK_DROP)?;
    filter_type.add("MARK_KEEP", schema::filter_type::MARK_KEEP)?;
    m.add_submodule(&filter_type)?;

    // Unit conversion factors
    let factors = PyModule::new(m.py(), "factors")?;
    factors.add("LB_KG", units::LB_KG)?;
    factors.add("USTON_KG", units::USTON_KG)?;
    factors.add("TONNE_KG", units::TONNE_KG)?;
    factors.add("MMBTU_MJ", units::MMBTU_MJ)?;
    factors.add("MWH_MJ", units::MWH_MJ)?;
    m.add_submodule(&factors)?;

    Ok(())
}

#[pymodule]
#[pyo3(name = "_core")]
fn core_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    crate::logging::init();
    m.add_function(wrap_pyfunction!(convert_units, m)?)?;
    m.add_function(wrap_pyfunction!(filter_inventory, m)?)?;
    m.add_function(wrap_pyfunction!(filter_states, m)?)?;
    m.add_function(wrap_pyfunction!(facility_scores, m)?)?;
    m.add_function(wrap_pyfunction!(assign_reliability, m)?)?;
    m.add_function(wrap_pyfunction!(aggregate_inventory, m)?)?;
    m.add_function(wrap_pyfunction!(validate_inventory, m)?)?;
    m.add_function(wrap_pyfunction!(validation_summary, m)?)?;
    add_schema_exports(m)?;
    Ok(())
}
