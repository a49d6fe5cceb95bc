//! Quality checks for standardized facility emission inventories: unit
//! conversion, flow-weighted data reliability scores, inventory filtering,
//! and reconciliation against published reference totals.

pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod io;
pub mod logging;
pub mod policy;
pub mod reliability;
pub mod schema;
pub mod units;
pub mod validation;

#[cfg(feature = "python")]
mod python;

pub use config::QaConfig;
pub use error::{InventoryError, Result};
pub use filter::{filter_inventory, filter_states, FilterOptions, FilterType, StateSelection};
pub use policy::ScorePolicy;
pub use reliability::{assign_reliability, facility_scores, ReliabilityLookup, WeightedCategory};
pub use schema::FlowByFacility;
pub use units::convert_units;
pub use validation::{
    validate_inventory, validation_summary, write_summary, write_validation, Conclusion, GroupBy, ValidationOptions,
    ValidationReport,
};
