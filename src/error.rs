use thiserror::Error;

#[derive(Error, Debug)]
pub enum InventoryError {
    /// A required column is absent from one of the input tables.
    #[error("{table}: missing column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A `FlowAmount` cell could not be parsed as a number.
    #[error("{table}: cannot parse '{value}' in column '{column}' as a number")]
    TypeCoercion {
        table: String,
        column: String,
        value: String,
    },

    #[error("Invalid reliability score: {0}")]
    InvalidScore(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl InventoryError {
    pub(crate) fn missing_column(table: &str, column: &str) -> Self {
        Self::MissingColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(feature = "python")]
impl From<InventoryError> for pyo3::PyErr {
    fn from(err: InventoryError) -> pyo3::PyErr {
        match err {
            InventoryError::InvalidConfig(_) | InventoryError::InvalidScore(_) => {
                pyo3::exceptions::PyValueError::new_err(err.to_string())
            }
            _ => pyo3::exceptions::PyRuntimeError::new_err(err.to_string()),
        }
    }
}
