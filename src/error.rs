use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("cannot read data source {}: {source}", path.display())]
    DataSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: missing required column `{column}`")]
    Schema { file: String, column: String },

    #[error("{file} row {row}: {message}")]
    DataFormat {
        file: String,
        row: usize,
        message: String,
    },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("degenerate model: {0}")]
    DegenerateModel(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("computation failed: {0}")]
    Computation(String),
}

impl DashboardError {
    /// Errors that only affect a single output and leave the rest of the dashboard usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DashboardError::InsufficientData(_)
                | DashboardError::DegenerateModel(_)
                | DashboardError::InvalidInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
