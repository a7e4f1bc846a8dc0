//! Hospital bed-utilisation and patient-satisfaction analysis: loads the
//! hospital CSV tables, fits the dashboard's statistical models once, and
//! answers the parameterised queries driven by the service selector and the
//! age slider.

pub mod bank;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod loader;
pub mod models;
pub mod query;
pub mod report;
pub mod session;
pub mod stats;

pub use bank::{AgePrediction, ModelBank, Outcome};
pub use config::DashboardConfig;
pub use dashboard::{Dashboard, DashboardContext, OutputId};
pub use error::{DashboardError, Result};
pub use models::{HospitalData, PatientRecord, Service, WeeklyServiceStat};
pub use query::SatisfactionView;
pub use session::LiveSession;
