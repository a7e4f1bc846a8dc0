use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DashboardError, Result};

/// Significance level of the Tukey pairwise comparison.
pub const TUKEY_ALPHA: f64 = 0.05;

/// Confidence level of every regression interval.
pub const CONFIDENCE_LEVEL: f64 = 0.95;

pub const AGE_MIN: i64 = 0;
pub const AGE_MAX: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub data_dir: PathBuf,
    pub patients_file: String,
    pub services_weekly_file: String,
    pub staff_file: String,
    pub staff_schedule_file: String,
    // Ages evaluated by the static stay-vs-age prediction table
    pub fixed_ages: Vec<u32>,
    pub trend_points: usize,
    pub log_level: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            patients_file: "patients.csv".to_string(),
            services_weekly_file: "services_weekly.csv".to_string(),
            staff_file: "staff.csv".to_string(),
            staff_schedule_file: "staff_schedule.csv".to_string(),
            fixed_ages: vec![30, 45, 65, 80],
            trend_points: 50,
            log_level: "info".to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn load_from_file(file_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(file_path).map_err(|source| {
            DashboardError::DataSource {
                path: file_path.to_path_buf(),
                source,
            }
        })?;
        let config: DashboardConfig =
            toml::from_str(&content).map_err(|e| DashboardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| DashboardError::Config(e.to_string()))?;
        std::fs::write(file_path, content).map_err(|source| DashboardError::DataSource {
            path: file_path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.trend_points < 2 {
            return Err(DashboardError::Config(format!(
                "trend_points must be at least 2, got {}",
                self.trend_points
            )));
        }
        if let Some(age) = self.fixed_ages.iter().find(|a| i64::from(**a) > AGE_MAX) {
            return Err(DashboardError::Config(format!(
                "fixed age {age} is outside {AGE_MIN}..={AGE_MAX}"
            )));
        }
        Ok(())
    }

    pub fn resolve(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    pub fn patients_path(&self) -> PathBuf {
        self.resolve(&self.patients_file)
    }

    pub fn services_weekly_path(&self) -> PathBuf {
        self.resolve(&self.services_weekly_file)
    }

    pub fn staff_path(&self) -> PathBuf {
        self.resolve(&self.staff_file)
    }

    pub fn staff_schedule_path(&self) -> PathBuf {
        self.resolve(&self.staff_schedule_file)
    }
}
