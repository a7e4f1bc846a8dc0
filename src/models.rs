use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::DashboardError;

/// Hospital service. Variant order is the display and reference-level order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Service {
    #[serde(rename = "ICU")]
    Icu,
    #[serde(rename = "emergency")]
    Emergency,
    #[serde(rename = "general_medicine")]
    GeneralMedicine,
    #[serde(rename = "surgery")]
    Surgery,
}

impl Service {
    pub const ALL: [Service; 4] = [
        Service::Icu,
        Service::Emergency,
        Service::GeneralMedicine,
        Service::Surgery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Icu => "ICU",
            Service::Emergency => "emergency",
            Service::GeneralMedicine => "general_medicine",
            Service::Surgery => "surgery",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .iter()
            .copied()
            .find(|service| service.as_str() == s.trim())
            .ok_or_else(|| DashboardError::InvalidInput(format!("unknown service `{s}`")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientRecord {
    pub patient_id: Option<String>,
    pub service: Service,
    pub arrival_date: NaiveDate,
    pub departure_date: NaiveDate,
    pub stay_days: u32,
    pub age: u32,
    pub satisfaction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyServiceStat {
    pub week: u32,
    pub month: Option<u32>,
    pub service: Service,
    pub available_beds: Option<u32>,
    pub patients_request: u32,
    pub patients_admitted: u32,
    pub patients_refused: Option<u32>,
    pub patient_satisfaction: Option<f64>,
    pub staff_morale: Option<f64>,
    pub event: Option<String>,
}

impl WeeklyServiceStat {
    pub fn beds_used(&self) -> u32 {
        self.patients_admitted
    }
}

/// Table kept verbatim for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.headers.iter().position(|h| h == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HospitalData {
    pub patients: Vec<PatientRecord>,
    pub services_weekly: Vec<WeeklyServiceStat>,
    pub staff: RawTable,
    pub staff_schedule: RawTable,
}

impl HospitalData {
    /// Distinct services present in the patient table, in service order.
    pub fn patient_services(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.patients.iter().map(|p| p.service).collect();
        services.sort();
        services.dedup();
        services
    }
}
