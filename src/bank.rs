use log::{error, info, warn};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::config::{DashboardConfig, TUKEY_ALPHA};
use crate::error::{DashboardError, Result};
use crate::models::{HospitalData, Service};
use crate::stats::lowess::{lowess, CurvePoint, DEFAULT_FRAC, DEFAULT_ITERATIONS};
use crate::stats::{
    anova, mean, quantile_sorted, round_to, tukey, AnovaTable, Frame, ModelSpec, OlsFit,
    Prediction, TukeyRow,
};

/// A single dashboard output: either computed, or a reason it cannot be shown.
#[derive(Debug)]
pub enum Outcome<T> {
    Ready(T),
    Unavailable(DashboardError),
}

impl<T> Outcome<T> {
    pub fn capture(label: &str, result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Ready(value),
            Err(err) => {
                if err.is_recoverable() {
                    warn!("{label}: cannot compute: {err}");
                } else {
                    error!("{label}: {err}");
                }
                Outcome::Unavailable(err)
            }
        }
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::Unavailable(_) => None,
        }
    }

    pub fn error(&self) -> Option<&DashboardError> {
        match self {
            Outcome::Ready(_) => None,
            Outcome::Unavailable(err) => Some(err),
        }
    }

    pub fn as_result(&self) -> std::result::Result<&T, &DashboardError> {
        match self {
            Outcome::Ready(value) => Ok(value),
            Outcome::Unavailable(err) => Err(err),
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Outcome", 2)?;
        match self {
            Outcome::Ready(value) => {
                state.serialize_field("status", "ready")?;
                state.serialize_field("value", value)?;
            }
            Outcome::Unavailable(err) => {
                state.serialize_field("status", "unavailable")?;
                state.serialize_field("reason", &err.to_string())?;
            }
        }
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxSummary {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

impl BoxSummary {
    pub fn from_values(values: &[f64]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self {
            count: sorted.len(),
            min: sorted.first().copied().unwrap_or(f64::NAN),
            q1: quantile_sorted(&sorted, 0.25),
            median: quantile_sorted(&sorted, 0.5),
            q3: quantile_sorted(&sorted, 0.75),
            max: sorted.last().copied().unwrap_or(f64::NAN),
            mean: mean(&sorted),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BedsSeries {
    pub service: Service,
    pub beds_used: Vec<f64>,
    pub summary: BoxSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPoint {
    pub week: u32,
    pub service: Service,
    pub patients_request: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatisfactionTrend {
    pub fit: OlsFit,
    pub smoothed: Vec<CurvePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgePrediction {
    pub age: u32,
    pub predicted_days: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

impl AgePrediction {
    fn from_prediction(age: u32, prediction: &Prediction) -> Self {
        Self {
            age,
            predicted_days: round_to(prediction.mean, 2),
            ci_lower: round_to(prediction.ci_lower, 2),
            ci_upper: round_to(prediction.ci_upper, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StayAgeModel {
    pub fit: OlsFit,
    pub summary: String,
    pub fixed_predictions: Vec<AgePrediction>,
}

impl StayAgeModel {
    pub fn fit(data: &HospitalData, fixed_ages: &[u32]) -> Result<Self> {
        let frame = Frame::new()
            .with_numeric("stay_days", data.patients.iter().map(|p| f64::from(p.stay_days)).collect())
            .with_numeric("age", data.patients.iter().map(|p| f64::from(p.age)).collect());
        let fit = OlsFit::fit(&ModelSpec::simple("stay_days", "age"), &frame)?;
        let summary = fit.summary();

        let mut model = Self {
            fit,
            summary,
            fixed_predictions: Vec::new(),
        };
        model.fixed_predictions = model.predict_ages(fixed_ages)?;
        Ok(model)
    }

    /// Unrounded mean and confidence interval at each age.
    pub fn predict_raw(&self, ages: &[f64]) -> Result<Vec<Prediction>> {
        self.fit
            .predict(&Frame::new().with_numeric("age", ages.to_vec()))
    }

    /// Display rows rounded to two decimals.
    pub fn predict_ages(&self, ages: &[u32]) -> Result<Vec<AgePrediction>> {
        let raw: Vec<f64> = ages.iter().map(|a| f64::from(*a)).collect();
        Ok(ages
            .iter()
            .zip(self.predict_raw(&raw)?)
            .map(|(age, p)| AgePrediction::from_prediction(*age, &p))
            .collect())
    }
}

/// Fits computed once after loading and shared read-only by every query.
#[derive(Debug, Serialize)]
pub struct ModelBank {
    pub beds_by_service: Vec<BedsSeries>,
    pub anova: Outcome<AnovaTable>,
    pub tukey: Outcome<Vec<TukeyRow>>,
    pub satisfaction_trend: Outcome<SatisfactionTrend>,
    pub stay_age: Outcome<StayAgeModel>,
    pub weekly_requests: Vec<RequestPoint>,
}

impl ModelBank {
    pub fn build(data: &HospitalData, config: &DashboardConfig) -> Self {
        let bank = Self {
            beds_by_service: beds_by_service(data),
            anova: Outcome::capture("anova", beds_anova(data)),
            tukey: Outcome::capture("tukey", beds_tukey(data)),
            satisfaction_trend: Outcome::capture("satisfaction trend", satisfaction_trend(data)),
            stay_age: Outcome::capture(
                "stay vs age",
                StayAgeModel::fit(data, &config.fixed_ages),
            ),
            weekly_requests: weekly_requests(data),
        };

        let failed = [
            bank.anova.error().is_some(),
            bank.tukey.error().is_some(),
            bank.satisfaction_trend.error().is_some(),
            bank.stay_age.error().is_some(),
        ]
        .iter()
        .filter(|f| **f)
        .count();
        info!("model bank ready ({} of 4 static fits unavailable)", failed);
        bank
    }
}

pub fn beds_by_service(data: &HospitalData) -> Vec<BedsSeries> {
    Service::ALL
        .iter()
        .filter_map(|service| {
            let beds_used: Vec<f64> = data
                .services_weekly
                .iter()
                .filter(|row| row.service == *service)
                .map(|row| f64::from(row.beds_used()))
                .collect();
            if beds_used.is_empty() {
                return None;
            }
            let summary = BoxSummary::from_values(&beds_used);
            Some(BedsSeries {
                service: *service,
                beds_used,
                summary,
            })
        })
        .collect()
}

fn beds_frame(data: &HospitalData) -> Frame {
    Frame::new()
        .with_numeric(
            "beds_used",
            data.services_weekly
                .iter()
                .map(|row| f64::from(row.beds_used()))
                .collect(),
        )
        .with_factor(
            "service",
            data.services_weekly
                .iter()
                .map(|row| row.service.to_string())
                .collect(),
        )
}

pub fn beds_anova(data: &HospitalData) -> Result<AnovaTable> {
    anova::one_way("beds_used", "service", &beds_frame(data))
}

pub fn beds_tukey(data: &HospitalData) -> Result<Vec<TukeyRow>> {
    let groups: Vec<(String, Vec<f64>)> = beds_by_service(data)
        .into_iter()
        .map(|series| (series.service.to_string(), series.beds_used))
        .collect();
    tukey::pairwise_tukey_hsd(&groups, TUKEY_ALPHA)
}

pub fn satisfaction_trend(data: &HospitalData) -> Result<SatisfactionTrend> {
    let stay: Vec<f64> = data.patients.iter().map(|p| f64::from(p.stay_days)).collect();
    let satisfaction: Vec<f64> = data.patients.iter().map(|p| p.satisfaction).collect();
    let frame = Frame::new()
        .with_numeric("stay_days", stay.clone())
        .with_numeric("satisfaction", satisfaction.clone());
    let fit = OlsFit::fit(&ModelSpec::simple("satisfaction", "stay_days"), &frame)?;

    let mut smoothed = lowess(&stay, &satisfaction, DEFAULT_FRAC, DEFAULT_ITERATIONS);
    smoothed.dedup_by(|a, b| a.x == b.x);
    Ok(SatisfactionTrend { fit, smoothed })
}

pub fn weekly_requests(data: &HospitalData) -> Vec<RequestPoint> {
    let mut points: Vec<RequestPoint> = data
        .services_weekly
        .iter()
        .map(|row| RequestPoint {
            week: row.week,
            service: row.service,
            patients_request: row.patients_request,
        })
        .collect();
    points.sort_by(|a, b| a.week.cmp(&b.week).then(a.service.cmp(&b.service)));
    points
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{PatientRecord, WeeklyServiceStat};
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    pub(crate) fn patient(service: Service, stay: u32, age: u32, satisfaction: f64) -> PatientRecord {
        let arrival = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        PatientRecord {
            patient_id: None,
            service,
            arrival_date: arrival,
            departure_date: arrival + Duration::days(i64::from(stay)),
            stay_days: stay,
            age,
            satisfaction,
        }
    }

    pub(crate) fn weekly(week: u32, service: Service, admitted: u32, request: u32) -> WeeklyServiceStat {
        WeeklyServiceStat {
            week,
            month: None,
            service,
            available_beds: None,
            patients_request: request,
            patients_admitted: admitted,
            patients_refused: None,
            patient_satisfaction: None,
            staff_morale: None,
            event: None,
        }
    }

    pub(crate) fn sample_data() -> HospitalData {
        let mut services_weekly = Vec::new();
        for week in 1..=8 {
            for (i, service) in Service::ALL.iter().enumerate() {
                let base = [10, 30, 20, 22][i];
                let admitted = base + (week * (i as u32 + 1)) % 5;
                services_weekly.push(weekly(week, *service, admitted, admitted + 7));
            }
        }

        let mut patients = Vec::new();
        for (i, service) in Service::ALL.iter().enumerate() {
            for stay in 1..=10u32 {
                let age = 20 + stay * 5 + i as u32 * 3;
                let satisfaction = 60.0 + i as f64 * 4.0 - stay as f64 * (0.5 + i as f64 * 0.2)
                    + if stay % 2 == 0 { 1.5 } else { -1.5 };
                patients.push(patient(*service, stay, age, satisfaction));
            }
        }

        HospitalData {
            patients,
            services_weekly,
            ..HospitalData::default()
        }
    }

    #[test]
    fn anova_degrees_of_freedom_follow_group_count() {
        let data = sample_data();
        let table = beds_anova(&data).unwrap();
        let n = data.services_weekly.len() as f64;
        assert_eq!(table.row("C(service)").unwrap().df, 3.0);
        assert_eq!(table.residual().unwrap().df, n - 4.0);
    }

    #[test]
    fn tukey_has_one_row_per_service_pair() {
        let rows = beds_tukey(&sample_data()).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].group1, "ICU");
        assert_eq!(rows[0].group2, "emergency");
        let mut pairs: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r.group1.clone(), r.group2.clone()))
            .collect();
        pairs.dedup();
        assert_eq!(pairs.len(), 6);
    }

    #[test]
    fn beds_series_follow_service_order() {
        let series = beds_by_service(&sample_data());
        let order: Vec<Service> = series.iter().map(|s| s.service).collect();
        assert_eq!(order, Service::ALL.to_vec());
        assert_eq!(series[0].summary.count, 8);
        assert!(series[0].summary.min <= series[0].summary.median);
    }

    #[test]
    fn requests_sorted_by_week_then_service() {
        let points = weekly_requests(&sample_data());
        assert_eq!(points[0].week, 1);
        assert_eq!(points[0].service, Service::Icu);
        assert_eq!(points[3].service, Service::Surgery);
        assert_eq!(points[4].week, 2);
    }

    #[test]
    fn bank_isolates_failed_fits() {
        let mut data = sample_data();
        data.services_weekly.retain(|row| row.service == Service::Icu);
        let bank = ModelBank::build(&data, &DashboardConfig::default());

        assert!(matches!(
            bank.anova.error(),
            Some(DashboardError::InsufficientData(_))
        ));
        assert!(bank.tukey.error().is_some());
        assert!(bank.stay_age.ready().is_some());
        assert_eq!(bank.beds_by_service.len(), 1);
    }

    #[test]
    fn fixed_age_predictions_cover_configured_ages() {
        let bank = ModelBank::build(&sample_data(), &DashboardConfig::default());
        let model = bank.stay_age.ready().unwrap();
        let ages: Vec<u32> = model.fixed_predictions.iter().map(|p| p.age).collect();
        assert_eq!(ages, vec![30, 45, 65, 80]);
        for p in &model.fixed_predictions {
            assert!(p.ci_lower <= p.predicted_days && p.predicted_days <= p.ci_upper);
        }
        assert!(model.summary.contains("stay_days ~ age"));
    }

    #[test]
    fn stay_age_fit_is_exact_on_linear_data() {
        let data = HospitalData {
            patients: (1..=8)
                .map(|k| patient(Service::Surgery, 2 + k, 10 * k, 80.0))
                .collect(),
            ..HospitalData::default()
        };
        let model = StayAgeModel::fit(&data, &[45]).unwrap();
        let p = model.fixed_predictions[0];
        assert_relative_eq!(p.predicted_days, 6.5, epsilon = 1e-9);
        assert_relative_eq!(p.ci_upper - p.ci_lower, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn outcome_serializes_status() {
        let ready: Outcome<u32> = Outcome::Ready(3);
        let failed: Outcome<u32> =
            Outcome::Unavailable(DashboardError::DegenerateModel("one level".into()));
        assert_eq!(
            serde_json::to_value(&ready).unwrap(),
            serde_json::json!({"status": "ready", "value": 3})
        );
        assert_eq!(
            serde_json::to_value(&failed).unwrap()["status"],
            "unavailable"
        );
    }
}
