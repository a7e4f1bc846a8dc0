use std::collections::BTreeSet;

use log::debug;
use serde::Serialize;

use crate::bank::{AgePrediction, StayAgeModel};
use crate::config::{AGE_MAX, AGE_MIN};
use crate::error::{DashboardError, Result};
use crate::models::{HospitalData, Service};
use crate::stats::lowess::CurvePoint;
use crate::stats::{linspace, round_to, Frame, ModelSpec, OlsFit};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientRow {
    pub term: String,
    pub coef: f64,
    pub std_err: f64,
    pub t_value: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub service: Service,
    pub stay_days: u32,
    pub satisfaction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendLine {
    pub service: Service,
    pub points: Vec<CurvePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatisfactionModel {
    pub services: Vec<Service>,
    pub coefficients: Vec<CoefficientRow>,
    pub scatter: Vec<ScatterPoint>,
    pub trend_lines: Vec<TrendLine>,
    pub fit: OlsFit,
}

impl SatisfactionModel {
    pub fn coefficient(&self, term: &str) -> Option<&CoefficientRow> {
        self.coefficients.iter().find(|c| c.term == term)
    }

    /// Coefficient table rounded to three decimals for display.
    pub fn rounded_coefficients(&self) -> Vec<CoefficientRow> {
        self.coefficients
            .iter()
            .map(|c| CoefficientRow {
                term: c.term.clone(),
                coef: round_to(c.coef, 3),
                std_err: round_to(c.std_err, 3),
                t_value: round_to(c.t_value, 3),
                p_value: round_to(c.p_value, 3),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SatisfactionView {
    /// Nothing selected; no model is fit.
    NoSelection,
    Fitted(SatisfactionModel),
}

/// Fits `satisfaction ~ stay_days * C(service)` on the selected services.
pub fn satisfaction_by_service(
    data: &HospitalData,
    selected: &BTreeSet<Service>,
    trend_points: usize,
) -> Result<SatisfactionView> {
    if selected.is_empty() {
        return Ok(SatisfactionView::NoSelection);
    }

    let rows: Vec<_> = data
        .patients
        .iter()
        .filter(|p| selected.contains(&p.service))
        .collect();
    if rows.is_empty() {
        return Err(DashboardError::InsufficientData(format!(
            "no patients recorded for {}",
            join_services(selected)
        )));
    }

    let frame = Frame::new()
        .with_numeric("stay_days", rows.iter().map(|p| f64::from(p.stay_days)).collect())
        .with_numeric("satisfaction", rows.iter().map(|p| p.satisfaction).collect())
        .with_factor("service", rows.iter().map(|p| p.service.to_string()).collect());
    let fit = OlsFit::fit(
        &ModelSpec::crossed("satisfaction", "stay_days", "service"),
        &frame,
    )?;

    let mut services: Vec<Service> = rows.iter().map(|p| p.service).collect();
    services.sort();
    services.dedup();

    let mut trend_lines = Vec::with_capacity(services.len());
    for service in &services {
        let stays = rows
            .iter()
            .filter(|p| p.service == *service)
            .map(|p| f64::from(p.stay_days));
        let (lo, hi) = stays.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s), hi.max(s))
        });
        let xs = linspace(lo, hi, trend_points);
        let grid = Frame::new()
            .with_numeric("stay_days", xs.clone())
            .with_factor("service", vec![service.to_string(); xs.len()]);
        let points = xs
            .into_iter()
            .zip(fit.predict(&grid)?)
            .map(|(x, p)| CurvePoint { x, y: p.mean })
            .collect();
        trend_lines.push(TrendLine {
            service: *service,
            points,
        });
    }

    let coefficients = fit
        .coefficients
        .iter()
        .map(|c| CoefficientRow {
            term: c.term.clone(),
            coef: c.coef,
            std_err: c.std_err,
            t_value: c.t_value,
            p_value: c.p_value,
        })
        .collect();
    let scatter = rows
        .iter()
        .map(|p| ScatterPoint {
            service: p.service,
            stay_days: p.stay_days,
            satisfaction: p.satisfaction,
        })
        .collect();

    debug!(
        "satisfaction model refit for {} ({} rows)",
        join_services(selected),
        rows.len()
    );
    Ok(SatisfactionView::Fitted(SatisfactionModel {
        services,
        coefficients,
        scatter,
        trend_lines,
        fit,
    }))
}

/// Mean stay and its confidence interval at one slider age, rounded for display.
pub fn predict_at_age(model: &StayAgeModel, age: i64) -> Result<AgePrediction> {
    let age = validate_age(age)?;
    model
        .predict_ages(&[age])?
        .into_iter()
        .next()
        .ok_or_else(|| DashboardError::InsufficientData(format!("no prediction for age {age}")))
}

pub fn validate_age(age: i64) -> Result<u32> {
    if !(AGE_MIN..=AGE_MAX).contains(&age) {
        return Err(DashboardError::InvalidInput(format!(
            "age {age} is outside {AGE_MIN}..={AGE_MAX}"
        )));
    }
    u32::try_from(age).map_err(|_| DashboardError::InvalidInput(format!("age {age}")))
}

pub fn parse_services(value: &str) -> Result<BTreeSet<Service>> {
    match value.trim() {
        "" | "none" => Ok(BTreeSet::new()),
        "all" => Ok(Service::ALL.into_iter().collect()),
        list => list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<Service>)
            .collect(),
    }
}

pub fn join_services(services: &BTreeSet<Service>) -> String {
    services
        .iter()
        .map(Service::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
