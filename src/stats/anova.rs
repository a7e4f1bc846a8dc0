use std::collections::BTreeMap;

use serde::Serialize;

use super::design::{Frame, ModelSpec, Term};
use super::f_survival;
use super::ols::OlsFit;
use crate::error::{DashboardError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnovaRow {
    pub term: String,
    pub sum_sq: f64,
    pub df: f64,
    pub f_value: Option<f64>,
    pub p_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnovaTable {
    pub formula: String,
    pub rows: Vec<AnovaRow>,
}

impl AnovaTable {
    pub fn row(&self, term: &str) -> Option<&AnovaRow> {
        self.rows.iter().find(|r| r.term == term)
    }

    pub fn residual(&self) -> Option<&AnovaRow> {
        self.row("Residual")
    }
}

/// Type II sums of squares: each term is tested after every other term
/// that does not contain it.
pub fn anova_type2(spec: &ModelSpec, frame: &Frame) -> Result<AnovaTable> {
    let full = OlsFit::fit(spec, frame)?;
    let mse = full.sigma2;
    let mut rows = Vec::new();

    for term in spec.terms.iter().filter(|t| **t != Term::Intercept) {
        let higher: Vec<&Term> = spec.terms.iter().filter(|t| t.contains(term)).collect();
        let with_term = spec.without(&higher);
        let mut dropped = higher.clone();
        dropped.push(term);
        let without_term = spec.without(&dropped);

        let fit_with = OlsFit::fit(&with_term, frame)?;
        let fit_without = OlsFit::fit(&without_term, frame)?;
        let sum_sq = (fit_without.rss - fit_with.rss).max(0.0);
        let df = (fit_with.n_params() - fit_without.n_params()) as f64;

        let f_value = if mse > 0.0 {
            (sum_sq / df) / mse
        } else if sum_sq > 0.0 {
            f64::INFINITY
        } else {
            f64::NAN
        };
        rows.push(AnovaRow {
            term: term.label(),
            sum_sq,
            df,
            f_value: Some(f_value),
            p_value: Some(f_survival(f_value, df, full.df_resid)?),
        });
    }

    rows.push(AnovaRow {
        term: "Residual".to_string(),
        sum_sq: full.rss,
        df: full.df_resid,
        f_value: None,
        p_value: None,
    });

    Ok(AnovaTable {
        formula: spec.formula(),
        rows,
    })
}

/// One-way ANOVA of `response` by the categorical `factor`.
pub fn one_way(response: &str, factor: &str, frame: &Frame) -> Result<AnovaTable> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for level in frame.factor(factor)? {
        *counts.entry(level.as_str()).or_insert(0) += 1;
    }

    if counts.len() < 2 {
        return Err(DashboardError::InsufficientData(format!(
            "one-way ANOVA needs at least two groups of `{factor}`, found {}",
            counts.len()
        )));
    }
    if let Some((level, n)) = counts.iter().find(|(_, n)| **n < 2) {
        return Err(DashboardError::InsufficientData(format!(
            "group `{level}` has {n} observation(s), at least two are required"
        )));
    }

    anova_type2(&ModelSpec::one_way(response, factor), frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn groups_frame(groups: &[(&str, &[f64])]) -> Frame {
        let mut y = Vec::new();
        let mut g = Vec::new();
        for (name, values) in groups {
            for v in *values {
                y.push(*v);
                g.push(name.to_string());
            }
        }
        Frame::new().with_numeric("y", y).with_factor("g", g)
    }

    #[test]
    fn one_way_matches_textbook_decomposition() {
        let frame = groups_frame(&[
            ("a", &[4.0, 5.0, 6.0]),
            ("b", &[6.0, 7.0, 8.0]),
            ("c", &[9.0, 10.0, 11.0]),
        ]);
        let table = one_way("y", "g", &frame).unwrap();

        // grand mean 7.333, group means 5, 7, 10
        let between = table.row("C(g)").unwrap();
        assert_relative_eq!(between.sum_sq, 38.0, epsilon = 1e-9);
        assert_eq!(between.df, 2.0);
        let residual = table.residual().unwrap();
        assert_relative_eq!(residual.sum_sq, 6.0, epsilon = 1e-9);
        assert_eq!(residual.df, 6.0);
        assert_relative_eq!(between.f_value.unwrap(), 19.0, epsilon = 1e-9);
        assert!(between.p_value.unwrap() < 0.01);
        assert!(residual.f_value.is_none());
    }

    #[test]
    fn needs_two_groups() {
        let frame = groups_frame(&[("a", &[1.0, 2.0, 3.0])]);
        assert!(matches!(
            one_way("y", "g", &frame),
            Err(DashboardError::InsufficientData(_))
        ));
    }

    #[test]
    fn needs_two_observations_per_group() {
        let frame = groups_frame(&[("a", &[1.0, 2.0]), ("b", &[3.0])]);
        assert!(matches!(
            one_way("y", "g", &frame),
            Err(DashboardError::InsufficientData(_))
        ));
    }

    #[test]
    fn type2_tests_main_effects_without_their_interaction() {
        let x: Vec<f64> = (0..12).map(|i| (i % 6) as f64).collect();
        let g: Vec<String> = (0..12)
            .map(|i| if i < 6 { "a".to_string() } else { "b".to_string() })
            .collect();
        let y: Vec<f64> = x
            .iter()
            .zip(&g)
            .enumerate()
            .map(|(i, (x, g))| {
                let base = if g == "a" { 1.0 + x } else { 3.0 + 2.0 * x };
                base + if i % 3 == 0 { 0.2 } else { -0.1 }
            })
            .collect();
        let frame = Frame::new()
            .with_numeric("x", x)
            .with_numeric("y", y)
            .with_factor("g", g);

        let table = anova_type2(&ModelSpec::crossed("y", "x", "g"), &frame).unwrap();
        let labels: Vec<&str> = table.rows.iter().map(|r| r.term.as_str()).collect();
        assert_eq!(labels, vec!["C(g)", "x", "x:C(g)", "Residual"]);
        assert_eq!(table.residual().unwrap().df, 8.0);
        assert!(table.row("x:C(g)").unwrap().p_value.unwrap() < 0.05);
    }
}
