pub mod anova;
pub mod design;
pub mod linalg;
pub mod lowess;
pub mod ols;
pub mod tukey;

use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

use crate::error::{DashboardError, Result};

pub use anova::{AnovaRow, AnovaTable};
pub use design::{Frame, ModelSpec, Term};
pub use ols::{Coefficient, OlsFit, Prediction};
pub use tukey::TukeyRow;

pub(crate) fn student_t(df: f64) -> Result<StudentsT> {
    StudentsT::new(0.0, 1.0, df).map_err(|e| {
        DashboardError::InsufficientData(format!("t distribution with {df} df: {e}"))
    })
}

/// Two-sided critical value for the given confidence level.
pub(crate) fn t_critical(df: f64, confidence: f64) -> Result<f64> {
    let dist = student_t(df)?;
    Ok(dist.inverse_cdf(1.0 - (1.0 - confidence) / 2.0))
}

pub(crate) fn two_sided_p(t: f64, dist: &StudentsT) -> f64 {
    if t.is_nan() {
        f64::NAN
    } else if t.is_infinite() {
        0.0
    } else {
        (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0)
    }
}

/// Upper-tail probability of an F statistic.
pub(crate) fn f_survival(f: f64, df_num: f64, df_den: f64) -> Result<f64> {
    if f.is_nan() {
        return Ok(f64::NAN);
    }
    if f.is_infinite() {
        return Ok(0.0);
    }
    let dist = FisherSnedecor::new(df_num, df_den).map_err(|e| {
        DashboardError::InsufficientData(format!("F distribution ({df_num}, {df_den}): {e}"))
    })?;
    Ok((1.0 - dist.cdf(f.max(0.0))).clamp(0.0, 1.0))
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Linear-interpolation quantile of already sorted values.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

pub fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (points - 1) as f64;
            (0..points)
                .map(|i| if i == points - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quantiles_interpolate_linearly() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile_sorted(&sorted, 0.5), 2.5);
        assert_relative_eq!(quantile_sorted(&sorted, 0.25), 1.75);
        assert_relative_eq!(quantile_sorted(&sorted, 1.0), 4.0);
    }

    #[test]
    fn linspace_hits_both_ends() {
        let points = linspace(2.0, 10.0, 50);
        assert_eq!(points.len(), 50);
        assert_eq!(points[0], 2.0);
        assert_eq!(points[49], 10.0);
        assert_eq!(linspace(3.0, 3.0, 4), vec![3.0; 4]);
    }

    #[test]
    fn rounding_for_display() {
        assert_eq!(round_to(6.4999, 2), 6.5);
        assert_eq!(round_to(-1.23456, 3), -1.235);
        assert!(round_to(f64::NAN, 2).is_nan());
    }

    #[test]
    fn t_critical_matches_tables() {
        assert_relative_eq!(t_critical(10.0, 0.95).unwrap(), 2.228, epsilon = 1e-3);
        assert_relative_eq!(t_critical(1000.0, 0.95).unwrap(), 1.962, epsilon = 1e-3);
    }

    #[test]
    fn infinite_statistics_have_zero_p() {
        let dist = student_t(5.0).unwrap();
        assert_eq!(two_sided_p(f64::INFINITY, &dist), 0.0);
        assert_eq!(f_survival(f64::INFINITY, 2.0, 10.0).unwrap(), 0.0);
        assert_relative_eq!(two_sided_p(0.0, &dist), 1.0, epsilon = 1e-12);
    }
}
