use std::fmt::Write;

use log::debug;
use serde::Serialize;

use super::design::{Design, Encoding, Frame, ModelSpec, Term};
use super::linalg::{least_squares, RankDeficient};
use super::{f_survival, mean, student_t, t_critical, two_sided_p};
use crate::config::CONFIDENCE_LEVEL;
use crate::error::{DashboardError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub term: String,
    pub coef: f64,
    pub std_err: f64,
    pub t_value: f64,
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub mean: f64,
    pub se_mean: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

impl Prediction {
    pub fn ci_width(&self) -> f64 {
        self.ci_upper - self.ci_lower
    }
}

/// An ordinary least squares fit. Immutable once built; refitting produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OlsFit {
    pub spec: ModelSpec,
    pub encoding: Encoding,
    pub coefficients: Vec<Coefficient>,
    #[serde(skip)]
    xtx_inv: Vec<Vec<f64>>,
    pub nobs: usize,
    pub df_model: f64,
    pub df_resid: f64,
    pub rss: f64,
    pub sigma2: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub f_statistic: Option<f64>,
    pub f_pvalue: Option<f64>,
    #[serde(skip)]
    t_crit: f64,
}

impl OlsFit {
    pub fn fit(spec: &ModelSpec, frame: &Frame) -> Result<Self> {
        let y = frame.numeric(&spec.response)?;
        let encoding = Encoding::from_frame(spec, frame)?;

        for term in &spec.terms {
            if let Some(factor) = term.factor() {
                let levels = encoding.levels.get(factor).map(Vec::len).unwrap_or(0);
                if levels < 2 {
                    return Err(DashboardError::DegenerateModel(format!(
                        "term {} needs at least two levels of `{factor}`, found {levels}",
                        term.label()
                    )));
                }
            }
        }

        let design = Design::build(spec, frame, &encoding)?;
        let n = y.len();
        let p = design.ncols();
        if n <= p {
            return Err(DashboardError::InsufficientData(format!(
                "{n} observations cannot estimate {p} parameters of {}",
                spec.formula()
            )));
        }

        let solved = least_squares(&design.columns, y).map_err(|RankDeficient { column }| {
            DashboardError::DegenerateModel(format!(
                "column `{}` of {} is not estimable from the data",
                design.names[column],
                spec.formula()
            ))
        })?;

        let df_resid = (n - p) as f64;
        let sigma2 = solved.rss / df_resid;
        let dist = student_t(df_resid)?;
        let t_crit = t_critical(df_resid, CONFIDENCE_LEVEL)?;

        let coefficients = design
            .names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let coef = solved.beta[j];
                let std_err = (sigma2 * solved.xtx_inv[j][j]).max(0.0).sqrt();
                let t_value = if std_err > 0.0 {
                    coef / std_err
                } else if coef == 0.0 {
                    f64::NAN
                } else {
                    coef.signum() * f64::INFINITY
                };
                Coefficient {
                    term: name.clone(),
                    coef,
                    std_err,
                    t_value,
                    p_value: two_sided_p(t_value, &dist),
                    ci_lower: coef - t_crit * std_err,
                    ci_upper: coef + t_crit * std_err,
                }
            })
            .collect();

        let tss = if spec.has_intercept() {
            let y_bar = mean(y);
            y.iter().map(|v| (v - y_bar).powi(2)).sum::<f64>()
        } else {
            y.iter().map(|v| v * v).sum::<f64>()
        };
        let df_model = (if spec.has_intercept() { p - 1 } else { p }) as f64;
        let r_squared = if tss > 0.0 { 1.0 - solved.rss / tss } else { f64::NAN };
        let adj_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / df_resid;

        let (f_statistic, f_pvalue) = if df_model > 0.0 {
            let explained = (tss - solved.rss).max(0.0) / df_model;
            let f = if sigma2 > 0.0 {
                explained / sigma2
            } else if explained > 0.0 {
                f64::INFINITY
            } else {
                f64::NAN
            };
            (Some(f), Some(f_survival(f, df_model, df_resid)?))
        } else {
            (None, None)
        };

        debug!(
            "fit {} on {n} rows: rss={:.4}, r2={:.4}",
            spec.formula(),
            solved.rss,
            r_squared
        );

        Ok(Self {
            spec: spec.clone(),
            encoding,
            coefficients,
            xtx_inv: solved.xtx_inv,
            nobs: n,
            df_model,
            df_resid,
            rss: solved.rss,
            sigma2,
            r_squared,
            adj_r_squared,
            f_statistic,
            f_pvalue,
            t_crit,
        })
    }

    pub fn n_params(&self) -> usize {
        self.coefficients.len()
    }

    pub fn coefficient(&self, term: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.term == term)
    }

    pub fn terms(&self) -> &[Term] {
        &self.spec.terms
    }

    /// Mean prediction with its confidence interval for every row of `frame`.
    pub fn predict(&self, frame: &Frame) -> Result<Vec<Prediction>> {
        let design = Design::build(&self.spec, frame, &self.encoding)?;
        let rows = frame.nrows()?;
        let p = self.n_params();

        Ok((0..rows)
            .map(|i| {
                let x0 = design.row(i);
                let mean: f64 = x0
                    .iter()
                    .zip(&self.coefficients)
                    .map(|(x, c)| x * c.coef)
                    .sum();
                let mut quad = 0.0;
                for a in 0..p {
                    for b in 0..p {
                        quad += x0[a] * self.xtx_inv[a][b] * x0[b];
                    }
                }
                let se_mean = (self.sigma2 * quad).max(0.0).sqrt();
                Prediction {
                    mean,
                    se_mean,
                    ci_lower: mean - self.t_crit * se_mean,
                    ci_upper: mean + self.t_crit * se_mean,
                }
            })
            .collect())
    }

    pub fn summary(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "OLS Regression Results");
        let _ = writeln!(output, "Formula:             {}", self.spec.formula());
        let _ = writeln!(output, "No. Observations:    {}", self.nobs);
        let _ = writeln!(output, "Df Model:            {}", self.df_model);
        let _ = writeln!(output, "Df Residuals:        {}", self.df_resid);
        let _ = writeln!(output, "R-squared:           {:.3}", self.r_squared);
        let _ = writeln!(output, "Adj. R-squared:      {:.3}", self.adj_r_squared);
        if let (Some(f), Some(p)) = (self.f_statistic, self.f_pvalue) {
            let _ = writeln!(output, "F-statistic:         {f:.3}");
            let _ = writeln!(output, "Prob (F-statistic):  {p:.4}");
        }
        let _ = writeln!(output, "Residual Std. Err.:  {:.4}", self.sigma2.sqrt());
        let _ = writeln!(output);

        let width = self
            .coefficients
            .iter()
            .map(|c| c.term.len())
            .max()
            .unwrap_or(4)
            .max(4);
        let _ = writeln!(
            output,
            "{:<width$} {:>10} {:>10} {:>8} {:>8} {:>10} {:>10}",
            "term", "coef", "std err", "t", "P>|t|", "[0.025", "0.975]"
        );
        for c in &self.coefficients {
            let _ = writeln!(
                output,
                "{:<width$} {:>10.4} {:>10.4} {:>8.3} {:>8.3} {:>10.4} {:>10.4}",
                c.term, c.coef, c.std_err, c.t_value, c.p_value, c.ci_lower, c.ci_upper
            );
        }
        output
    }
}
