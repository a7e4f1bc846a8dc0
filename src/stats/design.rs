use std::collections::BTreeMap;
use std::ops::Range;

use serde::Serialize;

use crate::error::{DashboardError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Term {
    Intercept,
    Numeric(String),
    Categorical(String),
    Interaction { numeric: String, factor: String },
}

impl Term {
    pub fn label(&self) -> String {
        match self {
            Term::Intercept => "Intercept".to_string(),
            Term::Numeric(name) => name.clone(),
            Term::Categorical(factor) => format!("C({factor})"),
            Term::Interaction { numeric, factor } => format!("{numeric}:C({factor})"),
        }
    }

    pub fn factor(&self) -> Option<&str> {
        match self {
            Term::Categorical(factor) | Term::Interaction { factor, .. } => Some(factor),
            _ => None,
        }
    }

    /// True when `other` is a strict marginal term of `self`.
    pub fn contains(&self, other: &Term) -> bool {
        match self {
            Term::Interaction { numeric, factor } => match other {
                Term::Numeric(n) => n == numeric,
                Term::Categorical(f) => f == factor,
                _ => false,
            },
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSpec {
    pub response: String,
    pub terms: Vec<Term>,
}

impl ModelSpec {
    pub fn new(response: &str, terms: Vec<Term>) -> Self {
        let mut all = vec![Term::Intercept];
        all.extend(terms.into_iter().filter(|t| *t != Term::Intercept));
        Self {
            response: response.to_string(),
            terms: all,
        }
    }

    /// `response ~ numeric`
    pub fn simple(response: &str, numeric: &str) -> Self {
        Self::new(response, vec![Term::Numeric(numeric.to_string())])
    }

    /// `response ~ C(factor)`
    pub fn one_way(response: &str, factor: &str) -> Self {
        Self::new(response, vec![Term::Categorical(factor.to_string())])
    }

    /// `response ~ numeric * C(factor)`, columns ordered factor first, then slope terms.
    pub fn crossed(response: &str, numeric: &str, factor: &str) -> Self {
        Self::new(
            response,
            vec![
                Term::Categorical(factor.to_string()),
                Term::Numeric(numeric.to_string()),
                Term::Interaction {
                    numeric: numeric.to_string(),
                    factor: factor.to_string(),
                },
            ],
        )
    }

    pub fn without(&self, dropped: &[&Term]) -> Self {
        Self {
            response: self.response.clone(),
            terms: self
                .terms
                .iter()
                .filter(|t| !dropped.contains(t))
                .cloned()
                .collect(),
        }
    }

    pub fn has_intercept(&self) -> bool {
        self.terms.contains(&Term::Intercept)
    }

    pub fn formula(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut folded: Vec<&Term> = Vec::new();

        for term in &self.terms {
            if let Term::Interaction { numeric, factor } = term {
                let main_numeric = Term::Numeric(numeric.clone());
                let main_factor = Term::Categorical(factor.clone());
                if self.terms.contains(&main_numeric) && self.terms.contains(&main_factor) {
                    parts.push(format!("{numeric} * C({factor})"));
                    folded.push(term);
                }
            }
        }

        let mut rendered: Vec<String> = self
            .terms
            .iter()
            .filter(|t| **t != Term::Intercept && !folded.contains(t))
            .filter(|t| !folded.iter().any(|f| f.contains(t)))
            .map(Term::label)
            .collect();
        rendered.extend(parts);

        if rendered.is_empty() {
            rendered.push("1".to_string());
        }
        format!("{} ~ {}", self.response, rendered.join(" + "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Factor(Vec<String>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Factor(values) => values.len(),
        }
    }
}

/// Named columns a model is fit on or predicted over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: BTreeMap<String, Column>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_numeric(mut self, name: &str, values: Vec<f64>) -> Self {
        self.columns.insert(name.to_string(), Column::Numeric(values));
        self
    }

    pub fn with_factor(mut self, name: &str, values: Vec<String>) -> Self {
        self.columns.insert(name.to_string(), Column::Factor(values));
        self
    }

    pub fn nrows(&self) -> Result<usize> {
        let mut lengths = self.columns.iter().map(|(name, c)| (name, c.len()));
        let Some((_, first)) = lengths.next() else {
            return Ok(0);
        };
        for (name, len) in lengths {
            if len != first {
                return Err(DashboardError::InvalidInput(format!(
                    "column `{name}` has {len} rows, expected {first}"
                )));
            }
        }
        Ok(first)
    }

    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        match self.columns.get(name) {
            Some(Column::Numeric(values)) => Ok(values),
            Some(Column::Factor(_)) => Err(DashboardError::InvalidInput(format!(
                "column `{name}` is categorical, expected numeric"
            ))),
            None => Err(DashboardError::InvalidInput(format!("no column `{name}`"))),
        }
    }

    pub fn factor(&self, name: &str) -> Result<&[String]> {
        match self.columns.get(name) {
            Some(Column::Factor(values)) => Ok(values),
            Some(Column::Numeric(_)) => Err(DashboardError::InvalidInput(format!(
                "column `{name}` is numeric, expected categorical"
            ))),
            None => Err(DashboardError::InvalidInput(format!("no column `{name}`"))),
        }
    }
}

/// Factor levels seen at fit time; the first level is the treatment reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Encoding {
    pub levels: BTreeMap<String, Vec<String>>,
}

impl Encoding {
    pub fn from_frame(spec: &ModelSpec, frame: &Frame) -> Result<Self> {
        let mut levels = BTreeMap::new();
        for factor in spec.terms.iter().filter_map(Term::factor) {
            if levels.contains_key(factor) {
                continue;
            }
            let mut values: Vec<String> = frame.factor(factor)?.to_vec();
            values.sort();
            values.dedup();
            levels.insert(factor.to_string(), values);
        }
        Ok(Self { levels })
    }

    fn levels(&self, factor: &str) -> Result<&[String]> {
        self.levels
            .get(factor)
            .map(Vec::as_slice)
            .ok_or_else(|| DashboardError::InvalidInput(format!("factor `{factor}` not encoded")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    pub names: Vec<String>,
    pub columns: Vec<Vec<f64>>,
    pub spans: Vec<(Term, Range<usize>)>,
}

impl Design {
    pub fn build(spec: &ModelSpec, frame: &Frame, encoding: &Encoding) -> Result<Self> {
        let n = frame.nrows()?;
        let mut names = Vec::new();
        let mut columns = Vec::new();
        let mut spans = Vec::new();

        for term in &spec.terms {
            let start = columns.len();
            match term {
                Term::Intercept => {
                    names.push(term.label());
                    columns.push(vec![1.0; n]);
                }
                Term::Numeric(name) => {
                    names.push(name.clone());
                    columns.push(frame.numeric(name)?.to_vec());
                }
                Term::Categorical(factor) => {
                    let values = frame.factor(factor)?;
                    let levels = encoding.levels(factor)?;
                    check_levels(factor, values, levels)?;
                    for level in levels.iter().skip(1) {
                        names.push(format!("C({factor})[T.{level}]"));
                        columns.push(indicator(values, level));
                    }
                }
                Term::Interaction { numeric, factor } => {
                    let x = frame.numeric(numeric)?;
                    let values = frame.factor(factor)?;
                    let levels = encoding.levels(factor)?;
                    check_levels(factor, values, levels)?;
                    for level in levels.iter().skip(1) {
                        names.push(format!("{numeric}:C({factor})[T.{level}]"));
                        columns.push(
                            indicator(values, level)
                                .into_iter()
                                .zip(x)
                                .map(|(d, x)| d * x)
                                .collect(),
                        );
                    }
                }
            }
            spans.push((term.clone(), start..columns.len()));
        }

        Ok(Self {
            names,
            columns,
            spans,
        })
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, i: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c[i]).collect()
    }
}

fn indicator(values: &[String], level: &str) -> Vec<f64> {
    values
        .iter()
        .map(|v| if v == level { 1.0 } else { 0.0 })
        .collect()
}

fn check_levels(factor: &str, values: &[String], levels: &[String]) -> Result<()> {
    match values.iter().find(|v| !levels.contains(v)) {
        Some(unknown) => Err(DashboardError::InvalidInput(format!(
            "level `{unknown}` of `{factor}` was not present when the model was fit"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new()
            .with_numeric("stay_days", vec![1.0, 2.0, 3.0, 4.0])
            .with_factor(
                "service",
                vec!["surgery", "ICU", "surgery", "emergency"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            )
    }

    #[test]
    fn crossed_design_uses_treatment_coding() {
        let spec = ModelSpec::crossed("satisfaction", "stay_days", "service");
        let frame = frame();
        let encoding = Encoding::from_frame(&spec, &frame).unwrap();
        let design = Design::build(&spec, &frame, &encoding).unwrap();

        assert_eq!(
            design.names,
            vec![
                "Intercept",
                "C(service)[T.emergency]",
                "C(service)[T.surgery]",
                "stay_days",
                "stay_days:C(service)[T.emergency]",
                "stay_days:C(service)[T.surgery]",
            ]
        );
        assert_eq!(design.columns[2], vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(design.columns[5], vec![1.0, 0.0, 3.0, 0.0]);
        assert_eq!(design.spans[1].1, 1..3);
    }

    #[test]
    fn formula_folds_crossed_terms() {
        assert_eq!(
            ModelSpec::crossed("satisfaction", "stay_days", "service").formula(),
            "satisfaction ~ stay_days * C(service)"
        );
        assert_eq!(
            ModelSpec::one_way("beds_used", "service").formula(),
            "beds_used ~ C(service)"
        );
        assert_eq!(ModelSpec::new("y", vec![]).formula(), "y ~ 1");
    }

    #[test]
    fn unknown_level_is_rejected() {
        let spec = ModelSpec::one_way("y", "service");
        let encoding = Encoding::from_frame(&spec, &frame()).unwrap();
        let other = Frame::new().with_factor("service", vec!["general_medicine".to_string()]);
        assert!(matches!(
            Design::build(&spec, &other, &encoding),
            Err(DashboardError::InvalidInput(_))
        ));
    }

    #[test]
    fn mismatched_column_lengths_are_rejected() {
        let frame = Frame::new()
            .with_numeric("a", vec![1.0, 2.0])
            .with_numeric("b", vec![1.0]);
        assert!(frame.nrows().is_err());
    }
}
