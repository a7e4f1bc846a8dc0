use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::bank::{AgePrediction, ModelBank, Outcome};
use crate::config::DashboardConfig;
use crate::error::{DashboardError, Result};
use crate::loader;
use crate::models::{HospitalData, Service};
use crate::query::{self, SatisfactionView};

pub const DEFAULT_AGE: i64 = 45;

/// Everything computed at startup. Read-only for the life of the process.
#[derive(Debug, Serialize)]
pub struct DashboardContext {
    #[serde(skip)]
    pub config: DashboardConfig,
    #[serde(skip)]
    pub data: HospitalData,
    pub bank: ModelBank,
}

impl DashboardContext {
    pub fn load(config: &DashboardConfig) -> Result<Self> {
        config.validate()?;
        let data = loader::load_all(config)?;
        Ok(Self::from_data(config.clone(), data))
    }

    pub fn from_data(config: DashboardConfig, data: HospitalData) -> Self {
        let bank = ModelBank::build(&data, &config);
        Self { config, data, bank }
    }

    /// Choices offered by the service selector.
    pub fn services(&self) -> Vec<Service> {
        self.data.patient_services()
    }

    pub fn satisfaction(&self, selected: &BTreeSet<Service>) -> Result<SatisfactionView> {
        query::satisfaction_by_service(&self.data, selected, self.config.trend_points)
    }

    pub fn age_prediction(&self, age: i64) -> Result<AgePrediction> {
        match self.bank.stay_age.as_result() {
            Ok(model) => query::predict_at_age(model, age),
            Err(err) => Err(DashboardError::InsufficientData(format!(
                "stay vs age model unavailable: {err}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum OutputId {
    Satisfaction,
    AgePrediction,
}

/// Pull-based dispatcher: input setters mark dependents stale, `refresh`
/// recomputes only what is stale.
#[derive(Debug)]
pub struct Dashboard {
    context: Arc<DashboardContext>,
    services: BTreeSet<Service>,
    age: i64,
    satisfaction: Option<Arc<Outcome<SatisfactionView>>>,
    age_prediction: Option<Arc<Outcome<AgePrediction>>>,
    stale: BTreeSet<OutputId>,
    recomputed: BTreeMap<OutputId, usize>,
}

impl Dashboard {
    pub fn new(context: Arc<DashboardContext>) -> Self {
        let services = context.services().into_iter().collect();
        Self {
            context,
            services,
            age: DEFAULT_AGE,
            satisfaction: None,
            age_prediction: None,
            stale: [OutputId::Satisfaction, OutputId::AgePrediction]
                .into_iter()
                .collect(),
            recomputed: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &DashboardContext {
        &self.context
    }

    pub fn services(&self) -> &BTreeSet<Service> {
        &self.services
    }

    pub fn age(&self) -> i64 {
        self.age
    }

    /// Returns whether the selection changed.
    pub fn set_services(&mut self, services: BTreeSet<Service>) -> bool {
        if services == self.services {
            return false;
        }
        self.services = services;
        self.stale.insert(OutputId::Satisfaction);
        true
    }

    pub fn set_age(&mut self, age: i64) -> bool {
        if age == self.age {
            return false;
        }
        self.age = age;
        self.stale.insert(OutputId::AgePrediction);
        true
    }

    pub fn is_stale(&self, output: OutputId) -> bool {
        self.stale.contains(&output)
    }

    pub fn refresh(&mut self) -> Vec<OutputId> {
        let stale: Vec<OutputId> = std::mem::take(&mut self.stale).into_iter().collect();
        for output in &stale {
            match output {
                OutputId::Satisfaction => {
                    let result = self.context.satisfaction(&self.services);
                    self.satisfaction = Some(Arc::new(Outcome::capture("satisfaction", result)));
                }
                OutputId::AgePrediction => {
                    let result = self.context.age_prediction(self.age);
                    self.age_prediction = Some(Arc::new(Outcome::capture("age prediction", result)));
                }
            }
            *self.recomputed.entry(*output).or_insert(0) += 1;
        }
        if !stale.is_empty() {
            debug!("recomputed {:?}", stale);
        }
        stale
    }

    pub fn satisfaction(&self) -> Option<&Outcome<SatisfactionView>> {
        self.satisfaction.as_deref()
    }

    pub fn age_prediction(&self) -> Option<&Outcome<AgePrediction>> {
        self.age_prediction.as_deref()
    }

    /// How many times an output has been computed.
    pub fn recompute_count(&self, output: OutputId) -> usize {
        self.recomputed.get(&output).copied().unwrap_or(0)
    }
}

pub fn load_context(config: &DashboardConfig) -> Result<Arc<DashboardContext>> {
    let context = DashboardContext::load(config)?;
    info!(
        "dashboard ready for services: {}",
        context
            .services()
            .iter()
            .map(Service::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(Arc::new(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::tests::sample_data;

    fn dashboard() -> Dashboard {
        let context = DashboardContext::from_data(DashboardConfig::default(), sample_data());
        Dashboard::new(Arc::new(context))
    }

    #[test]
    fn first_refresh_computes_everything() {
        let mut dash = dashboard();
        let recomputed = dash.refresh();
        assert_eq!(
            recomputed,
            vec![OutputId::Satisfaction, OutputId::AgePrediction]
        );
        assert!(dash.satisfaction().unwrap().ready().is_some());
        assert_eq!(dash.age_prediction().unwrap().ready().unwrap().age, 45);
    }

    #[test]
    fn age_change_leaves_satisfaction_alone() {
        let mut dash = dashboard();
        dash.refresh();
        assert!(dash.set_age(70));
        assert_eq!(dash.refresh(), vec![OutputId::AgePrediction]);
        assert_eq!(dash.recompute_count(OutputId::Satisfaction), 1);
        assert_eq!(dash.recompute_count(OutputId::AgePrediction), 2);
    }

    #[test]
    fn unchanged_inputs_recompute_nothing() {
        let mut dash = dashboard();
        dash.refresh();
        let same = dash.services().clone();
        assert!(!dash.set_services(same));
        assert!(!dash.set_age(DEFAULT_AGE));
        assert!(dash.refresh().is_empty());
    }

    #[test]
    fn degenerate_selection_is_contained_to_its_output() {
        let mut dash = dashboard();
        dash.set_services([Service::Icu].into_iter().collect());
        dash.refresh();
        assert!(matches!(
            dash.satisfaction().unwrap().error(),
            Some(DashboardError::DegenerateModel(_))
        ));
        assert!(dash.age_prediction().unwrap().ready().is_some());
    }

    #[test]
    fn empty_selection_shows_nothing_selected() {
        let mut dash = dashboard();
        dash.set_services(BTreeSet::new());
        dash.refresh();
        assert!(matches!(
            dash.satisfaction().unwrap().ready(),
            Some(SatisfactionView::NoSelection)
        ));
    }

    #[test]
    fn out_of_range_age_is_rejected_not_propagated() {
        let mut dash = dashboard();
        dash.set_age(140);
        dash.refresh();
        assert!(matches!(
            dash.age_prediction().unwrap().error(),
            Some(DashboardError::InvalidInput(_))
        ));
    }

    #[test]
    fn same_age_gives_identical_prediction() {
        let context = DashboardContext::from_data(DashboardConfig::default(), sample_data());
        let first = context.age_prediction(63).unwrap();
        let second = context.age_prediction(63).unwrap();
        assert_eq!(first, second);
    }
}
