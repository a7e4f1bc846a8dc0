use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bank::{AgePrediction, Outcome};
use crate::dashboard::DashboardContext;
use crate::error::{DashboardError, Result};
use crate::models::Service;
use crate::query::SatisfactionView;

#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    pub age_generation: u64,
    pub age: Option<i64>,
    pub age_prediction: Option<Arc<Outcome<AgePrediction>>>,
    pub services_generation: u64,
    pub services: Option<BTreeSet<Service>>,
    pub satisfaction: Option<Arc<Outcome<SatisfactionView>>>,
}

/// Runs fits off the caller's task. Only the most recent submission for each
/// input is ever published; superseded results are dropped.
pub struct LiveSession {
    context: Arc<DashboardContext>,
    age_generation: Arc<AtomicU64>,
    services_generation: Arc<AtomicU64>,
    tx: Arc<watch::Sender<LiveSnapshot>>,
}

impl LiveSession {
    pub fn new(context: Arc<DashboardContext>) -> Self {
        let (tx, _rx) = watch::channel(LiveSnapshot::default());
        Self {
            context,
            age_generation: Arc::new(AtomicU64::new(0)),
            services_generation: Arc::new(AtomicU64::new(0)),
            tx: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.tx.borrow().clone()
    }

    /// Resolves to `true` when this submission's result was published.
    pub fn submit_age(&self, age: i64) -> JoinHandle<bool> {
        let generation = self.age_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.age_generation);
        let context = Arc::clone(&self.context);
        let tx = Arc::clone(&self.tx);

        tokio::spawn(async move {
            let result = run_blocking(move || context.age_prediction(age)).await;
            let outcome = Arc::new(Outcome::capture("age prediction", result));

            publish_age(&tx, latest.load(Ordering::SeqCst), generation, age, outcome)
        })
    }

    pub fn submit_services(&self, services: BTreeSet<Service>) -> JoinHandle<bool> {
        let generation = self.services_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.services_generation);
        let context = Arc::clone(&self.context);
        let tx = Arc::clone(&self.tx);

        tokio::spawn(async move {
            let selected = services.clone();
            let result = run_blocking(move || context.satisfaction(&selected)).await;
            let outcome = Arc::new(Outcome::capture("satisfaction", result));

            publish_services(&tx, latest.load(Ordering::SeqCst), generation, services, outcome)
        })
    }
}

/// Publishes an age result unless a newer submission exists or was already published.
fn publish_age(
    tx: &watch::Sender<LiveSnapshot>,
    latest: u64,
    generation: u64,
    age: i64,
    outcome: Arc<Outcome<AgePrediction>>,
) -> bool {
    tx.send_if_modified(|snapshot| {
        if generation != latest || generation <= snapshot.age_generation {
            debug!("dropping superseded age result (generation {generation})");
            return false;
        }
        snapshot.age_generation = generation;
        snapshot.age = Some(age);
        snapshot.age_prediction = Some(outcome);
        true
    })
}

fn publish_services(
    tx: &watch::Sender<LiveSnapshot>,
    latest: u64,
    generation: u64,
    services: BTreeSet<Service>,
    outcome: Arc<Outcome<SatisfactionView>>,
) -> bool {
    tx.send_if_modified(|snapshot| {
        if generation != latest || generation <= snapshot.services_generation {
            debug!("dropping superseded satisfaction result (generation {generation})");
            return false;
        }
        snapshot.services_generation = generation;
        snapshot.services = Some(services);
        snapshot.satisfaction = Some(outcome);
        true
    })
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .unwrap_or_else(|e| {
            error!("blocking computation did not complete: {e}");
            Err(DashboardError::Computation(e.to_string()))
        })
}
