//! Decision engine facade
//!
//! [`DecisionEngine`] owns the catalog, the state store, the configuration,
//! a clock and a random source. Each call loads the state document, runs
//! the relevant pipeline and (for mutating calls) saves it back, so the
//! engine itself carries no learning state between calls.
//!
//! ```ignore
//! use kairos_core::{DecisionEngine, EngineConfig, FeedbackDelta, Goal, MemoryStore, StaticCatalog};
//!
//! let mut engine = DecisionEngine::new(StaticCatalog::builtin(), MemoryStore::new(), EngineConfig::default())
//!     .with_seed(7);
//! if let Some(decision) = engine.select_protocol(Goal::Calm)? {
//!     engine.record_feedback(&decision.protocol.id, FeedbackDelta::Better, decision.dose_seconds)?;
//! }
//! ```

pub mod analytics;
pub mod feedback;
pub mod phases;
pub mod trace;

pub use analytics::{AlgorithmMetrics, InsightSummary, Insights, Recommendation};
pub use feedback::{adjust_dose, FeedbackOutcome};
pub use phases::Phase;
pub use trace::DecisionTrace;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{KairosError, Result};
use crate::inference::beta::BetaParams;
use crate::inference::drift::DriftDetector;
use crate::inference::ensemble::EnsembleArbitrator;
use crate::inference::exploration::{should_explore, ExplorationBudget};
use crate::state::{AppState, ItemPosterior, PendingSelection};
use crate::storage::StateStore;
use crate::types::{FeedbackDelta, Goal, Protocol};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike, Utc};
use phases::PhaseContext;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Source of the current time
pub trait Clock {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;

    /// Hour of day (0-23) used for the hourly sub-models
    fn hour(&self) -> u8;

    /// Calendar day used for streaks
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the local time zone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn hour(&self) -> u8 {
        Local::now().hour() as u8
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Settable clock in UTC; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    fn datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn hour(&self) -> u8 {
        self.datetime().hour() as u8
    }

    fn today(&self) -> NaiveDate {
        self.datetime().date_naive()
    }
}

/// A selected protocol with its dose and provenance
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub protocol: Protocol,
    pub dose_seconds: f64,
    pub trace: DecisionTrace,
}

/// Adaptive protocol recommender
pub struct DecisionEngine<C: Catalog, S: StateStore> {
    catalog: C,
    store: S,
    config: EngineConfig,
    drift: DriftDetector,
    ensemble: EnsembleArbitrator,
    clock: Box<dyn Clock>,
    rng: Box<dyn RngCore>,
}

impl<C: Catalog, S: StateStore> DecisionEngine<C, S> {
    /// Engine on the system clock with an entropy-seeded random source
    pub fn new(catalog: C, store: S, config: EngineConfig) -> Self {
        Self {
            drift: DriftDetector::new(&config.drift),
            ensemble: EnsembleArbitrator::new(&config.ensemble),
            catalog,
            store,
            config,
            clock: Box::new(SystemClock),
            rng: Box::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic random source
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(Box::new(StdRng::seed_from_u64(seed)))
    }

    pub fn with_rng(mut self, rng: Box<dyn RngCore>) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn default_prior(&self) -> BetaParams {
        BetaParams::new(self.config.prior.alpha, self.config.prior.beta)
    }

    /// Current state with configured meta parameters applied
    pub fn load_state(&self) -> Result<AppState> {
        let mut state = self.store.load_state()?;
        state.knowledge.apply_config(&self.config.transfer);
        let catalog = &self.catalog;
        state.fill_unset_doses(|id| catalog.by_id(id).map(Protocol::base_duration));
        Ok(state)
    }

    /// Pick the protocol and dose for `goal`.
    ///
    /// Returns `Ok(None)` when the catalog has no protocol for the goal.
    pub fn select_protocol(&mut self, goal: Goal) -> Result<Option<Decision>> {
        let candidates = phases::candidates_for(&self.catalog, goal);
        if candidates.is_empty() {
            info!(%goal, "No protocols available for goal");
            return Ok(None);
        }

        let mut state = self.load_state()?;
        state.knowledge.register_all(self.catalog.protocols());

        let now_ms = self.clock.now_ms();
        let hour = self.clock.hour();
        let mut trace = DecisionTrace::new(goal, now_ms, hour);

        let selection = {
            let mut ctx = PhaseContext {
                candidates: &candidates,
                state: &mut state,
                config: &self.config,
                drift: &self.drift,
                ensemble: &self.ensemble,
                now_ms,
                hour,
                rng: self.rng.as_mut(),
            };
            phases::run(&mut ctx, &mut trace)
        };

        let Some(selection) = selection else {
            return Ok(None);
        };
        let Some(protocol) = candidates
            .iter()
            .find(|p| p.id == selection.protocol_id)
            .cloned()
        else {
            return Err(KairosError::UnknownProtocol(selection.protocol_id));
        };

        if !state.posteriors.contains_key(&protocol.id) {
            let transferred = state.knowledge.transfer_prior(
                &protocol.id,
                &state.posteriors,
                &self.config.transfer,
                self.default_prior(),
            );
            state.posteriors.insert(
                protocol.id.clone(),
                ItemPosterior::with_prior(transferred.params, protocol.base_duration()),
            );
            if transferred.is_transferred() {
                trace.transfer = Some(transferred);
            }
        }

        self.attach_exploration_advice(&state, &candidates, &protocol, &mut trace);

        state.pending_selection = Some(PendingSelection {
            protocol_id: protocol.id.clone(),
            goal,
            dose_seconds: selection.dose_seconds,
            hour,
            selected_at_ms: now_ms,
        });
        self.store.save_state(&state)?;

        info!(
            %goal,
            protocol = %protocol.id,
            phase = %selection.phase,
            dose_seconds = selection.dose_seconds,
            "Protocol selected"
        );

        Ok(Some(Decision {
            protocol,
            dose_seconds: selection.dose_seconds,
            trace,
        }))
    }

    /// Advisory only: recorded in the trace, never changes the pick
    fn attach_exploration_advice(
        &self,
        state: &AppState,
        candidates: &[Protocol],
        selected: &Protocol,
        trace: &mut DecisionTrace,
    ) {
        let prior = self.default_prior();
        let best_mean = candidates
            .iter()
            .filter_map(|p| state.posterior(&p.id))
            .filter(|p| p.trials > 0)
            .map(|p| p.mean())
            .fold(None, |best: Option<f64>, m| Some(best.map_or(m, |b| b.max(m))))
            .unwrap_or_else(|| prior.mean());

        let (params, trials) = state
            .posterior(&selected.id)
            .map(|p| (p.params(), p.trials))
            .unwrap_or((prior, 0));

        let budget = ExplorationBudget::initialize(state.total_trials(), &self.config.exploration);
        let advice = should_explore(&selected.id, params, trials, best_mean, &budget, &self.config.exploration);

        debug!(
            protocol = %selected.id,
            explore = advice.explore,
            evpi = advice.evpi,
            reason = %advice.reason,
            "Exploration advice"
        );
        trace.exploration_budget = Some(budget);
        trace.exploration = Some(advice);
    }

    /// Record a rating, attributing it to the pending selection's goal when
    /// it was for this protocol, else to the protocol's first goal.
    pub fn record_feedback(
        &mut self,
        protocol_id: &str,
        delta: FeedbackDelta,
        duration_secs: f64,
    ) -> Result<FeedbackOutcome> {
        let state = self.load_state()?;
        let protocol = self.protocol(protocol_id)?;
        let goal = state
            .pending_selection
            .as_ref()
            .filter(|p| p.protocol_id == protocol_id)
            .map(|p| p.goal)
            .unwrap_or_else(|| protocol.primary_goal());
        self.apply(state, &protocol, goal, delta, duration_secs)
    }

    /// Record a rating for an explicit goal
    pub fn record_feedback_for_goal(
        &mut self,
        protocol_id: &str,
        goal: Goal,
        delta: FeedbackDelta,
        duration_secs: f64,
    ) -> Result<FeedbackOutcome> {
        let state = self.load_state()?;
        let protocol = self.protocol(protocol_id)?;
        self.apply(state, &protocol, goal, delta, duration_secs)
    }

    fn protocol(&self, protocol_id: &str) -> Result<Protocol> {
        self.catalog
            .by_id(protocol_id)
            .cloned()
            .ok_or_else(|| KairosError::UnknownProtocol(protocol_id.to_string()))
    }

    fn apply(
        &mut self,
        mut state: AppState,
        protocol: &Protocol,
        goal: Goal,
        delta: FeedbackDelta,
        duration_secs: f64,
    ) -> Result<FeedbackOutcome> {
        state.knowledge.register_all(self.catalog.protocols());

        if !state.posteriors.contains_key(&protocol.id) {
            let transferred = state.knowledge.transfer_prior(
                &protocol.id,
                &state.posteriors,
                &self.config.transfer,
                self.default_prior(),
            );
            state.posteriors.insert(
                protocol.id.clone(),
                ItemPosterior::with_prior(transferred.params, protocol.base_duration()),
            );
        }

        let time = feedback::FeedbackTime {
            now_ms: self.clock.now_ms(),
            hour: self.clock.hour(),
            today: self.clock.today(),
        };
        let outcome = feedback::apply_feedback(
            &mut state,
            protocol,
            goal,
            delta,
            duration_secs,
            time,
            &self.config,
            &self.drift,
        );
        self.store.save_state(&state)?;
        Ok(outcome)
    }

    pub fn insights(&self) -> Result<Insights> {
        let state = self.load_state()?;
        Ok(analytics::insights(&state, self.catalog.protocols()))
    }

    pub fn algorithm_metrics(&self) -> Result<AlgorithmMetrics> {
        let state = self.load_state()?;
        Ok(analytics::algorithm_metrics(
            &state,
            self.catalog.protocols(),
            &self.config,
        ))
    }

    pub fn top_recommendations(&self, goal: Goal, limit: usize) -> Result<Vec<Recommendation>> {
        let state = self.load_state()?;
        Ok(analytics::top_recommendations(
            &state,
            self.catalog.protocols(),
            goal,
            limit,
            &self.config,
        ))
    }

    /// Forget everything learned
    pub fn reset(&mut self) -> Result<()> {
        info!("Clearing all learning state");
        self.store.clear()
    }
}
