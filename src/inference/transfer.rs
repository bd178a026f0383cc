//! Transfer learning across similar protocols.
//!
//! Each protocol gets a small rule-derived feature vector and a unit-length
//! embedding. A protocol with no evidence of its own can borrow a prior from
//! its nearest neighbours that do have evidence, weighted by similarity.
//! The knowledge base is plain data persisted inside the app state; nothing
//! here is process-global.

use crate::config::TransferConfig;
use crate::inference::beta::BetaParams;
use crate::state::ItemPosterior;
use crate::types::{Goal, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Dimensions of the feature embedding.
pub const EMBEDDING_DIM: usize = 5;

const COSINE_WEIGHT: f64 = 0.6;
const FEATURE_WEIGHT: f64 = 0.4;

/// Rule-derived attributes of a protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolFeatures {
    /// Relative breathing pace on a 1-10 scale.
    pub cadence: f64,
    /// 1-5
    pub complexity: f64,
    /// 1-5
    pub physical_load: f64,
    /// 1-5
    pub cognitive_load: f64,
    /// Base duration in seconds.
    pub duration: f64,
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub goal_affinity: BTreeMap<Goal, f64>,
    pub embedding: Vec<f64>,
}

impl ProtocolFeatures {
    /// Features scaled to roughly [0, 1] per component.
    fn scaled(&self) -> [f64; EMBEDDING_DIM] {
        [
            self.cadence / 10.0,
            self.complexity / 5.0,
            self.physical_load / 5.0,
            self.cognitive_load / 5.0,
            self.duration / 60.0,
        ]
    }
}

/// Meta-learning parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaParameters {
    pub learning_rate: f64,
    pub similarity_threshold: f64,
    pub transfer_strength: f64,
}

impl Default for MetaParameters {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for MetaParameters {
    fn from(config: &TransferConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            similarity_threshold: config.similarity_threshold,
            transfer_strength: config.transfer_strength,
        }
    }
}

/// One completed learning episode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningEpisode {
    pub protocol_id: String,
    pub goal: Goal,
    pub reward: f64,
    pub timestamp_ms: i64,
}

/// Persisted transfer-learning knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferKnowledge {
    pub item_features: BTreeMap<String, ProtocolFeatures>,
    /// Symmetric: `M[a][b] == M[b][a]` for every stored pair.
    pub similarity_matrix: BTreeMap<String, BTreeMap<String, f64>>,
    pub meta: MetaParameters,
    pub performance_history: VecDeque<LearningEpisode>,
    pub history_capacity: usize,
}

impl Default for TransferKnowledge {
    fn default() -> Self {
        Self {
            item_features: BTreeMap::new(),
            similarity_matrix: BTreeMap::new(),
            meta: MetaParameters::default(),
            performance_history: VecDeque::new(),
            history_capacity: TransferConfig::default().history_capacity,
        }
    }
}

/// Prior produced by [`TransferKnowledge::transfer_prior`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransferPrior {
    pub params: BetaParams,
    /// Neighbours used, with their similarity.
    pub neighbors: Vec<(String, f64)>,
}

impl TransferPrior {
    pub fn is_transferred(&self) -> bool {
        !self.neighbors.is_empty()
    }
}

/// (cadence, complexity, physical, cognitive) for known protocol families.
fn family_profile(id: &str) -> Option<(f64, f64, f64, f64)> {
    let id = id.to_lowercase();
    let rules: [(&[&str], (f64, f64, f64, f64)); 8] = [
        (&["box"], (3.0, 2.0, 2.0, 3.0)),
        (&["4-7-8", "478"], (2.0, 3.0, 2.0, 3.0)),
        (&["coherent", "resonance"], (4.0, 1.0, 1.0, 2.0)),
        (&["sigh"], (3.0, 1.0, 2.0, 1.0)),
        (&["fire", "kapalabhati"], (10.0, 3.0, 5.0, 2.0)),
        (&["wim-hof", "power"], (8.0, 4.0, 5.0, 2.0)),
        (&["alternate-nostril", "nadi"], (4.0, 4.0, 2.0, 4.0)),
        (&["humming", "bee", "bhramari"], (3.0, 2.0, 1.0, 2.0)),
    ];

    rules
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| id.contains(k)))
        .map(|(_, profile)| *profile)
}

fn goal_profile(goals: &[Goal]) -> (f64, f64, f64, f64) {
    match goals.first() {
        Some(Goal::Energy) => (8.0, 2.0, 4.0, 2.0),
        Some(Goal::Focus) => (5.0, 3.0, 2.0, 3.0),
        Some(Goal::Calm) | None => (3.0, 2.0, 1.0, 2.0),
    }
}

fn normalize(vector: &mut [f64]) {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > f64::EPSILON && norm.is_finite() {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Derive features for a protocol from its id and metadata.
pub fn extract_features(protocol_id: &str, base_duration_secs: u32, goals: &[Goal]) -> ProtocolFeatures {
    let (cadence, complexity, physical_load, cognitive_load) =
        family_profile(protocol_id).unwrap_or_else(|| goal_profile(goals));
    let duration = f64::from(base_duration_secs);

    let mut features = ProtocolFeatures {
        cadence,
        complexity,
        physical_load,
        cognitive_load,
        duration,
        goals: goals.to_vec(),
        goal_affinity: goals.iter().map(|g| (*g, 0.5)).collect(),
        embedding: Vec::new(),
    };
    let mut embedding = features.scaled().to_vec();
    normalize(&mut embedding);
    features.embedding = embedding;
    features
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na <= f64::EPSILON || nb <= f64::EPSILON {
        return 0.0;
    }
    dot / (na * nb)
}

/// `0.6 * cosine(embeddings) + 0.4 * (1 - L1(features) / 5)`, in [0, 1].
pub fn similarity(a: &ProtocolFeatures, b: &ProtocolFeatures) -> f64 {
    let cos = cosine(&a.embedding, &b.embedding);
    let distance: f64 = a
        .scaled()
        .iter()
        .zip(b.scaled().iter())
        .map(|(x, y)| (x - y).abs().min(1.0))
        .sum();
    let score = COSINE_WEIGHT * cos + FEATURE_WEIGHT * (1.0 - distance / EMBEDDING_DIM as f64);
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl TransferKnowledge {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            meta: MetaParameters::from(config),
            history_capacity: config.history_capacity,
            ..Self::default()
        }
    }

    /// Adopt the configured meta parameters.
    pub fn apply_config(&mut self, config: &TransferConfig) {
        self.meta = MetaParameters::from(config);
        self.history_capacity = config.history_capacity;
        self.trim_history();
    }

    pub fn is_registered(&self, protocol_id: &str) -> bool {
        self.item_features.contains_key(protocol_id)
    }

    /// Extract features for a protocol and fill its similarity row.
    ///
    /// Returns false when the protocol was already known.
    pub fn register(&mut self, protocol: &Protocol) -> bool {
        if self.is_registered(&protocol.id) {
            return false;
        }

        let features = extract_features(&protocol.id, protocol.base_duration_secs, &protocol.goals);
        self.item_features.insert(protocol.id.clone(), features);
        self.refresh_similarities(&protocol.id);

        debug!(protocol = %protocol.id, "Registered transfer features");
        true
    }

    pub fn register_all<'a, I>(&mut self, protocols: I) -> usize
    where
        I: IntoIterator<Item = &'a Protocol>,
    {
        protocols.into_iter().filter(|p| self.register(p)).count()
    }

    pub fn similarity_between(&self, a: &str, b: &str) -> Option<f64> {
        self.similarity_matrix.get(a).and_then(|row| row.get(b)).copied()
    }

    fn set_similarity(&mut self, a: &str, b: &str, value: f64) {
        self.similarity_matrix
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string(), value);
        self.similarity_matrix
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string(), value);
    }

    fn refresh_similarities(&mut self, protocol_id: &str) {
        let Some(features) = self.item_features.get(protocol_id).cloned() else {
            return;
        };

        let scores: Vec<(String, f64)> = self
            .item_features
            .iter()
            .filter(|(id, _)| id.as_str() != protocol_id)
            .map(|(id, other)| (id.clone(), similarity(&features, other)))
            .collect();

        self.set_similarity(protocol_id, protocol_id, 1.0);
        for (other, score) in scores {
            self.set_similarity(protocol_id, &other, score);
        }
    }

    /// Prior for `protocol_id` borrowed from similar protocols with evidence.
    pub fn transfer_prior(
        &self,
        protocol_id: &str,
        posteriors: &BTreeMap<String, ItemPosterior>,
        config: &TransferConfig,
        default_prior: BetaParams,
    ) -> TransferPrior {
        let mut neighbors: Vec<(String, f64)> = self
            .similarity_matrix
            .get(protocol_id)
            .map(|row| {
                row.iter()
                    .filter(|(id, sim)| {
                        id.as_str() != protocol_id
                            && **sim >= self.meta.similarity_threshold
                            && posteriors.get(id.as_str()).is_some_and(|p| p.trials > 0)
                    })
                    .map(|(id, sim)| (id.clone(), *sim))
                    .collect()
            })
            .unwrap_or_default();

        neighbors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        neighbors.truncate(config.max_neighbors);

        let mut weight_total = 0.0;
        let mut alpha = 0.0;
        let mut beta = 0.0;
        for (id, sim) in &neighbors {
            if let Some(posterior) = posteriors.get(id) {
                let weight = sim * self.meta.transfer_strength;
                weight_total += weight;
                alpha += weight * posterior.alpha;
                beta += weight * posterior.beta;
            }
        }

        if neighbors.is_empty() || weight_total <= 0.0 {
            return TransferPrior {
                params: default_prior,
                neighbors: Vec::new(),
            };
        }

        let share = config.transferred_share;
        let params = BetaParams::new(
            share * (alpha / weight_total) + (1.0 - share) * default_prior.alpha,
            share * (beta / weight_total) + (1.0 - share) * default_prior.beta,
        );

        debug!(
            protocol = %protocol_id,
            neighbors = neighbors.len(),
            alpha = params.alpha,
            beta = params.beta,
            "Transferred prior"
        );

        TransferPrior { params, neighbors }
    }

    /// Nudge the protocol's goal affinity toward the observed reward and log
    /// the episode.
    pub fn record_performance(&mut self, protocol_id: &str, goal: Goal, reward: f64, timestamp_ms: i64) {
        let learning_rate = self.meta.learning_rate;
        if let Some(features) = self.item_features.get_mut(protocol_id) {
            let affinity = features.goal_affinity.entry(goal).or_insert(0.5);
            *affinity += learning_rate * (reward - *affinity);
        }

        self.performance_history.push_back(LearningEpisode {
            protocol_id: protocol_id.to_string(),
            goal,
            reward,
            timestamp_ms,
        });
        self.trim_history();
    }

    /// Move the protocol's embedding toward the centroid of its goal when the
    /// reward is good and away from it when poor, then renormalise.
    pub fn update_embedding(&mut self, protocol_id: &str, goal: Goal, reward: f64) {
        let members: Vec<&Vec<f64>> = self
            .item_features
            .iter()
            .filter(|(id, f)| id.as_str() != protocol_id && f.goals.contains(&goal))
            .map(|(_, f)| &f.embedding)
            .collect();
        if members.is_empty() {
            return;
        }

        let mut centroid = vec![0.0; EMBEDDING_DIM];
        for embedding in &members {
            for (c, v) in centroid.iter_mut().zip(embedding.iter()) {
                *c += v / members.len() as f64;
            }
        }

        let step = self.meta.learning_rate * (reward - 0.5) * 2.0;
        let Some(features) = self.item_features.get_mut(protocol_id) else {
            return;
        };
        for (e, c) in features.embedding.iter_mut().zip(centroid.iter()) {
            *e += step * (c - *e);
        }
        normalize(&mut features.embedding);

        self.refresh_similarities(protocol_id);
    }

    fn trim_history(&mut self) {
        while self.performance_history.len() > self.history_capacity {
            self.performance_history.pop_front();
        }
    }

    /// Restore invariants on a loaded knowledge base: finite similarities
    /// in [0, 1], a symmetric matrix over known protocols, and a bounded
    /// history.
    pub fn repair(&mut self) {
        let known: Vec<String> = self.item_features.keys().cloned().collect();
        self.similarity_matrix.retain(|id, _| known.contains(id));
        for row in self.similarity_matrix.values_mut() {
            row.retain(|id, v| known.contains(id) && v.is_finite());
        }

        let mut pairs = Vec::new();
        for (a, row) in &self.similarity_matrix {
            for (b, value) in row {
                let mirrored = self.similarity_between(b, a).unwrap_or(*value);
                pairs.push((a.clone(), b.clone(), value.min(mirrored).clamp(0.0, 1.0)));
            }
        }
        for (a, b, value) in pairs {
            self.set_similarity(&a, &b, value);
        }

        if self.history_capacity == 0 {
            self.history_capacity = TransferConfig::default().history_capacity;
        }
        self.trim_history();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn protocol(id: &str, goals: &[Goal], secs: u32) -> Protocol {
        Protocol {
            id: id.to_string(),
            name: id.to_string(),
            goals: goals.to_vec(),
            base_duration_secs: secs,
            cues: Vec::new(),
        }
    }

    fn catalog() -> Vec<Protocol> {
        vec![
            protocol("box-breathing", &[Goal::Focus, Goal::Calm], 120),
            protocol("4-7-8", &[Goal::Calm], 120),
            protocol("coherent-breathing", &[Goal::Calm, Goal::Focus], 180),
            protocol("breath-of-fire", &[Goal::Energy], 60),
        ]
    }

    fn posterior(trials: u32, alpha: f64, beta: f64) -> ItemPosterior {
        let mut p = ItemPosterior::with_prior(BetaParams::new(alpha, beta), 120.0);
        p.trials = trials;
        p
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let features = extract_features("box-breathing", 120, &[Goal::Focus]);
        let norm: f64 = features.embedding.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        assert_eq!(features.embedding.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_duration_component_is_minutes() {
        let short = extract_features("box-breathing", 45, &[Goal::Calm]);
        let long = extract_features("box-breathing", 180, &[Goal::Calm]);
        assert!((short.scaled()[4] - 0.75).abs() < 1e-12);
        assert!((long.scaled()[4] - 3.0).abs() < 1e-12);

        // same family, different dose: clearly less similar than identical
        let sim = similarity(&short, &long);
        assert!(sim < 0.9, "45s vs 180s similarity {}", sim);
        assert!((similarity(&short, &short) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_ids_fall_back_to_goal_profile() {
        let calm = extract_features("mystery", 120, &[Goal::Calm]);
        let energy = extract_features("mystery", 120, &[Goal::Energy]);
        assert!(energy.cadence > calm.cadence);
    }

    #[test]
    fn test_similar_protocols_score_higher() {
        let box_ = extract_features("box-breathing", 120, &[Goal::Focus]);
        let four = extract_features("4-7-8", 120, &[Goal::Calm]);
        let fire = extract_features("breath-of-fire", 60, &[Goal::Energy]);

        assert!((similarity(&box_, &box_) - 1.0).abs() < 1e-9);
        assert!(similarity(&box_, &four) > similarity(&box_, &fire));
    }

    #[test]
    fn test_register_fills_symmetric_rows() {
        let mut knowledge = TransferKnowledge::default();
        assert_eq!(knowledge.register_all(catalog().iter()), 4);
        assert_eq!(knowledge.register_all(catalog().iter()), 0);

        for a in knowledge.item_features.keys() {
            for b in knowledge.item_features.keys() {
                assert_eq!(
                    knowledge.similarity_between(a, b),
                    knowledge.similarity_between(b, a)
                );
            }
        }
    }

    #[test]
    fn test_transfer_prior_defaults_without_neighbors() {
        let mut knowledge = TransferKnowledge::default();
        knowledge.register_all(catalog().iter());
        let config = TransferConfig::default();
        let default = BetaParams::new(1.5, 1.0);

        let prior = knowledge.transfer_prior("box-breathing", &BTreeMap::new(), &config, default);
        assert!(!prior.is_transferred());
        assert_eq!(prior.params, default);
    }

    #[test]
    fn test_transfer_prior_blends_neighbors() {
        let mut knowledge = TransferKnowledge::default();
        knowledge.register_all(catalog().iter());
        let config = TransferConfig::default();
        let default = BetaParams::new(1.5, 1.0);

        let sim = knowledge.similarity_between("box-breathing", "4-7-8").unwrap();
        assert!(sim >= 0.6);

        let mut posteriors = BTreeMap::new();
        posteriors.insert("4-7-8".to_string(), posterior(10, 9.0, 3.0));
        // Untried neighbours do not contribute.
        posteriors.insert("coherent-breathing".to_string(), posterior(0, 1.5, 1.0));

        let prior = knowledge.transfer_prior("box-breathing", &posteriors, &config, default);
        assert_eq!(prior.neighbors.len(), 1);
        assert!((prior.params.alpha - (0.6 * 9.0 + 0.4 * 1.5)).abs() < 1e-9);
        assert!((prior.params.beta - (0.6 * 3.0 + 0.4 * 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut knowledge = TransferKnowledge::default();
        knowledge.register_all(catalog().iter());
        for i in 0..150 {
            knowledge.record_performance("4-7-8", Goal::Calm, 1.0, i);
        }
        assert_eq!(knowledge.performance_history.len(), 100);
        assert_eq!(knowledge.performance_history.front().unwrap().timestamp_ms, 50);

        let affinity = knowledge.item_features["4-7-8"].goal_affinity[&Goal::Calm];
        assert!(affinity > 0.99);
    }

    #[test]
    fn test_update_embedding_renormalises_and_stays_symmetric() {
        let mut knowledge = TransferKnowledge::default();
        knowledge.register_all(catalog().iter());
        let before = knowledge.item_features["box-breathing"].embedding.clone();

        knowledge.update_embedding("box-breathing", Goal::Calm, 1.0);

        let after = &knowledge.item_features["box-breathing"].embedding;
        assert_ne!(&before, after);
        let norm: f64 = after.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        assert_eq!(
            knowledge.similarity_between("box-breathing", "4-7-8"),
            knowledge.similarity_between("4-7-8", "box-breathing")
        );
    }

    #[test]
    fn test_repair_restores_symmetry() {
        let mut knowledge = TransferKnowledge::default();
        knowledge.register_all(catalog().iter());
        knowledge
            .similarity_matrix
            .get_mut("4-7-8")
            .unwrap()
            .insert("box-breathing".to_string(), f64::NAN);
        knowledge
            .similarity_matrix
            .entry("ghost".to_string())
            .or_default()
            .insert("4-7-8".to_string(), 0.9);

        knowledge.repair();

        assert!(!knowledge.similarity_matrix.contains_key("ghost"));
        let ab = knowledge.similarity_between("box-breathing", "4-7-8");
        assert!(ab.is_some());
        assert_eq!(ab, knowledge.similarity_between("4-7-8", "box-breathing"));
    }

    proptest! {
        #[test]
        fn prop_similarity_symmetric_and_bounded(
            a in "[a-z-]{1,12}",
            b in "[a-z-]{1,12}",
            da in 30u32..300,
            db in 30u32..300,
        ) {
            let fa = extract_features(&a, da, &[Goal::Calm]);
            let fb = extract_features(&b, db, &[Goal::Energy]);
            let ab = similarity(&fa, &fb);
            prop_assert_eq!(ab, similarity(&fb, &fa));
            prop_assert!((0.0..=1.0).contains(&ab));
        }
    }
}
