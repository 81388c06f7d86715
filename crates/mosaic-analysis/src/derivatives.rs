use mosaic_store::AnalysisLogRecord;
use serde::{Deserialize, Serialize};

use crate::model::{AnalysisResult, AugmentedAnalysis};
use crate::snapshot::parse_top_states;

pub const STORM_PROBABILITY_WEIGHT: f64 = 0.3;
pub const ATMOSPHERIC_CHAOS_WEIGHT: f64 = 0.3;
pub const VOLATILITY_WEIGHT: f64 = 0.2;
pub const MOMENTUM_WEIGHT: f64 = 0.2;

const CHAOS_VELOCITY_MOMENTUM_SCALE: f64 = 10.0;
const MOMENTUM_FACTOR_SCALE: f64 = 5.0;

/// Keys the service adds on top of the upstream payload.
const AUGMENTED_KEYS: [&str; 6] = [
    "final_risk_score",
    "chaos_velocity",
    "chaos_acceleration",
    "cyclone_momentum",
    "state_drift",
    "state_lock_in",
];

/// Finite-difference dynamics between the current snapshot and up to two
/// prior snapshots for the same city.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DerivativeMetrics {
    pub chaos_velocity: f64,
    pub chaos_acceleration: f64,
    pub cyclone_momentum: f64,
    pub state_drift: f64,
    pub state_lock_in: bool,
}

pub fn compute_derivatives(
    current: &AnalysisResult,
    prev1: Option<&AnalysisLogRecord>,
    prev2: Option<&AnalysisLogRecord>,
) -> DerivativeMetrics {
    let Some(prev1) = prev1 else {
        return DerivativeMetrics::default();
    };

    let chaos_velocity = current.atmospheric_chaos - prev1.atmospheric_chaos;

    let current_dominant = current.dominant_state();
    let now_dominant_prob = current_dominant.map_or(0.0, |state| state.probability);

    let prev_states = parse_top_states(&prev1.top_states_json);
    let prev_prob = current_dominant
        .and_then(|dominant| prev_states.iter().find(|state| state.state == dominant.state))
        .map_or(0.0, |state| state.probability);

    let state_drift = now_dominant_prob - prev_prob;

    let cyclone_momentum = (chaos_velocity * CHAOS_VELOCITY_MOMENTUM_SCALE)
        + (current.cyclone_index.unwrap_or(0.0) - prev1.cyclone_index.unwrap_or(0.0));

    let mut chaos_acceleration = 0.0;
    let mut state_lock_in = false;
    if let Some(prev2) = prev2 {
        let prev_velocity = prev1.atmospheric_chaos - prev2.atmospheric_chaos;
        chaos_acceleration = chaos_velocity - prev_velocity;

        // Compares against prev1's own dominant state, which may differ from
        // the state `prev_prob` was read for.
        let prev_dominant_prob = prev_states.first().map_or(0.0, |state| state.probability);
        state_lock_in = state_drift > 0.0 && prev_prob > prev_dominant_prob;
    }

    DerivativeMetrics {
        chaos_velocity,
        chaos_acceleration,
        cyclone_momentum,
        state_drift,
        state_lock_in,
    }
}

pub fn momentum_factor(cyclone_momentum: f64) -> f64 {
    (cyclone_momentum * MOMENTUM_FACTOR_SCALE).clamp(0.0, 1.0)
}

pub fn final_risk_score(
    storm_probability: f64,
    atmospheric_chaos: f64,
    volatility: f64,
    momentum_factor: f64,
) -> f64 {
    (STORM_PROBABILITY_WEIGHT * storm_probability)
        + (ATMOSPHERIC_CHAOS_WEIGHT * atmospheric_chaos)
        + (VOLATILITY_WEIGHT * volatility)
        + (MOMENTUM_WEIGHT * momentum_factor)
}

/// `recent` holds the city's prior snapshots, newest first; only the first
/// two are used.
pub fn augment(mut current: AnalysisResult, recent: &[AnalysisLogRecord]) -> AugmentedAnalysis {
    let derivatives = compute_derivatives(&current, recent.first(), recent.get(1));

    let score = final_risk_score(
        current.storm_probability,
        current.atmospheric_chaos,
        current.volatility.unwrap_or(0.0),
        momentum_factor(derivatives.cyclone_momentum),
    );

    for key in AUGMENTED_KEYS {
        if current.extra.remove(key).is_some() {
            tracing::debug!(key, "dropping upstream field shadowed by computed metric");
        }
    }

    AugmentedAnalysis {
        analysis: current,
        final_risk_score: score,
        derivatives,
    }
}
