mod derivatives;
mod model;
mod snapshot;

pub use derivatives::{
    ATMOSPHERIC_CHAOS_WEIGHT, DerivativeMetrics, MOMENTUM_WEIGHT, STORM_PROBABILITY_WEIGHT,
    VOLATILITY_WEIGHT, augment, compute_derivatives, final_risk_score, momentum_factor,
};
pub use model::{
    AnalysisResult, AugmentedAnalysis, FallbackAnalysis, Location, OFFLINE_SUMMARY, TopState,
    WeatherObservation,
};
pub use snapshot::{
    CachedAnalysis, HistoryEntry, UNKNOWN_STATE, batch_log_record, live_log_record,
    parse_top_states,
};
