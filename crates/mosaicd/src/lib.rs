pub mod cli;
pub mod logging;
pub mod routes;
pub mod service;

pub use routes::router;
pub use service::{AnalysisService, AnalyzeOutcome, AnalyzeRequest, ServiceError};
