// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod nlp;
pub mod ratelimit;
pub mod scheduler;
pub mod store;
pub mod validate;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::Settings;
pub use crate::error::PipelineError;
pub use crate::model::{ContentRecord, TopicSegment, TrendValidation, Watch};
