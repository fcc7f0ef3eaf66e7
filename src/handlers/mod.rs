//! Queue task handlers.

pub mod analyze;

pub use analyze::{AnalyzeHandler, AnalyzePayload, TYPE_ANALYZE};
