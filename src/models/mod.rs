//! Domain models for the collector.

pub mod analysis;
pub mod codebase;
pub mod inventory;

// Re-export commonly used types
pub use analysis::{
    AnalysisStatus, AnalyzeRequest, CreateAnalysisRecordParams, SaveAnalysisInventoryParams,
    ValidationError,
};
pub use codebase::{Codebase, DEFAULT_HOST, DueCodebase, repo_url};
pub use inventory::{Inventory, Location, Test, TestCaseStatus, TestFile, TestStatus, TestSuite};
