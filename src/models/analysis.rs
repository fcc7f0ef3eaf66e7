//! Analysis request and record models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::inventory::Inventory;

/// Maximum GitHub owner (user/org) name length.
pub const MAX_OWNER_LENGTH: usize = 39;
/// Maximum GitHub repository name length.
pub const MAX_REPO_LENGTH: usize = 100;

/// Precondition failures for analysis requests and store parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("owner is required")]
    OwnerRequired,
    #[error("repo is required")]
    RepoRequired,
    #[error("owner/repo exceeds length limit")]
    LengthExceeded,
    #[error("invalid characters in owner/repo")]
    InvalidCharacters,
    #[error("invalid analysis ID format")]
    InvalidAnalysisId,
    #[error("commit SHA is required")]
    CommitShaRequired,
    #[error("analysis ID is required")]
    AnalysisIdRequired,
}

/// A request to analyze one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeRequest {
    pub analysis_id: Option<String>,
    pub owner: String,
    pub repo: String,
    pub user_id: Option<String>,
}

impl AnalyzeRequest {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.is_empty() {
            return Err(ValidationError::OwnerRequired);
        }
        if self.repo.is_empty() {
            return Err(ValidationError::RepoRequired);
        }
        if self.owner.len() > MAX_OWNER_LENGTH || self.repo.len() > MAX_REPO_LENGTH {
            return Err(ValidationError::LengthExceeded);
        }
        if !is_valid_github_name(&self.owner) || !is_valid_github_name(&self.repo) {
            return Err(ValidationError::InvalidCharacters);
        }
        if let Some(ref id) = self.analysis_id
            && Uuid::parse_str(id).is_err()
        {
            return Err(ValidationError::InvalidAnalysisId);
        }
        Ok(())
    }
}

/// Owner and repository names: `[A-Za-z0-9._-]`, no `.`/`..`, no `..` anywhere.
pub fn is_valid_github_name(s: &str) -> bool {
    if s.is_empty() || s.contains("..") || s == "." {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Analysis lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Running,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters for inserting a new `running` analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateAnalysisRecordParams {
    pub branch: String,
    pub commit_sha: String,
    pub owner: String,
    pub repo: String,
    /// User whose token was requested for this run, if any.
    pub requested_by: Option<String>,
}

impl CreateAnalysisRecordParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.is_empty() {
            return Err(ValidationError::OwnerRequired);
        }
        if self.repo.is_empty() {
            return Err(ValidationError::RepoRequired);
        }
        if self.commit_sha.is_empty() {
            return Err(ValidationError::CommitShaRequired);
        }
        Ok(())
    }
}

/// Parameters for persisting a scanned inventory and completing the analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveAnalysisInventoryParams {
    pub analysis_id: Uuid,
    pub inventory: Inventory,
}

impl SaveAnalysisInventoryParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.analysis_id.is_nil() {
            return Err(ValidationError::AnalysisIdRequired);
        }
        Ok(())
    }
}
