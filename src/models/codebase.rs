//! Codebase identity models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Host used when a request does not name one.
pub const DEFAULT_HOST: &str = "github.com";

/// Canonical repository identity, unique on `(host, owner, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codebase {
    pub id: Uuid,
    pub host: String,
    pub owner: String,
    pub name: String,
    pub default_branch: Option<String>,
}

impl Codebase {
    pub fn repo_url(&self) -> String {
        repo_url(&self.host, &self.owner, &self.name)
    }
}

/// A codebase whose latest completed analysis is older than the refresh cutoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueCodebase {
    pub codebase_id: Uuid,
    pub host: String,
    pub owner: String,
    pub name: String,
    pub last_commit_sha: String,
    pub last_completed_at: DateTime<Utc>,
    /// User who requested the most recent analysis, for private refreshes.
    pub requested_by: Option<String>,
}

impl DueCodebase {
    pub fn repo_url(&self) -> String {
        repo_url(&self.host, &self.owner, &self.name)
    }
}

/// `https://<host>/<owner>/<repo>`, host defaulting to github.com.
pub fn repo_url(host: &str, owner: &str, repo: &str) -> String {
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    format!("https://{}/{}/{}", host, owner, repo)
}
