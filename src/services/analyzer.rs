//! Analysis pipeline: validate, resolve token, clone, record, scan, save.
//!
//! Once the analysis row exists, any failure is recorded on it. Recording
//! runs outside the task deadline, and a [`FailureRecorder`] that is dropped
//! while armed (the task future was abandoned) still marks the row failed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::TaskContext;
use crate::db::AnalysisRepository;
use crate::models::{
    AnalyzeRequest, CreateAnalysisRecordParams, DEFAULT_HOST, Inventory,
    SaveAnalysisInventoryParams, ValidationError, repo_url,
};
use crate::services::parser::Parser;
use crate::services::token_lookup::{PROVIDER_GITHUB, TokenLookup, TokenLookupError};
use crate::services::vcs::{Source, Vcs};

pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_CONCURRENT_CLONES: usize = 2;

/// Message stored when the pipeline is abandoned mid-flight.
pub const ABORTED_MESSAGE: &str = "analysis aborted before completion";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    TokenLookupFailed,
    CloneFailed,
    ScanFailed,
    SaveFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("invalid input: {0}")]
    InvalidInput(#[source] ValidationError),

    #[error("token lookup failed: {0}")]
    TokenLookupFailed(#[source] BoxError),

    #[error("clone failed: {0}")]
    CloneFailed(#[source] BoxError),

    #[error("scan failed: {0}")]
    ScanFailed(#[source] BoxError),

    #[error("save failed: {0}")]
    SaveFailed(#[source] BoxError),
}

impl AnalyzeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::TokenLookupFailed(_) => ErrorKind::TokenLookupFailed,
            Self::CloneFailed(_) => ErrorKind::CloneFailed,
            Self::ScanFailed(_) => ErrorKind::ScanFailed,
            Self::SaveFailed(_) => ErrorKind::SaveFailed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerOptions {
    pub analysis_timeout: Duration,
    pub max_concurrent_clones: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            max_concurrent_clones: DEFAULT_MAX_CONCURRENT_CLONES,
        }
    }
}

impl AnalyzerOptions {
    /// Zero values fall back to the defaults.
    fn normalized(self) -> Self {
        Self {
            analysis_timeout: if self.analysis_timeout.is_zero() {
                DEFAULT_ANALYSIS_TIMEOUT
            } else {
                self.analysis_timeout
            },
            max_concurrent_clones: if self.max_concurrent_clones == 0 {
                DEFAULT_MAX_CONCURRENT_CLONES
            } else {
                self.max_concurrent_clones
            },
        }
    }
}

pub struct Analyzer {
    repository: Arc<dyn AnalysisRepository>,
    vcs: Arc<dyn Vcs>,
    parser: Arc<dyn Parser>,
    token_lookup: Option<Arc<dyn TokenLookup>>,
    clone_permits: Semaphore,
    options: AnalyzerOptions,
}

impl Analyzer {
    /// Without a token lookup every clone is anonymous.
    pub fn new(
        repository: Arc<dyn AnalysisRepository>,
        vcs: Arc<dyn Vcs>,
        parser: Arc<dyn Parser>,
        token_lookup: Option<Arc<dyn TokenLookup>>,
        options: AnalyzerOptions,
    ) -> Self {
        let options = options.normalized();
        Self {
            repository,
            vcs,
            parser,
            token_lookup,
            clone_permits: Semaphore::new(options.max_concurrent_clones),
            options,
        }
    }

    pub fn options(&self) -> AnalyzerOptions {
        self.options
    }

    /// Run the whole pipeline for one request.
    pub async fn execute(&self, ctx: &TaskContext, req: &AnalyzeRequest) -> Result<(), AnalyzeError> {
        req.validate().map_err(AnalyzeError::InvalidInput)?;

        let ctx = ctx.with_timeout(self.options.analysis_timeout);
        let url = repo_url(DEFAULT_HOST, &req.owner, &req.repo);

        let token = self
            .lookup_token(&ctx, req.user_id.as_deref())
            .await
            .map_err(AnalyzeError::TokenLookupFailed)?;

        let mut source = self
            .clone_with_permit(&ctx, &url, token.as_ref())
            .await
            .map_err(AnalyzeError::CloneFailed)?;

        let result = self.record_and_scan(&ctx, req, &*source).await;

        if let Err(e) = source.close().await {
            error!(owner = %req.owner, repo = %req.repo, error = %e, "Failed to close source");
        }

        result
    }

    async fn lookup_token(
        &self,
        ctx: &TaskContext,
        user_id: Option<&str>,
    ) -> Result<Option<SecretString>, BoxError> {
        let (Some(user_id), Some(lookup)) = (user_id, self.token_lookup.as_ref()) else {
            return Ok(None);
        };

        match ctx.run(lookup.get_oauth_token(user_id, PROVIDER_GITHUB)).await? {
            Ok(token) if token.expose_secret().is_empty() => {
                warn!(user_id = %user_id, "Empty token returned, using public access");
                Ok(None)
            }
            Ok(token) => Ok(Some(token)),
            Err(TokenLookupError::NotFound) => {
                info!(user_id = %user_id, "No OAuth token found, using public access");
                Ok(None)
            }
            Err(e) => Err(Box::new(e)),
        }
    }

    async fn clone_with_permit(
        &self,
        ctx: &TaskContext,
        url: &str,
        token: Option<&SecretString>,
    ) -> Result<Box<dyn Source>, BoxError> {
        let _permit = ctx.run(self.clone_permits.acquire()).await??;
        debug!(url = %url, authenticated = token.is_some(), "Cloning repository");
        Ok(ctx.run(self.vcs.clone_repo(ctx, url, token)).await??)
    }

    async fn record_and_scan(
        &self,
        ctx: &TaskContext,
        req: &AnalyzeRequest,
        source: &dyn Source,
    ) -> Result<(), AnalyzeError> {
        let params = CreateAnalysisRecordParams {
            branch: source.branch().to_string(),
            commit_sha: source.commit_sha().to_string(),
            owner: req.owner.clone(),
            repo: req.repo.clone(),
            requested_by: req.user_id.clone(),
        };
        params
            .validate()
            .map_err(|e| AnalyzeError::SaveFailed(Box::new(e)))?;

        let analysis_id = stage(
            ctx,
            self.repository.create_analysis_record(&params),
            AnalyzeError::SaveFailed,
        )
        .await?;

        let recorder = FailureRecorder::arm(self.repository.clone(), analysis_id);
        let result = self.scan_and_save(ctx, req, source, analysis_id).await;
        recorder.finish(&result).await;
        result
    }

    async fn scan_and_save(
        &self,
        ctx: &TaskContext,
        req: &AnalyzeRequest,
        source: &dyn Source,
        analysis_id: Uuid,
    ) -> Result<(), AnalyzeError> {
        let inventory = stage(ctx, self.parser.scan(ctx, source), AnalyzeError::ScanFailed)
            .await?
            .unwrap_or_else(|| {
                warn!(
                    owner = %req.owner,
                    repo = %req.repo,
                    commit = %source.commit_sha(),
                    "Scan result has no inventory"
                );
                Inventory::empty()
            });

        let params = SaveAnalysisInventoryParams {
            analysis_id,
            inventory,
        };
        params
            .validate()
            .map_err(|e| AnalyzeError::SaveFailed(Box::new(e)))?;

        stage(
            ctx,
            self.repository.save_analysis_inventory(&params),
            AnalyzeError::SaveFailed,
        )
        .await
    }
}

/// Drive one stage under the context, attributing both the stage's own error
/// and an interruption to `wrap`.
async fn stage<T, E, F>(
    ctx: &TaskContext,
    fut: F,
    wrap: fn(BoxError) -> AnalyzeError,
) -> Result<T, AnalyzeError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    match ctx.run(fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(wrap(e.into())),
        Err(reason) => Err(wrap(Box::new(reason))),
    }
}

/// Marks an analysis failed unless the pipeline completes.
struct FailureRecorder {
    repository: Arc<dyn AnalysisRepository>,
    analysis_id: Uuid,
    armed: bool,
    message: String,
}

impl FailureRecorder {
    fn arm(repository: Arc<dyn AnalysisRepository>, analysis_id: Uuid) -> Self {
        Self {
            repository,
            analysis_id,
            armed: true,
            message: ABORTED_MESSAGE.to_string(),
        }
    }

    async fn finish(mut self, result: &Result<(), AnalyzeError>) {
        if let Err(err) = result {
            self.message = err.to_string();
            record_failure(self.repository.clone(), self.analysis_id, self.message.clone()).await;
        }
        self.armed = false;
    }
}

impl Drop for FailureRecorder {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(analysis_id = %self.analysis_id, "No runtime to record abandoned analysis");
            return;
        };
        handle.spawn(record_failure(
            self.repository.clone(),
            self.analysis_id,
            std::mem::take(&mut self.message),
        ));
    }
}

/// Failures here are logged and never replace the original error.
async fn record_failure(repository: Arc<dyn AnalysisRepository>, analysis_id: Uuid, message: String) {
    if let Err(e) = repository.record_failure(analysis_id, &message).await {
        error!(
            analysis_id = %analysis_id,
            error = %e,
            original_error = %message,
            "Failed to record analysis failure"
        );
    }
}
