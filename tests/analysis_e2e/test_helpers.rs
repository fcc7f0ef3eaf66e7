//! Shared in-memory collaborators for the E2E tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use collector_lib::context::TaskContext;
use collector_lib::db::inventory::truncate_error_message;
use collector_lib::db::{AnalysisRepository, InventorySink, NewCase, NewSuite, write_inventory};
use collector_lib::error::{AppError, AppResult};
use collector_lib::handlers::{AnalyzeHandler, AnalyzePayload};
use collector_lib::models::{
    AnalysisStatus, CreateAnalysisRecordParams, Inventory, Location, SaveAnalysisInventoryParams,
    Test, TestFile, TestStatus, TestSuite,
};
use collector_lib::services::parser::{Parser, ScanError};
use collector_lib::services::token_lookup::{TokenLookup, TokenLookupError};
use collector_lib::services::vcs::{Source, Vcs, VcsError, authenticated_url};
use collector_lib::services::{Analyzer, AnalyzerOptions};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

pub const COMMIT_SHA: &str = "7fd1a60b01f91b314f59955a4e4d4e80d8edf11d";

#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub id: Uuid,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub commit_sha: String,
    pub status: AnalysisStatus,
    pub error_message: Option<String>,
    pub total_suites: usize,
    pub total_tests: usize,
    pub requested_by: Option<String>,
}

#[derive(Default)]
struct StoreState {
    codebases: Vec<(String, String)>,
    analyses: Vec<StoredAnalysis>,
    suites: Vec<(Uuid, NewSuite)>,
    cases: Vec<NewCase>,
}

/// Analysis store with the same transactional shape as the database one:
/// inventory rows become visible only together with the `completed` status.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    pub fail_saves: AtomicBool,
}

#[derive(Default)]
struct StagingSink {
    suites: Vec<(Uuid, NewSuite)>,
    cases: Vec<NewCase>,
}

#[async_trait]
impl InventorySink for StagingSink {
    async fn insert_suite(&mut self, suite: NewSuite) -> AppResult<Uuid> {
        let id = Uuid::now_v7();
        self.suites.push((id, suite));
        Ok(id)
    }

    async fn insert_case(&mut self, case: NewCase) -> AppResult<()> {
        self.cases.push(case);
        Ok(())
    }
}

impl MemoryStore {
    pub fn analyses(&self) -> Vec<StoredAnalysis> {
        self.state.lock().unwrap().analyses.clone()
    }

    pub fn only_analysis(&self) -> StoredAnalysis {
        let analyses = self.analyses();
        assert_eq!(analyses.len(), 1, "expected exactly one analysis");
        analyses.into_iter().next().unwrap()
    }

    pub fn codebase_count(&self) -> usize {
        self.state.lock().unwrap().codebases.len()
    }

    pub fn suites(&self) -> Vec<(Uuid, NewSuite)> {
        self.state.lock().unwrap().suites.clone()
    }

    pub fn case_count(&self) -> usize {
        self.state.lock().unwrap().cases.len()
    }

    fn transition(
        &self,
        analysis_id: Uuid,
        apply: impl FnOnce(&mut StoredAnalysis),
    ) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let analysis = state
            .analyses
            .iter_mut()
            .find(|a| a.id == analysis_id)
            .ok_or_else(|| AppError::NotFound(format!("Analysis {}", analysis_id)))?;
        if analysis.status != AnalysisStatus::Running {
            return Err(AppError::Conflict(format!(
                "analysis {} is already {}",
                analysis_id, analysis.status
            )));
        }
        apply(analysis);
        Ok(())
    }
}

#[async_trait]
impl AnalysisRepository for MemoryStore {
    async fn create_analysis_record(&self, params: &CreateAnalysisRecordParams) -> AppResult<Uuid> {
        let mut state = self.state.lock().unwrap();
        let key = (params.owner.clone(), params.repo.clone());
        if !state.codebases.contains(&key) {
            state.codebases.push(key);
        }
        let id = Uuid::now_v7();
        state.analyses.push(StoredAnalysis {
            id,
            owner: params.owner.clone(),
            repo: params.repo.clone(),
            branch: params.branch.clone(),
            commit_sha: params.commit_sha.clone(),
            status: AnalysisStatus::Running,
            error_message: None,
            total_suites: 0,
            total_tests: 0,
            requested_by: params.requested_by.clone(),
        });
        Ok(id)
    }

    async fn save_analysis_inventory(&self, params: &SaveAnalysisInventoryParams) -> AppResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AppError::Database("connection reset by peer".to_string()));
        }

        let mut staging = StagingSink::default();
        let (suites, tests) = write_inventory(&mut staging, params.analysis_id, &params.inventory).await?;

        self.transition(params.analysis_id, |a| {
            a.status = AnalysisStatus::Completed;
            a.total_suites = suites;
            a.total_tests = tests;
        })?;

        let mut state = self.state.lock().unwrap();
        state.suites.extend(staging.suites);
        state.cases.extend(staging.cases);
        Ok(())
    }

    async fn record_failure(&self, analysis_id: Uuid, error_message: &str) -> AppResult<()> {
        let message = truncate_error_message(error_message);
        self.transition(analysis_id, |a| {
            a.status = AnalysisStatus::Failed;
            a.error_message = Some(message);
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneCall {
    pub url: String,
    /// The remote git would actually be given, credentials included.
    pub remote: String,
    pub token: Option<String>,
}

pub struct FakeSource {
    root: PathBuf,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Source for FakeSource {
    fn branch(&self) -> &str {
        "main"
    }

    fn commit_sha(&self) -> &str {
        COMMIT_SHA
    }

    fn root(&self) -> &Path {
        &self.root
    }

    async fn verify_commit_exists(&self, _: &TaskContext, sha: &str) -> Result<bool, VcsError> {
        Ok(sha == COMMIT_SHA)
    }

    async fn close(&mut self) -> Result<(), VcsError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Decrements on drop so cancelled clones are counted out too.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeVcs {
    pub calls: Mutex<Vec<CloneCall>>,
    pub fail_with: Option<String>,
    pub delay: Duration,
    pub closed: Arc<AtomicUsize>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl FakeVcs {
    pub fn failing(stderr: &str) -> Self {
        Self {
            fail_with: Some(stderr.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<CloneCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn clone_repo(
        &self,
        _: &TaskContext,
        url: &str,
        token: Option<&SecretString>,
    ) -> Result<Box<dyn Source>, VcsError> {
        self.calls.lock().unwrap().push(CloneCall {
            url: url.to_string(),
            remote: authenticated_url(url, token)?,
            token: token.map(|t| t.expose_secret().to_string()),
        });

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(stderr) = &self.fail_with {
            return Err(VcsError::Git {
                operation: "clone",
                target: url.to_string(),
                stderr: stderr.clone(),
            });
        }

        Ok(Box::new(FakeSource {
            root: std::env::temp_dir(),
            closed: self.closed.clone(),
        }))
    }

    async fn get_head_commit(
        &self,
        _: &TaskContext,
        _: &str,
        _: Option<&SecretString>,
    ) -> Result<String, VcsError> {
        Ok(COMMIT_SHA.to_string())
    }
}

pub enum FakeParser {
    Returns(Option<Inventory>),
    Fails(&'static str),
    Hangs,
}

#[async_trait]
impl Parser for FakeParser {
    async fn scan(&self, _: &TaskContext, _: &dyn Source) -> Result<Option<Inventory>, ScanError> {
        match self {
            FakeParser::Returns(inventory) => Ok(inventory.clone()),
            FakeParser::Fails(message) => Err(ScanError::other(*message)),
            FakeParser::Hangs => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }
}

/// Token store keyed by user id; provider is fixed to github.
#[derive(Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
    pub lookups: AtomicUsize,
}

impl StaticTokens {
    pub fn with(user_id: &str, token: &str) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(user_id.to_string(), token.to_string());
        Self {
            tokens,
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TokenLookup for StaticTokens {
    async fn get_oauth_token(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<SecretString, TokenLookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        assert_eq!(provider, "github");
        self.tokens
            .get(user_id)
            .map(|t| SecretString::from(t.clone()))
            .ok_or(TokenLookupError::NotFound)
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub vcs: Arc<FakeVcs>,
    pub tokens: Option<Arc<StaticTokens>>,
    pub analyzer: Arc<Analyzer>,
    pub handler: AnalyzeHandler,
}

impl Harness {
    pub fn new(vcs: FakeVcs, parser: FakeParser) -> Self {
        Self::build(vcs, parser, None, AnalyzerOptions::default())
    }

    pub fn build(
        vcs: FakeVcs,
        parser: FakeParser,
        tokens: Option<StaticTokens>,
        options: AnalyzerOptions,
    ) -> Self {
        let store = Arc::new(MemoryStore::default());
        let vcs = Arc::new(vcs);
        let tokens = tokens.map(Arc::new);
        let analyzer = Arc::new(Analyzer::new(
            store.clone(),
            vcs.clone(),
            Arc::new(parser),
            tokens.clone().map(|t| t as Arc<dyn TokenLookup>),
            options,
        ));
        Self {
            store,
            vcs,
            tokens,
            handler: AnalyzeHandler::new(analyzer.clone()),
            analyzer,
        }
    }
}

pub fn payload(owner: &str, repo: &str, user_id: Option<&str>) -> Vec<u8> {
    serde_json::to_vec(&AnalyzePayload {
        owner: owner.to_string(),
        repo: repo.to_string(),
        user_id: user_id.map(str::to_string),
    })
    .unwrap()
}

fn test(name: &str, line: i32, status: TestStatus) -> Test {
    Test {
        name: name.to_string(),
        location: Location::at(line),
        status,
    }
}

/// Two files: nested suites in one, a file-level test in the other.
pub fn sample_inventory() -> Inventory {
    Inventory {
        files: vec![
            TestFile {
                path: "src/math.test.ts".to_string(),
                framework: "jest".to_string(),
                suites: vec![TestSuite {
                    name: "math".to_string(),
                    location: Location::at(1),
                    suites: vec![TestSuite {
                        name: "add".to_string(),
                        location: Location::at(3),
                        suites: vec![],
                        tests: vec![
                            test("adds integers", 4, TestStatus::Active),
                            test("adds floats", 8, TestStatus::Skipped),
                        ],
                    }],
                    tests: vec![test("exports functions", 2, TestStatus::Todo)],
                }],
                tests: vec![],
            },
            TestFile {
                path: "tests/smoke_test.go".to_string(),
                framework: "go-testing".to_string(),
                suites: vec![],
                tests: vec![test("TestSmoke", 5, TestStatus::Active)],
            },
        ],
    }
}
