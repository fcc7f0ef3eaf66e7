//! Collaborators of the analysis pipeline and the scheduler.

pub mod analyzer;
pub mod crypto;
pub mod distributed_lock;
pub mod parser;
pub mod scheduler;
pub mod token_lookup;
pub mod vcs;

pub use analyzer::{AnalyzeError, Analyzer, AnalyzerOptions, ErrorKind};
pub use crypto::TokenCipher;
pub use distributed_lock::{LeaderLock, LockLease, RedisLock};
pub use parser::{CommandParser, Parser, ScanError};
pub use scheduler::{AutoRefreshScheduler, SchedulerSettings, TickOutcome, TickStats};
pub use token_lookup::{OAuthTokenStore, TokenLookup, TokenLookupError};
pub use vcs::{GitVcs, Source, Vcs, VcsError};
