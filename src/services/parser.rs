//! Test inventory extraction.
//!
//! The scanner is an external program: it receives the checkout root as its
//! last argument and prints the inventory as JSON (or `null`) on stdout.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::context::{Interrupted, TaskContext};
use crate::models::Inventory;
use crate::services::vcs::Source;

/// Longest stderr excerpt carried in an error.
const MAX_STDERR_EXCERPT: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scanner command is empty")]
    EmptyCommand,

    #[error("failed to run scanner {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scanner exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("invalid scanner output: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("{0}")]
    Other(String),
}

impl ScanError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

#[async_trait]
pub trait Parser: Send + Sync {
    /// `Ok(None)` means the scan succeeded but produced no document.
    async fn scan(
        &self,
        ctx: &TaskContext,
        source: &dyn Source,
    ) -> Result<Option<Inventory>, ScanError>;
}

/// Runs a scanner binary, e.g. `specvital-scan` or `specvital-scan --format json`.
#[derive(Debug, Clone)]
pub struct CommandParser {
    program: String,
    args: Vec<String>,
}

impl CommandParser {
    pub fn new(command_line: &str) -> Result<Self, ScanError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ScanError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Decode scanner stdout. Blank output and `null` both mean "no inventory".
pub fn parse_scanner_output(stdout: &[u8]) -> Result<Option<Inventory>, ScanError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(serde_json::from_slice::<Option<Inventory>>(stdout)?)
}

#[async_trait]
impl Parser for CommandParser {
    async fn scan(
        &self,
        ctx: &TaskContext,
        source: &dyn Source,
    ) -> Result<Option<Inventory>, ScanError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(source.root())
            .current_dir(source.root())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = ctx
            .run(cmd.output())
            .await?
            .map_err(|source| ScanError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .trim()
                .chars()
                .take(MAX_STDERR_EXCERPT)
                .collect();
            return Err(ScanError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let inventory = parse_scanner_output(&output.stdout)?;
        debug!(
            files = inventory.as_ref().map(|i| i.files.len()).unwrap_or(0),
            "Scanner finished"
        );
        Ok(inventory)
    }
}
