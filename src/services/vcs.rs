//! Git access: shallow clones, remote HEAD lookup and commit existence checks.
//!
//! Every git invocation runs with `kill_on_drop`, so an interrupted context
//! terminates the child process. Tokens never appear in error text.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::context::{Interrupted, TaskContext};

/// Username GitHub expects for token-authenticated HTTPS.
pub const TOKEN_USERNAME: &str = "x-access-token";

const REDACTED: &str = "****";

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("URL is required")]
    UrlRequired,

    #[error("SHA is required")]
    ShaRequired,

    #[error("invalid repository URL: {0}")]
    InvalidUrl(String),

    #[error("{operation} {target}: {stderr}")]
    Git {
        operation: &'static str,
        target: String,
        stderr: String,
    },

    #[error("{operation} {target}: empty response")]
    EmptyResponse {
        operation: &'static str,
        target: String,
    },

    #[error("{operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation}: {reason}")]
    Interrupted {
        operation: &'static str,
        reason: Interrupted,
    },
}

/// A live checkout. Exclusively owns its working directory.
#[async_trait]
pub trait Source: Send + Sync {
    fn branch(&self) -> &str;
    fn commit_sha(&self) -> &str;
    fn root(&self) -> &Path;

    /// `Ok(false)` only when the remote reports the commit is unknown.
    async fn verify_commit_exists(&self, ctx: &TaskContext, sha: &str) -> Result<bool, VcsError>;

    /// Delete the working directory. Safe to call more than once.
    async fn close(&mut self) -> Result<(), VcsError>;
}

#[async_trait]
pub trait Vcs: Send + Sync {
    async fn clone_repo(
        &self,
        ctx: &TaskContext,
        url: &str,
        token: Option<&SecretString>,
    ) -> Result<Box<dyn Source>, VcsError>;

    /// HEAD of the default branch, without cloning.
    async fn get_head_commit(
        &self,
        ctx: &TaskContext,
        url: &str,
        token: Option<&SecretString>,
    ) -> Result<String, VcsError>;
}

/// Rewrite `url` to carry `x-access-token:<token>` credentials.
pub fn authenticated_url(url: &str, token: Option<&SecretString>) -> Result<String, VcsError> {
    let Some(token) = token else {
        return Ok(url.to_string());
    };

    let mut parsed =
        url::Url::parse(url).map_err(|e| VcsError::InvalidUrl(format!("{}: {}", url, e)))?;
    if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
        return Err(VcsError::InvalidUrl(format!("{}: no host", url)));
    }
    let credentials_rejected = |_| VcsError::InvalidUrl(format!("{}: cannot carry credentials", url));
    parsed
        .set_username(TOKEN_USERNAME)
        .map_err(credentials_rejected)?;
    parsed
        .set_password(Some(token.expose_secret()))
        .map_err(credentials_rejected)?;

    Ok(parsed.into())
}

/// Replace every occurrence of the token (raw or percent-encoded) with `****`.
pub fn redact(text: &str, token: Option<&SecretString>) -> String {
    let Some(token) = token.map(|t| t.expose_secret()).filter(|t| !t.is_empty()) else {
        return text.to_string();
    };
    let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    text.replace(token, REDACTED).replace(&encoded, REDACTED)
}

/// First field of `git ls-remote <url> HEAD` output (`<sha>\tHEAD`).
pub fn parse_ls_remote(output: &str) -> Option<&str> {
    output.split_whitespace().next()
}

/// Shells out to the `git` binary.
#[derive(Debug, Clone)]
pub struct GitVcs {
    git_binary: PathBuf,
}

impl Default for GitVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl GitVcs {
    pub fn new() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
        }
    }

    pub fn with_binary(git_binary: impl Into<PathBuf>) -> Self {
        Self {
            git_binary: git_binary.into(),
        }
    }
}

async fn run_git(
    ctx: &TaskContext,
    git_binary: &Path,
    cwd: Option<&Path>,
    args: &[&str],
    operation: &'static str,
) -> Result<Output, VcsError> {
    let mut cmd = Command::new(git_binary);
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    ctx.run(cmd.output())
        .await
        .map_err(|reason| VcsError::Interrupted { operation, reason })?
        .map_err(|source| VcsError::Io { operation, source })
}

fn stderr_text(output: &Output, token: Option<&SecretString>) -> String {
    redact(String::from_utf8_lossy(&output.stderr).trim(), token)
}

async fn rev_parse(
    ctx: &TaskContext,
    git_binary: &Path,
    root: &Path,
    rev: &[&str],
) -> Result<String, VcsError> {
    let mut args = vec!["rev-parse"];
    args.extend_from_slice(rev);
    let output = run_git(ctx, git_binary, Some(root), &args, "git rev-parse").await?;
    if !output.status.success() {
        return Err(VcsError::Git {
            operation: "git rev-parse",
            target: rev.join(" "),
            stderr: stderr_text(&output, None),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Point `origin` at the credential-free URL so the token never lands in `.git/config`.
async fn reset_origin(
    ctx: &TaskContext,
    git_binary: &Path,
    root: &Path,
    url: &str,
    token: Option<&SecretString>,
) -> Result<(), VcsError> {
    let output = run_git(
        ctx,
        git_binary,
        Some(root),
        &["remote", "set-url", "origin", url],
        "reset remote url",
    )
    .await?;
    if !output.status.success() {
        return Err(VcsError::Git {
            operation: "reset remote url",
            target: format!("{:?}", url),
            stderr: stderr_text(&output, token),
        });
    }
    Ok(())
}

#[async_trait]
impl Vcs for GitVcs {
    async fn clone_repo(
        &self,
        ctx: &TaskContext,
        url: &str,
        token: Option<&SecretString>,
    ) -> Result<Box<dyn Source>, VcsError> {
        if url.is_empty() {
            return Err(VcsError::UrlRequired);
        }
        let remote = authenticated_url(url, token)?;

        let dir = tempfile::Builder::new()
            .prefix("collector-clone-")
            .tempdir()
            .map_err(|source| VcsError::Io {
                operation: "create clone directory",
                source,
            })?;

        let output = run_git(
            ctx,
            &self.git_binary,
            Some(dir.path()),
            &[
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "--quiet",
                remote.as_str(),
                ".",
            ],
            "clone repository",
        )
        .await?;
        if !output.status.success() {
            return Err(VcsError::Git {
                operation: "clone repository",
                target: format!("{:?}", url),
                stderr: stderr_text(&output, token),
            });
        }
        reset_origin(ctx, &self.git_binary, dir.path(), url, token).await?;

        let branch = rev_parse(ctx, &self.git_binary, dir.path(), &["--abbrev-ref", "HEAD"]).await?;
        let commit_sha = rev_parse(ctx, &self.git_binary, dir.path(), &["HEAD"]).await?;

        debug!(url = %url, branch = %branch, commit_sha = %commit_sha, "Repository cloned");

        Ok(Box::new(GitSource {
            git_binary: self.git_binary.clone(),
            root: dir.path().to_path_buf(),
            dir: Some(dir),
            branch,
            commit_sha,
            url: url.to_string(),
            token: token.cloned(),
        }))
    }

    async fn get_head_commit(
        &self,
        ctx: &TaskContext,
        url: &str,
        token: Option<&SecretString>,
    ) -> Result<String, VcsError> {
        if url.is_empty() {
            return Err(VcsError::UrlRequired);
        }
        let remote = authenticated_url(url, token)?;

        let output = run_git(
            ctx,
            &self.git_binary,
            None,
            &["ls-remote", remote.as_str(), "HEAD"],
            "git ls-remote",
        )
        .await?;
        if !output.status.success() {
            return Err(VcsError::Git {
                operation: "git ls-remote",
                target: format!("{:?}", url),
                stderr: stderr_text(&output, token),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ls_remote(&stdout)
            .map(str::to_string)
            .ok_or_else(|| VcsError::EmptyResponse {
                operation: "git ls-remote",
                target: format!("{:?}", url),
            })
    }
}

/// Shallow clone in a temporary directory.
#[derive(Debug)]
pub struct GitSource {
    git_binary: PathBuf,
    root: PathBuf,
    dir: Option<TempDir>,
    branch: String,
    commit_sha: String,
    url: String,
    token: Option<SecretString>,
}

#[async_trait]
impl Source for GitSource {
    fn branch(&self) -> &str {
        &self.branch
    }

    fn commit_sha(&self) -> &str {
        &self.commit_sha
    }

    fn root(&self) -> &Path {
        &self.root
    }

    async fn verify_commit_exists(&self, ctx: &TaskContext, sha: &str) -> Result<bool, VcsError> {
        if sha.is_empty() {
            return Err(VcsError::ShaRequired);
        }

        // origin holds the plain URL; credentials go on the command line only.
        let remote = authenticated_url(&self.url, self.token.as_ref())?;
        let output = run_git(
            ctx,
            &self.git_binary,
            Some(&self.root),
            &["fetch", "--depth", "1", remote.as_str(), sha],
            "verify commit exists",
        )
        .await?;
        if output.status.success() {
            return Ok(true);
        }
        if let Some(reason) = ctx.err() {
            return Err(VcsError::Interrupted {
                operation: "verify commit exists",
                reason,
            });
        }

        let stderr = stderr_text(&output, self.token.as_ref());
        if stderr.contains("not our ref") {
            return Ok(false);
        }
        Err(VcsError::Git {
            operation: "git fetch",
            target: sha.to_string(),
            stderr,
        })
    }

    async fn close(&mut self) -> Result<(), VcsError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| VcsError::Io {
                operation: "remove clone directory",
                source: std::io::Error::other(e),
            })?
            .map_err(|source| VcsError::Io {
                operation: "remove clone directory",
                source,
            })
    }
}
