//! `GitOperations` backed by the `git` executable.
//!
//! Every command runs in the fork's working tree. The upstream remote is
//! named `upstream` and is added on first fetch when missing.

use std::path::Path;

use async_trait::async_trait;
use forksync_state::TrackedRepository;
use tokio::process::Command;
use tracing::debug;

use crate::ports::{Divergence, GitOperations, MergeMode, MergeOutcome, UpstreamHead};
use crate::provider::ProviderError;

const UPSTREAM_REMOTE: &str = "upstream";

struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific git binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, ProviderError> {
        debug!(dir = %dir.display(), ?args, "git");
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("failed to run git: {e}")))?;
        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run a command that must succeed; failures become `Operation` errors.
    async fn run_ok(&self, dir: &Path, args: &[&str]) -> Result<String, ProviderError> {
        let out = self.run(dir, args).await?;
        if !out.success {
            return Err(ProviderError::Operation(format!(
                "git {} failed: {}",
                args.join(" "),
                out.stderr
            )));
        }
        Ok(out.stdout)
    }

    async fn ensure_upstream_remote(&self, repo: &TrackedRepository) -> Result<(), ProviderError> {
        let dir = repo.local_path.as_path();
        let existing = self.run(dir, &["remote", "get-url", UPSTREAM_REMOTE]).await?;
        if existing.success {
            return Ok(());
        }
        self.run_ok(dir, &["remote", "add", UPSTREAM_REMOTE, &repo.upstream_url])
            .await
            .map(|_| ())
    }

    /// Refuse to merge into anything but a clean checkout of the sync branch.
    async fn ensure_mergeable(&self, repo: &TrackedRepository) -> Result<(), ProviderError> {
        let dir = repo.local_path.as_path();
        let branch = self
            .run_ok(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        if branch != repo.branch {
            return Err(ProviderError::Operation(format!(
                "checked out {branch:?}, expected {:?}",
                repo.branch
            )));
        }
        let status = self.run_ok(dir, &["status", "--porcelain"]).await?;
        if !status.is_empty() {
            return Err(ProviderError::Operation(
                "working tree has uncommitted changes".to_string(),
            ));
        }
        Ok(())
    }

    async fn conflicted_paths(&self, dir: &Path) -> Result<Vec<String>, ProviderError> {
        let out = self
            .run_ok(dir, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

/// Map a failed `git fetch` to a provider error from its stderr.
fn classify_fetch_failure(stderr: &str) -> ProviderError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("could not read username")
    {
        ProviderError::Authentication(stderr.to_string())
    } else if lower.contains("could not resolve host")
        || lower.contains("connection")
        || lower.contains("timed out")
        || lower.contains("early eof")
    {
        ProviderError::Network(stderr.to_string())
    } else if lower.contains("couldn't find remote ref") {
        ProviderError::Operation(stderr.to_string())
    } else {
        ProviderError::Unavailable(stderr.to_string())
    }
}

/// Parse `git rev-list --left-right --count A...B` output: `left\tright`.
fn parse_left_right(output: &str) -> Result<Divergence, ProviderError> {
    let mut parts = output.split_whitespace();
    let (Some(left), Some(right), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ProviderError::Malformed(format!(
            "unexpected rev-list output: {output:?}"
        )));
    };
    let parse = |s: &str| {
        s.parse::<u32>()
            .map_err(|e| ProviderError::Malformed(format!("bad commit count {s:?}: {e}")))
    };
    Ok(Divergence {
        ahead: parse(left)?,
        behind: parse(right)?,
    })
}

#[async_trait]
impl GitOperations for GitCli {
    async fn fetch_upstream(&self, repo: &TrackedRepository) -> Result<UpstreamHead, ProviderError> {
        let dir = repo.local_path.as_path();
        if !dir.exists() {
            return Err(ProviderError::Operation(format!(
                "local path {} does not exist",
                dir.display()
            )));
        }
        self.ensure_upstream_remote(repo).await?;

        let fetch = self
            .run(dir, &["fetch", UPSTREAM_REMOTE, &repo.branch])
            .await?;
        if !fetch.success {
            return Err(classify_fetch_failure(&fetch.stderr));
        }

        let reference = format!("{UPSTREAM_REMOTE}/{}", repo.branch);
        let commit = self.run_ok(dir, &["rev-parse", &reference]).await?;
        if commit.is_empty() {
            return Err(ProviderError::Malformed(format!(
                "git rev-parse {reference} returned empty output"
            )));
        }
        Ok(UpstreamHead { commit, reference })
    }

    async fn divergence(
        &self,
        repo: &TrackedRepository,
        upstream_commit: &str,
    ) -> Result<Divergence, ProviderError> {
        // The tracked branch, whatever happens to be checked out.
        let range = format!("refs/heads/{}...{upstream_commit}", repo.branch);
        let out = self
            .run_ok(
                repo.local_path.as_path(),
                &["rev-list", "--left-right", "--count", &range],
            )
            .await?;
        parse_left_right(&out)
    }

    async fn merge_or_fast_forward(
        &self,
        repo: &TrackedRepository,
        upstream_commit: &str,
        mode: MergeMode,
    ) -> Result<MergeOutcome, ProviderError> {
        let dir = repo.local_path.as_path();
        self.ensure_mergeable(repo).await?;

        let args: &[&str] = match mode {
            MergeMode::FastForwardOnly => &["merge", "--ff-only", upstream_commit],
            MergeMode::Merge => &["merge", "--no-edit", upstream_commit],
        };
        let merge = self.run(dir, args).await?;
        if merge.success {
            let head = self.run_ok(dir, &["rev-parse", "HEAD"]).await?;
            return Ok(MergeOutcome::Merged { head });
        }

        if mode == MergeMode::Merge {
            let paths = self.conflicted_paths(dir).await?;
            if !paths.is_empty() {
                // Leave resolution to a human; the tree goes back to HEAD.
                self.run_ok(dir, &["merge", "--abort"]).await?;
                return Ok(MergeOutcome::Conflicted { paths });
            }
        }
        Err(ProviderError::Operation(format!(
            "git merge failed: {}",
            merge.stderr
        )))
    }
}
