//! Live collaborator implementations.
//!
//! - [`GitCli`]: local git via the `git` executable
//! - [`GitHubClient`]: issues and upstream activity from the GitHub REST API
//! - [`AnthropicAnalyzer`]: issue analysis through the Anthropic messages API

pub mod anthropic;
pub mod git_cli;
pub mod github;

pub use anthropic::AnthropicAnalyzer;
pub use git_cli::GitCli;
pub use github::{owner_and_repo, GitHubClient};
