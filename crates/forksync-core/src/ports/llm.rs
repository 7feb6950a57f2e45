use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::discovery::SkillProfile;
use crate::provider::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

/// Structured analysis of one issue against one skill profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueAnalysis {
    pub summary: String,
    pub difficulty: Difficulty,
    /// 0.0 (irrelevant) to 1.0 (perfect fit).
    pub relevance: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One answered analysis request.
///
/// A reply the model produced but that could not be parsed is still billed,
/// so it arrives as `Ok` with `analysis` set to the parse error.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResponse {
    pub analysis: Result<IssueAnalysis, String>,
    pub usage: TokenUsage,
}

/// Language-model analysis capability.
#[async_trait]
pub trait LlmAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        issue_text: &str,
        profile: &SkillProfile,
    ) -> Result<AnalysisResponse, ProviderError>;
}
