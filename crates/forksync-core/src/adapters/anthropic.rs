//! `LlmAnalyzer` backed by the Anthropic messages API.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::discovery::SkillProfile;
use crate::ports::{AnalysisResponse, IssueAnalysis, LlmAnalyzer, TokenUsage};
use crate::provider::ProviderError;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const MAX_TOKENS: u32 = 600;

pub struct AnthropicAnalyzer {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl AnthropicAnalyzer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

const SYSTEM_PROMPT: &str = "You assess open-source issues for a contributor. \
Reply with a single JSON object and nothing else, with keys: \
\"summary\" (one sentence), \
\"difficulty\" (\"beginner\", \"intermediate\" or \"advanced\"), \
\"relevance\" (number from 0.0 to 1.0: how well the issue fits the contributor's skills), \
\"reasoning\" (two sentences at most).";

fn build_prompt(issue_text: &str, profile: &SkillProfile) -> String {
    let skills = if profile.is_empty() {
        "no stated preferences".to_string()
    } else {
        profile.describe()
    };
    format!("Contributor skills: {skills}\n\n{issue_text}")
}

/// Pull the analysis object out of the model's reply.
///
/// Models sometimes wrap JSON in prose or code fences, so the outermost
/// braces are taken.
fn parse_analysis(text: &str) -> Result<IssueAnalysis, String> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err("analysis reply contains no JSON object".to_string()),
    };
    serde_json::from_str(json).map_err(|e| format!("analysis reply is not valid: {e}"))
}

fn status_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    match status.as_u16() {
        401 | 403 => ProviderError::Authentication(message),
        429 => ProviderError::RateLimited {
            reset_at: Utc::now()
                + ChronoDuration::seconds(i64::try_from(retry_after.unwrap_or(60)).unwrap_or(60)),
        },
        529 => ProviderError::Unavailable(message),
        s if status.is_server_error() => ProviderError::Server { status: s, message },
        s => ProviderError::Rejected { status: s, message },
    }
}

#[async_trait]
impl LlmAnalyzer for AnthropicAnalyzer {
    async fn analyze(
        &self,
        issue_text: &str,
        profile: &SkillProfile,
    ) -> Result<AnalysisResponse, ProviderError> {
        let prompt = build_prompt(issue_text, profile);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("messages request failed: {e}")))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("reading messages response: {e}")))?;
        if !status.is_success() {
            return Err(status_error(status, retry_after, &text));
        }

        let reply: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Malformed(format!("messages response: {e}")))?;
        let joined = reply
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<String>();

        Ok(AnalysisResponse {
            analysis: parse_analysis(&joined),
            usage: TokenUsage {
                input_tokens: reply.usage.input_tokens,
                output_tokens: reply.usage.output_tokens,
            },
        })
    }
}
