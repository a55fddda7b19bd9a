//! Intent gate
//!
//! Decides whether a comment carries a clear, well-formed request to
//! generate an image or video. Ordered gates, any "no" short-circuits:
//! a valid recipient email must be present, then a generation keyword,
//! then the LLM classification must clear the acceptance rules and the
//! configured confidence threshold.
//!
//! The regex-extracted email always replaces the LLM-returned one:
//! deterministic extraction beats model hallucination.

pub mod llm;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use shared::models::RequestType;

use crate::error::WorkerResult;
use llm::LlmClient;

const SYSTEM_PROMPT: &str = r#"你是一个意图抽取器。你只能输出 JSON，不能输出任何解释、Markdown、代码块。请从评论中判断是否存在明确的"生成图片/生成视频"请求，并抽取用于生成模型的 prompt，同时抽取邮箱（如果存在）。不确定时必须返回 has_request=false。

输出字段必须严格为：
has_request(boolean), request_type("image"|"video"|"unknown"), prompt(string), email(string|null), confidence(number 0..1), reason(string)"#;

const USER_PROMPT_TEMPLATE: &str = r#"评论文本如下：
<<<COMMENT>>>

规则：
- 如果评论没有明确要求生成图片/视频，has_request=false
- 如果无法可靠判断类型，request_type="unknown"，has_request=false
- prompt 必须是可直接用于生成模型的描述，去掉邮箱和无关寒暄
- 只要邮箱缺失或疑似无效，email=null，has_request=false
- 仅当非常确定时 confidence 才能 >=0.7"#;

const IMAGE_KEYWORDS: &[&str] = &[
    "出图", "生成图", "做图片", "帮我画", "ai生成", "来一张", "画一张", "生成一张",
    "画个", "做个图", "出个图", "生成个", "画一幅", "生成一幅",
];

const VIDEO_KEYWORDS: &[&str] = &[
    "做视频", "生成视频", "做个视频", "生成个视频", "出视频", "来个视频",
    "做短片", "生成短片", "做个短片",
];

/// Minimum accepted prompt length in bytes
const MIN_PROMPT_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("Invalid regex pattern");
}

/// Gate outcome for one comment
#[derive(Debug, Clone, PartialEq)]
pub enum IntentDecision {
    /// No clear request; the comment is dropped silently
    Skip {
        reason: String,
        email: Option<String>,
    },
    /// Clear request; a task should be created
    Accept {
        request_type: RequestType,
        prompt: String,
        email: String,
        confidence: f64,
    },
}

impl IntentDecision {
    fn skip(reason: impl Into<String>, email: Option<String>) -> Self {
        IntentDecision::Skip {
            reason: reason.into(),
            email,
        }
    }
}

/// Raw LLM classification, parsed from strict-JSON output
#[derive(Debug, Clone, Deserialize)]
struct LlmIntent {
    #[serde(default)]
    has_request: bool,
    #[serde(default)]
    request_type: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

/// Extract the first well-formed email address from a comment
pub fn extract_email(comment: &str) -> Option<String> {
    let candidate = EMAIL_PATTERN.find(comment)?.as_str().trim().to_string();
    if is_valid_email(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

fn is_valid_email(email: &str) -> bool {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = match parts.next() {
        Some(d) => d,
        None => return false,
    };

    if local.is_empty() || local.len() > 64 {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

/// Case-folded contains-any scan over the curated keyword lists
pub fn has_generation_keywords(comment: &str) -> bool {
    let folded = comment.to_lowercase();
    IMAGE_KEYWORDS
        .iter()
        .chain(VIDEO_KEYWORDS.iter())
        .any(|kw| folded.contains(kw))
}

/// The deterministic pre-filter plus LLM classifier
pub struct IntentExtractor {
    llm: Arc<dyn LlmClient>,
    max_retries: u32,
}

impl IntentExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, max_retries: u32) -> Self {
        Self { llm, max_retries }
    }

    /// Run the ordered gates against one comment
    ///
    /// Errors only on LLM transport failure after all retries; every
    /// other negative outcome is a `Skip`.
    pub async fn extract(&self, comment: &str, threshold: f64) -> WorkerResult<IntentDecision> {
        let email = extract_email(comment);

        let email = match email {
            Some(email) => email,
            None => return Ok(IntentDecision::skip("评论未包含有效邮箱", None)),
        };

        if !has_generation_keywords(comment) {
            return Ok(IntentDecision::skip(
                "评论不包含生成图片/视频的关键词",
                Some(email),
            ));
        }

        let user_prompt = USER_PROMPT_TEMPLATE.replacen("<<<COMMENT>>>", comment, 1);
        let content = self.call_with_retries(&user_prompt).await?;

        let intent: LlmIntent = serde_json::from_str(&content)?;

        // Acceptance rules: everything must line up or the comment drops
        let accepted = intent.has_request
            && intent.prompt.len() >= MIN_PROMPT_LEN
            && intent.confidence >= threshold;

        match intent.request_type.parse::<RequestType>() {
            Ok(request_type) if accepted => Ok(IntentDecision::Accept {
                request_type,
                prompt: intent.prompt,
                email,
                confidence: intent.confidence,
            }),
            _ => Ok(IntentDecision::skip(
                format!("意图不明确: {}", intent.reason),
                Some(email),
            )),
        }
    }

    /// Call the LLM with linear 1s, 2s, 3s, … backoff between attempts,
    /// returning the response of the attempt that succeeded
    async fn call_with_retries(&self, user_prompt: &str) -> WorkerResult<String> {
        let attempts = self.max_retries.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match self.llm.complete(SYSTEM_PROMPT, user_prompt).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "LLM call failed"
                    );
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Duration::from_secs(u64::from(attempt) + 1)).await;
                    }
                }
            }
        }

        Err(last_err.expect("at least one attempt was made"))
    }
}
