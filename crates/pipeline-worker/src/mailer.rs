//! Mail transport
//!
//! Single-shot send behind a trait; the production implementation posts to
//! an HTTP mail API, tests use the in-memory recorder. Result email
//! composition lives here so every transport sends the same copy.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use shared::models::RequestType;

use crate::error::{WorkerError, WorkerResult};

/// One outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Send-one-message transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> WorkerResult<()>;
}

fn request_type_text(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::Image => "图片",
        RequestType::Video => "视频",
    }
}

/// Compose the result notification for a finished task
///
/// The link in the body is presigned and expires after one hour; the copy
/// says so.
pub fn compose_result_email(
    to: &str,
    request_type: RequestType,
    prompt: &str,
    result_url: &str,
) -> OutgoingEmail {
    let type_text = request_type_text(request_type);
    let subject = format!("您的{}生成结果已就绪", type_text);
    let body = format!(
        "您好！\n\n您请求的{}已经生成完成。\n\n请求描述：{}\n\n下载链接：{}\n\n链接有效期为1小时，请及时下载。\n\n此邮件由系统自动发送，请勿回复。",
        type_text, prompt, result_url,
    );

    OutgoingEmail {
        to: to.to_string(),
        subject,
        body,
    }
}

#[derive(Serialize)]
struct MailApiRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text_body: &'a str,
}

/// HTTP mail-API transport
pub struct HttpMailer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::mail(format!("failed to build mail client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> WorkerResult<()> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let request = MailApiRequest {
            from: &self.from,
            to: &email.to,
            subject: &email.subject,
            text_body: &email.body,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::mail(format!("mail API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::mail(format!(
                "mail API returned status {}: {}",
                status, body
            )));
        }

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

/// In-memory mailer recording sends, with failure injection for tests
#[derive(Default)]
pub struct InMemoryMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    fail: AtomicBool,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail
    pub fn fail_next_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for InMemoryMailer {
    async fn send(&self, email: &OutgoingEmail) -> WorkerResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WorkerError::mail("simulated transport failure"));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}
