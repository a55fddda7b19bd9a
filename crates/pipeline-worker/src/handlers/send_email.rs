//! `send:email` — result delivery
//!
//! Emails the commenter their presigned result link and records the
//! attempt as a delivery row. Missing email or result URL is a
//! non-retryable drop (audited); a transport failure records a FAILED
//! delivery and surfaces to the queue so redelivery retries the send.
//! Delivery is at-least-once; the EMAILED entry check suppresses
//! duplicates on redelivery after a successful send.

use std::str::FromStr;

use chrono::Utc;
use serde_json::json;
use shared::jobs::SendEmailPayload;
use shared::models::{DeliveryStatus, NewAuditLog, RequestType, TaskStatus};
use shared::store::NewDelivery;

use crate::error::WorkerResult;
use crate::mailer::compose_result_email;

use super::Pipeline;

impl Pipeline {
    pub async fn handle_send_email(&self, payload: SendEmailPayload) -> WorkerResult<()> {
        tracing::info!(task_id = payload.task_id, "Sending result email");

        let mut task = self.store.get_task(payload.task_id).await?;

        if task.task_status() == Some(TaskStatus::Emailed) {
            tracing::info!(task_id = task.id, "Email already sent");
            return Ok(());
        }

        let (email, result_url) = match (task.email.clone(), task.result_url.clone()) {
            (Some(email), Some(result_url)) => (email, result_url),
            _ => {
                tracing::error!(
                    task_id = task.id,
                    has_email = task.email.is_some(),
                    has_result_url = task.result_url.is_some(),
                    "Cannot deliver result, missing email or result URL"
                );
                if let Err(e) = self
                    .store
                    .create_audit_log(&NewAuditLog::error(
                        "delivery_dropped",
                        json!({
                            "task_id": task.id,
                            "has_email": task.email.is_some(),
                            "has_result_url": task.result_url.is_some(),
                        }),
                    ))
                    .await
                {
                    tracing::error!(error = %e, "Failed to write audit log");
                }
                return Ok(());
            }
        };

        match self.rate_limiter.allow(&email).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(task_id = task.id, email = %email, "Recipient rate limited, dropping send");
                if let Err(e) = self
                    .store
                    .create_audit_log(&NewAuditLog::error(
                        "email_rate_limited",
                        json!({"task_id": task.id, "email": email}),
                    ))
                    .await
                {
                    tracing::error!(error = %e, "Failed to write audit log");
                }
                return Ok(());
            }
            Err(e) => {
                // The limiter fails open; an error here is unexpected
                tracing::warn!(error = %e, "Rate limiter check failed, allowing send");
            }
        }

        let request_type =
            RequestType::from_str(&task.request_type).unwrap_or(RequestType::Image);
        let prompt = task.prompt.clone().unwrap_or_default();
        let message = compose_result_email(&email, request_type, &prompt, &result_url);

        if let Err(e) = self.mailer.send(&message).await {
            tracing::error!(error = %e, task_id = task.id, "Failed to send email");

            if let Err(delivery_err) = self
                .store
                .create_delivery(&NewDelivery {
                    task_id: task.id,
                    email_to: email.clone(),
                    status: DeliveryStatus::Failed.as_str().to_string(),
                    sent_at: None,
                    error: Some(e.to_string()),
                })
                .await
            {
                tracing::error!(error = %delivery_err, "Failed to record failed delivery");
            }

            // Queue redelivery retries the send; a duplicate that slips
            // through after success is suppressed by the EMAILED check
            return Err(e);
        }

        if let Err(e) = self
            .store
            .create_delivery(&NewDelivery {
                task_id: task.id,
                email_to: email.clone(),
                status: DeliveryStatus::Sent.as_str().to_string(),
                sent_at: Some(Utc::now()),
                error: None,
            })
            .await
        {
            tracing::error!(error = %e, "Failed to record delivery");
        }

        task.status = TaskStatus::Emailed.as_str().to_string();
        if let Err(e) = self.store.update_task(&task).await {
            tracing::error!(error = %e, task_id = task.id, "Failed to mark task emailed");
        }

        tracing::info!(task_id = task.id, email = %email, "Email sent");

        Ok(())
    }
}
