//! `poll:comments` — comment ingestion
//!
//! Lists the target note's comments from the persisted cursor, inserts
//! the genuinely new ones, and enqueues one `process:comment` per insert.
//! A non-blocking single-flight lock keyed by the note target keeps
//! concurrent polls (scheduler tick racing a manual run, or queue
//! redelivery) from double-walking the same page.

use std::time::Duration;

use chrono::Utc;
use shared::jobs::{JobKind, PipelineJob, PollCommentsPayload, ProcessCommentPayload};
use shared::models::Note;
use shared::store::NewComment;

use crate::error::WorkerResult;

use super::{comment_uid, Pipeline};

/// Poll lock TTL; generous against a slow connector round-trip
const LOCK_TTL: Duration = Duration::from_secs(60);

impl Pipeline {
    pub async fn handle_poll_comments(&self, payload: PollCommentsPayload) -> WorkerResult<()> {
        tracing::info!(note_target = %payload.note_target, "Polling comments");

        let note = self.store.get_or_create_note(&payload.note_target).await?;

        let lock_key = format!("lock:poll:{}", payload.note_target);
        let token = match self.lock.try_acquire(&lock_key, LOCK_TTL).await? {
            Some(token) => token,
            None => {
                tracing::info!(note_target = %payload.note_target, "Poll already in progress");
                return Ok(());
            }
        };

        let outcome = self.poll_note(&payload, note).await;

        if let Err(e) = self.lock.release(&lock_key, &token).await {
            tracing::warn!(error = %e, note_target = %payload.note_target, "Failed to release poll lock");
        }

        outcome
    }

    async fn poll_note(&self, payload: &PollCommentsPayload, mut note: Note) -> WorkerResult<()> {
        let cursor = note.last_cursor.clone().unwrap_or_default();

        let page = match self
            .connector
            .list_comments(&payload.note_target, &cursor)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(error = %e, note_target = %payload.note_target, "Failed to list comments");
                note.last_error = Some(e.to_string());
                note.last_polled_at = Some(Utc::now());
                if let Err(update_err) = self.store.update_note(&note).await {
                    tracing::error!(error = %update_err, "Failed to record poll error on note");
                }
                // Cursor untouched; the queue retries the whole poll
                return Err(e);
            }
        };

        let mut new_comments = 0usize;
        for comment in &page.comments {
            let uid = comment_uid(comment);

            match self.store.comment_exists(&uid).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, comment_uid = %uid, "Failed to check comment existence");
                    continue;
                }
            }

            let inserted = match self
                .store
                .create_comment(&NewComment {
                    note_target: payload.note_target.clone(),
                    comment_uid: uid.clone(),
                    user_name: Some(comment.user_name.clone()).filter(|u| !u.is_empty()),
                    content: comment.content.clone(),
                    comment_created_at: comment.comment_created_at,
                })
                .await
            {
                Ok(row) => row,
                Err(e) if e.is_conflict() => {
                    // A concurrent poll inserted it between the existence
                    // check and here; the unique index did its job
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, comment_uid = %uid, "Failed to insert comment");
                    continue;
                }
            };

            new_comments += 1;

            let job = PipelineJob::new(
                JobKind::ProcessComment,
                &ProcessCommentPayload {
                    comment_id: inserted.id,
                    comment_uid: uid.clone(),
                    content: comment.content.clone(),
                    note_target: payload.note_target.clone(),
                },
            )?;
            if let Err(e) = self.queue.enqueue(&job).await {
                tracing::error!(error = %e, comment_uid = %uid, "Failed to enqueue process job");
            }
        }

        note.last_polled_at = Some(Utc::now());
        if !page.next_cursor.is_empty() {
            note.last_cursor = Some(page.next_cursor.clone());
        }
        note.last_error = None;
        if let Err(e) = self.store.update_note(&note).await {
            tracing::error!(error = %e, "Failed to update note after poll");
        }

        tracing::info!(
            note_target = %payload.note_target,
            new_comments = new_comments,
            has_more = page.has_more,
            "Poll completed"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::SourceComment;
    use crate::handlers::testutil::harness;
    use shared::Store;

    fn payload() -> PollCommentsPayload {
        PollCommentsPayload {
            note_target: "note-1".to_string(),
        }
    }

    fn comment(id: &str, content: &str) -> SourceComment {
        SourceComment {
            comment_id: id.to_string(),
            user_name: "user".to_string(),
            content: content.to_string(),
            comment_created_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_poll_inserts_comments_and_enqueues_processing() {
        let h = harness();
        h.connector
            .push_comment("note-1", comment("c-1", "帮我画一张猫咪 a@b.co"));
        h.connector.push_comment("note-1", comment("c-2", "好看！"));

        h.pipeline.handle_poll_comments(payload()).await.unwrap();

        let comments = h.store.comments();
        assert_eq!(comments.len(), 2);

        let jobs = h.queue.jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.kind == JobKind::ProcessComment));

        let note = h.store.get_or_create_note("note-1").await.unwrap();
        assert!(note.last_polled_at.is_some());
        assert!(note.last_error.is_none());
    }

    #[tokio::test]
    async fn test_poll_is_idempotent_across_reruns() {
        let h = harness();
        h.connector
            .push_comment("note-1", comment("c-1", "帮我画一张猫咪 a@b.co"));

        h.pipeline.handle_poll_comments(payload()).await.unwrap();
        h.pipeline.handle_poll_comments(payload()).await.unwrap();

        // Same page applied twice inserts once and processes once
        assert_eq!(h.store.comments().len(), 1);
        assert_eq!(h.queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_polls_insert_once_and_both_succeed() {
        let h = harness();
        h.connector
            .push_comment("note-1", comment("c-1", "帮我画一张猫咪 a@b.co"));

        // Redelivery race: two polls for the same target and cursor. The
        // lock serializes them; whichever loses returns success untouched.
        let (a, b) = tokio::join!(
            h.pipeline.handle_poll_comments(payload()),
            h.pipeline.handle_poll_comments(payload())
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(h.store.comments().len(), 1);
    }

    #[tokio::test]
    async fn test_connector_failure_records_error_and_fails_job() {
        use crate::connector::{CommentPage, Connector};
        use crate::error::WorkerError;
        use async_trait::async_trait;

        struct FailingConnector;

        #[async_trait]
        impl Connector for FailingConnector {
            async fn list_comments(
                &self,
                _note_target: &str,
                _cursor: &str,
            ) -> WorkerResult<CommentPage> {
                Err(WorkerError::connector("bridge unreachable"))
            }
        }

        let h = harness();
        let store = h.store.clone();
        let pipeline = Pipeline::new(
            store.clone(),
            h.queue.clone(),
            std::sync::Arc::new(FailingConnector),
            crate::intent::IntentExtractor::new(h.llm.clone(), 2),
            Default::default(),
            h.mailer.clone(),
            std::sync::Arc::new(crate::lock::InMemoryPollLock::new()),
            std::sync::Arc::new(crate::rate_limiter::NoopRecipientRateLimiter),
        );

        let err = pipeline.handle_poll_comments(payload()).await.unwrap_err();
        assert!(err.is_retryable());

        let note = store.get_or_create_note("note-1").await.unwrap();
        assert_eq!(note.last_error.as_deref(), Some("Connector error: bridge unreachable"));
        assert!(note.last_polled_at.is_some());
        // Cursor unchanged on failure
        assert!(note.last_cursor.is_none());
    }

    #[tokio::test]
    async fn test_cursor_advances_and_never_resets() {
        let h = harness();
        for i in 0..60 {
            h.connector.push_comment(
                "note-1",
                comment(&format!("c-{:03}", i), "这个笔记真好看！"),
            );
        }

        h.pipeline.handle_poll_comments(payload()).await.unwrap();
        let note = h.store.get_or_create_note("note-1").await.unwrap();
        assert_eq!(note.last_cursor.as_deref(), Some("c-049"));

        // Second poll consumes the rest; final page returns an empty next
        // cursor, which must not reset the stored one
        h.pipeline.handle_poll_comments(payload()).await.unwrap();
        let note = h.store.get_or_create_note("note-1").await.unwrap();
        assert_eq!(note.last_cursor.as_deref(), Some("c-049"));
        assert_eq!(h.store.comments().len(), 60);
    }
}
