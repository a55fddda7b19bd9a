//! Persistence store for pipeline state
//!
//! A trait-based abstraction over PostgreSQL so handlers can be exercised
//! against an in-memory implementation. Both implementations enforce the
//! invariants the pipeline leans on: unique `comments.comment_uid`, unique
//! `tasks.comment_id`, and no updates to tasks already in a terminal state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{AuditLog, Comment, Delivery, NewAuditLog, Note, Setting, Task, TaskStatus};

/// New comment, before insertion
#[derive(Debug, Clone)]
pub struct NewComment {
    pub note_target: String,
    pub comment_uid: String,
    pub user_name: Option<String>,
    pub content: String,
    pub comment_created_at: Option<DateTime<Utc>>,
}

/// New task, before insertion
#[derive(Debug, Clone)]
pub struct NewTask {
    pub comment_id: i64,
    pub status: TaskStatus,
    pub request_type: String,
    pub email: Option<String>,
    pub prompt: Option<String>,
    pub confidence: Option<f64>,
}

/// New delivery attempt record, before insertion
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub task_id: i64,
    pub email_to: String,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Persistence operations used by the pipeline and the admin surface
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the singleton settings row
    async fn get_setting(&self) -> Result<Setting>;

    /// Persist updated settings
    async fn update_setting(&self, setting: &Setting) -> Result<Setting>;

    /// Load the note row for a target, creating it on first poll
    async fn get_or_create_note(&self, note_target: &str) -> Result<Note>;

    /// Persist cursor/error bookkeeping on a note row
    async fn update_note(&self, note: &Note) -> Result<()>;

    /// Whether a comment with this UID was already ingested
    async fn comment_exists(&self, comment_uid: &str) -> Result<bool>;

    /// Insert a comment; `Error::Conflict` on a duplicate UID
    async fn create_comment(&self, comment: &NewComment) -> Result<Comment>;

    /// Insert a task; `Error::Conflict` when the comment already has one
    async fn create_task(&self, task: &NewTask) -> Result<Task>;

    async fn get_task(&self, id: i64) -> Result<Task>;

    async fn get_task_by_comment(&self, comment_id: i64) -> Result<Task>;

    /// Persist task mutations
    ///
    /// Refuses with `Error::Conflict` when the stored row is already in a
    /// terminal state (FAILED, EMAILED), so no transition out of a terminal
    /// state is ever observable.
    async fn update_task(&self, task: &Task) -> Result<()>;

    /// Most recent tasks first
    async fn list_tasks(&self, limit: i64, offset: i64) -> Result<Vec<Task>>;

    /// Append a delivery attempt record
    async fn create_delivery(&self, delivery: &NewDelivery) -> Result<()>;

    /// Append a structured audit record
    async fn create_audit_log(&self, log: &NewAuditLog) -> Result<()>;

    /// Delivery records for one task, oldest first
    async fn list_deliveries(&self, task_id: i64) -> Result<Vec<Delivery>>;
}

/// PostgreSQL-backed store
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> Error {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return Error::conflict(what.to_string());
        }
    }
    Error::Database(e)
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_setting(&self) -> Result<Setting> {
        sqlx::query_as::<_, Setting>("SELECT * FROM settings ORDER BY id LIMIT 1")
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("setting", "singleton"))
    }

    async fn update_setting(&self, setting: &Setting) -> Result<Setting> {
        let updated = sqlx::query_as::<_, Setting>(
            r#"
            UPDATE settings
            SET connector_mode = $2, bridge_server_url = $3, bridge_auth = $4,
                note_target = $5, polling_interval_sec = $6,
                llm_base_url = $7, llm_api_key = $8, llm_model = $9, llm_timeout_sec = $10,
                intent_threshold = $11, provider_json = $12, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(setting.id)
        .bind(&setting.connector_mode)
        .bind(&setting.bridge_server_url)
        .bind(&setting.bridge_auth)
        .bind(&setting.note_target)
        .bind(setting.polling_interval_sec)
        .bind(&setting.llm_base_url)
        .bind(&setting.llm_api_key)
        .bind(&setting.llm_model)
        .bind(setting.llm_timeout_sec)
        .bind(setting.intent_threshold)
        .bind(&setting.provider_json)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("setting", setting.id.to_string()))?;

        Ok(updated)
    }

    async fn get_or_create_note(&self, note_target: &str) -> Result<Note> {
        // Racing creators both land on the existing row via ON CONFLICT
        let note = sqlx::query_as::<_, Note>(
            r#"
            INSERT INTO notes (note_target)
            VALUES ($1)
            ON CONFLICT (note_target) DO UPDATE SET note_target = EXCLUDED.note_target
            RETURNING *
            "#,
        )
        .bind(note_target)
        .fetch_one(&self.pool)
        .await?;

        Ok(note)
    }

    async fn update_note(&self, note: &Note) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notes
            SET last_cursor = $2, last_polled_at = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(note.id)
        .bind(&note.last_cursor)
        .bind(note.last_polled_at)
        .bind(&note.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn comment_exists(&self, comment_uid: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE comment_uid = $1")
                .bind(comment_uid)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn create_comment(&self, comment: &NewComment) -> Result<Comment> {
        sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (note_target, comment_uid, user_name, content, comment_created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&comment.note_target)
        .bind(&comment.comment_uid)
        .bind(&comment.user_name)
        .bind(&comment.content)
        .bind(comment.comment_created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "comment already ingested"))
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task> {
        sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (comment_id, status, request_type, email, prompt, confidence)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(task.comment_id)
        .bind(task.status.as_str())
        .bind(&task.request_type)
        .bind(&task.email)
        .bind(&task.prompt)
        .bind(task.confidence)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "comment already has a task"))
    }

    async fn get_task(&self, id: i64) -> Result<Task> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("task", id.to_string()))
    }

    async fn get_task_by_comment(&self, comment_id: i64) -> Result<Task> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE comment_id = $1")
            .bind(comment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("task for comment", comment_id.to_string()))
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, email = $3, prompt = $4, confidence = $5,
                provider_name = $6, provider_job_id = $7, result_url = $8,
                error = $9, retry_count = $10, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('FAILED', 'EMAILED')
            "#,
        )
        .bind(task.id)
        .bind(&task.status)
        .bind(&task.email)
        .bind(&task.prompt)
        .bind(task.confidence)
        .bind(&task.provider_name)
        .bind(&task.provider_job_id)
        .bind(&task.result_url)
        .bind(&task.error)
        .bind(task.retry_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::conflict(format!(
                "task {} is terminal or missing",
                task.id
            )));
        }

        Ok(())
    }

    async fn list_tasks(&self, limit: i64, offset: i64) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn create_delivery(&self, delivery: &NewDelivery) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deliveries (task_id, email_to, status, sent_at, error)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(delivery.task_id)
        .bind(&delivery.email_to)
        .bind(&delivery.status)
        .bind(delivery.sent_at)
        .bind(&delivery.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_audit_log(&self, log: &NewAuditLog) -> Result<()> {
        sqlx::query("INSERT INTO audit_logs (level, event, payload) VALUES ($1, $2, $3)")
            .bind(&log.level)
            .bind(&log.event)
            .bind(&log.payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_deliveries(&self, task_id: i64) -> Result<Vec<Delivery>> {
        let rows = sqlx::query_as::<_, Delivery>(
            "SELECT * FROM deliveries WHERE task_id = $1 ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[derive(Default)]
struct InMemoryState {
    setting: Option<Setting>,
    notes: HashMap<String, Note>,
    comments: Vec<Comment>,
    tasks: Vec<Task>,
    deliveries: Vec<Delivery>,
    audit_logs: Vec<AuditLog>,
    next_id: i64,
}

impl InMemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store for tests and local development
///
/// Enforces the same uniqueness and terminal-state rules as the Postgres
/// implementation.
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryStore {
    /// Empty store; call [`InMemoryStore::seed_setting`] before use
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
        }
    }

    /// Store pre-seeded with a working mock configuration
    pub fn with_mock_setting() -> Self {
        let store = Self::new();
        store.seed_setting(Setting {
            id: 1,
            connector_mode: "mock".to_string(),
            bridge_server_url: None,
            bridge_auth: None,
            note_target: "mock_note_001".to_string(),
            polling_interval_sec: 120,
            llm_base_url: None,
            llm_api_key: None,
            llm_model: None,
            llm_timeout_sec: 15,
            intent_threshold: 0.7,
            provider_json: r#"[{"provider_name": "mock", "type": "mock"}]"#.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        store
    }

    /// Install or replace the singleton setting row
    pub fn seed_setting(&self, setting: Setting) {
        self.state.lock().unwrap().setting = Some(setting);
    }

    /// Snapshot of audit log rows (test support)
    pub fn audit_logs(&self) -> Vec<AuditLog> {
        self.state.lock().unwrap().audit_logs.clone()
    }

    /// Snapshot of all delivery rows (test support)
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().unwrap().deliveries.clone()
    }

    /// Snapshot of all comments (test support)
    pub fn comments(&self) -> Vec<Comment> {
        self.state.lock().unwrap().comments.clone()
    }

    /// Snapshot of all tasks (test support)
    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().unwrap().tasks.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_setting(&self) -> Result<Setting> {
        self.state
            .lock()
            .unwrap()
            .setting
            .clone()
            .ok_or_else(|| Error::not_found("setting", "singleton"))
    }

    async fn update_setting(&self, setting: &Setting) -> Result<Setting> {
        let mut state = self.state.lock().unwrap();
        let mut updated = setting.clone();
        updated.updated_at = Utc::now();
        state.setting = Some(updated.clone());
        Ok(updated)
    }

    async fn get_or_create_note(&self, note_target: &str) -> Result<Note> {
        let mut state = self.state.lock().unwrap();
        if let Some(note) = state.notes.get(note_target) {
            return Ok(note.clone());
        }
        let id = state.next_id();
        let note = Note {
            id,
            note_target: note_target.to_string(),
            last_cursor: None,
            last_polled_at: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.notes.insert(note_target.to_string(), note.clone());
        Ok(note)
    }

    async fn update_note(&self, note: &Note) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let mut updated = note.clone();
        updated.updated_at = Utc::now();
        state.notes.insert(note.note_target.clone(), updated);
        Ok(())
    }

    async fn comment_exists(&self, comment_uid: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.comments.iter().any(|c| c.comment_uid == comment_uid))
    }

    async fn create_comment(&self, comment: &NewComment) -> Result<Comment> {
        let mut state = self.state.lock().unwrap();
        if state
            .comments
            .iter()
            .any(|c| c.comment_uid == comment.comment_uid)
        {
            return Err(Error::conflict("comment already ingested"));
        }
        let id = state.next_id();
        let row = Comment {
            id,
            note_target: comment.note_target.clone(),
            comment_uid: comment.comment_uid.clone(),
            user_name: comment.user_name.clone(),
            content: comment.content.clone(),
            comment_created_at: comment.comment_created_at,
            ingested_at: Utc::now(),
        };
        state.comments.push(row.clone());
        Ok(row)
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task> {
        let mut state = self.state.lock().unwrap();
        if state.tasks.iter().any(|t| t.comment_id == task.comment_id) {
            return Err(Error::conflict("comment already has a task"));
        }
        let id = state.next_id();
        let row = Task {
            id,
            comment_id: task.comment_id,
            status: task.status.as_str().to_string(),
            request_type: task.request_type.clone(),
            email: task.email.clone(),
            prompt: task.prompt.clone(),
            confidence: task.confidence,
            provider_name: None,
            provider_job_id: None,
            result_url: None,
            error: None,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.tasks.push(row.clone());
        Ok(row)
    }

    async fn get_task(&self, id: i64) -> Result<Task> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("task", id.to_string()))
    }

    async fn get_task_by_comment(&self, comment_id: i64) -> Result<Task> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .iter()
            .find(|t| t.comment_id == comment_id)
            .cloned()
            .ok_or_else(|| Error::not_found("task for comment", comment_id.to_string()))
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| Error::conflict(format!("task {} is terminal or missing", task.id)))?;

        let current: TaskStatus = existing
            .status
            .parse()
            .map_err(|e: String| Error::internal(e))?;
        if current.is_terminal() {
            return Err(Error::conflict(format!(
                "task {} is terminal or missing",
                task.id
            )));
        }

        let mut updated = task.clone();
        updated.updated_at = Utc::now();
        *existing = updated;
        Ok(())
    }

    async fn list_tasks(&self, limit: i64, offset: i64) -> Result<Vec<Task>> {
        let state = self.state.lock().unwrap();
        let mut tasks = state.tasks.clone();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn create_delivery(&self, delivery: &NewDelivery) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.deliveries.push(Delivery {
            id,
            task_id: delivery.task_id,
            email_to: delivery.email_to.clone(),
            status: delivery.status.clone(),
            sent_at: delivery.sent_at,
            error: delivery.error.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn create_audit_log(&self, log: &NewAuditLog) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.audit_logs.push(AuditLog {
            id,
            level: log.level.clone(),
            event: log.event.clone(),
            payload: log.payload.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_deliveries(&self, task_id: i64) -> Result<Vec<Delivery>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deliveries
            .iter()
            .filter(|d| d.task_id == task_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryStatus;

    fn new_comment(uid: &str) -> NewComment {
        NewComment {
            note_target: "note-1".to_string(),
            comment_uid: uid.to_string(),
            user_name: Some("user".to_string()),
            content: "content".to_string(),
            comment_created_at: None,
        }
    }

    fn new_task(comment_id: i64) -> NewTask {
        NewTask {
            comment_id,
            status: TaskStatus::Extracted,
            request_type: "image".to_string(),
            email: Some("test@example.com".to_string()),
            prompt: Some("一张猫咪".to_string()),
            confidence: Some(0.9),
        }
    }

    #[tokio::test]
    async fn test_duplicate_comment_uid_conflicts() {
        let store = InMemoryStore::new();

        store.create_comment(&new_comment("uid-1")).await.unwrap();
        let err = store.create_comment(&new_comment("uid-1")).await.unwrap_err();
        assert!(err.is_conflict());

        assert!(store.comment_exists("uid-1").await.unwrap());
        assert!(!store.comment_exists("uid-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_one_task_per_comment() {
        let store = InMemoryStore::new();
        let comment = store.create_comment(&new_comment("uid-1")).await.unwrap();

        store.create_task(&new_task(comment.id)).await.unwrap();
        let err = store.create_task(&new_task(comment.id)).await.unwrap_err();
        assert!(err.is_conflict());

        let existing = store.get_task_by_comment(comment.id).await.unwrap();
        assert_eq!(existing.status, "EXTRACTED");
    }

    #[tokio::test]
    async fn test_terminal_tasks_reject_updates() {
        let store = InMemoryStore::new();
        let comment = store.create_comment(&new_comment("uid-1")).await.unwrap();
        let mut task = store.create_task(&new_task(comment.id)).await.unwrap();

        task.status = TaskStatus::Failed.as_str().to_string();
        task.error = Some("provider exploded".to_string());
        store.update_task(&task).await.unwrap();

        // Any further mutation must be refused
        task.status = TaskStatus::Submitted.as_str().to_string();
        let err = store.update_task(&task).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, "FAILED");
        assert_eq!(stored.error.as_deref(), Some("provider exploded"));
    }

    #[tokio::test]
    async fn test_get_or_create_note_is_idempotent() {
        let store = InMemoryStore::new();
        let a = store.get_or_create_note("note-1").await.unwrap();
        let b = store.get_or_create_note("note-1").await.unwrap();
        assert_eq!(a.id, b.id);

        let mut note = a.clone();
        note.last_cursor = Some("c-5".to_string());
        store.update_note(&note).await.unwrap();

        let again = store.get_or_create_note("note-1").await.unwrap();
        assert_eq!(again.last_cursor.as_deref(), Some("c-5"));
    }

    #[tokio::test]
    async fn test_deliveries_are_append_only_per_task() {
        let store = InMemoryStore::new();
        let comment = store.create_comment(&new_comment("uid-1")).await.unwrap();
        let task = store.create_task(&new_task(comment.id)).await.unwrap();

        store
            .create_delivery(&NewDelivery {
                task_id: task.id,
                email_to: "test@example.com".to_string(),
                status: DeliveryStatus::Failed.as_str().to_string(),
                sent_at: None,
                error: Some("smtp timeout".to_string()),
            })
            .await
            .unwrap();
        store
            .create_delivery(&NewDelivery {
                task_id: task.id,
                email_to: "test@example.com".to_string(),
                status: DeliveryStatus::Sent.as_str().to_string(),
                sent_at: Some(Utc::now()),
                error: None,
            })
            .await
            .unwrap();

        let rows = store.list_deliveries(task.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, "FAILED");
        assert_eq!(rows[1].status, "SENT");
    }

    #[tokio::test]
    async fn test_list_tasks_newest_first_with_paging() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            let comment = store
                .create_comment(&new_comment(&format!("uid-{}", i)))
                .await
                .unwrap();
            store.create_task(&new_task(comment.id)).await.unwrap();
        }

        let page = store.list_tasks(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].id > page[1].id);

        let rest = store.list_tasks(10, 2).await.unwrap();
        assert_eq!(rest.len(), 3);
    }
}
