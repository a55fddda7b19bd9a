//! In-memory mock connector
//!
//! Deterministic fixture comments per note target with a page size of 50.
//! The cursor is the id of the last returned comment; a page resumes
//! right after it (linear scan).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::WorkerResult;

use super::{CommentPage, Connector, SourceComment};

const PAGE_SIZE: usize = 50;

pub struct MockConnector {
    comments: RwLock<HashMap<String, Vec<SourceComment>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        let connector = Self {
            comments: RwLock::new(HashMap::new()),
        };
        connector.seed_fixtures();
        connector
    }

    /// Empty connector; pair with [`MockConnector::push_comment`]
    pub fn empty() -> Self {
        Self {
            comments: RwLock::new(HashMap::new()),
        }
    }

    fn seed_fixtures(&self) {
        let now = Utc::now();
        let fixtures = vec![
            SourceComment {
                comment_id: "mock_001".to_string(),
                user_name: "测试用户1".to_string(),
                content: "帮我画一张可爱的猫咪图片，邮箱：test1@example.com".to_string(),
                comment_created_at: Some(now - Duration::hours(2)),
            },
            SourceComment {
                comment_id: "mock_002".to_string(),
                user_name: "测试用户2".to_string(),
                content: "能生成一个视频吗？主题是海边日落，contact@demo.com".to_string(),
                comment_created_at: Some(now - Duration::hours(1)),
            },
            SourceComment {
                comment_id: "mock_003".to_string(),
                user_name: "测试用户3".to_string(),
                content: "这个笔记真好看！".to_string(),
                comment_created_at: Some(now - Duration::minutes(30)),
            },
            SourceComment {
                comment_id: "mock_004".to_string(),
                user_name: "测试用户4".to_string(),
                content: "AI生成一张赛博朋克风格的图片，myemail@company.com".to_string(),
                comment_created_at: Some(now - Duration::minutes(15)),
            },
            SourceComment {
                comment_id: "mock_005".to_string(),
                user_name: "测试用户5".to_string(),
                content: "做个视频，内容是城市夜景，sendto@user.org".to_string(),
                comment_created_at: Some(now - Duration::minutes(5)),
            },
            SourceComment {
                comment_id: "mock_006".to_string(),
                user_name: "测试用户6".to_string(),
                content: "出图！风景画，风格是油画，art@studio.com".to_string(),
                comment_created_at: Some(now),
            },
        ];

        self.comments
            .write()
            .unwrap()
            .insert("default".to_string(), fixtures);
    }

    /// Append a comment under a note target (test support)
    pub fn push_comment(&self, note_target: &str, comment: SourceComment) {
        self.comments
            .write()
            .unwrap()
            .entry(note_target.to_string())
            .or_default()
            .push(comment);
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn list_comments(&self, note_target: &str, cursor: &str) -> WorkerResult<CommentPage> {
        let comments = self.comments.read().unwrap();
        let list = comments
            .get(note_target)
            .or_else(|| comments.get("default"))
            .cloned()
            .unwrap_or_default();

        let start = if cursor.is_empty() {
            0
        } else {
            list.iter()
                .position(|c| c.comment_id == cursor)
                .map(|i| i + 1)
                .unwrap_or(0)
        };

        let end = (start + PAGE_SIZE).min(list.len());
        let page: Vec<SourceComment> = list[start..end].to_vec();

        let has_more = end < list.len();
        let next_cursor = if has_more && end > 0 {
            list[end - 1].comment_id.clone()
        } else {
            String::new()
        };

        Ok(CommentPage {
            comments: page,
            next_cursor,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: usize) -> SourceComment {
        SourceComment {
            comment_id: format!("c_{:03}", id),
            user_name: format!("user{}", id),
            content: format!("comment {}", id),
            comment_created_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_fixtures_fit_one_page() {
        let connector = MockConnector::new();
        let page = connector.list_comments("default", "").await.unwrap();

        assert_eq!(page.comments.len(), 6);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_empty());
        assert_eq!(page.comments[0].comment_id, "mock_001");
    }

    #[tokio::test]
    async fn test_unknown_target_falls_back_to_default_fixtures() {
        let connector = MockConnector::new();
        let page = connector.list_comments("whatever", "").await.unwrap();
        assert_eq!(page.comments.len(), 6);
    }

    #[tokio::test]
    async fn test_pagination_advances_by_cursor() {
        let connector = MockConnector::empty();
        for i in 0..120 {
            connector.push_comment("note-1", comment(i));
        }

        let first = connector.list_comments("note-1", "").await.unwrap();
        assert_eq!(first.comments.len(), 50);
        assert!(first.has_more);
        assert_eq!(first.next_cursor, "c_049");

        let second = connector
            .list_comments("note-1", &first.next_cursor)
            .await
            .unwrap();
        assert_eq!(second.comments[0].comment_id, "c_050");
        assert!(second.has_more);

        let third = connector
            .list_comments("note-1", &second.next_cursor)
            .await
            .unwrap();
        assert_eq!(third.comments.len(), 20);
        assert!(!third.has_more);
        assert!(third.next_cursor.is_empty());
    }

    #[tokio::test]
    async fn test_same_cursor_returns_same_page() {
        let connector = MockConnector::empty();
        for i in 0..60 {
            connector.push_comment("note-1", comment(i));
        }

        let a = connector.list_comments("note-1", "c_009").await.unwrap();
        let b = connector.list_comments("note-1", "c_009").await.unwrap();
        assert_eq!(a.comments.len(), b.comments.len());
        assert_eq!(a.comments[0].comment_id, b.comments[0].comment_id);
    }
}
