use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{DiscussionPost, PostFilter, PostType, UserSummary};
use crate::db::repository::{DiscussionRepository, EventRepository};
use crate::error::{AppError, AppResult};
use crate::services::format::format_time_ago;

/// A post as one viewer sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    pub post: DiscussionPost,
    pub is_liked: bool,
    pub type_label: &'static str,
    pub time_ago: String,
}

impl PostView {
    pub fn new(post: DiscussionPost, viewer_id: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            is_liked: viewer_id.map(|id| post.is_liked_by(id)).unwrap_or(false),
            type_label: post.post_type.label(),
            time_ago: format_time_ago(post.created_at, now),
            post,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub content: String,
    #[serde(rename = "type", default = "default_post_type")]
    pub post_type: PostType,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub external_url: Option<String>,
}

fn default_post_type() -> PostType {
    PostType::Text
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub post_id: String,
    pub is_liked: bool,
    pub likes: u32,
}

pub struct DiscussionService {
    posts: Arc<dyn DiscussionRepository>,
    events: Arc<dyn EventRepository>,
    max_post_length: usize,
}

impl DiscussionService {
    pub fn new(
        posts: Arc<dyn DiscussionRepository>,
        events: Arc<dyn EventRepository>,
        max_post_length: usize,
    ) -> Self {
        Self {
            posts,
            events,
            max_post_length,
        }
    }

    async fn ensure_event(&self, event_id: &str) -> AppResult<()> {
        self.events
            .find_by_id(event_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))
    }

    async fn find_post(&self, post_id: &str) -> AppResult<DiscussionPost> {
        self.posts
            .find(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))
    }

    fn validate_content(&self, content: &str) -> AppResult<String> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("Post cannot be empty".to_string()));
        }
        if content.chars().count() > self.max_post_length {
            return Err(AppError::Validation(format!(
                "Post exceeds {} characters",
                self.max_post_length
            )));
        }
        Ok(content.to_string())
    }

    /// Top-level posts, newest first, narrowed by `filter`.
    pub async fn list(
        &self,
        event_id: &str,
        filter: PostFilter,
        viewer_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<PostView>> {
        self.ensure_event(event_id).await?;
        Ok(self
            .posts
            .list(event_id)
            .await?
            .into_iter()
            .filter(|p| filter.matches(p))
            .map(|p| PostView::new(p, viewer_id, now))
            .collect())
    }

    pub async fn submit(
        &self,
        event_id: &str,
        author: &UserSummary,
        new_post: NewPost,
        now: DateTime<Utc>,
    ) -> AppResult<PostView> {
        let content = self.validate_content(&new_post.content)?;
        self.ensure_event(event_id).await?;

        let post = DiscussionPost {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            parent_id: None,
            author_id: author.id.clone(),
            author_username: author.username.clone(),
            author_display_name: author.display_name.clone(),
            content,
            post_type: new_post.post_type,
            media_url: new_post.media_url,
            media_type: new_post.media_type,
            external_url: new_post.external_url,
            created_at: now,
            likes: 0,
            replies: 0,
            is_pinned: false,
            liked_by: HashSet::new(),
        };
        self.posts.insert(post.clone()).await?;
        tracing::debug!("Post {} added to event {}", post.id, event_id);
        Ok(PostView::new(post, Some(&author.id), now))
    }

    pub async fn toggle_like(&self, post_id: &str, viewer_id: &str) -> AppResult<LikeOutcome> {
        let post = self
            .posts
            .toggle_like(post_id, viewer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;
        Ok(LikeOutcome {
            post_id: post.id.clone(),
            is_liked: post.is_liked_by(viewer_id),
            likes: post.likes,
        })
    }

    pub async fn reply(
        &self,
        post_id: &str,
        author: &UserSummary,
        content: &str,
        now: DateTime<Utc>,
    ) -> AppResult<PostView> {
        let content = self.validate_content(content)?;
        let parent = self.find_post(post_id).await?;

        let reply = DiscussionPost {
            id: Uuid::new_v4().to_string(),
            event_id: parent.event_id.clone(),
            parent_id: Some(parent.id.clone()),
            author_id: author.id.clone(),
            author_username: author.username.clone(),
            author_display_name: author.display_name.clone(),
            content,
            post_type: PostType::Text,
            media_url: None,
            media_type: None,
            external_url: None,
            created_at: now,
            likes: 0,
            replies: 0,
            is_pinned: false,
            liked_by: HashSet::new(),
        };
        self.posts
            .add_reply(reply.clone())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;
        Ok(PostView::new(reply, Some(&author.id), now))
    }

    pub async fn replies(
        &self,
        post_id: &str,
        viewer_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<PostView>> {
        self.find_post(post_id).await?;
        Ok(self
            .posts
            .replies(post_id)
            .await?
            .into_iter()
            .map(|p| PostView::new(p, viewer_id, now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::seed::{seeded_store, DEMO_EVENT_ID};

    async fn service() -> DiscussionService {
        let store = Arc::new(seeded_store(50, Utc::now()).await.unwrap());
        DiscussionService::new(store.clone(), store, 500)
    }

    fn author() -> UserSummary {
        UserSummary {
            id: "current-user".into(),
            username: "me".into(),
            display_name: "Me".into(),
        }
    }

    fn text(content: &str) -> NewPost {
        NewPost {
            content: content.into(),
            post_type: PostType::Text,
            media_url: None,
            media_type: None,
            external_url: None,
        }
    }

    #[tokio::test]
    async fn filters_narrow_the_listing() {
        let svc = service().await;
        let now = Utc::now();
        let ids = |v: Vec<PostView>| v.into_iter().map(|p| p.post.id).collect::<Vec<_>>();

        let all = svc.list(DEMO_EVENT_ID, PostFilter::All, None, now).await.unwrap();
        assert_eq!(ids(all), ["3", "2", "1"]);
        let pinned = svc.list(DEMO_EVENT_ID, PostFilter::Pinned, None, now).await.unwrap();
        assert_eq!(ids(pinned), ["1"]);
        let highlights = svc
            .list(DEMO_EVENT_ID, PostFilter::Highlights, None, now)
            .await
            .unwrap();
        assert_eq!(ids(highlights), ["2"]);
    }

    #[tokio::test]
    async fn new_posts_are_prepended() {
        let svc = service().await;
        let now = Utc::now();
        let view = svc
            .submit(DEMO_EVENT_ID, &author(), text("  first!  "), now)
            .await
            .unwrap();
        assert_eq!(view.post.content, "first!");
        assert_eq!(view.time_ago, "just now");

        let all = svc.list(DEMO_EVENT_ID, PostFilter::All, None, now).await.unwrap();
        assert_eq!(all[0].post.id, view.post.id);
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn blank_post_leaves_collection_unchanged() {
        let svc = service().await;
        let now = Utc::now();
        assert!(matches!(
            svc.submit(DEMO_EVENT_ID, &author(), text("   "), now).await,
            Err(AppError::Validation(_))
        ));
        let all = svc.list(DEMO_EVENT_ID, PostFilter::All, None, now).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn double_like_restores_count() {
        let svc = service().await;
        let first = svc.toggle_like("1", "viewer").await.unwrap();
        assert!(first.is_liked);
        assert_eq!(first.likes, 16);
        let second = svc.toggle_like("1", "viewer").await.unwrap();
        assert!(!second.is_liked);
        assert_eq!(second.likes, 15);
    }

    #[tokio::test]
    async fn seeded_like_is_visible_to_its_viewer() {
        let svc = service().await;
        let all = svc
            .list(DEMO_EVENT_ID, PostFilter::Highlights, Some("current-user"), Utc::now())
            .await
            .unwrap();
        assert!(all[0].is_liked);
        let unliked = svc.toggle_like("2", "current-user").await.unwrap();
        assert_eq!(unliked.likes, 22);
    }

    #[tokio::test]
    async fn replies_bump_parent_and_stay_out_of_listing() {
        let svc = service().await;
        let now = Utc::now();
        let reply = svc.reply("3", &author(), "Great review", now).await.unwrap();
        assert_eq!(reply.post.parent_id.as_deref(), Some("3"));

        let replies = svc.replies("3", None, now).await.unwrap();
        assert_eq!(replies.len(), 1);

        let all = svc.list(DEMO_EVENT_ID, PostFilter::All, None, now).await.unwrap();
        assert_eq!(all.len(), 3);
        let parent = all.iter().find(|p| p.post.id == "3").unwrap();
        assert_eq!(parent.post.replies, 4);
    }

    #[tokio::test]
    async fn unknown_targets_are_not_found() {
        let svc = service().await;
        assert!(matches!(
            svc.toggle_like("missing", "viewer").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            svc.list("missing", PostFilter::All, None, Utc::now()).await,
            Err(AppError::NotFound(_))
        ));
    }
}
