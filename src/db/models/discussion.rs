use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostType {
    Text,
    Media,
    Review,
    News,
    EventAnnouncement,
    StreamHighlight,
}

impl PostType {
    pub fn label(self) -> &'static str {
        match self {
            PostType::EventAnnouncement => "Announcement",
            PostType::StreamHighlight => "Highlight",
            PostType::Review => "Review",
            PostType::News => "News",
            PostType::Media => "Media",
            PostType::Text => "Post",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostFilter {
    #[default]
    All,
    Pinned,
    Highlights,
}

impl PostFilter {
    pub fn matches(self, post: &DiscussionPost) -> bool {
        match self {
            PostFilter::All => true,
            PostFilter::Pinned => post.is_pinned,
            PostFilter::Highlights => post.post_type == PostType::StreamHighlight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionPost {
    pub id: String,
    pub event_id: String,
    /// Set on replies; top-level posts have none.
    pub parent_id: Option<String>,
    pub author_id: String,
    pub author_username: String,
    pub author_display_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub external_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub likes: u32,
    pub replies: u32,
    pub is_pinned: bool,
    /// Viewers who currently like the post.
    #[serde(skip)]
    pub liked_by: HashSet<String>,
}

impl DiscussionPost {
    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.liked_by.contains(user_id)
    }

    /// Flips `user_id`'s like and moves `likes` by exactly one.
    /// Returns whether the post is now liked by that viewer.
    pub fn toggle_like(&mut self, user_id: &str) -> bool {
        if self.liked_by.remove(user_id) {
            self.likes = self.likes.saturating_sub(1);
            false
        } else {
            self.liked_by.insert(user_id.to_string());
            self.likes += 1;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(likes: u32) -> DiscussionPost {
        DiscussionPost {
            id: "1".into(),
            event_id: "1".into(),
            parent_id: None,
            author_id: "a".into(),
            author_username: "a".into(),
            author_display_name: "A".into(),
            content: "hello".into(),
            post_type: PostType::Text,
            media_url: None,
            media_type: None,
            external_url: None,
            created_at: Utc::now(),
            likes,
            replies: 0,
            is_pinned: false,
            liked_by: HashSet::new(),
        }
    }

    #[test]
    fn like_round_trip_restores_count() {
        let mut p = post(15);
        assert!(p.toggle_like("viewer"));
        assert_eq!(p.likes, 16);
        assert!(p.is_liked_by("viewer"));
        assert!(!p.toggle_like("viewer"));
        assert_eq!(p.likes, 15);
        assert!(!p.is_liked_by("viewer"));
    }

    #[test]
    fn likes_are_per_viewer() {
        let mut p = post(0);
        p.toggle_like("a");
        p.toggle_like("b");
        assert_eq!(p.likes, 2);
        p.toggle_like("a");
        assert_eq!(p.likes, 1);
        assert!(p.is_liked_by("b"));
    }

    #[test]
    fn filters_select_by_flag_and_type() {
        let mut pinned = post(0);
        pinned.is_pinned = true;
        let mut highlight = post(0);
        highlight.post_type = PostType::StreamHighlight;

        assert!(PostFilter::All.matches(&pinned));
        assert!(PostFilter::Pinned.matches(&pinned));
        assert!(!PostFilter::Pinned.matches(&highlight));
        assert!(PostFilter::Highlights.matches(&highlight));
        assert!(!PostFilter::Highlights.matches(&pinned));
    }

    #[test]
    fn post_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&PostType::StreamHighlight).unwrap(),
            "\"STREAM_HIGHLIGHT\""
        );
        assert_eq!(PostType::Text.label(), "Post");
    }
}
