//! Demo fixtures loaded into the in-memory store at startup.

use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::db::models::{
    ChatMessage, ChatMessageType, CommunitySummary, DiscussionPost, Event, EventDetail, Platform,
    PostType, Stream, UserSummary,
};
use crate::db::repository::{ChatRepository, DiscussionRepository, MemoryStore};
use crate::error::AppResult;

pub const DEMO_EVENT_ID: &str = "1";

fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn user(id: &str, username: &str, display_name: &str) -> UserSummary {
    UserSummary {
        id: id.to_string(),
        username: username.to_string(),
        display_name: display_name.to_string(),
    }
}

pub fn demo_event() -> EventDetail {
    let created = ts(2024, 1, 1, 0, 0);
    let scheduled = ts(2024, 1, 20, 19, 0);

    let streams = vec![
        Stream {
            id: "stream1".to_string(),
            platform: Platform::Twitch,
            external_id: "epicgaming".to_string(),
            title: "Main Tournament Stream".to_string(),
            scheduled_start: Some(scheduled),
            started_at: Some(ts(2024, 1, 20, 19, 5)),
            ended_at: None,
            url: "https://twitch.tv/epicgaming".to_string(),
            created_at: created,
            event_id: Some(DEMO_EVENT_ID.to_string()),
            community_id: Some("community1".to_string()),
        },
        Stream {
            id: "stream2".to_string(),
            platform: Platform::Youtube,
            external_id: "dQw4w9WgXcQ".to_string(),
            title: "Commentary Stream".to_string(),
            scheduled_start: Some(scheduled),
            started_at: None,
            ended_at: None,
            url: "https://youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            created_at: created,
            event_id: Some(DEMO_EVENT_ID.to_string()),
            community_id: Some("community1".to_string()),
        },
    ];

    EventDetail {
        event: Event {
            id: DEMO_EVENT_ID.to_string(),
            title: "Epic Gaming Tournament Finals".to_string(),
            description: "Join us for the most exciting gaming tournament of the year! Watch as \
                the top players compete for the championship title in this thrilling finale. \
                Experience live commentary, exclusive interviews, and behind-the-scenes content."
                .to_string(),
            starts_at: scheduled,
            ends_at: ts(2024, 1, 20, 23, 0),
            location: Some("Virtual Event".to_string()),
            organizer_id: "org1".to_string(),
            community_id: Some("community1".to_string()),
            created_at: created,
            updated_at: created,
            streams,
        },
        attendees: vec![
            user("1", "gamer1", "Pro Gamer"),
            user("2", "viewer2", "Gaming Fan"),
            user("3", "streamer3", "Content Creator"),
        ],
        community: Some(CommunitySummary {
            id: "community1".to_string(),
            name: "Epic Gaming Community".to_string(),
            slug: "epic-gaming".to_string(),
        }),
    }
}

pub fn demo_chat(stream_id: &str, now: DateTime<Utc>) -> Vec<ChatMessage> {
    let entry = |id: &str, user_id: &str, username: &str, name: &str, text: &str, ago: i64, kind| {
        ChatMessage {
            id: id.to_string(),
            stream_id: stream_id.to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            display_name: name.to_string(),
            message: text.to_string(),
            timestamp: now - Duration::seconds(ago),
            message_type: kind,
        }
    };

    vec![
        entry(
            "1",
            "user1",
            "gamer123",
            "Gamer123",
            "This stream is amazing! 🔥",
            300,
            ChatMessageType::Message,
        ),
        entry(
            "2",
            "user2",
            "animefan",
            "AnimeFan",
            "Just joined! What did I miss?",
            240,
            ChatMessageType::Message,
        ),
        entry(
            "3",
            "system",
            "system",
            "System",
            "ComicLover joined the watch party",
            180,
            ChatMessageType::Join,
        ),
    ]
}

pub fn demo_discussion(event_id: &str, now: DateTime<Utc>) -> Vec<DiscussionPost> {
    let post = |id: &str, author: (&str, &str, &str), content: &str, kind, ago: i64| {
        DiscussionPost {
            id: id.to_string(),
            event_id: event_id.to_string(),
            parent_id: None,
            author_id: author.0.to_string(),
            author_username: author.1.to_string(),
            author_display_name: author.2.to_string(),
            content: content.to_string(),
            post_type: kind,
            media_url: None,
            media_type: None,
            external_url: None,
            created_at: now - Duration::seconds(ago),
            likes: 0,
            replies: 0,
            is_pinned: false,
            liked_by: HashSet::new(),
        }
    };

    let mut welcome = post(
        "1",
        ("user1", "eventorganizer", "Event Organizer"),
        "Welcome everyone! Thanks for joining our event. Feel free to share your thoughts and \
         connect with other attendees here.",
        PostType::EventAnnouncement,
        3600,
    );
    welcome.likes = 15;
    welcome.replies = 8;
    welcome.is_pinned = true;

    let mut highlight = post(
        "2",
        ("user2", "gamer123", "Gamer123"),
        "This was an amazing stream! That final boss fight was incredible. Anyone else think the \
         new mechanics are game-changing?",
        PostType::StreamHighlight,
        1800,
    );
    // Liked by the demo viewer, counted in `likes`.
    highlight.likes = 23;
    highlight.replies = 12;
    highlight.liked_by.insert("current-user".to_string());

    let mut review = post(
        "3",
        ("user3", "reviewer", "Game Reviewer"),
        "Just published my review of the game featured in today's stream. The graphics \
         improvements are substantial compared to the previous version.",
        PostType::Review,
        900,
    );
    review.likes = 8;
    review.replies = 3;
    review.external_url = Some("https://example.com/review".to_string());

    vec![welcome, highlight, review]
}

/// Builds a store populated with the demo event, its chat and discussion.
pub async fn seeded_store(chat_history_limit: usize, now: DateTime<Utc>) -> AppResult<MemoryStore> {
    let store = MemoryStore::new(chat_history_limit);
    let event = demo_event();
    let stream_ids: Vec<String> = event.event.streams.iter().map(|s| s.id.clone()).collect();
    store.insert_event(event).await;

    for stream_id in &stream_ids {
        for message in demo_chat(stream_id, now) {
            ChatRepository::append(&store, message).await?;
        }
    }

    // Inserted oldest first so the list reads newest first.
    let mut posts = demo_discussion(DEMO_EVENT_ID, now);
    posts.sort_by_key(|p| p.created_at);
    for post in posts {
        DiscussionRepository::insert(&store, post).await?;
    }

    tracing::debug!("Seeded demo event {} with {} streams", DEMO_EVENT_ID, stream_ids.len());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_fixtures_hold_their_invariants() {
        let event = demo_event();
        assert!(event.event.has_valid_window());
        assert!(event.event.streams.iter().all(Stream::has_valid_timestamps));
    }

    #[tokio::test]
    async fn seeded_discussion_is_newest_first() {
        let store = seeded_store(50, Utc::now()).await.unwrap();
        let posts = DiscussionRepository::list(&store, DEMO_EVENT_ID).await.unwrap();
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["3", "2", "1"]);
    }
}
