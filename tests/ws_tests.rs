use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fandom_events::client::{ApiClient, ClientConfig, ConnectionState, WatchPartyClient};
use fandom_events::config::Config;
use fandom_events::db::models::{ChatMessage, UserSummary};
use fandom_events::services::embed::{PlaybackSnapshot, PlaybackSource};
use fandom_events::services::init::build_state;
use fandom_events::services::sync::SyncStatus;
use fandom_events::services::watch_party::JoinOutcome;
use fandom_events::build_router;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, Message};
use tokio_tungstenite::connect_async;

const WAIT: Duration = Duration::from_secs(5);

async fn serve() -> String {
    let state = build_state(Config::default()).await.unwrap();
    let app = build_router(state, std::convert::identity, std::convert::identity);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn viewer(id: &str) -> UserSummary {
    UserSummary {
        id: id.into(),
        username: format!("user{}", id),
        display_name: format!("Viewer {}", id),
    }
}

async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let value = rx.borrow_and_update();
                if pred(&*value) {
                    return value.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("timed out waiting for state")
}

fn client(api: &ApiClient, joined: &JoinOutcome) -> WatchPartyClient {
    let config = ClientConfig::for_join(api, joined, &Config::default());
    WatchPartyClient::spawn(config).unwrap()
}

fn upgrade_status(result: Result<impl Sized, tungstenite::Error>) -> u16 {
    match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("expected an HTTP refusal, got {}", e),
        Ok(_) => panic!("expected the upgrade to be refused"),
    }
}

#[tokio::test]
async fn host_controls_reach_other_participants() {
    let server = serve().await;
    let host_api = ApiClient::new(&server, viewer("h")).unwrap();
    let guest_api = ApiClient::new(&server, viewer("g")).unwrap();

    let hosted = host_api.join("stream1").await.unwrap();
    assert!(hosted.created);
    let joined = guest_api.join("stream1").await.unwrap();
    assert_eq!(joined.party.id, hosted.party.id);

    let host = client(&host_api, &hosted);
    let guest = client(&guest_api, &joined);

    let mut host_conn = host.subscribe_connection();
    wait_for(&mut host_conn, |s| *s == ConnectionState::Connected).await;
    let mut guest_party = guest.subscribe_party();
    wait_for(&mut guest_party, |p| {
        p.as_ref().map(|p| p.participants.len() == 2).unwrap_or(false)
    })
    .await;
    assert!(host.is_host());
    assert!(!guest.is_host());

    host.toggle_play_pause().unwrap();
    let party = wait_for(&mut guest_party, |p| {
        p.as_ref().map(|p| !p.is_playing).unwrap_or(false)
    })
    .await
    .unwrap();
    assert_eq!(party.host_id, hosted.participant.id);
    assert!(!guest.playback().is_playing);

    host.shutdown().await;
    guest.shutdown().await;
}

struct FixedPlayer(PlaybackSnapshot);

#[async_trait]
impl PlaybackSource for FixedPlayer {
    async fn snapshot(&self) -> Option<PlaybackSnapshot> {
        Some(self.0)
    }
}

#[tokio::test]
async fn host_player_drives_guest_replica() {
    let server = serve().await;
    let host_api = ApiClient::new(&server, viewer("h")).unwrap();
    let guest_api = ApiClient::new(&server, viewer("g")).unwrap();
    let hosted = host_api.join("stream1").await.unwrap();
    let joined = guest_api.join("stream1").await.unwrap();

    let mut host_config = ClientConfig::for_join(&host_api, &hosted, &Config::default());
    host_config.poll_interval = Duration::from_millis(50);
    let host = WatchPartyClient::spawn(host_config).unwrap();
    let guest = client(&guest_api, &joined);

    let mut host_party = host.subscribe_party();
    wait_for(&mut host_party, |p| p.is_some()).await;
    let mut guest_sync = guest.subscribe_sync();

    let _poller = host.attach_player(Arc::new(FixedPlayer(PlaybackSnapshot {
        current_time: 120.0,
        is_playing: true,
    })));

    // The guest's own player sits at 0s, far behind the host.
    wait_for(&mut guest_sync, |s| *s == SyncStatus::OutOfSync).await;
    assert_eq!(guest.playback().host_time, 120.0);

    assert_eq!(guest.request_sync(), Some(120.0));
    assert_eq!(guest.playback().current_time, 120.0);

    host.shutdown().await;
    guest.shutdown().await;
}

#[tokio::test]
async fn leaving_closes_the_client_and_hands_off_host() {
    let server = serve().await;
    let host_api = ApiClient::new(&server, viewer("h")).unwrap();
    let guest_api = ApiClient::new(&server, viewer("g")).unwrap();
    let hosted = host_api.join("stream1").await.unwrap();
    let joined = guest_api.join("stream1").await.unwrap();

    let host = client(&host_api, &hosted);
    let guest = client(&guest_api, &joined);
    let mut host_conn = host.subscribe_connection();
    wait_for(&mut host_conn, |s| *s == ConnectionState::Connected).await;
    let mut guest_conn = guest.subscribe_connection();
    wait_for(&mut guest_conn, |s| *s == ConnectionState::Connected).await;

    host.leave().unwrap();
    wait_for(&mut host_conn, ConnectionState::is_closed).await;

    let mut guest_party = guest.subscribe_party();
    let party = wait_for(&mut guest_party, |p| {
        p.as_ref()
            .map(|p| p.host_id == joined.participant.id)
            .unwrap_or(false)
    })
    .await
    .unwrap();
    assert_eq!(party.participants.len(), 1);
    assert!(guest.is_host());

    guest.shutdown().await;
}

#[tokio::test]
async fn strangers_are_refused_without_retrying() {
    let server = serve().await;
    let host_api = ApiClient::new(&server, viewer("h")).unwrap();
    let hosted = host_api.join("stream1").await.unwrap();

    // A viewer outside the party reusing the host's join details.
    let stranger_api = ApiClient::new(&server, viewer("s")).unwrap();
    let stranger = client(&stranger_api, &hosted);
    let mut conn = stranger.subscribe_connection();
    wait_for(&mut conn, ConnectionState::is_closed).await;
    assert!(stranger.party().is_none());
}

#[tokio::test]
async fn knowing_the_host_id_does_not_grant_control() {
    let server = serve().await;
    let host_api = ApiClient::new(&server, viewer("h")).unwrap();
    let hosted = host_api.join("stream1").await.unwrap();
    let host_id = hosted.party.host_id.clone();
    let socket_url = format!(
        "{}/ws/watch-parties/{}?participant_id={}",
        server.replacen("http", "ws", 1),
        hosted.party.id,
        host_id
    );

    let anonymous = connect_async(socket_url.as_str()).await;
    assert_eq!(upgrade_status(anonymous), 401);

    let mut request = socket_url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-user-id", "someone-else".parse().unwrap());
    assert_eq!(upgrade_status(connect_async(request).await), 403);

    let party = reqwest::get(format!("{}/api/watch-parties/{}", server, hosted.party.id))
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(party["isPlaying"], true);
    assert_eq!(party["hostId"], host_id.as_str());
}

#[tokio::test]
async fn chat_socket_streams_posted_messages() {
    let server = serve().await;
    let ws_url = format!("{}/ws/streams/stream1/chat", server.replacen("http", "ws", 1));
    let (mut socket, _) = connect_async(ws_url.as_str()).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/api/streams/stream1/chat", server))
        .header("x-user-id", "42")
        .header("x-username", "fan42")
        .header("x-display-name", "Fan%2042")
        .json(&serde_json::json!({ "message": "hello party" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let frame = tokio::time::timeout(WAIT, socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = match frame {
        Message::Text(text) => text,
        other => panic!("expected a text frame, got {:?}", other),
    };
    let message: ChatMessage = serde_json::from_str(&text).unwrap();
    assert_eq!(message.message, "hello party");
    assert_eq!(message.display_name, "Fan 42");
}
