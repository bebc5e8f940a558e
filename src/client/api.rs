//! REST calls a watch party client makes before and after its socket session.

use reqwest::{RequestBuilder, Response};
use url::Url;

use crate::db::models::UserSummary;
use crate::error::{AppError, AppResult, ErrorResponse};
use crate::routes::viewer::{DISPLAY_NAME_HEADER, USERNAME_HEADER, USER_ID_HEADER};
use crate::services::watch_party::JoinOutcome;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    viewer: UserSummary,
}

impl ApiClient {
    pub fn new(server_url: &str, viewer: UserSummary) -> AppResult<Self> {
        let base = Url::parse(server_url)
            .map_err(|e| AppError::BadRequest(format!("Invalid server URL: {}", e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            viewer,
        })
    }

    pub fn server_url(&self) -> &Url {
        &self.base
    }

    pub fn viewer(&self) -> &UserSummary {
        &self.viewer
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.base
            .join(path)
            .map_err(|e| AppError::BadRequest(format!("Invalid path {}: {}", path, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        viewer_headers(&self.viewer)
            .into_iter()
            .fold(request, |request, (name, value)| request.header(name, value))
    }

    /// Joins the active party on `stream_id`, starting one if the stream is live.
    pub async fn join(&self, stream_id: &str) -> AppResult<JoinOutcome> {
        let url = self.endpoint(&format!(
            "/api/streams/{}/watch-party/join",
            urlencoding::encode(stream_id)
        ))?;
        let response = send(self.authorized(self.http.post(url))).await?;
        response
            .json::<JoinOutcome>()
            .await
            .map_err(|e| AppError::Transport(format!("Invalid join response: {}", e)))
    }

    pub async fn leave(&self, party_id: &str) -> AppResult<()> {
        let url = self.endpoint(&format!(
            "/api/watch-parties/{}/leave",
            urlencoding::encode(party_id)
        ))?;
        send(self.authorized(self.http.post(url))).await?;
        Ok(())
    }
}

/// Identity headers the server reads the viewer from, on REST calls and the
/// socket upgrade alike.
pub(crate) fn viewer_headers(viewer: &UserSummary) -> [(&'static str, String); 3] {
    [
        (USER_ID_HEADER, viewer.id.clone()),
        (USERNAME_HEADER, viewer.username.clone()),
        (
            DISPLAY_NAME_HEADER,
            urlencoding::encode(&viewer.display_name).into_owned(),
        ),
    ]
}

/// Sends `request` and turns an error status back into the server's `AppError`.
async fn send(request: RequestBuilder) -> AppResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => Err(AppError::from_wire(&parsed.error.code, parsed.error.message)),
        Err(_) => Err(AppError::Transport(format!("HTTP {}: {}", status, body))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer() -> UserSummary {
        UserSummary {
            id: "7".into(),
            username: "fan".into(),
            display_name: "Big Fan".into(),
        }
    }

    #[test]
    fn endpoints_resolve_against_the_base() {
        let client = ApiClient::new("http://localhost:8080/", viewer()).unwrap();
        assert_eq!(
            client.endpoint("/api/watch-parties/p 1/leave").unwrap().as_str(),
            "http://localhost:8080/api/watch-parties/p%201/leave"
        );
    }

    #[test]
    fn display_name_header_is_percent_encoded() {
        let headers = viewer_headers(&viewer());
        assert_eq!(headers[0], (USER_ID_HEADER, "7".to_string()));
        assert_eq!(headers[2], (DISPLAY_NAME_HEADER, "Big%20Fan".to_string()));
    }

    #[test]
    fn invalid_server_url_is_rejected() {
        assert!(matches!(
            ApiClient::new("::nope", viewer()),
            Err(AppError::BadRequest(_))
        ));
    }
}
