use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::db::models::UserSummary;
use crate::error::AppError;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";
/// Percent-encoded so display names may carry non-ASCII text.
pub const DISPLAY_NAME_HEADER: &str = "x-display-name";

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn viewer_from_parts(parts: &Parts) -> Option<UserSummary> {
    let id = header(parts, USER_ID_HEADER)?;
    let username = header(parts, USERNAME_HEADER).unwrap_or_else(|| id.clone());
    let display_name = header(parts, DISPLAY_NAME_HEADER)
        .and_then(|raw| urlencoding::decode(&raw).ok().map(|s| s.into_owned()))
        .unwrap_or_else(|| username.clone());
    Some(UserSummary {
        id,
        username,
        display_name,
    })
}

/// The viewer identified by the gateway-set `X-User-Id` header.
pub struct Viewer(pub UserSummary);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        viewer_from_parts(parts).map(Viewer).ok_or_else(|| {
            tracing::debug!("Missing {} header", USER_ID_HEADER);
            AppError::Unauthorized
        })
    }
}

/// Like `Viewer`, for endpoints that also serve anonymous visitors.
pub struct MaybeViewer(pub Option<UserSummary>);

impl MaybeViewer {
    pub fn id(&self) -> Option<&str> {
        self.0.as_ref().map(|v| v.id.as_str())
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeViewer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeViewer(viewer_from_parts(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut req = Request::builder();
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req.body(()).unwrap().into_parts().0
    }

    #[test]
    fn names_default_to_the_user_id() {
        let v = viewer_from_parts(&parts(&[(USER_ID_HEADER, "u1")])).unwrap();
        assert_eq!(v.username, "u1");
        assert_eq!(v.display_name, "u1");
    }

    #[test]
    fn display_name_is_percent_decoded() {
        let v = viewer_from_parts(&parts(&[
            (USER_ID_HEADER, "u1"),
            (USERNAME_HEADER, "otaku"),
            (DISPLAY_NAME_HEADER, "Ren%C3%A9"),
        ]))
        .unwrap();
        assert_eq!(v.username, "otaku");
        assert_eq!(v.display_name, "René");
    }

    #[test]
    fn blank_id_is_anonymous() {
        assert!(viewer_from_parts(&parts(&[(USER_ID_HEADER, "  ")])).is_none());
        assert!(viewer_from_parts(&parts(&[])).is_none());
    }
}
