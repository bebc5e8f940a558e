use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, Response},
    middleware::Next,
};

/// Player frames the event page embeds.
const CSP: &str = "default-src 'self'; script-src 'self' https://www.youtube.com https://player.twitch.tv; connect-src 'self' ws: wss:; img-src 'self' https:; frame-src https://player.twitch.tv https://www.youtube.com; object-src 'none'; base-uri 'self'; form-action 'self'; frame-ancestors 'self'";

/// Adds a Content-Security-Policy and a couple of hardening headers unless a
/// handler already set them.
pub async fn csp_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    for (name, value) in [
        ("content-security-policy", CSP),
        ("referrer-policy", "strict-origin-when-cross-origin"),
        ("x-content-type-options", "nosniff"),
    ] {
        let name = HeaderName::from_static(name);
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }

    res
}
