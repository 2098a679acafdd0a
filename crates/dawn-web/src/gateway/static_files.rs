//! Static file serving with the auth gate.
//!
//! Mounted as the router fallback: anything that is not an API route or the
//! WebSocket upgrade lands here. Unauthenticated requests to protected
//! paths are redirected to the login page; traversal attempts are refused
//! before any filesystem access.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::extract::cookie_value;
use crate::gateway::traversal;
use crate::state::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "dawn_session";

/// Default document served for `/`.
const DEFAULT_DOCUMENT: &str = "/index.html";

/// Paths reachable without a session cookie.
fn is_public_path(path: &str) -> bool {
    path == "/login.html"
        || path == "/favicon.svg"
        || path.starts_with("/css/")
        || path.starts_with("/fonts/")
}

/// Extension → MIME type. Unknown extensions fall back to octet-stream.
fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Fallback handler: serve a file from the document root.
pub async fn serve(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let raw_path = uri.path();

    if raw_path == "/" {
        return redirect_found(DEFAULT_DOCUMENT);
    }

    // Layer one: textual traversal filter on the raw request path.
    if traversal::has_traversal_tokens(raw_path) {
        warn!(path = raw_path, "traversal tokens in request path");
        return StatusCode::FORBIDDEN.into_response();
    }

    // The auth gate matches on the raw path; anything non-public needs a
    // valid cookie, re-validated against the auth store.
    if !is_public_path(raw_path) && !has_valid_session(&state, &headers).await {
        return redirect_found("/login.html");
    }

    // Decode once for filesystem lookup (spaces and friends).
    let decoded = percent_decode_path(raw_path);
    let candidate = traversal::resolve_request_path(&state.config.document_root, &decoded);

    // Layer two: canonicalized containment in the document root.
    if !traversal::is_path_within_root(&state.config.document_root, &candidate) {
        warn!(path = raw_path, "resolved path escapes document root");
        return StatusCode::FORBIDDEN.into_response();
    }

    match tokio::fs::read(&candidate).await {
        Ok(contents) => {
            debug!(path = raw_path, bytes = contents.len(), "served static file");
            (
                [(header::CONTENT_TYPE, content_type(&decoded))],
                contents,
            )
                .into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Validate the session cookie against the auth store. Never cached: a
/// revoked session loses access on its next request.
pub async fn has_valid_session(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(token) = cookie_value(headers, SESSION_COOKIE) else {
        return false;
    };
    match state.auth.get_session(&token).await {
        Ok(Some(_)) => {
            let _ = state.auth.touch_session(&token).await;
            true
        }
        _ => false,
    }
}

fn redirect_found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn percent_decode_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&path[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/login.html"));
        assert!(is_public_path("/css/site.css"));
        assert!(is_public_path("/fonts/inter.woff2"));
        assert!(is_public_path("/favicon.svg"));
        assert!(!is_public_path("/index.html"));
        assert!(!is_public_path("/api/secret"));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type("/index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("/app.js"), "application/javascript");
        assert_eq!(content_type("/data.bin"), "application/octet-stream");
        assert_eq!(content_type("noextension"), "application/octet-stream");
    }
}
