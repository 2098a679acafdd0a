//! SmartThings OAuth callback relay.
//!
//! The OAuth provider redirects the popup here; the page forwards the query
//! parameters to the opener window and closes itself. No server-side state
//! is touched; the WebSocket flow picks the parameters up from the opener.

use axum::http::header;
use axum::response::{IntoResponse, Response};

const CALLBACK_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>SmartThings Authorization</title></head>
<body>
<p>Completing authorization&hellip;</p>
<script>
  (function () {
    var params = {};
    new URLSearchParams(window.location.search).forEach(function (value, key) {
      params[key] = value;
    });
    if (window.opener) {
      window.opener.postMessage({ type: "smartthings-oauth", params: params }, window.location.origin);
      window.close();
    } else {
      document.body.textContent = "Authorization complete. You can close this window.";
    }
  })();
</script>
</body>
</html>
"#;

/// `GET /smartthings/callback`
pub async fn callback() -> Response {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        CALLBACK_PAGE,
    )
        .into_response()
}
