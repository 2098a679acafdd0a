//! Authentication endpoints: status, CSRF issuance, login, logout.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use dawn_core::ports::auth_store::{AuditEvent, NewAuthSession};
use dawn_core::services::passwords;
use dawn_core::services::rate_limit::normalize_ip;

use crate::error::HttpError;
use crate::extract::{ClientIp, cookie_value};
use crate::gateway::static_files::SESSION_COOKIE;
use crate::state::AppState;

/// Login request body cap; excess is silently truncated.
const LOGIN_BODY_CAP: usize = 4 * 1024;

/// Consecutive failures before a lockout is applied.
const LOCKOUT_THRESHOLD: u32 = 5;

/// Lockout duration once the threshold is crossed.
const LOCKOUT_MINUTES: i64 = 15;

/// Auth-cookie lifetime, mirrored in `Max-Age`.
const COOKIE_MAX_AGE_SECS: u64 = 86_400;

#[derive(Debug, Deserialize)]
struct LoginRequest {
    csrf_token: String,
    username: String,
    password: String,
}

/// `GET /api/auth/status`
pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = cookie_value(&headers, SESSION_COOKIE) else {
        return Json(json!({ "authenticated": false })).into_response();
    };
    match state.auth.get_session(&token).await {
        Ok(Some(session)) => Json(json!({
            "authenticated": true,
            "username": session.username,
            "is_admin": session.is_admin,
        }))
        .into_response(),
        _ => Json(json!({ "authenticated": false })).into_response(),
    }
}

/// `GET /api/auth/csrf`: issue a fresh single-use token.
///
/// Rate limited per normalized IP; the response must never be cached.
pub async fn csrf(State(state): State<AppState>, ip: ClientIp) -> Result<Response, HttpError> {
    if !state.csrf_limiter.check(&ip.0) {
        warn!(ip = %normalize_ip(&ip.0), "csrf issuance rate limited");
        return Err(HttpError::RateLimited("Too many token requests".to_string()));
    }

    let token = state.csrf.issue().map_err(|e| {
        warn!(error = %e, "csrf token issuance failed");
        HttpError::Internal("Token issuance failed".to_string())
    })?;

    Ok((
        [
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, private",
            ),
            (header::PRAGMA, "no-cache"),
        ],
        Json(json!({ "csrf_token": token })),
    )
        .into_response())
}

fn login_failure(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "success": false, "error": error }))).into_response()
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    ip: ClientIp,
    headers: HeaderMap,
    body: Body,
) -> Response {
    // In-memory limiter first: it is cheap and covers credential stuffing
    // from one source regardless of target account.
    if !state.login_limiter.check(&ip.0) {
        warn!(ip = %normalize_ip(&ip.0), "RATE_LIMITED");
        let _ = state
            .auth
            .record_audit_event(AuditEvent::RateLimited {
                ip: normalize_ip(&ip.0),
            })
            .await;
        return login_failure(StatusCode::TOO_MANY_REQUESTS, "Too many attempts");
    }

    let Some(request) = read_login_body(body).await else {
        return login_failure(StatusCode::BAD_REQUEST, "Malformed request");
    };

    // CSRF: verify the HMAC binding, then burn the nonce *before* touching
    // credentials so a replayed token always fails.
    let nonce = match state.csrf.verify(&request.csrf_token) {
        Ok(nonce) => nonce,
        Err(e) => {
            warn!(error = %e, "csrf verification failed");
            return login_failure(StatusCode::FORBIDDEN, "Invalid CSRF token");
        }
    };
    if state.csrf.consume(&nonce).is_err() {
        warn!(username = %request.username, "CSRF_REPLAY");
        return login_failure(StatusCode::FORBIDDEN, "Token already used. Please refresh.");
    }

    // Persistent failure counter (per username, survives the in-memory
    // limiter's window).
    if let Ok(failures) = state.auth.failure_count(&request.username).await {
        if failures >= LOCKOUT_THRESHOLD
            && matches!(state.auth.lockout_until(&request.username).await, Ok(Some(until)) if until > chrono::Utc::now())
        {
            return login_failure(StatusCode::TOO_MANY_REQUESTS, "Account temporarily locked");
        }
    }

    let user = match state.auth.get_user(&request.username).await {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "auth store unavailable");
            return login_failure(StatusCode::INTERNAL_SERVER_ERROR, "Auth store unavailable");
        }
    };

    let Some(user) = user else {
        // Unknown user: burn one verification anyway so the response time
        // matches a wrong-password attempt.
        passwords::equalize_timing(&request.password);
        info!(username = %request.username, "login failed: unknown user");
        let _ = state
            .auth
            .record_audit_event(AuditEvent::LoginFailure {
                username: request.username.clone(),
                ip: normalize_ip(&ip.0),
            })
            .await;
        return login_failure(StatusCode::UNAUTHORIZED, "Invalid credentials");
    };

    if user.locked {
        return login_failure(StatusCode::FORBIDDEN, "Account locked");
    }

    // Failure lockout: enforce while active, reset once expired.
    match state.auth.lockout_until(&user.username).await {
        Ok(Some(until)) if until > chrono::Utc::now() => {
            return login_failure(StatusCode::FORBIDDEN, "Account temporarily locked");
        }
        Ok(Some(_)) => {
            let _ = state.auth.clear_lockout(&user.username).await;
            let _ = state.auth.clear_failures(&user.username).await;
        }
        _ => {}
    }

    if !passwords::verify_password(&user.password_hash, &request.password) {
        let failures = state.auth.record_failure(&user.username).await.unwrap_or(0);
        if failures >= LOCKOUT_THRESHOLD {
            let until = chrono::Utc::now() + chrono::Duration::minutes(LOCKOUT_MINUTES);
            let _ = state.auth.set_lockout(&user.username, until).await;
            let _ = state
                .auth
                .record_audit_event(AuditEvent::Lockout {
                    username: user.username.clone(),
                })
                .await;
        }
        info!(username = %user.username, failures, "login failed: bad password");
        let _ = state
            .auth
            .record_audit_event(AuditEvent::LoginFailure {
                username: user.username.clone(),
                ip: normalize_ip(&ip.0),
            })
            .await;
        return login_failure(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }

    // Success: mint the cookie token from the OS RNG. No weak fallback:
    // a dry entropy source fails the login.
    let Some(token) = generate_session_token() else {
        warn!("secure randomness unavailable for session token");
        return login_failure(StatusCode::INTERNAL_SERVER_ERROR, "Token generation failed");
    };

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if let Err(e) = state
        .auth
        .create_session(NewAuthSession {
            token: token.clone(),
            user_id: user.id,
            username: user.username.clone(),
            is_admin: user.is_admin,
            issued_ip: normalize_ip(&ip.0),
            user_agent,
        })
        .await
    {
        warn!(error = %e, "auth session creation failed");
        return login_failure(StatusCode::INTERNAL_SERVER_ERROR, "Auth store unavailable");
    }

    let _ = state.auth.clear_failures(&user.username).await;
    let _ = state.auth.clear_lockout(&user.username).await;
    state.login_limiter.reset(&ip.0);
    let _ = state
        .auth
        .record_audit_event(AuditEvent::LoginSuccess {
            username: user.username.clone(),
            ip: normalize_ip(&ip.0),
        })
        .await;
    info!(username = %user.username, "login succeeded");

    let cookie = format!(
        "{SESSION_COOKIE}={token}; HttpOnly; Secure; SameSite=Strict; Max-Age={COOKIE_MAX_AGE_SECS}"
    );
    (
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "success": true,
            "username": user.username,
            "is_admin": user.is_admin,
        })),
    )
        .into_response()
}

/// `POST /api/auth/logout`
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = cookie_value(&headers, SESSION_COOKIE) {
        if let Ok(Some(session)) = state.auth.get_session(&token).await {
            let _ = state
                .auth
                .record_audit_event(AuditEvent::Logout {
                    username: session.username,
                })
                .await;
        }
        let _ = state.auth.delete_session(&token).await;
    }
    let cookie = format!("{SESSION_COOKIE}=; HttpOnly; Secure; SameSite=Strict; Max-Age=0");
    (
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "success": true })),
    )
        .into_response()
}

/// Accumulate the login body up to the cap, truncating excess, then parse.
async fn read_login_body(body: Body) -> Option<LoginRequest> {
    let mut collected: Vec<u8> = Vec::with_capacity(512);
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.ok()?;
        let room = LOGIN_BODY_CAP.saturating_sub(collected.len());
        if room == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    serde_json::from_slice(&collected).ok()
}

/// 32 hex characters from 16 cryptographically secure random bytes.
fn generate_session_token() -> Option<String> {
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.try_fill_bytes(&mut raw).ok()?;
    Some(raw.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_shape() {
        let token = generate_session_token().unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
