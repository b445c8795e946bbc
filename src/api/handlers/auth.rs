//! Login, session and logout endpoints.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{
        header::{RETRY_AFTER, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc};
use tracing::error;

use super::{extract_session_token, request_context};
use crate::api::{
    types::{ErrorResponse, LoginBody, LoginResponse, SessionResponse},
    AppState,
};
use crate::guard::{AuthError, LoginRequest, SessionStatus};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginBody,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = LoginResponse),
        (status = 400, description = "Missing or malformed email or password", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 429, description = "Too many failed attempts", body = ErrorResponse),
        (status = 503, description = "Login temporarily unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginBody>>,
) -> Response {
    let context = request_context(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_proxy_headers,
    );
    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let request = LoginRequest {
        email: body.email,
        password: SecretString::from(body.password),
    };

    match state.auth.login(request, &context).await {
        Ok(outcome) => {
            let mut response_headers = HeaderMap::new();
            insert_cookie(&mut response_headers, &outcome.cookie);
            let body = LoginResponse {
                user: outcome.user.into(),
                token: outcome.token,
            };
            (StatusCode::OK, response_headers, Json(body)).into_response()
        }
        Err(err) => auth_error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
) -> Response {
    let context = request_context(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_proxy_headers,
    );
    let token = extract_session_token(&headers);

    match state.auth.check_session(token.as_deref(), &context).await {
        SessionStatus::Authenticated { user, anomaly } => {
            let body = SessionResponse {
                user: user.into(),
                origin_changed: anomaly,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        SessionStatus::Unauthenticated { clear_cookie } => {
            let mut response_headers = HeaderMap::new();
            if let Some(cookie) = clear_cookie {
                insert_cookie(&mut response_headers, &cookie);
            }
            (StatusCode::NO_CONTENT, response_headers).into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    state: Extension<Arc<AppState>>,
) -> Response {
    let context = request_context(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_proxy_headers,
    );
    let token = extract_session_token(&headers);
    let cookie = state.auth.logout(token.as_deref(), &context).await;

    // Always clear the cookie, even if the session was already gone.
    let mut response_headers = HeaderMap::new();
    insert_cookie(&mut response_headers, &cookie);
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

fn auth_error_response(err: &AuthError) -> Response {
    let status = match err {
        AuthError::Validation => StatusCode::BAD_REQUEST,
        AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AuthError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };

    let mut headers = HeaderMap::new();
    let retry_after_seconds = match err {
        AuthError::RateLimited {
            retry_after_seconds,
            ..
        } => {
            headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_seconds));
            Some(*retry_after_seconds)
        }
        _ => None,
    };

    let body = ErrorResponse {
        error: err.to_string(),
        retry_after_seconds,
    };
    (status, headers, Json(body)).into_response()
}

fn insert_cookie(headers: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            headers.insert(SET_COOKIE, value);
        }
        Err(err) => error!("Failed to build Set-Cookie header: {err}"),
    }
}
